//! Human-readable log lines for a run.

use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat, Utc};
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};

use crate::types::{CallWarning, StepEvent};

/// Options for [`log_stream`].
#[derive(Debug, Clone)]
pub struct LogOptions {
    /// Start each line with an RFC 3339 timestamp in brackets.
    pub include_timestamps: bool,
    /// Written before each line, after the timestamp.
    pub prefix: Option<String>,
    pub line_terminator: String,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            include_timestamps: false,
            prefix: None,
            line_terminator: "\n".to_string(),
        }
    }
}

impl LogOptions {
    pub fn with_timestamps(mut self) -> Self {
        self.include_timestamps = true;
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn with_line_terminator(mut self, terminator: impl Into<String>) -> Self {
        self.line_terminator = terminator.into();
        self
    }
}

/// Turns events into log lines, tracking the current step.
#[derive(Debug)]
pub struct LogFormatter {
    options: LogOptions,
    step: Option<usize>,
    tool_names: HashMap<String, String>,
}

impl LogFormatter {
    pub fn new(options: LogOptions) -> Self {
        Self {
            options,
            step: None,
            tool_names: HashMap::new(),
        }
    }

    /// Lines for `event`, timestamped now.
    pub fn format(&mut self, event: &StepEvent) -> Vec<String> {
        self.format_at(event, Utc::now())
    }

    /// Lines for `event`, timestamped with `now`. Events with nothing worth
    /// logging produce no lines.
    pub fn format_at(&mut self, event: &StepEvent, now: DateTime<Utc>) -> Vec<String> {
        self.messages(event)
            .into_iter()
            .map(|message| self.decorate(&message, now))
            .collect()
    }

    fn messages(&mut self, event: &StepEvent) -> Vec<String> {
        let message = match event {
            StepEvent::Start => {
                self.step = None;
                "stream:start".to_string()
            }
            StepEvent::StartStep { warnings, .. } => {
                let step = self.step.map_or(0, |s| s + 1);
                self.step = Some(step);
                let mut lines = vec![format!("step {step}:start")];
                lines.extend(
                    warnings
                        .iter()
                        .map(|w| format!("step {step}:warning {}", describe_warning(w))),
                );
                return lines;
            }
            StepEvent::TextDelta { id, delta, .. } => {
                format!("{}:text[{id}] += {delta}", self.step_label())
            }
            StepEvent::TextEnd { id, .. } => format!("{}:text[{id}] end", self.step_label()),
            StepEvent::ReasoningDelta { id, delta, .. } => {
                format!("{}:reasoning[{id}] += {delta}", self.step_label())
            }
            StepEvent::ReasoningEnd { id, .. } => {
                format!("{}:reasoning[{id}] end", self.step_label())
            }
            StepEvent::ToolInputStart {
                tool_call_id,
                tool_name,
                ..
            } => {
                self.tool_names
                    .insert(tool_call_id.clone(), tool_name.clone());
                return Vec::new();
            }
            StepEvent::ToolInputDelta {
                tool_call_id,
                delta,
                ..
            } => format!("{}:tool-input[{tool_call_id}] += {delta}", self.step_label()),
            StepEvent::ToolCall {
                tool_call_id,
                tool_name,
                input,
                ..
            } => {
                self.tool_names
                    .insert(tool_call_id.clone(), tool_name.clone());
                format!(
                    "{}:tool-call {tool_name} [{tool_call_id}] input={input}",
                    self.step_label()
                )
            }
            StepEvent::ToolResult {
                tool_call_id,
                tool_name,
                output,
                preliminary,
                ..
            } => {
                let prelim = if *preliminary { "(prelim) " } else { "" };
                format!(
                    "{}:tool-result {prelim}{tool_name} [{tool_call_id}] result={output}",
                    self.step_label()
                )
            }
            StepEvent::ToolOutputError {
                tool_call_id,
                error_text,
                ..
            } => format!(
                "{}:tool-error [{tool_call_id}] err={error_text}",
                self.step_label()
            ),
            StepEvent::ToolApprovalRequest {
                approval_id,
                tool_call_id,
            } => {
                let tool = self
                    .tool_names
                    .get(tool_call_id)
                    .map_or("?", String::as_str);
                format!(
                    "{}:tool-approval-request id={approval_id} tool={tool}",
                    self.step_label()
                )
            }
            StepEvent::ToolApprovalResponse {
                approval_id,
                approved,
                ..
            } => format!(
                "{}:tool-approval-response id={approval_id} approved={approved}",
                self.step_label()
            ),
            StepEvent::ToolOutputDenied { tool_call_id, .. } => {
                format!("{}:tool-output-denied [{tool_call_id}]", self.step_label())
            }
            StepEvent::File(file) => format!(
                "{}:file {} ({} bytes)",
                self.step_label(),
                file.media_type,
                file.data.len()
            ),
            StepEvent::Source(source) => {
                let target = source
                    .url
                    .as_deref()
                    .or(source.title.as_deref())
                    .unwrap_or(&source.id);
                format!("{}:source {target}", self.step_label())
            }
            StepEvent::FinishStep { finish_reason, .. } => {
                format!("{}:finish reason={finish_reason}", self.step_label())
            }
            StepEvent::Finish {
                finish_reason,
                total_usage,
            } => format!(
                "stream:finish reason={finish_reason} input={} output={} total={}",
                total_usage.input_tokens, total_usage.output_tokens, total_usage.total_tokens
            ),
            StepEvent::Abort => "stream:abort".to_string(),
            StepEvent::Error { error_text } => format!("stream:error {error_text}"),
            StepEvent::TextStart { .. }
            | StepEvent::ReasoningStart { .. }
            | StepEvent::ToolInputEnd { .. }
            | StepEvent::Data { .. } => return Vec::new(),
        };
        vec![message]
    }

    fn step_label(&self) -> String {
        match self.step {
            Some(step) => format!("step {step}"),
            None => "step -".to_string(),
        }
    }

    fn decorate(&self, message: &str, now: DateTime<Utc>) -> String {
        let mut line = String::new();
        if self.options.include_timestamps {
            line.push('[');
            line.push_str(&now.to_rfc3339_opts(SecondsFormat::Millis, true));
            line.push_str("] ");
        }
        if let Some(prefix) = self.options.prefix.as_deref().filter(|p| !p.is_empty()) {
            line.push_str(prefix);
            line.push(' ');
        }
        line.push_str(message);
        line.push_str(&self.options.line_terminator);
        line
    }
}

fn describe_warning(warning: &CallWarning) -> String {
    match warning {
        CallWarning::UnsupportedSetting { setting, details } => match details {
            Some(details) => format!("unsupported-setting({setting}): {details}"),
            None => format!("unsupported-setting({setting})"),
        },
        CallWarning::UnsupportedTool { tool_name, details } => match details {
            Some(details) => format!("unsupported-tool({tool_name}): {details}"),
            None => format!("unsupported-tool({tool_name})"),
        },
        CallWarning::Other { message } => format!("other({message})"),
    }
}

/// One line per loggable event, each ending with the configured terminator.
pub fn log_stream<S>(events: S, options: LogOptions) -> BoxStream<'static, String>
where
    S: Stream<Item = StepEvent> + Send + 'static,
{
    let mut formatter = LogFormatter::new(options);
    events
        .flat_map(move |event| futures::stream::iter(formatter.format(&event)))
        .boxed()
}
