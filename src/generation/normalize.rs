//! Turns provider stream parts into run events.
//!
//! One normalizer lives for one step. It tracks which text and reasoning blocks
//! are open and accumulates streamed tool input so complete calls can be parsed,
//! validated and matched against the tool set.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::provider::{error_text, StreamPart};
use crate::tools::arguments::parse_tool_input;
use crate::tools::validation::validate_input;
use crate::tools::{Tool, ToolIdentity, ToolSet};
use crate::types::{CallWarning, FinishReason, ProviderMetadata, StepEvent, ToolCallRecord, Usage};
use crate::util::partial_json::parse_partial_json;

/// A complete tool call, resolved against the tool set.
#[derive(Clone)]
pub(crate) struct ResolvedCall {
    pub record: ToolCallRecord,
    /// The matched tool, when there is one and the input is valid.
    pub tool: Option<Arc<dyn Tool>>,
}

impl ResolvedCall {
    pub fn event(&self) -> StepEvent {
        let r = &self.record;
        StepEvent::ToolCall {
            tool_call_id: r.tool_call_id.clone(),
            tool_name: r.tool_name.clone(),
            input: r.input.clone(),
            dynamic: r.dynamic,
            provider_executed: r.provider_executed,
            invalid: r.invalid,
            error: r.error.clone(),
        }
    }
}

/// What a part turned into.
pub(crate) enum Normalized {
    Event(StepEvent),
    StreamStart(Vec<CallWarning>),
    Response {
        id: Option<String>,
        model_id: Option<String>,
        timestamp: Option<DateTime<Utc>>,
    },
    Call(ResolvedCall),
    Finish {
        finish_reason: FinishReason,
        usage: Usage,
        provider_metadata: Option<ProviderMetadata>,
    },
    Failure(String),
}

struct ToolInput {
    tool_name: String,
    raw: String,
    provider_executed: bool,
}

pub(crate) struct EventNormalizer {
    tools: ToolSet,
    open_text: Vec<String>,
    open_reasoning: Vec<String>,
    /// Blocks that already ended this step. Late deltas for them are dropped.
    closed_text: HashSet<String>,
    closed_reasoning: HashSet<String>,
    inputs: HashMap<String, ToolInput>,
    input_order: Vec<String>,
    called: HashSet<String>,
}

impl EventNormalizer {
    pub fn new(tools: ToolSet) -> Self {
        Self {
            tools,
            open_text: Vec::new(),
            open_reasoning: Vec::new(),
            closed_text: HashSet::new(),
            closed_reasoning: HashSet::new(),
            inputs: HashMap::new(),
            input_order: Vec::new(),
            called: HashSet::new(),
        }
    }

    pub fn push(&mut self, part: StreamPart) -> Vec<Normalized> {
        use Normalized::Event;

        match part {
            StreamPart::StreamStart { warnings } => vec![Normalized::StreamStart(warnings)],
            StreamPart::ResponseMetadata {
                id,
                model_id,
                timestamp,
            } => vec![Normalized::Response {
                id,
                model_id,
                timestamp,
            }],

            StreamPart::TextStart {
                id,
                provider_metadata,
            } => {
                if self.open_text.contains(&id) {
                    tracing::debug!(id = %id, "duplicate text start ignored");
                    return Vec::new();
                }
                self.closed_text.remove(&id);
                self.open_text.push(id.clone());
                vec![Event(StepEvent::TextStart {
                    id,
                    provider_metadata,
                })]
            }
            StreamPart::TextDelta {
                id,
                delta,
                provider_metadata,
            } => {
                if self.closed_text.contains(&id) {
                    tracing::warn!(id = %id, "text delta after end dropped");
                    return Vec::new();
                }
                let mut out = Vec::new();
                if !self.open_text.contains(&id) {
                    self.open_text.push(id.clone());
                    out.push(Event(StepEvent::TextStart {
                        id: id.clone(),
                        provider_metadata: None,
                    }));
                }
                out.push(Event(StepEvent::TextDelta {
                    id,
                    delta,
                    provider_metadata,
                }));
                out
            }
            StreamPart::TextEnd {
                id,
                provider_metadata,
            } => {
                if !remove(&mut self.open_text, &id) {
                    tracing::warn!(id = %id, "text end without matching start dropped");
                    return Vec::new();
                }
                self.closed_text.insert(id.clone());
                vec![Event(StepEvent::TextEnd {
                    id,
                    provider_metadata,
                })]
            }

            StreamPart::ReasoningStart {
                id,
                provider_metadata,
            } => {
                if self.open_reasoning.contains(&id) {
                    tracing::debug!(id = %id, "duplicate reasoning start ignored");
                    return Vec::new();
                }
                self.closed_reasoning.remove(&id);
                self.open_reasoning.push(id.clone());
                vec![Event(StepEvent::ReasoningStart {
                    id,
                    provider_metadata,
                })]
            }
            StreamPart::ReasoningDelta {
                id,
                delta,
                provider_metadata,
            } => {
                if self.closed_reasoning.contains(&id) {
                    tracing::warn!(id = %id, "reasoning delta after end dropped");
                    return Vec::new();
                }
                let mut out = Vec::new();
                if !self.open_reasoning.contains(&id) {
                    self.open_reasoning.push(id.clone());
                    out.push(Event(StepEvent::ReasoningStart {
                        id: id.clone(),
                        provider_metadata: None,
                    }));
                }
                out.push(Event(StepEvent::ReasoningDelta {
                    id,
                    delta,
                    provider_metadata,
                }));
                out
            }
            StreamPart::ReasoningEnd {
                id,
                provider_metadata,
            } => {
                if !remove(&mut self.open_reasoning, &id) {
                    tracing::warn!(id = %id, "reasoning end without matching start dropped");
                    return Vec::new();
                }
                self.closed_reasoning.insert(id.clone());
                vec![Event(StepEvent::ReasoningEnd {
                    id,
                    provider_metadata,
                })]
            }

            StreamPart::ToolInputStart {
                id,
                tool_name,
                provider_executed,
            } => {
                if self.inputs.contains_key(&id) {
                    tracing::debug!(tool_call_id = %id, "duplicate tool input start ignored");
                    return Vec::new();
                }
                let dynamic = self.is_dynamic_name(&tool_name);
                self.inputs.insert(
                    id.clone(),
                    ToolInput {
                        tool_name: tool_name.clone(),
                        raw: String::new(),
                        provider_executed,
                    },
                );
                self.input_order.push(id.clone());
                vec![Event(StepEvent::ToolInputStart {
                    tool_call_id: id,
                    tool_name,
                    provider_executed,
                    dynamic,
                })]
            }
            StreamPart::ToolInputDelta { id, delta } => {
                let Some(input) = self.inputs.get_mut(&id) else {
                    tracing::warn!(tool_call_id = %id, "tool input delta without start dropped");
                    return Vec::new();
                };
                input.raw.push_str(&delta);
                // Failing to parse a prefix is expected; the value is just absent.
                let partial_input = parse_partial_json(Some(&input.raw)).value;
                vec![Event(StepEvent::ToolInputDelta {
                    tool_call_id: id,
                    delta,
                    partial_input,
                })]
            }
            StreamPart::ToolInputEnd { id } => {
                if !self.inputs.contains_key(&id) {
                    tracing::warn!(tool_call_id = %id, "tool input end without start dropped");
                    return Vec::new();
                }
                vec![Event(StepEvent::ToolInputEnd { tool_call_id: id })]
            }
            StreamPart::ToolCall {
                tool_call_id,
                tool_name,
                input,
                provider_executed,
            } => {
                if !self.called.insert(tool_call_id.clone()) {
                    tracing::warn!(tool_call_id = %tool_call_id, "duplicate tool call dropped");
                    return Vec::new();
                }
                let raw = match self.inputs.get(&tool_call_id) {
                    Some(streamed) if input.trim().is_empty() => streamed.raw.clone(),
                    _ => input,
                };
                vec![Normalized::Call(self.resolve(
                    tool_call_id,
                    tool_name,
                    &raw,
                    provider_executed,
                ))]
            }
            StreamPart::ToolResult {
                tool_call_id,
                tool_name,
                result,
                is_error,
                preliminary,
            } => {
                let event = if is_error {
                    StepEvent::ToolOutputError {
                        tool_call_id,
                        tool_name,
                        error_text: error_text(&result),
                    }
                } else {
                    StepEvent::ToolResult {
                        dynamic: self.is_dynamic_name(&tool_name),
                        tool_call_id,
                        tool_name,
                        output: result,
                        preliminary,
                    }
                };
                vec![Event(event)]
            }

            StreamPart::File(file) => vec![Event(StepEvent::File(file))],
            StreamPart::Source(source) => vec![Event(StepEvent::Source(source))],

            StreamPart::Finish {
                finish_reason,
                usage,
                provider_metadata,
            } => {
                let mut out = self.close_open();
                out.push(Normalized::Finish {
                    finish_reason,
                    usage,
                    provider_metadata,
                });
                out
            }
            StreamPart::Error { error } => vec![Normalized::Failure(error_text(&error))],
        }
    }

    /// Close every open block and complete tool inputs that never got a call.
    pub fn close_open(&mut self) -> Vec<Normalized> {
        let mut out = Vec::new();
        for id in std::mem::take(&mut self.open_reasoning) {
            self.closed_reasoning.insert(id.clone());
            out.push(Normalized::Event(StepEvent::ReasoningEnd {
                id,
                provider_metadata: None,
            }));
        }
        for id in std::mem::take(&mut self.open_text) {
            self.closed_text.insert(id.clone());
            out.push(Normalized::Event(StepEvent::TextEnd {
                id,
                provider_metadata: None,
            }));
        }
        for id in std::mem::take(&mut self.input_order) {
            if self.called.contains(&id) {
                continue;
            }
            let Some(input) = self.inputs.remove(&id) else {
                continue;
            };
            self.called.insert(id.clone());
            out.push(Normalized::Call(self.resolve(
                id,
                input.tool_name,
                &input.raw,
                input.provider_executed,
            )));
        }
        out
    }

    fn is_dynamic_name(&self, tool_name: &str) -> bool {
        self.tools
            .get(tool_name)
            .map_or(true, |tool| tool.identity() == ToolIdentity::Dynamic)
    }

    fn resolve(
        &self,
        tool_call_id: String,
        tool_name: String,
        raw: &str,
        provider_executed: bool,
    ) -> ResolvedCall {
        let mut record = ToolCallRecord {
            tool_call_id,
            tool_name,
            input: serde_json::Value::Null,
            dynamic: false,
            provider_executed,
            invalid: false,
            error: None,
        };

        let input = match parse_tool_input(raw) {
            Ok(input) => input,
            Err(e) => {
                record.input = serde_json::Value::String(raw.to_string());
                record.dynamic = true;
                record.invalid = true;
                record.error = Some(format!(
                    "Invalid input for tool {}: {e}",
                    record.tool_name
                ));
                return ResolvedCall { record, tool: None };
            }
        };
        record.input = input;

        if provider_executed {
            return ResolvedCall { record, tool: None };
        }

        let Some(tool) = self.tools.get(&record.tool_name).cloned() else {
            tracing::warn!(
                tool_call_id = %record.tool_call_id,
                tool_name = %record.tool_name,
                available = ?self.tools.names(),
                "model called a tool outside the tool set"
            );
            record.dynamic = true;
            return ResolvedCall { record, tool: None };
        };

        if let Err(e) = validate_input(&record.tool_name, &record.input, &tool.parameters().schema) {
            record.dynamic = true;
            record.invalid = true;
            record.error = Some(e.to_string());
            return ResolvedCall { record, tool: None };
        }

        record.dynamic = tool.identity() == ToolIdentity::Dynamic;
        ResolvedCall {
            record,
            tool: Some(tool),
        }
    }
}

fn remove(open: &mut Vec<String>, id: &str) -> bool {
    match open.iter().position(|open_id| open_id == id) {
        Some(index) => {
            open.remove(index);
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{AgentTool, ToolParameters};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn tools() -> ToolSet {
        ToolSet::new().with_tool(AgentTool::new(
            "search",
            "search the web",
            ToolParameters::object().string("q", "query", true).build(),
            |_, _| async { Ok(json!("ok")) },
        ))
    }

    fn events(out: Vec<Normalized>) -> Vec<StepEvent> {
        out.into_iter()
            .filter_map(|n| match n {
                Normalized::Event(e) => Some(e),
                Normalized::Call(call) => Some(call.event()),
                _ => None,
            })
            .collect()
    }

    fn call(normalizer: &mut EventNormalizer, name: &str, input: &str) -> ResolvedCall {
        let out = normalizer.push(StreamPart::tool_call("c1", name, input));
        match out.into_iter().next() {
            Some(Normalized::Call(call)) => call,
            _ => panic!("expected a resolved call"),
        }
    }

    #[test]
    fn delta_without_start_opens_the_block() {
        let mut n = EventNormalizer::new(ToolSet::new());
        let out = events(n.push(StreamPart::text_delta("t", "Hi")));
        assert_eq!(
            out,
            vec![
                StepEvent::TextStart {
                    id: "t".into(),
                    provider_metadata: None
                },
                StepEvent::TextDelta {
                    id: "t".into(),
                    delta: "Hi".into(),
                    provider_metadata: None
                },
            ]
        );
    }

    #[test]
    fn delta_after_end_does_not_reopen_the_block() {
        let mut n = EventNormalizer::new(ToolSet::new());
        let mut out = events(n.push(StreamPart::text_start("t")));
        out.extend(events(n.push(StreamPart::text_delta("t", "Hi"))));
        out.extend(events(n.push(StreamPart::text_end("t"))));
        assert!(n.push(StreamPart::text_delta("t", " late")).is_empty());
        out.extend(events(n.close_open()));

        assert_eq!(
            out,
            vec![
                StepEvent::TextStart {
                    id: "t".into(),
                    provider_metadata: None
                },
                StepEvent::TextDelta {
                    id: "t".into(),
                    delta: "Hi".into(),
                    provider_metadata: None
                },
                StepEvent::TextEnd {
                    id: "t".into(),
                    provider_metadata: None
                },
            ]
        );
    }

    #[test]
    fn late_reasoning_delta_is_dropped_after_finish_closes_the_block() {
        let mut n = EventNormalizer::new(ToolSet::new());
        n.push(StreamPart::ReasoningDelta {
            id: "r".into(),
            delta: "thinking".into(),
            provider_metadata: None,
        });
        let closed = events(n.close_open());
        assert_eq!(
            closed,
            vec![StepEvent::ReasoningEnd {
                id: "r".into(),
                provider_metadata: None
            }]
        );
        let late = n.push(StreamPart::ReasoningDelta {
            id: "r".into(),
            delta: "more".into(),
            provider_metadata: None,
        });
        assert!(late.is_empty());
    }

    #[test]
    fn orphan_end_is_dropped() {
        let mut n = EventNormalizer::new(ToolSet::new());
        assert!(n.push(StreamPart::text_end("nope")).is_empty());
    }

    #[test]
    fn invalid_json_marks_call_invalid_and_dynamic() {
        let mut n = EventNormalizer::new(tools());
        let call = call(&mut n, "search", "{invalid");
        assert!(call.record.invalid);
        assert!(call.record.dynamic);
        assert!(call.record.error.is_some());
        assert!(call.tool.is_none());
    }

    #[test]
    fn valid_json_resolves_to_the_tool() {
        let mut n = EventNormalizer::new(tools());
        let call = call(&mut n, "search", r#"{"q":"hi"}"#);
        assert!(!call.record.invalid);
        assert!(!call.record.dynamic);
        assert_eq!(call.record.input, json!({ "q": "hi" }));
        assert!(call.tool.is_some());
    }

    #[test]
    fn schema_violation_is_invalid() {
        let mut n = EventNormalizer::new(tools());
        let call = call(&mut n, "search", r#"{"q":3}"#);
        assert!(call.record.invalid);
        assert!(call.record.error.unwrap().contains("search"));
    }

    #[test]
    fn unknown_tool_is_dynamic_but_valid() {
        let mut n = EventNormalizer::new(tools());
        let call = call(&mut n, "client_side", "{}");
        assert!(call.record.dynamic);
        assert!(!call.record.invalid);
        assert!(call.tool.is_none());
    }

    #[test]
    fn streamed_input_reports_partial_values() {
        let mut n = EventNormalizer::new(tools());
        n.push(StreamPart::ToolInputStart {
            id: "c1".into(),
            tool_name: "search".into(),
            provider_executed: false,
        });
        let out = events(n.push(StreamPart::ToolInputDelta {
            id: "c1".into(),
            delta: r#"{"q":"wea"#.into(),
        }));
        let StepEvent::ToolInputDelta { partial_input, .. } = &out[0] else {
            panic!("expected tool input delta");
        };
        assert_eq!(partial_input, &Some(json!({ "q": "wea" })));
    }

    #[test]
    fn finish_closes_blocks_and_completes_streamed_inputs() {
        let mut n = EventNormalizer::new(tools());
        n.push(StreamPart::text_start("t"));
        n.push(StreamPart::ToolInputStart {
            id: "c9".into(),
            tool_name: "search".into(),
            provider_executed: false,
        });
        n.push(StreamPart::ToolInputDelta {
            id: "c9".into(),
            delta: r#"{"q":"x"}"#.into(),
        });
        let out = n.push(StreamPart::finish(FinishReason::ToolCalls, Usage::default()));
        assert!(matches!(&out[0], Normalized::Event(StepEvent::TextEnd { id, .. }) if id == "t"));
        assert!(matches!(&out[1], Normalized::Call(c) if c.record.input == json!({ "q": "x" })));
        assert!(matches!(&out[2], Normalized::Finish { .. }));
    }

    #[test]
    fn tool_call_uses_streamed_text_when_input_is_empty() {
        let mut n = EventNormalizer::new(tools());
        n.push(StreamPart::ToolInputStart {
            id: "c1".into(),
            tool_name: "search".into(),
            provider_executed: false,
        });
        n.push(StreamPart::ToolInputDelta {
            id: "c1".into(),
            delta: r#"{"q":"rust"}"#.into(),
        });
        let call = call(&mut n, "search", "");
        assert_eq!(call.record.input, json!({ "q": "rust" }));
        // Completed calls are not synthesized again on finish.
        assert!(n.close_open().is_empty());
    }

    #[test]
    fn provider_error_result_becomes_output_error() {
        let mut n = EventNormalizer::new(ToolSet::new());
        let out = events(n.push(StreamPart::ToolResult {
            tool_call_id: "p1".into(),
            tool_name: "web_search".into(),
            result: json!("quota"),
            is_error: true,
            preliminary: false,
        }));
        assert_eq!(
            out,
            vec![StepEvent::ToolOutputError {
                tool_call_id: "p1".into(),
                tool_name: "web_search".into(),
                error_text: "quota".into()
            }]
        );
    }
}
