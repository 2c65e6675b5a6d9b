//! A closed model round trip and the content it produced.

use serde::{Deserialize, Serialize};

use super::generation::{
    CallWarning, FinishReason, GeneratedFile, RequestMetadata, ResponseMetadata, Source,
};
use super::message::{ContentPart, ModelMessage, ToolCallPart, ToolResultPart};
use super::stream::ProviderMetadata;
use super::usage::Usage;

/// A tool call as recorded in a step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallRecord {
    pub tool_call_id: String,
    pub tool_name: String,
    pub input: serde_json::Value,
    #[serde(default)]
    pub dynamic: bool,
    #[serde(default)]
    pub provider_executed: bool,
    #[serde(default)]
    pub invalid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// How a tool call ended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ToolOutcome {
    Result { output: serde_json::Value },
    Error { error_text: String },
    Denied { reason: Option<String> },
}

/// A final tool output as recorded in a step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolOutputRecord {
    pub tool_call_id: String,
    pub tool_name: String,
    pub input: serde_json::Value,
    pub outcome: ToolOutcome,
    #[serde(default)]
    pub dynamic: bool,
    #[serde(default)]
    pub provider_executed: bool,
}

impl ToolOutputRecord {
    /// The value fed back to the model for this output.
    pub fn model_output(&self) -> (serde_json::Value, bool) {
        match &self.outcome {
            ToolOutcome::Result { output } => (output.clone(), false),
            ToolOutcome::Error { error_text } => (serde_json::json!({ "error": error_text }), true),
            ToolOutcome::Denied { reason } => (
                serde_json::json!({ "type": "execution-denied", "reason": reason }),
                true,
            ),
        }
    }
}

/// One piece of content produced during a step, in production order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StepContent {
    #[serde(rename_all = "camelCase")]
    Text {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        provider_metadata: Option<ProviderMetadata>,
    },
    #[serde(rename_all = "camelCase")]
    Reasoning {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        provider_metadata: Option<ProviderMetadata>,
    },
    ToolCall(ToolCallRecord),
    #[serde(rename_all = "camelCase")]
    ToolApprovalRequest {
        approval_id: String,
        tool_call_id: String,
    },
    ToolOutput(ToolOutputRecord),
    File(GeneratedFile),
    Source(Source),
}

/// One complete model round trip. Never mutated after it closes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub step_number: usize,
    pub content: Vec<StepContent>,
    pub finish_reason: FinishReason,
    pub usage: Usage,
    #[serde(default)]
    pub warnings: Vec<CallWarning>,
    #[serde(default)]
    pub request: RequestMetadata,
    pub response: ResponseMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_metadata: Option<ProviderMetadata>,
}

impl Step {
    /// Concatenated text of the step.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| match c {
                StepContent::Text { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Concatenated reasoning of the step, if any was produced.
    pub fn reasoning_text(&self) -> Option<String> {
        let parts: Vec<&str> = self
            .content
            .iter()
            .filter_map(|c| match c {
                StepContent::Reasoning { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        (!parts.is_empty()).then(|| parts.concat())
    }

    pub fn tool_calls(&self) -> impl Iterator<Item = &ToolCallRecord> {
        self.content.iter().filter_map(|c| match c {
            StepContent::ToolCall(call) => Some(call),
            _ => None,
        })
    }

    pub fn tool_outputs(&self) -> impl Iterator<Item = &ToolOutputRecord> {
        self.content.iter().filter_map(|c| match c {
            StepContent::ToolOutput(output) => Some(output),
            _ => None,
        })
    }

    /// Calls the caller is responsible for (not executed by the provider).
    pub fn client_tool_calls(&self) -> impl Iterator<Item = &ToolCallRecord> {
        self.tool_calls().filter(|call| !call.provider_executed)
    }

    /// Whether every client tool call of this step has an output to feed back.
    pub fn client_tool_calls_resolved(&self) -> bool {
        self.client_tool_calls().all(|call| {
            self.tool_outputs()
                .any(|output| output.tool_call_id == call.tool_call_id)
        })
    }

    /// Messages to append to the history before the next step.
    pub fn response_messages(&self) -> Vec<ModelMessage> {
        let mut assistant = Vec::new();
        let mut tool = Vec::new();

        for content in &self.content {
            match content {
                StepContent::Text { text, .. } if !text.is_empty() => {
                    assistant.push(ContentPart::Text { text: text.clone() })
                }
                StepContent::Reasoning { text, .. } => {
                    assistant.push(ContentPart::Reasoning { text: text.clone() })
                }
                StepContent::File(file) => assistant.push(ContentPart::File(file.clone())),
                StepContent::ToolCall(call) => assistant.push(ContentPart::ToolCall(ToolCallPart {
                    tool_call_id: call.tool_call_id.clone(),
                    tool_name: call.tool_name.clone(),
                    input: call.input.clone(),
                    provider_executed: call.provider_executed,
                })),
                StepContent::ToolOutput(output) => {
                    let (value, is_error) = output.model_output();
                    let part = ToolResultPart {
                        tool_call_id: output.tool_call_id.clone(),
                        tool_name: output.tool_name.clone(),
                        output: value,
                        is_error,
                    };
                    // Provider-executed results belong to the assistant turn.
                    if output.provider_executed {
                        assistant.push(ContentPart::ToolResult(part));
                    } else {
                        tool.push(part);
                    }
                }
                _ => {}
            }
        }

        let mut messages = Vec::new();
        if !assistant.is_empty() {
            messages.push(ModelMessage::assistant_parts(assistant));
        }
        if !tool.is_empty() {
            messages.push(ModelMessage::tool(tool));
        }
        messages
    }
}
