//! The provider-agnostic event emitted by a streaming run.
//!
//! `StepEvent` is both the in-memory representation and the wire format: its serde
//! attributes produce the `{"type": "text-delta", ...}` objects written by the SSE
//! projection.

use serde::{Deserialize, Serialize};

use super::generation::{
    CallWarning, FinishReason, GeneratedFile, RequestMetadata, ResponseMetadata, Source,
};
use super::usage::Usage;

/// Opaque provider-specific metadata attached to an event.
pub type ProviderMetadata = serde_json::Value;

/// One event of a streaming run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StepEvent {
    Start,
    #[serde(rename_all = "camelCase")]
    StartStep {
        #[serde(default)]
        request: RequestMetadata,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        warnings: Vec<CallWarning>,
    },
    #[serde(rename_all = "camelCase")]
    TextStart {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        provider_metadata: Option<ProviderMetadata>,
    },
    #[serde(rename_all = "camelCase")]
    TextDelta {
        id: String,
        delta: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        provider_metadata: Option<ProviderMetadata>,
    },
    #[serde(rename_all = "camelCase")]
    TextEnd {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        provider_metadata: Option<ProviderMetadata>,
    },
    #[serde(rename_all = "camelCase")]
    ReasoningStart {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        provider_metadata: Option<ProviderMetadata>,
    },
    #[serde(rename_all = "camelCase")]
    ReasoningDelta {
        id: String,
        delta: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        provider_metadata: Option<ProviderMetadata>,
    },
    #[serde(rename_all = "camelCase")]
    ReasoningEnd {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        provider_metadata: Option<ProviderMetadata>,
    },
    #[serde(rename_all = "camelCase")]
    ToolInputStart {
        tool_call_id: String,
        tool_name: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        provider_executed: bool,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        dynamic: bool,
    },
    #[serde(rename_all = "camelCase")]
    ToolInputDelta {
        tool_call_id: String,
        delta: String,
        /// Best-effort parse of everything received so far.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        partial_input: Option<serde_json::Value>,
    },
    #[serde(rename_all = "camelCase")]
    ToolInputEnd { tool_call_id: String },
    #[serde(rename_all = "camelCase")]
    ToolCall {
        tool_call_id: String,
        tool_name: String,
        input: serde_json::Value,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        dynamic: bool,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        provider_executed: bool,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        invalid: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    ToolApprovalRequest {
        approval_id: String,
        tool_call_id: String,
    },
    #[serde(rename_all = "camelCase")]
    ToolApprovalResponse {
        approval_id: String,
        approved: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    ToolResult {
        tool_call_id: String,
        tool_name: String,
        output: serde_json::Value,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        preliminary: bool,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        dynamic: bool,
    },
    #[serde(rename_all = "camelCase")]
    ToolOutputError {
        tool_call_id: String,
        tool_name: String,
        error_text: String,
    },
    #[serde(rename_all = "camelCase")]
    ToolOutputDenied {
        tool_call_id: String,
        tool_name: String,
    },
    File(GeneratedFile),
    Source(Source),
    #[serde(rename_all = "camelCase")]
    Data {
        data_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        data: serde_json::Value,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        transient: bool,
    },
    #[serde(rename_all = "camelCase")]
    Error { error_text: String },
    #[serde(rename_all = "camelCase")]
    FinishStep {
        finish_reason: FinishReason,
        usage: Usage,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        response: Option<ResponseMetadata>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        provider_metadata: Option<ProviderMetadata>,
    },
    #[serde(rename_all = "camelCase")]
    Finish {
        finish_reason: FinishReason,
        total_usage: Usage,
    },
    Abort,
}

impl StepEvent {
    /// `Finish` and `Error` end a run; nothing is delivered after them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finish { .. } | Self::Error { .. })
    }

    /// The wire tag of this event, e.g. `"text-delta"`.
    pub fn type_tag(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::StartStep { .. } => "start-step",
            Self::TextStart { .. } => "text-start",
            Self::TextDelta { .. } => "text-delta",
            Self::TextEnd { .. } => "text-end",
            Self::ReasoningStart { .. } => "reasoning-start",
            Self::ReasoningDelta { .. } => "reasoning-delta",
            Self::ReasoningEnd { .. } => "reasoning-end",
            Self::ToolInputStart { .. } => "tool-input-start",
            Self::ToolInputDelta { .. } => "tool-input-delta",
            Self::ToolInputEnd { .. } => "tool-input-end",
            Self::ToolCall { .. } => "tool-call",
            Self::ToolApprovalRequest { .. } => "tool-approval-request",
            Self::ToolApprovalResponse { .. } => "tool-approval-response",
            Self::ToolResult { .. } => "tool-result",
            Self::ToolOutputError { .. } => "tool-output-error",
            Self::ToolOutputDenied { .. } => "tool-output-denied",
            Self::File(_) => "file",
            Self::Source(_) => "source",
            Self::Data { .. } => "data",
            Self::Error { .. } => "error",
            Self::FinishStep { .. } => "finish-step",
            Self::Finish { .. } => "finish",
            Self::Abort => "abort",
        }
    }

    /// The tool call this event belongs to, if any.
    pub fn tool_call_id(&self) -> Option<&str> {
        match self {
            Self::ToolInputStart { tool_call_id, .. }
            | Self::ToolInputDelta { tool_call_id, .. }
            | Self::ToolInputEnd { tool_call_id }
            | Self::ToolCall { tool_call_id, .. }
            | Self::ToolApprovalRequest { tool_call_id, .. }
            | Self::ToolResult { tool_call_id, .. }
            | Self::ToolOutputError { tool_call_id, .. }
            | Self::ToolOutputDenied { tool_call_id, .. } => Some(tool_call_id),
            _ => None,
        }
    }

    pub(crate) fn error(error_text: impl Into<String>) -> Self {
        Self::Error {
            error_text: error_text.into(),
        }
    }
}
