//! Model provider boundary.
//!
//! Providers translate their native wire format into [`StreamPart`]s. Everything
//! after that (normalization, tool execution, fan-out) is provider-agnostic.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use futures::StreamExt;

use crate::error::RociError;
use crate::tools::ToolDefinition;
use crate::types::{
    CallSettings, CallWarning, FinishReason, GeneratedFile, ModelMessage, RequestMetadata, Source,
    Usage,
};

/// Options for one model call (one step).
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub messages: Vec<ModelMessage>,
    pub settings: CallSettings,
    pub tools: Vec<ToolDefinition>,
}

/// One provider-shaped stream part.
///
/// A well-formed stream ends with exactly one `Finish` or `Error`.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamPart {
    StreamStart {
        warnings: Vec<CallWarning>,
    },
    ResponseMetadata {
        id: Option<String>,
        model_id: Option<String>,
        timestamp: Option<DateTime<Utc>>,
    },
    TextStart {
        id: String,
        provider_metadata: Option<serde_json::Value>,
    },
    TextDelta {
        id: String,
        delta: String,
        provider_metadata: Option<serde_json::Value>,
    },
    TextEnd {
        id: String,
        provider_metadata: Option<serde_json::Value>,
    },
    ReasoningStart {
        id: String,
        provider_metadata: Option<serde_json::Value>,
    },
    ReasoningDelta {
        id: String,
        delta: String,
        provider_metadata: Option<serde_json::Value>,
    },
    ReasoningEnd {
        id: String,
        provider_metadata: Option<serde_json::Value>,
    },
    ToolInputStart {
        id: String,
        tool_name: String,
        provider_executed: bool,
    },
    ToolInputDelta {
        id: String,
        delta: String,
    },
    ToolInputEnd {
        id: String,
    },
    /// A complete tool call; `input` is the raw JSON text.
    ToolCall {
        tool_call_id: String,
        tool_name: String,
        input: String,
        provider_executed: bool,
    },
    /// Result of a tool the provider executed itself.
    ToolResult {
        tool_call_id: String,
        tool_name: String,
        result: serde_json::Value,
        is_error: bool,
        preliminary: bool,
    },
    File(GeneratedFile),
    Source(Source),
    Finish {
        finish_reason: FinishReason,
        usage: Usage,
        provider_metadata: Option<serde_json::Value>,
    },
    Error {
        error: serde_json::Value,
    },
}

impl StreamPart {
    pub fn text_start(id: impl Into<String>) -> Self {
        Self::TextStart {
            id: id.into(),
            provider_metadata: None,
        }
    }

    pub fn text_delta(id: impl Into<String>, delta: impl Into<String>) -> Self {
        Self::TextDelta {
            id: id.into(),
            delta: delta.into(),
            provider_metadata: None,
        }
    }

    pub fn text_end(id: impl Into<String>) -> Self {
        Self::TextEnd {
            id: id.into(),
            provider_metadata: None,
        }
    }

    pub fn tool_call(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        input: impl Into<String>,
    ) -> Self {
        Self::ToolCall {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            input: input.into(),
            provider_executed: false,
        }
    }

    pub fn finish(finish_reason: FinishReason, usage: Usage) -> Self {
        Self::Finish {
            finish_reason,
            usage,
            provider_metadata: None,
        }
    }
}

/// Stream of parts for one step.
pub struct StreamResponse {
    pub parts: BoxStream<'static, Result<StreamPart, RociError>>,
    pub request: RequestMetadata,
}

impl std::fmt::Debug for StreamResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamResponse")
            .field("request", &self.request)
            .finish()
    }
}

/// Non-streaming result: every part of a completed stream.
#[derive(Debug, Clone)]
pub struct GenerateResponse {
    pub content: Vec<StreamPart>,
    pub finish_reason: FinishReason,
    pub usage: Usage,
    pub request: RequestMetadata,
}

/// Core trait implemented by every model backend.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Provider name (e.g., "openai", "google").
    fn provider(&self) -> &str;

    /// The model ID this provider instance serves.
    fn model_id(&self) -> &str;

    /// Start a streaming call.
    async fn do_stream(&self, options: CallOptions) -> Result<StreamResponse, RociError>;

    /// Non-streaming call. The default drains [`do_stream`](Self::do_stream).
    async fn do_generate(&self, options: CallOptions) -> Result<GenerateResponse, RociError> {
        let StreamResponse { mut parts, request } = self.do_stream(options).await?;
        let mut content = Vec::new();
        while let Some(part) = parts.next().await {
            match part? {
                StreamPart::Finish {
                    finish_reason,
                    usage,
                    ..
                } => {
                    return Ok(GenerateResponse {
                        content,
                        finish_reason,
                        usage,
                        request,
                    })
                }
                StreamPart::Error { error } => {
                    return Err(RociError::Provider {
                        provider: self.provider().to_string(),
                        message: error_text(&error),
                    })
                }
                other => content.push(other),
            }
        }
        Err(RociError::Stream(
            "provider stream ended without a finish part".into(),
        ))
    }
}

/// Human-readable text for an error payload.
pub fn error_text(error: &serde_json::Value) -> String {
    match error {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Object(map) => map
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string()),
        other => other.to_string(),
    }
}
