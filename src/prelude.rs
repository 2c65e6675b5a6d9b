//! Convenience re-exports for common use.

pub use crate::config::StreamConfig;
pub use crate::error::{Result, RociError};
pub use crate::generation::{stream_text, RunSummary, StreamTextRequest, StreamTextResult};
pub use crate::projection::LogOptions;
pub use crate::provider::{CallOptions, LanguageModel, StreamPart, StreamResponse};
pub use crate::stop::{has_tool_call, step_count_is, StopCondition};
pub use crate::stream_transform::{Chunking, FilterTransform, MapTransform, SmoothTransform, StreamTransform};
pub use crate::tools::{
    AgentTool, ApprovalDecision, ApprovalPolicy, ApprovalVerdict, NeedsApproval, Tool,
    ToolArguments, ToolParameters, ToolSet,
};
pub use crate::types::{
    FinishReason, ModelMessage, Role, Step, StepEvent, ToolCallPhase, Usage,
};
pub use crate::ui::{UiMessage, UiMessageOptions, UiPart};
