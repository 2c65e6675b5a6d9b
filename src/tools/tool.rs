//! Tool trait and closure-based tool wrapper.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use super::arguments::ToolArguments;
use super::types::ToolParameters;
use crate::error::RociError;
use crate::types::{ModelMessage, StepEvent};

/// Whether a tool is part of the caller's static tool set or was discovered at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ToolIdentity {
    #[default]
    Static,
    Dynamic,
}

/// Predicate deciding per call whether approval is needed.
pub type ApprovalPredicate =
    Arc<dyn Fn(&serde_json::Value, &ToolExecutionContext) -> bool + Send + Sync>;

/// Approval requirement declared by a tool.
#[derive(Clone, Default)]
pub enum NeedsApproval {
    #[default]
    Never,
    Always,
    Predicate(ApprovalPredicate),
}

static NEVER: NeedsApproval = NeedsApproval::Never;

impl NeedsApproval {
    pub fn predicate<F>(predicate: F) -> Self
    where
        F: Fn(&serde_json::Value, &ToolExecutionContext) -> bool + Send + Sync + 'static,
    {
        Self::Predicate(Arc::new(predicate))
    }

    /// Evaluate for one call. A predicate that panics counts as requiring approval.
    pub fn requires_approval(&self, input: &serde_json::Value, ctx: &ToolExecutionContext) -> bool {
        match self {
            Self::Never => false,
            Self::Always => true,
            Self::Predicate(predicate) => {
                std::panic::catch_unwind(AssertUnwindSafe(|| predicate(input, ctx)))
                    .unwrap_or_else(|_| {
                        tracing::warn!(
                            tool_call_id = %ctx.tool_call_id,
                            "approval predicate panicked; requiring approval"
                        );
                        true
                    })
            }
        }
    }
}

impl std::fmt::Debug for NeedsApproval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Never => f.write_str("Never"),
            Self::Always => f.write_str("Always"),
            Self::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

/// Sequence of values produced by a streaming tool. All but the last are preliminary.
pub type ToolValueStream = BoxStream<'static, Result<serde_json::Value, RociError>>;

/// What a tool execution returns.
pub enum ToolOutput {
    Value(serde_json::Value),
    /// Each value is published only once the next one (or the end of the stream)
    /// arrives, since only then is it known whether it was the final one. A slow
    /// producer therefore delays its preliminary results by one item.
    Stream(ToolValueStream),
}

impl From<serde_json::Value> for ToolOutput {
    fn from(value: serde_json::Value) -> Self {
        Self::Value(value)
    }
}

impl std::fmt::Debug for ToolOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Lets a running tool publish `data` events into the run.
#[derive(Debug, Clone, Default)]
pub struct DataWriter {
    sink: Option<UnboundedSender<StepEvent>>,
}

impl DataWriter {
    pub(crate) fn new(sink: UnboundedSender<StepEvent>) -> Self {
        Self { sink: Some(sink) }
    }

    /// Publish a data part that UI projections keep.
    pub fn write(&self, data_type: impl Into<String>, id: Option<String>, data: serde_json::Value) {
        self.send(data_type.into(), id, data, false);
    }

    /// Publish a data part that is delivered but never stored.
    pub fn write_transient(&self, data_type: impl Into<String>, data: serde_json::Value) {
        self.send(data_type.into(), None, data, true);
    }

    fn send(&self, data_type: String, id: Option<String>, data: serde_json::Value, transient: bool) {
        if let Some(sink) = &self.sink {
            let _ = sink.send(StepEvent::Data {
                data_type,
                id,
                data,
                transient,
            });
        }
    }
}

/// Context available during tool execution.
#[derive(Debug, Clone, Default)]
pub struct ToolExecutionContext {
    pub tool_call_id: String,
    pub tool_name: String,
    /// Conversation history sent to the model for the current step.
    pub messages: Arc<Vec<ModelMessage>>,
    /// Fires when the run is stopped.
    pub cancel: CancellationToken,
    pub data: DataWriter,
}

/// Core tool trait. Implement to create custom tools.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name (must match what the model calls).
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn parameters(&self) -> &ToolParameters;

    fn needs_approval(&self) -> &NeedsApproval {
        &NEVER
    }

    fn identity(&self) -> ToolIdentity {
        ToolIdentity::Static
    }

    /// Execute the tool with parsed input.
    async fn execute(
        &self,
        args: &ToolArguments,
        ctx: &ToolExecutionContext,
    ) -> Result<ToolOutput, RociError>;
}

type ToolHandler = dyn Fn(
        ToolArguments,
        ToolExecutionContext,
    ) -> Pin<Box<dyn Future<Output = Result<ToolOutput, RociError>> + Send>>
    + Send
    + Sync;

/// Closure-based tool for quick tool creation.
pub struct AgentTool {
    name: String,
    description: String,
    parameters: ToolParameters,
    needs_approval: NeedsApproval,
    handler: Arc<ToolHandler>,
}

impl AgentTool {
    /// A tool whose handler returns one value.
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: ToolParameters,
        handler: F,
    ) -> Self
    where
        F: Fn(ToolArguments, ToolExecutionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value, RociError>> + Send + 'static,
    {
        Self::from_handler(
            name,
            description,
            parameters,
            Arc::new(move |args, ctx| {
                let fut = handler(args, ctx);
                Box::pin(async move { fut.await.map(ToolOutput::Value) })
            }),
        )
    }

    /// A tool whose handler yields a sequence of values.
    pub fn streaming<F, S>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: ToolParameters,
        handler: F,
    ) -> Self
    where
        F: Fn(ToolArguments, ToolExecutionContext) -> S + Send + Sync + 'static,
        S: Stream<Item = Result<serde_json::Value, RociError>> + Send + 'static,
    {
        Self::from_handler(
            name,
            description,
            parameters,
            Arc::new(move |args, ctx| {
                let stream = handler(args, ctx).boxed();
                Box::pin(async move { Ok(ToolOutput::Stream(stream)) })
            }),
        )
    }

    fn from_handler(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: ToolParameters,
        handler: Arc<ToolHandler>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            needs_approval: NeedsApproval::Never,
            handler,
        }
    }

    pub fn with_needs_approval(mut self, needs_approval: NeedsApproval) -> Self {
        self.needs_approval = needs_approval;
        self
    }
}

#[async_trait]
impl Tool for AgentTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> &ToolParameters {
        &self.parameters
    }

    fn needs_approval(&self) -> &NeedsApproval {
        &self.needs_approval
    }

    async fn execute(
        &self,
        args: &ToolArguments,
        ctx: &ToolExecutionContext,
    ) -> Result<ToolOutput, RociError> {
        (self.handler)(args.clone(), ctx.clone()).await
    }
}

impl std::fmt::Debug for AgentTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentTool")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("needs_approval", &self.needs_approval)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn predicate_panics_require_approval() {
        let needs = NeedsApproval::predicate(|_, _| panic!("predicate bug"));
        assert!(needs.requires_approval(&json!({}), &ToolExecutionContext::default()));
    }

    #[test]
    fn predicate_sees_the_input() {
        let needs = NeedsApproval::predicate(|input, _| input["amount"].as_u64() > Some(100));
        let ctx = ToolExecutionContext::default();
        assert!(!needs.requires_approval(&json!({ "amount": 5 }), &ctx));
        assert!(needs.requires_approval(&json!({ "amount": 500 }), &ctx));
    }

    #[tokio::test]
    async fn streaming_tool_yields_every_value() {
        let tool = AgentTool::streaming("count", "counts", ToolParameters::empty(), |_, _| {
            futures::stream::iter((1..=3).map(|n| Ok(json!(n))))
        });
        let output = tool
            .execute(&ToolArguments::new(json!({})), &ToolExecutionContext::default())
            .await
            .unwrap();
        let ToolOutput::Stream(stream) = output else {
            panic!("expected stream output");
        };
        let values: Vec<_> = stream.map(|v| v.unwrap()).collect().await;
        assert_eq!(values, vec![json!(1), json!(2), json!(3)]);
    }

    #[test]
    fn data_writer_without_sink_is_a_no_op() {
        DataWriter::default().write("progress", None, json!(1));
    }
}
