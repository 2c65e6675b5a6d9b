//! Dynamic tool provider: tools discovered at runtime (e.g., MCP).
//!
//! Calls to these tools are marked `dynamic` in the event stream because their
//! input type is not known when the caller builds the tool set. Unlike calls to
//! unknown names, they are still executed.

use std::sync::Arc;

use async_trait::async_trait;

use super::arguments::ToolArguments;
use super::tool::{NeedsApproval, Tool, ToolExecutionContext, ToolIdentity, ToolOutput};
use super::types::ToolParameters;
use crate::error::RociError;

/// A tool discovered at runtime.
#[derive(Debug, Clone)]
pub struct DynamicTool {
    pub name: String,
    pub description: String,
    pub parameters: ToolParameters,
    pub needs_approval: bool,
}

/// Providers that can list and execute tools at runtime.
#[async_trait]
pub trait DynamicToolProvider: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<DynamicTool>, RociError>;

    async fn execute_tool(
        &self,
        name: &str,
        args: &ToolArguments,
        ctx: &ToolExecutionContext,
    ) -> Result<serde_json::Value, RociError>;
}

/// Exposes a [`DynamicTool`] through the [`Tool`] trait.
pub struct DynamicToolAdapter {
    provider: Arc<dyn DynamicToolProvider>,
    name: String,
    description: String,
    parameters: ToolParameters,
    needs_approval: NeedsApproval,
}

impl DynamicToolAdapter {
    pub fn new(provider: Arc<dyn DynamicToolProvider>, tool: DynamicTool) -> Self {
        Self {
            provider,
            name: tool.name,
            description: tool.description,
            parameters: tool.parameters,
            needs_approval: if tool.needs_approval {
                NeedsApproval::Always
            } else {
                NeedsApproval::Never
            },
        }
    }

    /// Adapt every tool the provider currently lists.
    pub async fn discover(
        provider: Arc<dyn DynamicToolProvider>,
    ) -> Result<Vec<Arc<dyn Tool>>, RociError> {
        let tools = provider.list_tools().await?;
        Ok(tools
            .into_iter()
            .map(|tool| Arc::new(Self::new(provider.clone(), tool)) as Arc<dyn Tool>)
            .collect())
    }
}

#[async_trait]
impl Tool for DynamicToolAdapter {
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

    fn identity(&self) -> ToolIdentity {
        ToolIdentity::Dynamic
    }

    async fn execute(
        &self,
        args: &ToolArguments,
        ctx: &ToolExecutionContext,
    ) -> Result<ToolOutput, RociError> {
        self.provider
            .execute_tool(&self.name, args, ctx)
            .await
            .map(ToolOutput::Value)
    }
}
