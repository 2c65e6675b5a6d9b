//! Stop conditions for the multi-step loop.
//!
//! After every step the loop asks each condition whether to stop. Any condition
//! returning `true` ends the run, even when the model asked for tool execution.

use std::sync::Arc;

use async_trait::async_trait;

use crate::types::Step;

/// Trait for conditions that end a run after a step.
#[async_trait]
pub trait StopCondition: Send + Sync {
    /// Check if the run should stop given every step closed so far.
    async fn should_stop(&self, steps: &[Step]) -> bool;

    /// Reset internal state (for reuse across runs).
    async fn reset(&self) {}
}

/// Stop once `count` steps have completed.
#[derive(Debug, Clone, Copy)]
pub struct StepCountIs {
    count: usize,
}

impl StepCountIs {
    pub fn new(count: usize) -> Self {
        Self { count }
    }
}

#[async_trait]
impl StopCondition for StepCountIs {
    async fn should_stop(&self, steps: &[Step]) -> bool {
        steps.len() >= self.count
    }
}

/// Stop when the last step called the named tool.
#[derive(Debug, Clone)]
pub struct HasToolCall {
    tool_name: String,
}

impl HasToolCall {
    pub fn new(tool_name: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
        }
    }
}

#[async_trait]
impl StopCondition for HasToolCall {
    async fn should_stop(&self, steps: &[Step]) -> bool {
        steps
            .last()
            .is_some_and(|step| step.tool_calls().any(|call| call.tool_name == self.tool_name))
    }
}

/// Stop when a regex matches the last step's text.
pub struct RegexStop {
    regex: regex::Regex,
}

impl RegexStop {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            regex: regex::Regex::new(pattern)?,
        })
    }
}

#[async_trait]
impl StopCondition for RegexStop {
    async fn should_stop(&self, steps: &[Step]) -> bool {
        steps
            .last()
            .is_some_and(|step| self.regex.is_match(&step.text()))
    }
}

/// Stop once total tokens across all steps reach a budget.
#[derive(Debug, Clone, Copy)]
pub struct UsageStop {
    max_total_tokens: u32,
}

impl UsageStop {
    pub fn new(max_total_tokens: u32) -> Self {
        Self { max_total_tokens }
    }
}

#[async_trait]
impl StopCondition for UsageStop {
    async fn should_stop(&self, steps: &[Step]) -> bool {
        let total: u32 = steps.iter().map(|s| s.usage.total_tokens).sum();
        total >= self.max_total_tokens
    }
}

/// Stop when a custom predicate returns true.
pub struct PredicateStop<F: Fn(&[Step]) -> bool + Send + Sync> {
    predicate: F,
}

impl<F: Fn(&[Step]) -> bool + Send + Sync> PredicateStop<F> {
    pub fn new(predicate: F) -> Self {
        Self { predicate }
    }
}

#[async_trait]
impl<F: Fn(&[Step]) -> bool + Send + Sync> StopCondition for PredicateStop<F> {
    async fn should_stop(&self, steps: &[Step]) -> bool {
        (self.predicate)(steps)
    }
}

pub fn step_count_is(count: usize) -> Arc<dyn StopCondition> {
    Arc::new(StepCountIs::new(count))
}

pub fn has_tool_call(tool_name: impl Into<String>) -> Arc<dyn StopCondition> {
    Arc::new(HasToolCall::new(tool_name))
}

/// True when any condition says stop.
pub(crate) async fn any_should_stop(conditions: &[Arc<dyn StopCondition>], steps: &[Step]) -> bool {
    for condition in conditions {
        if condition.should_stop(steps).await {
            return true;
        }
    }
    false
}
