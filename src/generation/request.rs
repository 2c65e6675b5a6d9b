//! Options for a streaming run and the callbacks it reports through.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::stream::RunSummary;
use crate::config::StreamConfig;
use crate::error::RociError;
use crate::provider::LanguageModel;
use crate::stop::StopCondition;
use crate::stream_transform::StreamTransform;
use crate::tools::{ApprovalPolicy, Tool, ToolSet};
use crate::types::{CallSettings, ModelMessage, Step, StepEvent};
use crate::util::retry::RetryPolicy;

pub type ChunkCallback = Arc<dyn Fn(&StepEvent) + Send + Sync>;
pub type StepFinishCallback = Arc<dyn Fn(&Step) + Send + Sync>;
pub type FinishCallback = Arc<dyn Fn(&RunSummary) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&RociError) + Send + Sync>;

/// Caller hooks. Every invocation is isolated: a panicking callback is logged
/// and reported to `on_error`, and the run carries on.
#[derive(Clone, Default)]
pub(crate) struct Callbacks {
    pub on_chunk: Option<ChunkCallback>,
    pub on_step_finish: Option<StepFinishCallback>,
    pub on_finish: Option<FinishCallback>,
    pub on_error: Option<ErrorCallback>,
}

impl Callbacks {
    pub fn chunk(&self, event: &StepEvent) {
        if let Some(cb) = &self.on_chunk {
            self.guard("on_chunk", || cb(event));
        }
    }

    pub fn step_finish(&self, step: &Step) {
        if let Some(cb) = &self.on_step_finish {
            self.guard("on_step_finish", || cb(step));
        }
    }

    pub fn finish(&self, summary: &RunSummary) {
        if let Some(cb) = &self.on_finish {
            self.guard("on_finish", || cb(summary));
        }
    }

    pub fn error(&self, error: &RociError) {
        if let Some(cb) = &self.on_error {
            if std::panic::catch_unwind(AssertUnwindSafe(|| cb(error))).is_err() {
                tracing::error!("on_error callback panicked");
            }
        }
    }

    fn guard(&self, name: &str, f: impl FnOnce()) {
        if std::panic::catch_unwind(AssertUnwindSafe(f)).is_err() {
            tracing::error!(callback = name, "callback panicked");
            self.error(&RociError::Callback(format!("{name} callback panicked")));
        }
    }
}

/// Everything needed to start a streaming run.
pub struct StreamTextRequest {
    pub(crate) model: Arc<dyn LanguageModel>,
    pub(crate) messages: Vec<ModelMessage>,
    pub(crate) system: Option<String>,
    pub(crate) tools: ToolSet,
    pub(crate) stop_conditions: Vec<Arc<dyn StopCondition>>,
    pub(crate) max_steps: Option<usize>,
    pub(crate) settings: CallSettings,
    pub(crate) approval_policy: ApprovalPolicy,
    pub(crate) retry: Option<RetryPolicy>,
    pub(crate) transforms: Vec<Arc<dyn StreamTransform>>,
    pub(crate) callbacks: Callbacks,
    pub(crate) timeout: Option<Duration>,
    pub(crate) cancel: CancellationToken,
    pub(crate) config: StreamConfig,
}

impl StreamTextRequest {
    pub fn new(model: Arc<dyn LanguageModel>, messages: Vec<ModelMessage>) -> Self {
        Self {
            model,
            messages,
            system: None,
            tools: ToolSet::new(),
            stop_conditions: Vec::new(),
            max_steps: None,
            settings: CallSettings::default(),
            approval_policy: ApprovalPolicy::default(),
            retry: None,
            transforms: Vec::new(),
            callbacks: Callbacks::default(),
            timeout: None,
            cancel: CancellationToken::new(),
            config: StreamConfig::global().clone(),
        }
    }

    /// Single user prompt.
    pub fn prompt(model: Arc<dyn LanguageModel>, prompt: impl Into<String>) -> Self {
        Self::new(model, vec![ModelMessage::user(prompt)])
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_tools(mut self, tools: ToolSet) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_tool(mut self, tool: impl Tool + 'static) -> Self {
        self.tools.push(Arc::new(tool));
        self
    }

    /// Replace the stop conditions. With none set, the run stops after one step.
    pub fn with_stop_conditions(mut self, conditions: Vec<Arc<dyn StopCondition>>) -> Self {
        self.stop_conditions = conditions;
        self
    }

    pub fn with_stop_condition(mut self, condition: Arc<dyn StopCondition>) -> Self {
        self.stop_conditions.push(condition);
        self
    }

    /// Hard cap on steps, applied on top of the stop conditions.
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = Some(max_steps);
        self
    }

    pub fn with_settings(mut self, settings: CallSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_approval_policy(mut self, policy: ApprovalPolicy) -> Self {
        self.approval_policy = policy;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn with_transform(mut self, transform: impl StreamTransform + 'static) -> Self {
        self.transforms.push(Arc::new(transform));
        self
    }

    pub fn with_on_chunk(mut self, cb: impl Fn(&StepEvent) + Send + Sync + 'static) -> Self {
        self.callbacks.on_chunk = Some(Arc::new(cb));
        self
    }

    pub fn with_on_step_finish(mut self, cb: impl Fn(&Step) + Send + Sync + 'static) -> Self {
        self.callbacks.on_step_finish = Some(Arc::new(cb));
        self
    }

    pub fn with_on_finish(mut self, cb: impl Fn(&RunSummary) + Send + Sync + 'static) -> Self {
        self.callbacks.on_finish = Some(Arc::new(cb));
        self
    }

    pub fn with_on_error(mut self, cb: impl Fn(&RociError) + Send + Sync + 'static) -> Self {
        self.callbacks.on_error = Some(Arc::new(cb));
        self
    }

    /// Stop the run (abort, then finish) once `timeout` elapses.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Cancelling `token` stops the run.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Use `config` for retry, step and timeout defaults.
    pub fn with_config(mut self, config: StreamConfig) -> Self {
        self.config = config;
        self
    }

    pub(crate) fn initial_messages(&self) -> Vec<ModelMessage> {
        let mut messages = Vec::with_capacity(self.messages.len() + 1);
        if let Some(system) = &self.system {
            messages.push(ModelMessage::system(system.clone()));
        }
        messages.extend(self.messages.iter().cloned());
        messages
    }

    pub(crate) fn retry_policy(&self) -> RetryPolicy {
        self.retry
            .clone()
            .unwrap_or_else(|| self.config.retry_policy())
    }

    pub(crate) fn max_steps(&self) -> Option<usize> {
        self.max_steps.or(self.config.max_steps)
    }

    pub(crate) fn timeout(&self) -> Option<Duration> {
        self.timeout.or_else(|| self.config.timeout())
    }
}

impl std::fmt::Debug for StreamTextRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamTextRequest")
            .field("provider", &self.model.provider())
            .field("model_id", &self.model.model_id())
            .field("messages", &self.messages.len())
            .field("tools", &self.tools)
            .field("stop_conditions", &self.stop_conditions.len())
            .field("max_steps", &self.max_steps)
            .field("approval_policy", &self.approval_policy)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockLanguageModel;
    use crate::types::Role;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn system_prompt_comes_first() {
        let request = StreamTextRequest::prompt(MockLanguageModel::new("m").into_arc(), "hi")
            .with_system("be brief");
        let messages = request.initial_messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[1].text(), "hi");
    }

    #[test]
    fn explicit_options_beat_config() {
        let config = StreamConfig {
            max_steps: Some(9),
            timeout_ms: Some(50),
            max_retries: 7,
            ..Default::default()
        };
        let request = StreamTextRequest::prompt(MockLanguageModel::new("m").into_arc(), "hi")
            .with_config(config)
            .with_max_steps(2)
            .with_retry(RetryPolicy::none());
        assert_eq!(request.max_steps(), Some(2));
        assert_eq!(request.timeout(), Some(Duration::from_millis(50)));
        assert_eq!(request.retry_policy().max_retries, 0);
    }

    #[test]
    fn panicking_callback_is_reported_to_on_error() {
        let errors = Arc::new(AtomicUsize::new(0));
        let seen = errors.clone();
        let callbacks = Callbacks {
            on_chunk: Some(Arc::new(|_| panic!("consumer bug"))),
            on_error: Some(Arc::new(move |e| {
                assert!(matches!(e, RociError::Callback(_)));
                seen.fetch_add(1, Ordering::SeqCst);
            })),
            ..Default::default()
        };
        callbacks.chunk(&StepEvent::Start);
        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }
}
