//! Streaming text generation with multi-step tool use.
//!
//! [`stream_text`] starts the run on a background task and returns at once.
//! Every event goes through the request's transforms and into a
//! [`BroadcastHub`]; each projection on [`StreamTextResult`] is a fresh reader
//! of that log, so consumers may attach at any time and still see everything.

use std::sync::Arc;

use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;

use super::request::StreamTextRequest;
use super::runner::{self, RunOutcome, RunPlan};
use crate::broadcast::{BroadcastHub, EventReader};
use crate::error::RociError;
use crate::projection::{self, LogOptions};
use crate::stream_transform;
use crate::types::{FinishReason, Step, StepEvent, Usage};
use crate::ui::{self, UiMessage, UiMessageOptions};
use crate::util::promise::Resolvable;
use crate::util::timeout::cancel_after;

/// Final state of a run, available once its terminal event has been produced.
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Text of the last step.
    pub text: String,
    pub finish_reason: FinishReason,
    pub total_usage: Usage,
    pub steps: Vec<Step>,
    pub aborted: bool,
    /// Set when the run ended with an `Error` event.
    pub error: Option<Arc<RociError>>,
}

impl RunSummary {
    fn from_outcome(outcome: RunOutcome, fallback_error: Option<String>) -> Self {
        let text = outcome.steps.last().map(Step::text).unwrap_or_default();
        let error = outcome
            .error
            .or_else(|| fallback_error.map(RociError::Stream))
            .map(Arc::new);
        Self {
            text,
            finish_reason: outcome.finish_reason.unwrap_or_default(),
            total_usage: outcome.total_usage,
            steps: outcome.steps,
            aborted: outcome.aborted,
            error,
        }
    }
}

/// Start a streaming run.
///
/// Must be called inside a Tokio runtime.
pub fn stream_text(request: StreamTextRequest) -> StreamTextResult {
    let hub = BroadcastHub::new(request.config.log_warn_threshold);
    let summary = Resolvable::new();
    let cancel = request.cancel.child_token();

    let timer = request
        .timeout()
        .map(|timeout| cancel_after(cancel.clone(), timeout));

    let callbacks = request.callbacks.clone();
    let transforms = request.transforms.clone();
    let plan = RunPlan {
        messages: request.initial_messages(),
        retry: request.retry_policy(),
        max_steps: request.max_steps(),
        model: request.model,
        tools: request.tools,
        stop_conditions: request.stop_conditions,
        settings: request.settings,
        approval: request.approval_policy,
        callbacks: callbacks.clone(),
        cancel: cancel.clone(),
    };

    let (tx, rx) = mpsc::unbounded_channel();
    let run = tokio::spawn(runner::run(plan, tx));

    let pump_hub = hub.clone();
    let pump_summary = summary.clone();
    tokio::spawn(async move {
        let mut events =
            stream_transform::apply_all(&transforms, UnboundedReceiverStream::new(rx).boxed());
        while let Some(event) = events.next().await {
            callbacks.chunk(&event);
            pump_hub.publish(event);
        }

        let mut fallback_error = None;
        if !pump_hub.has_terminal() {
            let message = "stream ended without a terminal event".to_string();
            tracing::warn!("{message}");
            pump_hub.publish(StepEvent::error(message.clone()));
            fallback_error = Some(message);
        }
        pump_hub.close();

        let outcome = match run.await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(error = %e, "stream run task failed");
                RunOutcome {
                    error: Some(RociError::Stream(format!("run task failed: {e}"))),
                    ..Default::default()
                }
            }
        };
        if let Some(timer) = timer {
            timer.abort();
        }

        let finished = matches!(
            pump_hub.snapshot().last(),
            Some(StepEvent::Finish { .. })
        );
        let summary = Arc::new(RunSummary::from_outcome(
            outcome,
            fallback_error.filter(|_| !finished),
        ));
        if finished {
            callbacks.finish(&summary);
        }
        pump_summary.resolve(summary);
    });

    StreamTextResult {
        hub,
        summary,
        cancel,
    }
}

/// Handle to a running (or finished) stream.
///
/// Cloning is cheap; clones observe the same run.
#[derive(Debug, Clone)]
pub struct StreamTextResult {
    hub: BroadcastHub,
    summary: Resolvable<Arc<RunSummary>>,
    cancel: CancellationToken,
}

impl StreamTextResult {
    /// A new reader over every event of the run, from the start.
    pub fn subscribe(&self) -> EventReader {
        self.hub.subscribe()
    }

    /// Every event of the run, from the start.
    pub fn full_stream(&self) -> BoxStream<'static, StepEvent> {
        self.subscribe().boxed()
    }

    /// Text deltas only.
    pub fn text_stream(&self) -> BoxStream<'static, String> {
        projection::text_stream(self.subscribe())
    }

    /// Snapshots of the assistant message after each applied event.
    pub fn ui_message_stream(&self, options: UiMessageOptions) -> BoxStream<'static, UiMessage> {
        ui::ui_message_stream(self.subscribe(), options)
    }

    /// Server-sent-event frames, ending with `data: [DONE]`.
    pub fn sse_stream(&self) -> BoxStream<'static, String> {
        projection::sse_stream(self.subscribe())
    }

    /// One human-readable line per event.
    pub fn log_stream(&self, options: LogOptions) -> BoxStream<'static, String> {
        projection::log_stream(self.subscribe(), options)
    }

    /// Ask the run to stop. Readers still see `abort` followed by `finish`.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// The token that stops this run.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Wait for the run to end.
    pub async fn summary(&self) -> Arc<RunSummary> {
        self.summary.wait().await
    }

    async fn completed(&self) -> Result<Arc<RunSummary>, RociError> {
        let summary = self.summary().await;
        match &summary.error {
            Some(error) => Err(RociError::Stream(error.to_string())),
            None => Ok(summary),
        }
    }

    pub async fn steps(&self) -> Result<Vec<Step>, RociError> {
        Ok(self.completed().await?.steps.clone())
    }

    pub async fn total_usage(&self) -> Result<Usage, RociError> {
        Ok(self.completed().await?.total_usage)
    }

    pub async fn finish_reason(&self) -> Result<FinishReason, RociError> {
        Ok(self.completed().await?.finish_reason)
    }

    /// Text of the last step.
    pub async fn text(&self) -> Result<String, RociError> {
        Ok(self.completed().await?.text.clone())
    }

    /// Wait for the run to end without reading any events.
    pub async fn consume(&self) -> Result<(), RociError> {
        self.completed().await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::StreamPart;
    use crate::testing::{MockLanguageModel, MockResponse};
    use crate::stream_transform::MapTransform;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn request(response: MockResponse) -> StreamTextRequest {
        StreamTextRequest::prompt(
            MockLanguageModel::new("mock-model")
                .with_response(response)
                .into_arc(),
            "hello",
        )
        .with_config(Default::default())
    }

    #[tokio::test]
    async fn text_and_summary_for_a_single_step() {
        let result = stream_text(request(MockResponse::text("Hello")));
        let deltas: Vec<String> = result.text_stream().collect().await;
        assert_eq!(deltas, vec!["Hello".to_string()]);
        assert_eq!(result.text().await.unwrap(), "Hello");
        assert_eq!(result.finish_reason().await.unwrap(), FinishReason::Stop);
        assert_eq!(result.total_usage().await.unwrap(), Usage::new(10, 20));
    }

    #[tokio::test]
    async fn transforms_apply_before_every_reader() {
        let result = stream_text(
            request(MockResponse::text("quiet")).with_transform(MapTransform::new(|t| t.to_uppercase())),
        );
        let deltas: Vec<String> = result.text_stream().collect().await;
        assert_eq!(deltas, vec!["QUIET".to_string()]);
    }

    #[tokio::test]
    async fn on_finish_runs_once_after_the_terminal_event() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let chunks = seen.clone();
        let finishes = Arc::new(AtomicUsize::new(0));
        let count = finishes.clone();
        let result = stream_text(
            request(MockResponse::text("Hi"))
                .with_on_chunk(move |e| chunks.lock().unwrap().push(e.type_tag()))
                .with_on_finish(move |summary| {
                    assert_eq!(summary.text, "Hi");
                    count.fetch_add(1, Ordering::SeqCst);
                }),
        );
        result.consume().await.unwrap();
        assert_eq!(finishes.load(Ordering::SeqCst), 1);
        assert_eq!(seen.lock().unwrap().last(), Some(&"finish"));
    }

    #[tokio::test]
    async fn error_runs_skip_on_finish_and_fail_accessors() {
        let finishes = Arc::new(AtomicUsize::new(0));
        let count = finishes.clone();
        let errors = Arc::new(AtomicUsize::new(0));
        let error_count = errors.clone();
        let result = stream_text(
            request(MockResponse::Parts(vec![
                Ok(StreamPart::text_delta("1", "Hel")),
                Ok(StreamPart::Error {
                    error: serde_json::json!("overloaded"),
                }),
            ]))
            .with_on_finish(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            })
            .with_on_error(move |_| {
                error_count.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let events: Vec<StepEvent> = result.full_stream().collect().await;
        assert!(matches!(events.last(), Some(StepEvent::Error { .. })));
        assert!(result.text().await.is_err());
        assert_eq!(finishes.load(Ordering::SeqCst), 0);
        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_aborts_a_hanging_provider() {
        let result = stream_text(
            request(MockResponse::Hang(vec![StreamPart::text_delta("1", "slow")]))
                .with_timeout(std::time::Duration::from_secs(3)),
        );
        let tags: Vec<&str> = result
            .full_stream()
            .map(|e| e.type_tag())
            .collect()
            .await;
        assert_eq!(&tags[tags.len() - 2..], &["abort", "finish"]);
        assert!(result.summary().await.aborted);
    }
}
