//! The multi-step loop.
//!
//! Each step calls the model with the history so far, normalizes what it
//! streams, runs tools and closes a [`Step`]. The loop continues while the model
//! asks for tools, every client call has an output and no stop condition fires.

use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use super::normalize::{EventNormalizer, Normalized};
use super::request::Callbacks;
use super::tooling::ToolCoordinator;
use crate::error::RociError;
use crate::provider::{CallOptions, LanguageModel, StreamResponse};
use crate::stop::{any_should_stop, step_count_is, StopCondition};
use crate::tools::{ApprovalPolicy, ToolSet};
use crate::types::{
    CallSettings, CallWarning, FinishReason, ModelMessage, ProviderMetadata, RequestMetadata,
    ResponseMetadata, Step, StepContent, StepEvent, ToolCallRecord, ToolOutcome, ToolOutputRecord,
    Usage,
};
use crate::util::retry::RetryPolicy;

/// Inputs of one run, fixed when it starts.
pub(crate) struct RunPlan {
    pub model: Arc<dyn LanguageModel>,
    pub messages: Vec<ModelMessage>,
    pub tools: ToolSet,
    pub stop_conditions: Vec<Arc<dyn StopCondition>>,
    pub max_steps: Option<usize>,
    pub settings: CallSettings,
    pub approval: ApprovalPolicy,
    pub retry: RetryPolicy,
    pub callbacks: Callbacks,
    pub cancel: CancellationToken,
}

/// How a run ended, as seen by the loop.
#[derive(Debug, Default)]
pub(crate) struct RunOutcome {
    pub steps: Vec<Step>,
    pub total_usage: Usage,
    pub finish_reason: Option<FinishReason>,
    pub aborted: bool,
    pub error: Option<RociError>,
}

enum StepEnd {
    Closed(Step),
    Aborted,
    Failed(RociError),
}

struct Emitter {
    tx: UnboundedSender<StepEvent>,
}

impl Emitter {
    fn emit(&self, event: StepEvent) {
        // The receiver only goes away when every reader is gone; keep running
        // so callbacks and the summary still complete.
        let _ = self.tx.send(event);
    }
}

pub(crate) async fn run(plan: RunPlan, tx: UnboundedSender<StepEvent>) -> RunOutcome {
    let emitter = Emitter { tx };
    let mut runner = Runner {
        plan,
        emitter,
        outcome: RunOutcome::default(),
    };
    runner.run().await;
    runner.outcome
}

struct Runner {
    plan: RunPlan,
    emitter: Emitter,
    outcome: RunOutcome,
}

impl Runner {
    async fn run(&mut self) {
        tracing::debug!(
            provider = self.plan.model.provider(),
            model = self.plan.model.model_id(),
            tools = self.plan.tools.len(),
            "stream run start"
        );
        self.emitter.emit(StepEvent::Start);

        if self.plan.stop_conditions.is_empty() {
            self.plan.stop_conditions.push(step_count_is(1));
        }

        loop {
            if self.plan.cancel.is_cancelled() {
                return self.abort();
            }

            let step_number = self.outcome.steps.len();
            let messages = Arc::new(self.history());
            let options = CallOptions {
                messages: messages.as_ref().clone(),
                tools: self.plan.tools.definitions(),
                settings: self.plan.settings.clone(),
            };
            tracing::debug!(step = step_number, messages = messages.len(), "step start");

            let model: &dyn LanguageModel = self.plan.model.as_ref();
            let response = self
                .plan
                .retry
                .execute_with_cancel(&self.plan.cancel, || model.do_stream(options.clone()))
                .await;
            let response = match response {
                Ok(response) => response,
                Err(e) if e.is_abort() => return self.abort(),
                Err(e) => return self.fail(e),
            };

            let step = match self.run_step(step_number, response, messages).await {
                StepEnd::Closed(step) => step,
                StepEnd::Aborted => return self.abort(),
                StepEnd::Failed(e) => return self.fail(e),
            };
            tracing::debug!(
                step = step_number,
                finish_reason = %step.finish_reason,
                tool_calls = step.tool_calls().count(),
                "step finish"
            );

            self.plan.callbacks.step_finish(&step);
            self.outcome.total_usage.merge(&step.usage);
            self.outcome.finish_reason = Some(step.finish_reason);
            self.outcome.steps.push(step);

            if !self.should_continue().await {
                break;
            }
        }

        self.finish();
    }

    /// Initial messages plus everything earlier steps produced.
    fn history(&self) -> Vec<ModelMessage> {
        let mut messages = self.plan.messages.clone();
        for step in &self.outcome.steps {
            messages.extend(step.response_messages());
        }
        messages
    }

    async fn should_continue(&self) -> bool {
        let steps = &self.outcome.steps;
        let Some(last) = steps.last() else {
            return false;
        };
        if last.finish_reason != FinishReason::ToolCalls {
            return false;
        }
        if last.client_tool_calls().next().is_none() || !last.client_tool_calls_resolved() {
            return false;
        }
        if self.plan.max_steps.is_some_and(|max| steps.len() >= max) {
            return false;
        }
        !any_should_stop(&self.plan.stop_conditions, steps).await
    }

    async fn run_step(
        &mut self,
        step_number: usize,
        response: StreamResponse,
        messages: Arc<Vec<ModelMessage>>,
    ) -> StepEnd {
        let StreamResponse { mut parts, request } = response;
        let cancel = self.plan.cancel.clone();
        let mut normalizer = EventNormalizer::new(self.plan.tools.clone());
        let mut coordinator = ToolCoordinator::new(self.plan.approval.clone(), cancel.clone(), messages);
        let mut step = StepBuilder::new(step_number, request, self.plan.model.model_id());

        // Read the provider stream, forwarding tool task events as they arrive.
        let finish = loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    coordinator.abort_all();
                    return StepEnd::Aborted;
                }
                Some(event) = coordinator.recv() => {
                    step.record(&event);
                    self.emitter.emit(event);
                }
                part = parts.next() => {
                    let part = match part {
                        Some(Ok(part)) => part,
                        Some(Err(e)) => {
                            coordinator.abort_all();
                            return StepEnd::Failed(e);
                        }
                        None => {
                            tracing::warn!(step = step_number, "provider stream ended without a finish part");
                            self.start_step(&mut step, Vec::new());
                            for normalized in normalizer.close_open() {
                                self.apply(&mut step, &mut coordinator, normalized);
                            }
                            break (FinishReason::Unknown, Usage::default(), None);
                        }
                    };

                    let mut finish = None;
                    for normalized in normalizer.push(part) {
                        match normalized {
                            Normalized::StreamStart(warnings) => self.start_step(&mut step, warnings),
                            Normalized::Response { id, model_id, timestamp } => {
                                step.response(id, model_id, timestamp)
                            }
                            Normalized::Finish { finish_reason, usage, provider_metadata } => {
                                self.start_step(&mut step, Vec::new());
                                finish = Some((finish_reason, usage, provider_metadata));
                            }
                            Normalized::Failure(message) => {
                                coordinator.abort_all();
                                return StepEnd::Failed(RociError::Provider {
                                    provider: self.plan.model.provider().to_string(),
                                    message,
                                });
                            }
                            other => {
                                self.start_step(&mut step, Vec::new());
                                self.apply(&mut step, &mut coordinator, other);
                            }
                        }
                    }
                    if let Some(finish) = finish {
                        break finish;
                    }
                }
            }
        };

        // The step closes only after every tool task has reported.
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    coordinator.abort_all();
                    return StepEnd::Aborted;
                }
                event = coordinator.next_event() => match event {
                    Some(event) => {
                        step.record(&event);
                        self.emitter.emit(event);
                    }
                    None => break,
                }
            }
        }

        let (finish_reason, usage, provider_metadata) = finish;
        let step = step.close(finish_reason, usage, provider_metadata);
        self.emitter.emit(StepEvent::FinishStep {
            finish_reason,
            usage,
            response: Some(step.response.clone()),
            provider_metadata: step.provider_metadata.clone(),
        });
        StepEnd::Closed(step)
    }

    fn start_step(&self, step: &mut StepBuilder, warnings: Vec<CallWarning>) {
        if step.started {
            return;
        }
        step.started = true;
        step.warnings = warnings.clone();
        self.emitter.emit(StepEvent::StartStep {
            request: step.request.clone(),
            warnings,
        });
    }

    fn apply(&self, step: &mut StepBuilder, coordinator: &mut ToolCoordinator, normalized: Normalized) {
        match normalized {
            Normalized::Event(event) => {
                if let StepEvent::ToolInputStart { tool_call_id, .. } = &event {
                    coordinator.tracker().input_started(tool_call_id);
                }
                step.record(&event);
                self.emitter.emit(event);
            }
            Normalized::Call(call) => {
                let event = call.event();
                step.record(&event);
                self.emitter.emit(event);
                coordinator.dispatch(call);
            }
            // Handled by the caller.
            Normalized::StreamStart(_)
            | Normalized::Response { .. }
            | Normalized::Finish { .. }
            | Normalized::Failure(_) => {}
        }
    }

    fn finish(&mut self) {
        let finish_reason = self.outcome.finish_reason.unwrap_or_default();
        tracing::debug!(
            steps = self.outcome.steps.len(),
            finish_reason = %finish_reason,
            "stream run finish"
        );
        self.emitter.emit(StepEvent::Finish {
            finish_reason,
            total_usage: self.outcome.total_usage,
        });
    }

    fn abort(&mut self) {
        tracing::debug!(steps = self.outcome.steps.len(), "stream run aborted");
        self.outcome.aborted = true;
        self.emitter.emit(StepEvent::Abort);
        self.finish();
    }

    fn fail(&mut self, error: RociError) {
        tracing::warn!(error = %error, "stream run failed");
        self.plan.callbacks.error(&error);
        self.emitter.emit(StepEvent::error(error.to_string()));
        self.outcome.error = Some(error);
    }
}

/// Accumulates a step's content from the events it produced.
struct StepBuilder {
    step_number: usize,
    started: bool,
    request: RequestMetadata,
    warnings: Vec<CallWarning>,
    response: ResponseMetadata,
    content: Vec<StepContent>,
    open_text: HashMap<String, usize>,
    open_reasoning: HashMap<String, usize>,
    calls: HashMap<String, ToolCallRecord>,
    approvals: HashMap<String, String>,
    denials: HashMap<String, Option<String>>,
}

impl StepBuilder {
    fn new(step_number: usize, request: RequestMetadata, model_id: &str) -> Self {
        Self {
            step_number,
            started: false,
            request,
            warnings: Vec::new(),
            response: ResponseMetadata::generated(model_id),
            content: Vec::new(),
            open_text: HashMap::new(),
            open_reasoning: HashMap::new(),
            calls: HashMap::new(),
            approvals: HashMap::new(),
            denials: HashMap::new(),
        }
    }

    fn response(
        &mut self,
        id: Option<String>,
        model_id: Option<String>,
        timestamp: Option<chrono::DateTime<chrono::Utc>>,
    ) {
        if let Some(id) = id {
            self.response.id = id;
        }
        if let Some(model_id) = model_id {
            self.response.model_id = model_id;
        }
        if let Some(timestamp) = timestamp {
            self.response.timestamp = timestamp;
        }
    }

    fn record(&mut self, event: &StepEvent) {
        match event {
            StepEvent::TextStart {
                id,
                provider_metadata,
            } => {
                self.open_text.insert(id.clone(), self.content.len());
                self.content.push(StepContent::Text {
                    text: String::new(),
                    provider_metadata: provider_metadata.clone(),
                });
            }
            StepEvent::TextDelta { id, delta, .. } => {
                if let Some(StepContent::Text { text, .. }) = self
                    .open_text
                    .get(id)
                    .and_then(|&index| self.content.get_mut(index))
                {
                    text.push_str(delta);
                }
            }
            StepEvent::TextEnd {
                id,
                provider_metadata,
            } => {
                if let Some(index) = self.open_text.remove(id) {
                    set_metadata(&mut self.content[index], provider_metadata);
                }
            }
            StepEvent::ReasoningStart {
                id,
                provider_metadata,
            } => {
                self.open_reasoning.insert(id.clone(), self.content.len());
                self.content.push(StepContent::Reasoning {
                    text: String::new(),
                    provider_metadata: provider_metadata.clone(),
                });
            }
            StepEvent::ReasoningDelta { id, delta, .. } => {
                if let Some(StepContent::Reasoning { text, .. }) = self
                    .open_reasoning
                    .get(id)
                    .and_then(|&index| self.content.get_mut(index))
                {
                    text.push_str(delta);
                }
            }
            StepEvent::ReasoningEnd {
                id,
                provider_metadata,
            } => {
                if let Some(index) = self.open_reasoning.remove(id) {
                    set_metadata(&mut self.content[index], provider_metadata);
                }
            }
            StepEvent::ToolCall {
                tool_call_id,
                tool_name,
                input,
                dynamic,
                provider_executed,
                invalid,
                error,
            } => {
                let record = ToolCallRecord {
                    tool_call_id: tool_call_id.clone(),
                    tool_name: tool_name.clone(),
                    input: input.clone(),
                    dynamic: *dynamic,
                    provider_executed: *provider_executed,
                    invalid: *invalid,
                    error: error.clone(),
                };
                self.calls.insert(tool_call_id.clone(), record.clone());
                self.content.push(StepContent::ToolCall(record));
            }
            StepEvent::ToolApprovalRequest {
                approval_id,
                tool_call_id,
            } => {
                self.approvals
                    .insert(approval_id.clone(), tool_call_id.clone());
                self.content.push(StepContent::ToolApprovalRequest {
                    approval_id: approval_id.clone(),
                    tool_call_id: tool_call_id.clone(),
                });
            }
            StepEvent::ToolApprovalResponse {
                approval_id,
                approved: false,
                reason,
            } => {
                if let Some(tool_call_id) = self.approvals.get(approval_id) {
                    self.denials.insert(tool_call_id.clone(), reason.clone());
                }
            }
            StepEvent::ToolResult {
                tool_call_id,
                tool_name,
                output,
                preliminary: false,
                ..
            } => self.output(
                tool_call_id,
                tool_name,
                ToolOutcome::Result {
                    output: output.clone(),
                },
            ),
            StepEvent::ToolOutputError {
                tool_call_id,
                tool_name,
                error_text,
            } => self.output(
                tool_call_id,
                tool_name,
                ToolOutcome::Error {
                    error_text: error_text.clone(),
                },
            ),
            StepEvent::ToolOutputDenied {
                tool_call_id,
                tool_name,
            } => {
                let reason = self.denials.remove(tool_call_id).flatten();
                self.output(tool_call_id, tool_name, ToolOutcome::Denied { reason })
            }
            StepEvent::File(file) => self.content.push(StepContent::File(file.clone())),
            StepEvent::Source(source) => self.content.push(StepContent::Source(source.clone())),
            _ => {}
        }
    }

    fn output(&mut self, tool_call_id: &str, tool_name: &str, outcome: ToolOutcome) {
        let call = self.calls.get(tool_call_id);
        self.content.push(StepContent::ToolOutput(ToolOutputRecord {
            tool_call_id: tool_call_id.to_string(),
            tool_name: tool_name.to_string(),
            input: call.map(|c| c.input.clone()).unwrap_or_default(),
            outcome,
            dynamic: call.is_some_and(|c| c.dynamic),
            // Results without a known call can only come from the provider.
            provider_executed: call.map_or(true, |c| c.provider_executed),
        }));
    }

    fn close(
        self,
        finish_reason: FinishReason,
        usage: Usage,
        provider_metadata: Option<ProviderMetadata>,
    ) -> Step {
        Step {
            step_number: self.step_number,
            content: self.content,
            finish_reason,
            usage,
            warnings: self.warnings,
            request: self.request,
            response: self.response,
            provider_metadata,
        }
    }
}

fn set_metadata(content: &mut StepContent, metadata: &Option<ProviderMetadata>) {
    if metadata.is_none() {
        return;
    }
    if let StepContent::Text {
        provider_metadata, ..
    }
    | StepContent::Reasoning {
        provider_metadata, ..
    } = content
    {
        *provider_metadata = metadata.clone();
    }
}
