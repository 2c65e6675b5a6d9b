//! Tool execution for one step.
//!
//! Every client call with a matching tool runs in its own task, so calls of the
//! same step execute concurrently. Tasks report through a per-step channel; the
//! step closes only after every task has finished and its events were drained.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use futures::{FutureExt, StreamExt};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::normalize::ResolvedCall;
use crate::tools::{
    ApprovalDecision, ApprovalPolicy, ApprovalRequest, ApprovalVerdict, DataWriter, Tool,
    ToolArguments, ToolExecutionContext, ToolOutput,
};
use crate::types::{ModelMessage, StepEvent, ToolCallPhase};

/// Phase bookkeeping for every call of a step.
#[derive(Debug, Default)]
pub(crate) struct ToolCallTracker {
    phases: Mutex<HashMap<String, ToolCallPhase>>,
}

impl ToolCallTracker {
    pub fn input_started(&self, tool_call_id: &str) {
        if let Ok(mut phases) = self.phases.lock() {
            phases
                .entry(tool_call_id.to_string())
                .or_insert(ToolCallPhase::InputStreaming);
        }
    }

    /// Move a call to `next`. Illegal transitions are logged and refused.
    pub fn advance(&self, tool_call_id: &str, next: ToolCallPhase) -> bool {
        let Ok(mut phases) = self.phases.lock() else {
            return false;
        };
        let current = phases
            .entry(tool_call_id.to_string())
            .or_insert(ToolCallPhase::InputStreaming);
        if current.can_transition_to(next) {
            *current = next;
            true
        } else {
            tracing::warn!(
                tool_call_id,
                from = %current,
                to = %next,
                "illegal tool call transition"
            );
            false
        }
    }

    pub fn phase(&self, tool_call_id: &str) -> Option<ToolCallPhase> {
        self.phases
            .lock()
            .ok()
            .and_then(|phases| phases.get(tool_call_id).copied())
    }
}

/// Dispatches resolved calls and collects what the tasks report.
pub(crate) struct ToolCoordinator {
    approval: ApprovalPolicy,
    cancel: CancellationToken,
    messages: Arc<Vec<ModelMessage>>,
    tx: UnboundedSender<StepEvent>,
    rx: UnboundedReceiver<StepEvent>,
    tasks: JoinSet<()>,
    tracker: Arc<ToolCallTracker>,
}

impl ToolCoordinator {
    pub fn new(
        approval: ApprovalPolicy,
        cancel: CancellationToken,
        messages: Arc<Vec<ModelMessage>>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            approval,
            cancel,
            messages,
            tx,
            rx,
            tasks: JoinSet::new(),
            tracker: Arc::new(ToolCallTracker::default()),
        }
    }

    pub fn tracker(&self) -> &ToolCallTracker {
        &self.tracker
    }

    /// Start work for one complete call.
    pub fn dispatch(&mut self, call: ResolvedCall) {
        let id = call.record.tool_call_id.clone();
        self.tracker.input_started(&id);
        self.tracker.advance(&id, ToolCallPhase::InputAvailable);

        if call.record.invalid {
            self.tracker.advance(&id, ToolCallPhase::OutputError);
            let _ = self.tx.send(StepEvent::ToolOutputError {
                tool_call_id: id,
                tool_name: call.record.tool_name,
                error_text: call
                    .record
                    .error
                    .unwrap_or_else(|| "invalid tool input".to_string()),
            });
            return;
        }

        // Provider-executed calls and calls the caller must answer stay as they are.
        let Some(tool) = call.tool else {
            return;
        };
        if call.record.provider_executed {
            return;
        }

        let ctx = ToolExecutionContext {
            tool_call_id: id,
            tool_name: call.record.tool_name,
            messages: self.messages.clone(),
            cancel: self.cancel.child_token(),
            data: DataWriter::new(self.tx.clone()),
        };
        let job = ToolJob {
            input: call.record.input,
            dynamic: call.record.dynamic,
            tool,
            ctx,
            approval: self.approval.clone(),
            tx: self.tx.clone(),
            tracker: self.tracker.clone(),
        };
        self.tasks.spawn(job.run());
    }

    /// Next event reported by a tool task, while the provider is still streaming.
    pub async fn recv(&mut self) -> Option<StepEvent> {
        self.rx.recv().await
    }

    /// Next event once the provider has finished. `None` when every task is
    /// done and nothing is left to read.
    pub async fn next_event(&mut self) -> Option<StepEvent> {
        loop {
            if let Ok(event) = self.rx.try_recv() {
                return Some(event);
            }
            if self.tasks.is_empty() {
                return None;
            }
            tokio::select! {
                event = self.rx.recv() => return event,
                joined = self.tasks.join_next() => {
                    if let Some(Err(e)) = joined {
                        if !e.is_cancelled() {
                            tracing::error!(error = %e, "tool task failed");
                        }
                    }
                }
            }
        }
    }

    /// Stop every running task.
    pub fn abort_all(&mut self) {
        self.tasks.abort_all();
    }
}

struct ToolJob {
    input: serde_json::Value,
    dynamic: bool,
    tool: Arc<dyn Tool>,
    ctx: ToolExecutionContext,
    approval: ApprovalPolicy,
    tx: UnboundedSender<StepEvent>,
    tracker: Arc<ToolCallTracker>,
}

impl ToolJob {
    async fn run(self) {
        let tool_call_id = self.ctx.tool_call_id.clone();
        let tool_name = self.ctx.tool_name.clone();
        let tx = self.tx.clone();
        let tracker = self.tracker.clone();

        if AssertUnwindSafe(self.execute()).catch_unwind().await.is_err() {
            tracing::error!(tool_call_id = %tool_call_id, tool_name = %tool_name, "tool panicked");
            if tracker.advance(&tool_call_id, ToolCallPhase::OutputError) {
                let _ = tx.send(StepEvent::ToolOutputError {
                    tool_call_id,
                    tool_name,
                    error_text: "tool execution panicked".into(),
                });
            }
        }
    }

    fn send(&self, event: StepEvent) {
        let _ = self.tx.send(event);
    }

    fn fail(&self, error_text: String) {
        tracing::warn!(
            tool_call_id = %self.ctx.tool_call_id,
            tool_name = %self.ctx.tool_name,
            error = %error_text,
            "tool execution failed"
        );
        self.tracker
            .advance(&self.ctx.tool_call_id, ToolCallPhase::OutputError);
        self.send(StepEvent::ToolOutputError {
            tool_call_id: self.ctx.tool_call_id.clone(),
            tool_name: self.ctx.tool_name.clone(),
            error_text,
        });
    }

    fn result(&self, output: serde_json::Value, preliminary: bool) {
        if !preliminary {
            self.tracker
                .advance(&self.ctx.tool_call_id, ToolCallPhase::OutputAvailable);
        }
        self.send(StepEvent::ToolResult {
            tool_call_id: self.ctx.tool_call_id.clone(),
            tool_name: self.ctx.tool_name.clone(),
            output,
            preliminary,
            dynamic: self.dynamic,
        });
    }

    async fn execute(self) {
        let id = self.ctx.tool_call_id.clone();

        if self
            .tool
            .needs_approval()
            .requires_approval(&self.input, &self.ctx)
        {
            let Some(decision) = self.request_approval().await else {
                return;
            };
            if let ApprovalDecision::Deny { reason } = decision {
                tracing::debug!(tool_call_id = %id, ?reason, "tool call denied");
                self.tracker.advance(&id, ToolCallPhase::Denied);
                self.tracker.advance(&id, ToolCallPhase::OutputDenied);
                self.send(StepEvent::ToolOutputDenied {
                    tool_call_id: id,
                    tool_name: self.ctx.tool_name.clone(),
                });
                return;
            }
            self.tracker.advance(&id, ToolCallPhase::Approved);
        }

        if self.ctx.cancel.is_cancelled() {
            return;
        }
        if !self.tracker.advance(&id, ToolCallPhase::Executing) {
            return;
        }
        tracing::debug!(tool_call_id = %id, tool_name = %self.ctx.tool_name, "executing tool");

        let args = ToolArguments::new(self.input.clone());
        let output = tokio::select! {
            output = self.tool.execute(&args, &self.ctx) => output,
            _ = self.ctx.cancel.cancelled() => return,
        };

        match output {
            Err(e) => self.fail(e.to_string()),
            Ok(ToolOutput::Value(value)) => self.result(value, false),
            Ok(ToolOutput::Stream(stream)) => {
                let mut stream = stream.peekable();
                let mut finished = false;
                loop {
                    let next = tokio::select! {
                        next = stream.next() => next,
                        _ = self.ctx.cancel.cancelled() => return,
                    };
                    match next {
                        None => break,
                        Some(Err(e)) => {
                            self.fail(e.to_string());
                            return;
                        }
                        Some(Ok(value)) => {
                            let more = tokio::select! {
                                peeked = Pin::new(&mut stream).peek() => peeked.is_some(),
                                _ = self.ctx.cancel.cancelled() => return,
                            };
                            self.result(value, more);
                            finished = !more;
                        }
                    }
                }
                if !finished {
                    self.result(serde_json::Value::Null, false);
                }
            }
        }
    }

    /// Emit the request and wait for a decision. `None` when the request stays
    /// pending or the run is cancelled.
    async fn request_approval(&self) -> Option<ApprovalDecision> {
        let approval_id = Uuid::new_v4().to_string();
        let id = &self.ctx.tool_call_id;
        self.tracker.advance(id, ToolCallPhase::ApprovalRequested);
        self.send(StepEvent::ToolApprovalRequest {
            approval_id: approval_id.clone(),
            tool_call_id: id.clone(),
        });

        let request = ApprovalRequest {
            approval_id: approval_id.clone(),
            tool_call_id: id.clone(),
            tool_name: self.ctx.tool_name.clone(),
            input: self.input.clone(),
        };
        let decision = match self.approval.decide(&request) {
            None => {
                tracing::debug!(tool_call_id = %id, approval_id = %approval_id, "approval deferred");
                return None;
            }
            Some(ApprovalVerdict::Approve) => ApprovalDecision::Approve,
            Some(ApprovalVerdict::Deny { reason }) => ApprovalDecision::Deny { reason },
            Some(ApprovalVerdict::Pending(decision)) => tokio::select! {
                decision = decision => decision,
                _ = self.ctx.cancel.cancelled() => return None,
            },
        };

        tracing::debug!(
            tool_call_id = %id,
            approval_id = %approval_id,
            approved = decision.is_approved(),
            "approval decided"
        );
        let reason = match &decision {
            ApprovalDecision::Approve => None,
            ApprovalDecision::Deny { reason } => reason.clone(),
        };
        self.send(StepEvent::ToolApprovalResponse {
            approval_id,
            approved: decision.is_approved(),
            reason,
        });
        Some(decision)
    }
}
