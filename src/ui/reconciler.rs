//! Folds run events into a [`UiMessage`].
//!
//! Mutations run as jobs on a [`SerialJobExecutor`], so events applied from
//! several tasks are still applied one at a time, in submission order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::RociError;
use crate::types::{StepEvent, ToolCallPhase};
use crate::util::serial::SerialJobExecutor;

use super::message::{PartState, UiDataPart, UiMessage, UiPart, UiToolApproval, UiToolPart};

/// Receives transient data parts, which are never stored in the message.
pub type DataCallback = Arc<dyn Fn(&UiDataPart) + Send + Sync>;

/// Message state plus the bookkeeping needed to apply the next event.
#[derive(Debug)]
pub struct UiMessageState {
    message: UiMessage,
    active_text: HashMap<String, usize>,
    active_reasoning: HashMap<String, usize>,
    approvals: HashMap<String, String>,
}

impl UiMessageState {
    pub fn new(message_id: impl Into<String>) -> Self {
        Self {
            message: UiMessage::new(message_id),
            active_text: HashMap::new(),
            active_reasoning: HashMap::new(),
            approvals: HashMap::new(),
        }
    }

    pub fn message(&self) -> &UiMessage {
        &self.message
    }

    /// Apply one event. Returns whether the message changed.
    pub fn apply(&mut self, event: &StepEvent, on_data: Option<&DataCallback>) -> bool {
        let parts = &mut self.message.parts;
        match event {
            StepEvent::StartStep { .. } => {
                parts.push(UiPart::StepStart);
                self.active_text.clear();
                self.active_reasoning.clear();
            }
            StepEvent::TextStart {
                id,
                provider_metadata,
            } => {
                self.active_text.insert(id.clone(), parts.len());
                parts.push(UiPart::Text {
                    text: String::new(),
                    state: PartState::Streaming,
                    provider_metadata: provider_metadata.clone(),
                });
            }
            StepEvent::TextDelta { id, delta, .. } => {
                match self.active_text.get(id).and_then(|&i| parts.get_mut(i)) {
                    Some(UiPart::Text { text, .. }) => text.push_str(delta),
                    _ => return false,
                }
            }
            StepEvent::TextEnd {
                id,
                provider_metadata,
            } => match self.active_text.remove(id).and_then(|i| parts.get_mut(i)) {
                Some(UiPart::Text {
                    state,
                    provider_metadata: metadata,
                    ..
                }) => {
                    *state = PartState::Done;
                    if provider_metadata.is_some() {
                        *metadata = provider_metadata.clone();
                    }
                }
                _ => return false,
            },
            StepEvent::ReasoningStart {
                id,
                provider_metadata,
            } => {
                self.active_reasoning.insert(id.clone(), parts.len());
                parts.push(UiPart::Reasoning {
                    text: String::new(),
                    state: PartState::Streaming,
                    provider_metadata: provider_metadata.clone(),
                });
            }
            StepEvent::ReasoningDelta { id, delta, .. } => {
                match self.active_reasoning.get(id).and_then(|&i| parts.get_mut(i)) {
                    Some(UiPart::Reasoning { text, .. }) => text.push_str(delta),
                    _ => return false,
                }
            }
            StepEvent::ReasoningEnd {
                id,
                provider_metadata,
            } => match self.active_reasoning.remove(id).and_then(|i| parts.get_mut(i)) {
                Some(UiPart::Reasoning {
                    state,
                    provider_metadata: metadata,
                    ..
                }) => {
                    *state = PartState::Done;
                    if provider_metadata.is_some() {
                        *metadata = provider_metadata.clone();
                    }
                }
                _ => return false,
            },

            StepEvent::ToolInputStart {
                tool_call_id,
                tool_name,
                provider_executed,
                dynamic,
            } => self.message.upsert_tool_part(
                tool_call_id,
                || UiToolPart::new(tool_call_id, tool_name, ToolCallPhase::InputStreaming),
                |part| {
                    part.dynamic = *dynamic;
                    part.provider_executed = *provider_executed;
                },
            ),
            StepEvent::ToolInputDelta {
                tool_call_id,
                delta,
                partial_input,
            } => match self.message.tool_part_mut(tool_call_id) {
                Some(part) => {
                    part.raw_input.push_str(delta);
                    if partial_input.is_some() {
                        part.input = partial_input.clone();
                    }
                }
                None => return false,
            },
            StepEvent::ToolCall {
                tool_call_id,
                tool_name,
                input,
                dynamic,
                provider_executed,
                invalid,
                error,
            } => self.message.upsert_tool_part(
                tool_call_id,
                || UiToolPart::new(tool_call_id, tool_name, ToolCallPhase::InputAvailable),
                |part| {
                    part.input = Some(input.clone());
                    part.dynamic = *dynamic;
                    part.provider_executed = *provider_executed;
                    if *invalid {
                        part.state = ToolCallPhase::OutputError;
                        part.error_text = error.clone();
                    } else {
                        part.state = ToolCallPhase::InputAvailable;
                    }
                },
            ),
            StepEvent::ToolApprovalRequest {
                approval_id,
                tool_call_id,
            } => match self.message.tool_part_mut(tool_call_id) {
                Some(part) => {
                    part.state = ToolCallPhase::ApprovalRequested;
                    part.approval = Some(UiToolApproval {
                        id: approval_id.clone(),
                        approved: None,
                        reason: None,
                    });
                    self.approvals
                        .insert(approval_id.clone(), tool_call_id.clone());
                }
                None => return false,
            },
            StepEvent::ToolApprovalResponse {
                approval_id,
                approved,
                reason,
            } => {
                let part = self
                    .approvals
                    .get(approval_id)
                    .and_then(|id| self.message.tool_part_mut(id));
                match part {
                    Some(part) => {
                        part.state = if *approved {
                            ToolCallPhase::Approved
                        } else {
                            ToolCallPhase::Denied
                        };
                        if let Some(approval) = &mut part.approval {
                            approval.approved = Some(*approved);
                            approval.reason = reason.clone();
                        }
                    }
                    None => return false,
                }
            }
            StepEvent::ToolResult {
                tool_call_id,
                tool_name,
                output,
                preliminary,
                dynamic,
            } => self.message.upsert_tool_part(
                tool_call_id,
                || {
                    // A result without a call was executed by the provider.
                    let mut part =
                        UiToolPart::new(tool_call_id, tool_name, ToolCallPhase::OutputAvailable);
                    part.provider_executed = true;
                    part.dynamic = *dynamic;
                    part
                },
                |part| {
                    part.state = ToolCallPhase::OutputAvailable;
                    part.output = Some(output.clone());
                    part.preliminary = *preliminary;
                },
            ),
            StepEvent::ToolOutputError {
                tool_call_id,
                tool_name,
                error_text,
            } => self.message.upsert_tool_part(
                tool_call_id,
                || UiToolPart::new(tool_call_id, tool_name, ToolCallPhase::OutputError),
                |part| {
                    part.state = ToolCallPhase::OutputError;
                    part.error_text = Some(error_text.clone());
                    part.preliminary = false;
                },
            ),
            StepEvent::ToolOutputDenied { tool_call_id, .. } => {
                match self.message.tool_part_mut(tool_call_id) {
                    Some(part) => part.state = ToolCallPhase::OutputDenied,
                    None => return false,
                }
            }

            StepEvent::File(file) => parts.push(UiPart::File(file.clone())),
            StepEvent::Source(source) => parts.push(UiPart::Source(source.clone())),
            StepEvent::Data {
                data_type,
                id,
                data,
                transient,
            } => {
                let part = UiDataPart {
                    data_type: data_type.clone(),
                    id: id.clone(),
                    data: data.clone(),
                };
                if *transient {
                    if let Some(on_data) = on_data {
                        on_data(&part);
                    }
                    return false;
                }
                let existing = id.as_ref().and_then(|_| {
                    parts.iter_mut().find_map(|p| match p {
                        UiPart::Data(d) if d.data_type == part.data_type && d.id == part.id => {
                            Some(d)
                        }
                        _ => None,
                    })
                });
                match existing {
                    Some(existing) => existing.data = part.data,
                    None => parts.push(UiPart::Data(part)),
                }
            }

            StepEvent::Start
            | StepEvent::ToolInputEnd { .. }
            | StepEvent::FinishStep { .. }
            | StepEvent::Finish { .. }
            | StepEvent::Abort
            | StepEvent::Error { .. } => return false,
        }
        true
    }
}

/// Applies events to one message through a FIFO executor.
#[derive(Clone)]
pub struct UiMessageReconciler {
    state: Arc<Mutex<UiMessageState>>,
    executor: SerialJobExecutor,
    on_data: Option<DataCallback>,
}

impl std::fmt::Debug for UiMessageReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UiMessageReconciler")
            .field("executor", &self.executor)
            .finish()
    }
}

impl UiMessageReconciler {
    pub fn new(message_id: impl Into<String>, on_data: Option<DataCallback>) -> Self {
        Self {
            state: Arc::new(Mutex::new(UiMessageState::new(message_id))),
            executor: SerialJobExecutor::new(),
            on_data,
        }
    }

    /// Apply `event`. Returns a snapshot when the message changed.
    pub async fn apply(&self, event: StepEvent) -> Result<Option<UiMessage>, RociError> {
        let state = self.state.clone();
        let on_data = self.on_data.clone();
        self.executor
            .run(move || async move {
                let mut state = state
                    .lock()
                    .map_err(|_| RociError::InvalidState("ui message state poisoned".into()))?;
                let changed = state.apply(&event, on_data.as_ref());
                Ok(changed.then(|| state.message().clone()))
            })
            .await
    }

    /// Current message.
    pub fn snapshot(&self) -> Option<UiMessage> {
        self.state.lock().ok().map(|s| s.message().clone())
    }
}
