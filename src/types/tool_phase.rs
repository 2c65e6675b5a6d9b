//! Lifecycle of a single tool call.

use serde::{Deserialize, Serialize};
use strum::Display;

/// Where a tool call stands.
///
/// `InputStreaming → InputAvailable → [ApprovalRequested → Approved | Denied]
/// → Executing → OutputAvailable | OutputError`, or `Denied → OutputDenied`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ToolCallPhase {
    InputStreaming,
    InputAvailable,
    ApprovalRequested,
    Approved,
    Denied,
    Executing,
    OutputAvailable,
    OutputError,
    OutputDenied,
}

impl ToolCallPhase {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::OutputAvailable | Self::OutputError | Self::OutputDenied
        )
    }

    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: ToolCallPhase) -> bool {
        use ToolCallPhase::*;
        match (self, next) {
            (InputStreaming, InputAvailable) => true,
            (InputAvailable, ApprovalRequested | Executing) => true,
            (ApprovalRequested, Approved | Denied) => true,
            (Approved, Executing) => true,
            (Denied, OutputDenied) => true,
            // Provider-executed results arrive without local execution.
            (InputAvailable, OutputAvailable) => true,
            (Executing, OutputAvailable) => true,
            // Invalid input, cancellation and failures can end a call early.
            (from, OutputError) => !from.is_terminal() && from != Denied,
            _ => false,
        }
    }
}
