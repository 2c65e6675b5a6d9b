//! Human-in-the-loop approval for tool calls.

use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

/// Context handed to an approval policy.
#[derive(Debug, Clone, PartialEq)]
pub struct ApprovalRequest {
    pub approval_id: String,
    pub tool_call_id: String,
    pub tool_name: String,
    pub input: serde_json::Value,
}

/// Final answer to an approval request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approve,
    Deny { reason: Option<String> },
}

impl ApprovalDecision {
    pub fn deny(reason: impl Into<String>) -> Self {
        Self::Deny {
            reason: Some(reason.into()),
        }
    }

    pub fn is_approved(&self) -> bool {
        matches!(self, Self::Approve)
    }
}

/// What a policy returns immediately.
pub enum ApprovalVerdict {
    Approve,
    Deny { reason: Option<String> },
    /// The decision arrives later; the call waits for it.
    Pending(BoxFuture<'static, ApprovalDecision>),
}

impl From<ApprovalDecision> for ApprovalVerdict {
    fn from(decision: ApprovalDecision) -> Self {
        match decision {
            ApprovalDecision::Approve => Self::Approve,
            ApprovalDecision::Deny { reason } => Self::Deny { reason },
        }
    }
}

/// Caller-supplied approval callback.
pub type ApprovalHandler = Arc<dyn Fn(&ApprovalRequest) -> ApprovalVerdict + Send + Sync>;

/// How approval requests are answered during a run.
#[derive(Clone, Default)]
pub enum ApprovalPolicy {
    /// Leave requests unanswered. The call is not executed and the run does
    /// not continue past its step.
    #[default]
    Defer,
    AutoApprove,
    AutoDeny,
    Custom(ApprovalHandler),
}

impl ApprovalPolicy {
    pub fn custom<F>(handler: F) -> Self
    where
        F: Fn(&ApprovalRequest) -> ApprovalVerdict + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(handler))
    }

    /// Answer `request`, or `None` when the policy defers.
    pub(crate) fn decide(&self, request: &ApprovalRequest) -> Option<ApprovalVerdict> {
        match self {
            Self::Defer => None,
            Self::AutoApprove => Some(ApprovalVerdict::Approve),
            Self::AutoDeny => Some(ApprovalVerdict::Deny { reason: None }),
            Self::Custom(handler) => Some(handler(request)),
        }
    }
}

impl std::fmt::Debug for ApprovalPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Defer => "Defer",
            Self::AutoApprove => "AutoApprove",
            Self::AutoDeny => "AutoDeny",
            Self::Custom(_) => "Custom(..)",
        };
        f.write_str(name)
    }
}

/// Where an approval request stands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ApprovalResolution {
    Pending,
    Approved,
    Denied { reason: Option<String> },
}

/// An approval request and its resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub approval_id: String,
    pub tool_call_id: String,
    pub resolution: ApprovalResolution,
}

impl ApprovalRecord {
    pub fn pending(approval_id: impl Into<String>, tool_call_id: impl Into<String>) -> Self {
        Self {
            approval_id: approval_id.into(),
            tool_call_id: tool_call_id.into(),
            resolution: ApprovalResolution::Pending,
        }
    }

    pub fn resolve(&mut self, decision: &ApprovalDecision) {
        self.resolution = match decision {
            ApprovalDecision::Approve => ApprovalResolution::Approved,
            ApprovalDecision::Deny { reason } => ApprovalResolution::Denied {
                reason: reason.clone(),
            },
        };
    }
}
