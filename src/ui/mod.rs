//! UI message projection.
//!
//! Turns a run's events into successive snapshots of the assistant message,
//! the shape a chat UI renders.

pub mod message;
pub mod reconciler;

use std::sync::Arc;

use futures::stream::BoxStream;
use futures::{Stream, StreamExt};

pub use message::{PartState, UiDataPart, UiMessage, UiPart, UiToolApproval, UiToolPart};
pub use reconciler::{DataCallback, UiMessageReconciler, UiMessageState};

use crate::types::StepEvent;

/// Options for [`ui_message_stream`].
#[derive(Clone, Default)]
pub struct UiMessageOptions {
    /// Id of the produced message. A random id is used when unset.
    pub message_id: Option<String>,
    pub on_data: Option<DataCallback>,
}

impl UiMessageOptions {
    pub fn with_message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    /// Receive transient data parts.
    pub fn with_on_data(mut self, cb: impl Fn(&UiDataPart) + Send + Sync + 'static) -> Self {
        self.on_data = Some(Arc::new(cb));
        self
    }
}

impl std::fmt::Debug for UiMessageOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UiMessageOptions")
            .field("message_id", &self.message_id)
            .field("on_data", &self.on_data.is_some())
            .finish()
    }
}

/// A snapshot of the message after every event that changed it.
pub fn ui_message_stream<S>(events: S, options: UiMessageOptions) -> BoxStream<'static, UiMessage>
where
    S: Stream<Item = StepEvent> + Send + 'static,
{
    let message_id = options
        .message_id
        .unwrap_or_else(|| format!("msg-{}", uuid::Uuid::new_v4()));
    let reconciler = UiMessageReconciler::new(message_id, options.on_data);

    async_stream::stream! {
        let mut events = std::pin::pin!(events);
        while let Some(event) = events.next().await {
            match reconciler.apply(event).await {
                Ok(Some(snapshot)) => yield snapshot,
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "ui message update failed");
                    break;
                }
            }
        }
    }
    .boxed()
}
