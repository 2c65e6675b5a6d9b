//! Replayable multi-subscriber event log.
//!
//! One producer appends; any number of readers walk the log with their own
//! cursor. A reader created late still sees every event from the start.

use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use tokio::sync::Notify;

use crate::types::StepEvent;

/// Events appended before the first monitoring warning.
pub const DEFAULT_LOG_WARN_THRESHOLD: usize = 10_000;

#[derive(Default)]
struct Log {
    events: Vec<StepEvent>,
    closed: bool,
    warned: bool,
}

struct Shared {
    log: Mutex<Log>,
    notify: Notify,
    warn_threshold: usize,
}

/// Append-only log shared between the producer and all readers.
#[derive(Clone)]
pub struct BroadcastHub {
    shared: Arc<Shared>,
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_WARN_THRESHOLD)
    }
}

impl std::fmt::Debug for BroadcastHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastHub")
            .field("len", &self.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl BroadcastHub {
    pub fn new(warn_threshold: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                log: Mutex::new(Log::default()),
                notify: Notify::new(),
                warn_threshold,
            }),
        }
    }

    /// Append one event and wake every reader. Ignored once closed.
    pub fn publish(&self, event: StepEvent) {
        {
            let Ok(mut log) = self.shared.log.lock() else {
                return;
            };
            if log.closed {
                tracing::debug!(event = event.type_tag(), "publish after close ignored");
                return;
            }
            log.events.push(event);
            if !log.warned && log.events.len() > self.shared.warn_threshold {
                log.warned = true;
                tracing::warn!(
                    events = log.events.len(),
                    threshold = self.shared.warn_threshold,
                    "broadcast log is growing large"
                );
            }
        }
        self.shared.notify.notify_waiters();
    }

    /// Mark the log complete. Readers finish after draining it.
    pub fn close(&self) {
        if let Ok(mut log) = self.shared.log.lock() {
            log.closed = true;
        }
        self.shared.notify.notify_waiters();
    }

    pub fn len(&self) -> usize {
        self.shared.log.lock().map(|l| l.events.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.shared.log.lock().map(|l| l.closed).unwrap_or(true)
    }

    /// Whether a terminal event has been appended.
    pub fn has_terminal(&self) -> bool {
        self.shared
            .log
            .lock()
            .map(|l| l.events.iter().any(StepEvent::is_terminal))
            .unwrap_or(false)
    }

    /// Copy of everything appended so far.
    pub fn snapshot(&self) -> Vec<StepEvent> {
        self.shared
            .log
            .lock()
            .map(|l| l.events.clone())
            .unwrap_or_default()
    }

    /// A reader starting at the beginning of the log.
    pub fn subscribe(&self) -> EventReader {
        EventReader {
            inner: reader_stream(self.shared.clone()).boxed(),
        }
    }
}

enum Next {
    Event(StepEvent),
    Done,
    Wait,
}

fn reader_stream(shared: Arc<Shared>) -> impl Stream<Item = StepEvent> + Send {
    async_stream::stream! {
        let mut cursor = 0usize;
        loop {
            let notified = shared.notify.notified();
            let next = match shared.log.lock() {
                Ok(log) => match log.events.get(cursor) {
                    Some(event) => Next::Event(event.clone()),
                    None if log.closed => Next::Done,
                    None => Next::Wait,
                },
                Err(_) => Next::Done,
            };
            match next {
                Next::Event(event) => {
                    cursor += 1;
                    let terminal = event.is_terminal();
                    yield event;
                    if terminal {
                        break;
                    }
                }
                Next::Done => break,
                Next::Wait => notified.await,
            }
        }
    }
}

/// One subscriber's view of the log.
pub struct EventReader {
    inner: BoxStream<'static, StepEvent>,
}

impl std::fmt::Debug for EventReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EventReader")
    }
}

impl Stream for EventReader {
    type Item = StepEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<StepEvent>> {
        self.inner.poll_next_unpin(cx)
    }
}
