//! Server-sent-events framing.
//!
//! Each event is written as `data: <json>\n\n`; the stream ends with
//! `data: [DONE]\n\n`.

use futures::stream::BoxStream;
use futures::{Stream, StreamExt};

use crate::error::RociError;
use crate::types::StepEvent;

/// Final frame of every SSE stream.
pub const DONE_FRAME: &str = "data: [DONE]\n\n";

const DONE_MARKER: &str = "[DONE]";

/// Encode one event as a frame.
pub fn encode_event(event: &StepEvent) -> Result<String, RociError> {
    let json = serde_json::to_string(event)?;
    Ok(format!("data: {json}\n\n"))
}

/// Frames for every event, then [`DONE_FRAME`].
pub fn sse_stream<S>(events: S) -> BoxStream<'static, String>
where
    S: Stream<Item = StepEvent> + Send + 'static,
{
    async_stream::stream! {
        let mut events = std::pin::pin!(events);
        while let Some(event) = events.next().await {
            match encode_event(&event) {
                Ok(frame) => yield frame,
                Err(e) => {
                    tracing::warn!(error = %e, event = event.type_tag(), "failed to serialize SSE event");
                    if let Ok(frame) = encode_event(&StepEvent::error(e.to_string())) {
                        yield frame;
                    }
                }
            }
        }
        yield DONE_FRAME.to_string();
    }
    .boxed()
}

/// Incremental SSE decoder.
///
/// Accepts input in arbitrary chunks. Lines other than `data:` are ignored, as
/// are comments. Nothing is decoded after `[DONE]`.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: String,
    data: Vec<String>,
    done: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `[DONE]` has been seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feed a chunk; returns the events it completed.
    pub fn push(&mut self, chunk: &str) -> Result<Vec<StepEvent>, RociError> {
        let mut events = Vec::new();
        if self.done {
            return Ok(events);
        }
        self.buffer.push_str(chunk);

        while let Some(newline) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=newline).collect();
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if let Some(event) = self.dispatch()? {
                    events.push(event);
                }
                if self.done {
                    self.buffer.clear();
                    break;
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }
            if let Some(value) = line.strip_prefix("data:") {
                self.data
                    .push(value.strip_prefix(' ').unwrap_or(value).to_string());
            }
        }
        Ok(events)
    }

    /// Flush a trailing frame that was not followed by a blank line.
    pub fn finish(&mut self) -> Result<Vec<StepEvent>, RociError> {
        let mut events = self.push("\n")?;
        if !self.done {
            events.extend(self.dispatch()?);
        }
        Ok(events)
    }

    fn dispatch(&mut self) -> Result<Option<StepEvent>, RociError> {
        if self.data.is_empty() {
            return Ok(None);
        }
        let payload = std::mem::take(&mut self.data).join("\n");
        if payload == DONE_MARKER {
            self.done = true;
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&payload)?))
    }
}

/// Decode a complete SSE body, stopping at `[DONE]`.
pub fn decode_sse(body: &str) -> Result<Vec<StepEvent>, RociError> {
    let mut decoder = SseDecoder::new();
    let mut events = decoder.push(body)?;
    if !decoder.is_done() {
        events.extend(decoder.finish()?);
    }
    Ok(events)
}
