//! Event stream transformations.
//!
//! Transforms run once, between the step loop and the broadcast hub, so every
//! subscriber sees the transformed sequence.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::BoxStream;
use futures::StreamExt;

use crate::types::StepEvent;

/// Trait for transforming the event stream of a run.
pub trait StreamTransform: Send + Sync {
    /// Transform the stream.
    fn transform(&self, stream: BoxStream<'static, StepEvent>) -> BoxStream<'static, StepEvent>;
}

/// Apply `transforms` in order.
pub(crate) fn apply_all(
    transforms: &[Arc<dyn StreamTransform>],
    stream: BoxStream<'static, StepEvent>,
) -> BoxStream<'static, StepEvent> {
    transforms
        .iter()
        .fold(stream, |stream, transform| transform.transform(stream))
}

/// Drop events the predicate rejects. Terminal events always pass.
pub struct FilterTransform {
    predicate: Arc<dyn Fn(&StepEvent) -> bool + Send + Sync>,
}

impl FilterTransform {
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&StepEvent) -> bool + Send + Sync + 'static,
    {
        Self {
            predicate: Arc::new(predicate),
        }
    }
}

impl StreamTransform for FilterTransform {
    fn transform(&self, stream: BoxStream<'static, StepEvent>) -> BoxStream<'static, StepEvent> {
        let predicate = self.predicate.clone();
        let transformed = async_stream::stream! {
            let mut inner = std::pin::pin!(stream);
            while let Some(event) = inner.next().await {
                if event.is_terminal() || (predicate)(&event) {
                    yield event;
                }
            }
        };
        Box::pin(transformed)
    }
}

/// Map the text of every text delta.
pub struct MapTransform {
    mapper: Arc<dyn Fn(String) -> String + Send + Sync>,
}

impl MapTransform {
    pub fn new<F>(mapper: F) -> Self
    where
        F: Fn(String) -> String + Send + Sync + 'static,
    {
        Self {
            mapper: Arc::new(mapper),
        }
    }
}

impl StreamTransform for MapTransform {
    fn transform(&self, stream: BoxStream<'static, StepEvent>) -> BoxStream<'static, StepEvent> {
        let mapper = self.mapper.clone();
        let transformed = async_stream::stream! {
            let mut inner = std::pin::pin!(stream);
            while let Some(event) = inner.next().await {
                match event {
                    StepEvent::TextDelta { id, delta, provider_metadata } if !delta.is_empty() => {
                        yield StepEvent::TextDelta {
                            id,
                            delta: (mapper)(delta),
                            provider_metadata,
                        };
                    }
                    other => yield other,
                }
            }
        };
        Box::pin(transformed)
    }
}

/// Custom chunk detector: returns the byte length of the next chunk to emit
/// from the buffer, or `None` to keep buffering.
pub type ChunkDetector = Arc<dyn Fn(&str) -> Option<usize> + Send + Sync>;

/// How [`SmoothTransform`] splits buffered text.
#[derive(Clone)]
pub enum Chunking {
    /// Up to and including the whitespace after a word.
    Word,
    /// Up to and including a newline.
    Line,
    /// Up to the end of the first match.
    Regex(regex::Regex),
    Custom(ChunkDetector),
}

impl Chunking {
    fn next_chunk_len(&self, buffer: &str) -> Option<usize> {
        let len = match self {
            Self::Word => word_end(buffer),
            Self::Line => buffer.find('\n').map(|i| i + 1),
            Self::Regex(re) => re.find(buffer).map(|m| m.end()),
            Self::Custom(detect) => detect(buffer),
        };
        // Empty or out-of-range matches would stall or split a char.
        len.filter(|&n| n > 0 && n <= buffer.len() && buffer.is_char_boundary(n))
    }
}

/// End of the first word and the whitespace run that follows it.
fn word_end(buffer: &str) -> Option<usize> {
    let start = buffer.find(|c: char| !c.is_whitespace())?;
    let word = &buffer[start..];
    let gap = word.find(char::is_whitespace)?;
    let tail = &word[gap..];
    let next = tail.find(|c: char| !c.is_whitespace()).unwrap_or(tail.len());
    Some(start + gap + next)
}

impl std::fmt::Debug for Chunking {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Word => f.write_str("Word"),
            Self::Line => f.write_str("Line"),
            Self::Regex(re) => f.debug_tuple("Regex").field(&re.as_str()).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Re-chunk text deltas into words or lines, optionally pacing them.
///
/// Buffered text is flushed when the text id changes or any other event arrives,
/// so no text is lost or reordered relative to non-text events.
#[derive(Debug, Clone)]
pub struct SmoothTransform {
    chunking: Chunking,
    delay: Option<Duration>,
}

impl Default for SmoothTransform {
    fn default() -> Self {
        Self {
            chunking: Chunking::Word,
            delay: Some(Duration::from_millis(10)),
        }
    }
}

impl SmoothTransform {
    pub fn new(chunking: Chunking) -> Self {
        Self {
            chunking,
            ..Default::default()
        }
    }

    pub fn with_delay(mut self, delay: Option<Duration>) -> Self {
        self.delay = delay;
        self
    }
}

impl StreamTransform for SmoothTransform {
    fn transform(&self, stream: BoxStream<'static, StepEvent>) -> BoxStream<'static, StepEvent> {
        let chunking = self.chunking.clone();
        let delay = self.delay;
        let transformed = async_stream::stream! {
            let mut buffer = String::new();
            let mut buffer_id: Option<String> = None;
            let mut inner = std::pin::pin!(stream);

            while let Some(event) = inner.next().await {
                match event {
                    StepEvent::TextDelta { id, delta, provider_metadata: None } => {
                        if buffer_id.as_deref() != Some(id.as_str()) {
                            if let Some(previous) = buffer_id.take() {
                                if !buffer.is_empty() {
                                    yield text_delta(previous, std::mem::take(&mut buffer));
                                }
                            }
                            buffer_id = Some(id.clone());
                        }
                        buffer.push_str(&delta);
                        while let Some(n) = chunking.next_chunk_len(&buffer) {
                            let rest = buffer.split_off(n);
                            let chunk = std::mem::replace(&mut buffer, rest);
                            yield text_delta(id.clone(), chunk);
                            if let Some(delay) = delay {
                                tokio::time::sleep(delay).await;
                            }
                        }
                    }
                    other => {
                        if let Some(previous) = buffer_id.take() {
                            if !buffer.is_empty() {
                                yield text_delta(previous, std::mem::take(&mut buffer));
                            }
                        }
                        yield other;
                    }
                }
            }

            if let Some(previous) = buffer_id {
                if !buffer.is_empty() {
                    yield text_delta(previous, buffer);
                }
            }
        };
        Box::pin(transformed)
    }
}

fn text_delta(id: String, delta: String) -> StepEvent {
    StepEvent::TextDelta {
        id,
        delta,
        provider_metadata: None,
    }
}
