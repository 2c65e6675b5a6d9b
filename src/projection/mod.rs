//! Views over a run's events: plain text, SSE frames and log lines.
//!
//! Each projection consumes its own reader, so any number of them can run side
//! by side over the same run.

pub mod log;
pub mod sse;
pub mod text;

pub use log::{log_stream, LogFormatter, LogOptions};
pub use sse::{decode_sse, encode_event, sse_stream, SseDecoder, DONE_FRAME};
pub use text::text_stream;
