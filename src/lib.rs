//! Roci Stream: the streaming-generation core of the Roci SDK.
//!
//! Drives a multi-step conversation with a language model: streams the model's
//! output, executes tool calls (with optional human approval), feeds results
//! back, and fans every event out to any number of readers through a
//! replayable log.
//!
//! # Quick Start
//!
//! ```no_run
//! use futures::StreamExt;
//! use roci_stream::prelude::*;
//!
//! # async fn example(model: std::sync::Arc<dyn LanguageModel>) -> roci_stream::error::Result<()> {
//! let result = stream_text(StreamTextRequest::prompt(model, "Hello!"));
//!
//! let mut text = result.text_stream();
//! while let Some(delta) = text.next().await {
//!     print!("{delta}");
//! }
//! println!("\nfinish: {}", result.finish_reason().await?);
//! # Ok(())
//! # }
//! ```

pub mod broadcast;
pub mod config;
pub mod error;
pub mod generation;
pub mod prelude;
pub mod projection;
pub mod provider;
pub mod stop;
pub mod stream_transform;
pub mod testing;
pub mod tools;
pub mod types;
pub mod ui;
pub mod util;

pub use generation::{stream_text, RunSummary, StreamTextRequest, StreamTextResult};
