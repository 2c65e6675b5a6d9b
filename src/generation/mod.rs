//! Streaming text generation: the step loop and the handle it returns.

pub(crate) mod normalize;
pub mod request;
pub(crate) mod runner;
pub mod stream;
pub(crate) mod tooling;

pub use request::{
    ChunkCallback, ErrorCallback, FinishCallback, StepFinishCallback, StreamTextRequest,
};
pub use stream::{stream_text, RunSummary, StreamTextResult};
