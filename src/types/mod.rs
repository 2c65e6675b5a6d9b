//! Core types for roci-stream.

pub mod generation;
pub mod message;
pub mod step;
pub mod stream;
pub mod tool_phase;
pub mod usage;

pub use generation::*;
pub use message::*;
pub use step::*;
pub use stream::*;
pub use tool_phase::*;
pub use usage::*;
