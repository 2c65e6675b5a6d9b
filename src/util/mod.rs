//! Utility modules: retry, partial JSON repair, write-once cells, serial execution, timeouts.

pub mod partial_json;
pub mod promise;
pub mod retry;
pub mod serial;
pub mod timeout;
