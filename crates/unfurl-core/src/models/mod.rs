//! Data models
//!
//! Media records, metrics polling state and queued tasks.

mod media;
mod metrics;
mod task;

pub use media::*;
pub use metrics::*;
pub use task::*;
