//! The `processor` module turns meter traffic into stored readings and
//! published billing snapshots.

pub mod payload;
pub mod service;

pub use payload::{ReadingPayload, reset_target};
pub use service::{EventProcessor, ProcessorOptions};
