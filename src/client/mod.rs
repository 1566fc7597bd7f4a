//! The `client` module provides the facades applications use on top of a
//! `TransportConnection`.
//!
//! - `Publisher` encodes values through a `Codec` and publishes them with
//!   at-least-once handoff, and publishes retained status reports.
//! - `Subscriber` registers handlers on topic patterns (plain, typed, or
//!   shared) and runs the dispatch loop that isolates handler faults.

pub mod codec;
pub mod publisher;
pub mod subscriber;

pub use codec::{Codec, JsonCodec};
pub use publisher::{Publisher, STATUS_OFFLINE, STATUS_ONLINE, StatusReport};
pub use subscriber::Subscriber;
