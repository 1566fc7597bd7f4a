//! The `routing` module decides which local handlers receive an inbound
//! message: topic/pattern matching with `+` and `#` wildcards, and the
//! registry mapping patterns to handlers.

pub mod registry;
pub mod topic;

pub use registry::{Handler, HandlerFuture, Registration, SubscriptionId, SubscriptionRegistry};
pub use topic::{matches, validate_pattern};
