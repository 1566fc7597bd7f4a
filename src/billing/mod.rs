//! The `billing` module derives billing snapshots from a user's readings.
//!
//! Snapshots are recomputed on demand and never stored here.

pub mod snapshot;

pub use snapshot::{BillingSnapshot, BillingSnapshotBuilder};

/// Canonical price per kWh. Overridable through `processor.rate_per_kwh`.
pub const DEFAULT_RATE_PER_KWH: f64 = 0.15;
