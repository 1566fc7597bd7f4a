use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::billing::DEFAULT_RATE_PER_KWH;
use crate::persistence::Reading;

/// A user's consumption and cost at `computed_at`.
///
/// Serialized with the field names billing subscribers expect
/// (`TotalKwhUsed`, `TotalAmount`, ...).
///
/// Invariant: `total_cost == total_consumption * rate`, and a snapshot with
/// no readings has zero consumption and zero cost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillingSnapshot {
    #[serde(rename = "UserId")]
    pub user_id: String,
    #[serde(rename = "TotalKwhUsed")]
    pub total_consumption: f64,
    #[serde(rename = "TotalAmount")]
    pub total_cost: f64,
    #[serde(rename = "RatePerKwh")]
    pub rate: f64,
    #[serde(rename = "ReadingCount")]
    pub reading_count: usize,
    #[serde(rename = "LastUpdated")]
    pub computed_at: DateTime<Utc>,
}

/// Pure aggregation of readings into snapshots at a fixed rate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BillingSnapshotBuilder {
    rate: f64,
}

impl Default for BillingSnapshotBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_RATE_PER_KWH)
    }
}

impl BillingSnapshotBuilder {
    pub fn new(rate: f64) -> Self {
        Self { rate }
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Sums `readings` into a snapshot for `user_id`.
    pub fn build(&self, user_id: &str, readings: &[Reading]) -> BillingSnapshot {
        let total_consumption: f64 = readings.iter().map(|r| r.value).sum();

        BillingSnapshot {
            user_id: user_id.to_string(),
            total_consumption,
            total_cost: total_consumption * self.rate,
            rate: self.rate,
            reading_count: readings.len(),
            computed_at: Utc::now(),
        }
    }

    /// A snapshot with zero consumption, cost and count, used after a reset.
    /// The rate is still reported.
    pub fn build_zero(&self, user_id: &str) -> BillingSnapshot {
        self.build(user_id, &[])
    }
}
