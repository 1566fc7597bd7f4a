//! Realtime notifications pushed to dashboards.
//!
//! The processor announces two events per user group: `MeterReading` when
//! a reading is accepted and `BillingUpdate` when a snapshot is published.
//! Delivery is best effort; a failed broadcast is logged by the caller and
//! never fails the message being processed.

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use crate::utils::error::BroadcastError;

pub const METER_READING_EVENT: &str = "MeterReading";
pub const BILLING_UPDATE_EVENT: &str = "BillingUpdate";

#[async_trait]
pub trait Broadcaster: Send + Sync {
    async fn notify(&self, group: &str, event: &str, payload: Value) -> Result<(), BroadcastError>;
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopBroadcaster;

#[async_trait]
impl Broadcaster for NoopBroadcaster {
    async fn notify(&self, _group: &str, _event: &str, _payload: Value) -> Result<(), BroadcastError> {
        Ok(())
    }
}

/// Writes every event to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingBroadcaster;

#[async_trait]
impl Broadcaster for TracingBroadcaster {
    async fn notify(&self, group: &str, event: &str, payload: Value) -> Result<(), BroadcastError> {
        info!(group, event, payload = %payload, "broadcast");
        Ok(())
    }
}
