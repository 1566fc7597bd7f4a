use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::client::codec::{Codec, JsonCodec};
use crate::config::TopicSettings;
use crate::transport::TransportConnection;
use crate::utils::error::PublishError;

pub const STATUS_ONLINE: &str = "online";
pub const STATUS_OFFLINE: &str = "offline";

/// Presence of a meter client, kept retained on its status topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StatusReport {
    pub client_id: String,
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

impl StatusReport {
    pub fn new(client_id: impl Into<String>, status: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            status: status.into(),
            timestamp: Utc::now(),
            message: message.into(),
        }
    }

    pub fn online(client_id: impl Into<String>) -> Self {
        Self::new(client_id, STATUS_ONLINE, "client connected")
    }

    pub fn offline(client_id: impl Into<String>) -> Self {
        Self::new(client_id, STATUS_OFFLINE, "client disconnected")
    }
}

/// Encodes values and publishes them on a transport connection.
#[derive(Clone)]
pub struct Publisher<C = JsonCodec> {
    connection: Arc<TransportConnection>,
    codec: C,
}

impl Publisher<JsonCodec> {
    pub fn new(connection: Arc<TransportConnection>) -> Self {
        Self::with_codec(connection, JsonCodec)
    }
}

impl<C: Codec> Publisher<C> {
    pub fn with_codec(connection: Arc<TransportConnection>, codec: C) -> Self {
        Self { connection, codec }
    }

    pub fn connection(&self) -> &Arc<TransportConnection> {
        &self.connection
    }

    /// Encodes `value` and publishes it. Connects first when needed.
    pub async fn publish<T: Serialize + ?Sized>(
        &self,
        topic: &str,
        value: &T,
        retain: bool,
    ) -> Result<(), PublishError> {
        let payload = self.codec.encode(value)?;
        self.publish_raw(topic, &payload, retain).await
    }

    pub async fn publish_raw(&self, topic: &str, payload: &[u8], retain: bool) -> Result<(), PublishError> {
        self.connection.publish(topic, payload, retain).await?;
        Ok(())
    }

    /// Publishes `report` retained on the client's status topic.
    pub async fn publish_status(&self, topics: &TopicSettings, report: &StatusReport) -> Result<(), PublishError> {
        let topic = topics.status_topic(&report.client_id);
        self.publish(&topic, report, true).await?;
        debug!(topic = %topic, status = %report.status, "status published");
        Ok(())
    }
}
