use serde::{Deserialize, Serialize};

/// Fire-and-forget delivery.
pub const QOS_AT_MOST_ONCE: u8 = 0;

/// Acknowledged delivery; may be redelivered.
pub const QOS_AT_LEAST_ONCE: u8 = 1;

/// Frames sent from a client to the broker.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "subscribe")]
    Subscribe { topic: String },

    #[serde(rename = "unsubscribe")]
    Unsubscribe { topic: String },

    #[serde(rename = "publish")]
    Publish {
        topic: String,
        payload: String,
        message_id: String,
        qos: u8,
        #[serde(default)]
        retain: bool,
    },

    /// Confirms a qos 1 delivery from the broker.
    #[serde(rename = "ack")]
    Ack { message_id: String },
}

/// Frames sent from the broker to a client.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "message")]
    Message {
        topic: String,
        payload: String,
        timestamp: i64,
        message_id: String,
        qos: u8,
        #[serde(default)]
        retain: bool,
    },

    /// The broker accepted a publish and took over delivery.
    #[serde(rename = "puback")]
    PubAck { message_id: String },

    #[serde(rename = "suback")]
    SubAck { topic: String },

    #[serde(rename = "error")]
    Error { message: String },
}
