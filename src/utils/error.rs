//! The `error` module defines the error types used within `meterbus`.
//!
//! Each concern owns a small enum. Only the errors returned from
//! caller-invoked operations (`subscribe`, `publish`, `start`) ever reach
//! application code; decode and handler faults are logged and recovered at
//! the dispatch boundary.

use thiserror::Error;

/// A subscription pattern that can never be valid.
///
/// Raised synchronously at subscribe time and fatal to that call only.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    #[error("subscription pattern is empty")]
    Empty,

    #[error("multi-level wildcard must be the final segment in '{0}'")]
    MisplacedMultiLevel(String),

    #[error("wildcard must occupy a whole segment in '{0}'")]
    PartialWildcard(String),

    #[error("shared subscription '{0}' needs a group and a topic filter")]
    MalformedShare(String),
}

/// Failures of the pub/sub session.
#[derive(Debug, Error)]
pub enum TransportError {
    /// No usable connection after a connect attempt.
    #[error("transport unavailable")]
    Unavailable,

    #[error("connect failed: {0}")]
    ConnectFailed(String),

    #[error("broker did not acknowledge message {0}")]
    AckTimeout(String),

    #[error("payload is not valid UTF-8")]
    Encoding,

    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
}

/// Payload serialization failures.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to encode payload: {0}")]
    Encode(String),

    #[error("failed to decode payload: {0}")]
    Decode(String),
}

/// Raised inside a dispatched handler.
#[derive(Debug, Error)]
#[error("handler fault: {0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Failures of the reading store collaborator.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(#[from] sled::Error),

    #[error("stored record is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Failures of the realtime broadcaster collaborator.
#[derive(Debug, Error)]
#[error("broadcast to '{group}' failed: {reason}")]
pub struct BroadcastError {
    pub group: String,
    pub reason: String,
}

/// Errors surfaced by `Publisher::publish`.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl From<StoreError> for HandlerError {
    fn from(err: StoreError) -> Self {
        HandlerError(err.to_string())
    }
}

impl From<PublishError> for HandlerError {
    fn from(err: PublishError) -> Self {
        HandlerError(err.to_string())
    }
}
