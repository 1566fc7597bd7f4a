use serde::{Deserialize, Serialize};

/// The last retained payload published on a topic.
///
/// Replayed to every new subscriber whose filter matches `topic`.
///
/// # Fields
///
/// - `topic` - The concrete topic the message was published on.
/// - `payload` - The message content, usually a JSON-encoded string.
/// - `timestamp` - Unix timestamp in milliseconds when the broker accepted it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetainedMessage {
    pub topic: String,
    pub payload: String,
    pub timestamp: i64,
}
