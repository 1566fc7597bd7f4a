use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

use crate::broker::topic::SubscriberId;
use crate::transport::message::ServerMessage;

/// A session attached to the broker.
///
/// Each client is uniquely identified by an `id` and has a channel
/// (`sender`) carrying frames to it. Dropping the client closes the channel,
/// which ends the session on the other side.
#[derive(Debug)]
pub struct Client {
    pub id: SubscriberId,
    pub sender: UnboundedSender<ServerMessage>,
}

impl Client {
    pub fn new(sender: UnboundedSender<ServerMessage>) -> Self {
        Self {
            id: format!("client-{}", Uuid::new_v4()),
            sender,
        }
    }
}
