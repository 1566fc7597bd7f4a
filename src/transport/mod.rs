//! The `transport` module owns the session with the pub/sub broker.
//!
//! It defines the JSON frame protocol spoken with the broker, the
//! `Connector` seam that opens sessions (WebSocket for real deployments,
//! loopback for the in-process broker), and `TransportConnection`, which
//! runs the connect/reconnect state machine and exposes publish and
//! raw-subscribe primitives.

pub mod connection;
pub mod loopback;
pub mod message;
pub mod websocket;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use crate::transport::message::{ClientMessage, ServerMessage};
use crate::utils::error::TransportError;

pub use connection::{ConnectionOptions, ConnectionStatus, TransportConnection};
pub use loopback::LoopbackConnector;
pub use websocket::WebSocketConnector;

/// A message delivered by the broker. Transient, never persisted here.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub received_at: DateTime<Utc>,
}

/// Owned exclusively by `TransportConnection`; read-only everywhere else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// An open session with the broker.
///
/// Frames written to `outbound` are sent to the broker; frames from the
/// broker arrive on `inbound`, which closes when the session is lost.
/// Background I/O tasks are aborted when the session is dropped.
#[derive(Debug)]
pub struct Session {
    pub outbound: UnboundedSender<ClientMessage>,
    pub inbound: UnboundedReceiver<ServerMessage>,
    tasks: Vec<JoinHandle<()>>,
}

impl Session {
    pub fn new(
        outbound: UnboundedSender<ClientMessage>,
        inbound: UnboundedReceiver<ServerMessage>,
    ) -> Self {
        Self {
            outbound,
            inbound,
            tasks: Vec::new(),
        }
    }

    pub fn with_tasks(mut self, tasks: Vec<JoinHandle<()>>) -> Self {
        self.tasks = tasks;
        self
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Opens sessions with a broker.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, client_id: &str) -> Result<Session, TransportError>;
}

#[cfg(test)]
mod tests;
