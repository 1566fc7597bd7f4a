//! Loopback connector
//!
//! Connects a `TransportConnection` to an in-process `Broker` through
//! channels instead of sockets. Outages and dropped sessions can be
//! simulated, which is what the reconnect tests rely on.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use crate::broker::Broker;
use crate::broker::client::Client;
use crate::transport::message::{ClientMessage, ServerMessage};
use crate::transport::{Connector, Session};
use crate::utils::error::TransportError;
use crate::utils::lock;

#[derive(Debug)]
pub struct LoopbackConnector {
    broker: Arc<Mutex<Broker>>,
    available: AtomicBool,
    connects: AtomicUsize,
}

impl LoopbackConnector {
    pub fn new(broker: Arc<Mutex<Broker>>) -> Self {
        Self {
            broker,
            available: AtomicBool::new(true),
            connects: AtomicUsize::new(0),
        }
    }

    pub fn broker(&self) -> Arc<Mutex<Broker>> {
        self.broker.clone()
    }

    /// While unavailable every connect attempt fails.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Drops every open session, as a broker restart would.
    pub fn disconnect_all(&self) -> usize {
        lock(&self.broker).disconnect_all()
    }

    /// Number of sessions opened so far.
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for LoopbackConnector {
    async fn connect(&self, client_id: &str) -> Result<Session, TransportError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectFailed(
                "loopback broker unavailable".to_string(),
            ));
        }

        let (server_tx, server_rx) = mpsc::unbounded_channel::<ServerMessage>();
        let (client_tx, mut client_rx) = mpsc::unbounded_channel::<ClientMessage>();

        let client = Client::new(server_tx);
        let session_id = client.id.clone();
        lock(&self.broker).register_client(client);
        self.connects.fetch_add(1, Ordering::SeqCst);
        debug!(client_id, session_id = %session_id, "loopback session opened");

        let broker = self.broker.clone();
        tokio::spawn(async move {
            while let Some(frame) = client_rx.recv().await {
                lock(&broker).handle(&session_id, frame);
            }
            lock(&broker).cleanup_client(&session_id);
            debug!(session_id = %session_id, "loopback session closed");
        });

        Ok(Session::new(client_tx, server_rx))
    }
}
