//! WebSocket front end for the development broker
//!
//! Responsibilities:
//! - Accept TCP/WebSocket connections
//! - Create a `Client` for each connection and register it with the `Broker`
//! - Parse JSON frames into `ClientMessage`s and apply them to the broker
//! - Forward the broker's `ServerMessage`s back as text frames
//! - Clean up the client when either direction closes

use std::sync::{Arc, Mutex};

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::spawn;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tracing::{debug, error, info, warn};
use tungstenite::protocol::Message as WsMessage;

use crate::broker::Broker;
use crate::broker::client::Client;
use crate::transport::message::{ClientMessage, ServerMessage};
use crate::utils::lock;

/// Binds `addr` and serves the broker until the listener fails.
pub async fn start_websocket_server(addr: &str, broker: Arc<Mutex<Broker>>) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    serve(listener, broker).await;
    Ok(())
}

/// Serves the broker on an already-bound listener.
pub async fn serve(listener: TcpListener, broker: Arc<Mutex<Broker>>) {
    match listener.local_addr() {
        Ok(addr) => info!("broker listening on ws://{addr}"),
        Err(e) => warn!(error = %e, "broker listening on unknown address"),
    }

    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                spawn(handle_connection(stream, broker.clone()));
            }
            Err(e) => {
                error!(error = %e, "accept failed");
                break;
            }
        }
    }
}

async fn handle_connection(stream: TcpStream, broker: Arc<Mutex<Broker>>) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!(error = %e, "websocket handshake error");
            return;
        }
    };
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    let client = Client::new(tx);
    let client_id = client.id.clone();
    lock(&broker).register_client(client);
    info!(client_id = %client_id, "client connected");

    let writer_id = client_id.clone();
    let writer = spawn(async move {
        while let Some(frame) = rx.recv().await {
            let text = match serde_json::to_string(&frame) {
                Ok(json) => json,
                Err(e) => {
                    error!(client_id = %writer_id, error = %e, "failed to serialize frame");
                    continue;
                }
            };
            if let Err(e) = ws_sender.send(WsMessage::text(text)).await {
                warn!(client_id = %writer_id, error = %e, "failed to send frame");
                break;
            }
        }
        let _ = ws_sender.close().await;
        debug!(client_id = %writer_id, "send loop closed");
    });

    while let Some(Ok(msg)) = ws_receiver.next().await {
        if !msg.is_text() {
            if msg.is_close() {
                break;
            }
            continue;
        }
        let Ok(text) = msg.to_text() else {
            continue;
        };

        match serde_json::from_str::<ClientMessage>(text) {
            Ok(frame) => lock(&broker).handle(&client_id, frame),
            Err(err) => {
                warn!(
                    client_id = %client_id,
                    error = %err,
                    frame = %text.chars().take(100).collect::<String>(),
                    "invalid client frame"
                );
                let mut broker = lock(&broker);
                if let Some(client) = broker.clients.get_mut(&client_id) {
                    let _ = client.sender.send(ServerMessage::Error {
                        message: "invalid frame".to_string(),
                    });
                }
            }
        }
    }

    lock(&broker).cleanup_client(&client_id);
    writer.abort();
    info!(client_id = %client_id, "client disconnected");
}
