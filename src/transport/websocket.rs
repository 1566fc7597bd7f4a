//! WebSocket connector
//!
//! Opens a session with a broker speaking the JSON frame protocol over a
//! WebSocket. Each session runs two tasks:
//! - a write loop forwarding `ClientMessage`s as text frames
//! - a read loop parsing text frames into `ServerMessage`s
//!
//! When the socket closes the read loop exits and drops its sender, which
//! is how `TransportConnection` notices a lost session.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::spawn;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tracing::{debug, error, info, warn};
use tungstenite::protocol::Message as WsMessage;

use crate::transport::message::{ClientMessage, ServerMessage};
use crate::transport::{Connector, Session};
use crate::utils::error::TransportError;

#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
}

impl WebSocketConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, client_id: &str) -> Result<Session, TransportError> {
        info!(url = %self.url, client_id, "connecting to broker");
        let (ws_stream, _response) = connect_async(self.url.as_str()).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<ClientMessage>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<ServerMessage>();

        let writer_id = client_id.to_string();
        let writer = spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
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
            debug!(client_id = %writer_id, "write loop closed");
        });

        let reader_id = client_id.to_string();
        let reader = spawn(async move {
            while let Some(frame) = ws_receiver.next().await {
                match frame {
                    Ok(WsMessage::Text(text)) => match serde_json::from_str::<ServerMessage>(&text) {
                        Ok(message) => {
                            if inbound_tx.send(message).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            warn!(
                                client_id = %reader_id,
                                error = %e,
                                frame = %text.chars().take(100).collect::<String>(),
                                "invalid broker frame"
                            );
                        }
                    },
                    Ok(WsMessage::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!(client_id = %reader_id, error = %e, "websocket read failed");
                        break;
                    }
                }
            }
            debug!(client_id = %reader_id, "read loop closed");
        });

        Ok(Session::new(outbound_tx, inbound_rx).with_tasks(vec![writer, reader]))
    }
}
