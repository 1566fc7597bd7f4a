//! Transport connection lifecycle
//!
//! `TransportConnection` wraps a `Connector` with the state machine
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> (lost) Reconnecting -> Connecting -> ...
//! ```
//!
//! and returns to `Disconnected` only on an explicit `stop`.
//!
//! Concurrency notes:
//! - A single driver task opens every session, so concurrent `start` calls
//!   can never race to create duplicate sessions. `start` and `stop` are
//!   serialized by an async mutex; `start` only spawns or wakes the driver
//!   and then waits for the outcome of its next attempt.
//! - The driver sleeps `reconnect_delay` between attempts and wakes
//!   immediately on cancellation or when `start` asks for an early retry.
//! - Every registered subscription is re-asserted on each new session.
//! - Dropping a `start` or `publish` future is safe. A `start` dropped while
//!   its attempt is still connecting abandons that attempt and leaves the
//!   connection in `Reconnecting`; pending acknowledgements are cleaned up
//!   by a guard.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::{Notify, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::TransportSettings;
use crate::transport::message::{ClientMessage, QOS_AT_LEAST_ONCE, ServerMessage};
use crate::transport::{ConnectionState, Connector, InboundMessage, Session};
use crate::utils::error::TransportError;
use crate::utils::lock;

/// Shortest period accepted by `run_health_probe`.
pub const MIN_HEALTH_CHECK_INTERVAL: Duration = Duration::from_millis(100);

/// Timing and identity of a connection.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    pub client_id: String,
    pub connect_timeout: Duration,
    pub reconnect_delay: Duration,
    pub ack_timeout: Duration,
}

impl ConnectionOptions {
    /// Options derived from settings, with a unique client id per role.
    pub fn from_settings(settings: &TransportSettings, role: &str) -> Self {
        Self {
            client_id: format!(
                "{}-{}-{}",
                settings.client_id_prefix,
                role,
                Uuid::new_v4().simple()
            ),
            connect_timeout: Duration::from_secs(settings.connection_timeout_secs),
            reconnect_delay: Duration::from_secs(settings.reconnect_delay_secs),
            ack_timeout: Duration::from_secs(settings.ack_timeout_secs),
        }
    }
}

/// Observable connection status.
///
/// `attempts` counts finished connect attempts, successful or not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub attempts: u64,
}

struct Shared {
    status: watch::Sender<ConnectionStatus>,
    subscriptions: Mutex<Vec<String>>,
    outbound: Mutex<Option<UnboundedSender<ClientMessage>>>,
    pending_acks: Mutex<HashMap<String, oneshot::Sender<()>>>,
    inbound_tx: UnboundedSender<InboundMessage>,
    retry_now: Notify,
    abandon_attempt: Notify,
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        self.status.send_if_modified(|status| {
            let changed = status.state != state;
            status.state = state;
            changed
        });
    }

    fn finish_attempt(&self, state: ConnectionState) {
        self.status.send_modify(|status| {
            status.state = state;
            status.attempts += 1;
        });
    }

    fn outbound(&self) -> Option<UnboundedSender<ClientMessage>> {
        lock(&self.outbound).clone()
    }

    /// Publishes the session's sender and re-asserts every subscription.
    fn install(&self, outbound: &UnboundedSender<ClientMessage>) {
        let subscriptions = lock(&self.subscriptions);
        *lock(&self.outbound) = Some(outbound.clone());
        for topic in subscriptions.iter() {
            let _ = outbound.send(ClientMessage::Subscribe {
                topic: topic.clone(),
            });
        }
        debug!(count = subscriptions.len(), "re-asserted subscriptions");
    }

    /// Drops the session's sender; waiting publishers observe `Unavailable`.
    fn clear_session(&self) {
        lock(&self.outbound).take();
        lock(&self.pending_acks).clear();
    }

    fn handle_frame(&self, frame: ServerMessage, outbound: &UnboundedSender<ClientMessage>) {
        match frame {
            ServerMessage::Message {
                topic,
                payload,
                message_id,
                qos,
                ..
            } => {
                if qos >= QOS_AT_LEAST_ONCE {
                    let _ = outbound.send(ClientMessage::Ack { message_id });
                }
                debug!(topic = %topic, size = payload.len(), "message received");
                let message = InboundMessage {
                    topic,
                    payload: payload.into_bytes(),
                    received_at: Utc::now(),
                };
                if self.inbound_tx.send(message).is_err() {
                    debug!("no dispatcher attached; inbound message dropped");
                }
            }
            ServerMessage::PubAck { message_id } => {
                if let Some(waiter) = lock(&self.pending_acks).remove(&message_id) {
                    let _ = waiter.send(());
                }
            }
            ServerMessage::SubAck { topic } => {
                debug!(topic = %topic, "subscription acknowledged");
            }
            ServerMessage::Error { message } => {
                warn!(error = %message, "broker reported an error");
            }
        }
    }
}

/// Removes a pending acknowledgement when the publish finishes or is dropped.
struct PendingAck<'a> {
    shared: &'a Shared,
    message_id: String,
}

impl Drop for PendingAck<'_> {
    fn drop(&mut self) {
        lock(&self.shared.pending_acks).remove(&self.message_id);
    }
}

/// Abandons the in-flight connect attempt when a waiting `start` is dropped.
struct StartAttempt<'a> {
    shared: &'a Shared,
    finished: bool,
}

impl Drop for StartAttempt<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let abandoned = self.shared.status.send_if_modified(|status| {
            if status.state != ConnectionState::Connecting {
                return false;
            }
            status.state = ConnectionState::Reconnecting;
            true
        });
        if abandoned {
            self.shared.abandon_attempt.notify_one();
            debug!("start cancelled, abandoning connect attempt");
        }
    }
}

struct Driver {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

enum SessionEnd {
    Cancelled,
    Lost,
}

pub struct TransportConnection {
    connector: Arc<dyn Connector>,
    options: ConnectionOptions,
    shared: Arc<Shared>,
    driver: tokio::sync::Mutex<Option<Driver>>,
    inbound_rx: Mutex<Option<UnboundedReceiver<InboundMessage>>>,
}

impl TransportConnection {
    pub fn new(connector: Arc<dyn Connector>, options: ConnectionOptions) -> Self {
        let (status, _) = watch::channel(ConnectionStatus {
            state: ConnectionState::Disconnected,
            attempts: 0,
        });
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        Self {
            connector,
            options,
            shared: Arc::new(Shared {
                status,
                subscriptions: Mutex::new(Vec::new()),
                outbound: Mutex::new(None),
                pending_acks: Mutex::new(HashMap::new()),
                inbound_tx,
                retry_now: Notify::new(),
                abandon_attempt: Notify::new(),
            }),
            driver: tokio::sync::Mutex::new(None),
            inbound_rx: Mutex::new(Some(inbound_rx)),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.options.client_id
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.status.borrow().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Follows state changes.
    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.shared.status.subscribe()
    }

    /// Hands out the stream of inbound messages. Only one consumer at a time.
    pub fn take_inbound(&self) -> Option<UnboundedReceiver<InboundMessage>> {
        lock(&self.inbound_rx).take()
    }

    /// Returns the stream taken by `take_inbound` so a later consumer can use it.
    pub fn restore_inbound(&self, receiver: UnboundedReceiver<InboundMessage>) {
        *lock(&self.inbound_rx) = Some(receiver);
    }

    /// Connects if not connected. Returns whether the connection is up.
    ///
    /// A failed attempt is logged and leaves the connection in
    /// `Reconnecting`, with the driver retrying in the background.
    pub async fn start(&self) -> bool {
        let mut status = self.shared.status.subscribe();
        let attempts_before = {
            let mut driver = self.driver.lock().await;
            let current = *status.borrow_and_update();
            if current.state == ConnectionState::Connected {
                return true;
            }

            match driver.as_ref() {
                Some(running) if !running.handle.is_finished() => {
                    self.shared.retry_now.notify_one();
                }
                _ => *driver = Some(self.spawn_driver()),
            }
            current.attempts
        };

        let wait = status.wait_for(|s| {
            s.state == ConnectionState::Connected
                || s.state == ConnectionState::Disconnected
                || s.attempts > attempts_before
        });
        let limit = self.options.connect_timeout + Duration::from_secs(1);

        let mut attempt = StartAttempt {
            shared: &self.shared,
            finished: false,
        };
        let outcome = tokio::time::timeout(limit, wait).await;
        attempt.finished = true;

        match outcome {
            Ok(Ok(status)) => status.state == ConnectionState::Connected,
            _ => false,
        }
    }

    /// Disconnects and stops reconnecting. Safe to call repeatedly.
    pub async fn stop(&self) {
        let mut driver = self.driver.lock().await;
        if let Some(running) = driver.take() {
            running.cancel.cancel();
            if let Err(err) = running.handle.await {
                if err.is_panic() {
                    error!(client_id = %self.options.client_id, "transport driver panicked");
                }
            }
            info!(client_id = %self.options.client_id, "transport stopped");
        }
        self.shared.clear_session();
        self.shared.set_state(ConnectionState::Disconnected);
    }

    /// Publishes with at-least-once assurance: resolves once the broker
    /// acknowledges the handoff.
    pub async fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        retain: bool,
    ) -> Result<(), TransportError> {
        let payload = std::str::from_utf8(payload)
            .map_err(|_| TransportError::Encoding)?
            .to_string();

        if !self.is_connected() && !self.start().await {
            return Err(TransportError::Unavailable);
        }
        let outbound = self.shared.outbound().ok_or(TransportError::Unavailable)?;

        let message_id = Uuid::new_v4().to_string();
        let (ack_tx, ack_rx) = oneshot::channel();
        lock(&self.shared.pending_acks).insert(message_id.clone(), ack_tx);
        let _pending = PendingAck {
            shared: &self.shared,
            message_id: message_id.clone(),
        };

        let size = payload.len();
        outbound
            .send(ClientMessage::Publish {
                topic: topic.to_string(),
                payload,
                message_id: message_id.clone(),
                qos: QOS_AT_LEAST_ONCE,
                retain,
            })
            .map_err(|_| TransportError::Unavailable)?;

        match tokio::time::timeout(self.options.ack_timeout, ack_rx).await {
            Ok(Ok(())) => {
                debug!(topic = %topic, size, retain, "published");
                Ok(())
            }
            Ok(Err(_)) => Err(TransportError::Unavailable),
            Err(_) => Err(TransportError::AckTimeout(message_id)),
        }
    }

    /// Records a subscription and asserts it on the live session, if any.
    /// Already-recorded patterns are not sent twice.
    pub fn add_subscription(&self, topic: &str) {
        let mut subscriptions = lock(&self.shared.subscriptions);
        if subscriptions.iter().any(|s| s == topic) {
            return;
        }
        subscriptions.push(topic.to_string());

        if let Some(outbound) = self.shared.outbound() {
            let _ = outbound.send(ClientMessage::Subscribe {
                topic: topic.to_string(),
            });
        }
    }

    pub fn remove_subscription(&self, topic: &str) {
        let mut subscriptions = lock(&self.shared.subscriptions);
        let before = subscriptions.len();
        subscriptions.retain(|s| s != topic);
        if subscriptions.len() == before {
            return;
        }

        if let Some(outbound) = self.shared.outbound() {
            let _ = outbound.send(ClientMessage::Unsubscribe {
                topic: topic.to_string(),
            });
        }
    }

    /// Patterns re-asserted on every new session, in subscription order.
    pub fn subscriptions(&self) -> Vec<String> {
        lock(&self.shared.subscriptions).clone()
    }

    /// Periodically calls `start` while disconnected, until cancelled.
    ///
    /// Sits on top of the driver's own reconnect loop and also revives a
    /// connection that was never started or was stopped.
    /// Intervals shorter than `MIN_HEALTH_CHECK_INTERVAL` are raised to it.
    pub async fn run_health_probe(&self, interval: Duration, cancel: CancellationToken) {
        let interval = if interval < MIN_HEALTH_CHECK_INTERVAL {
            warn!(
                client_id = %self.options.client_id,
                requested_ms = interval.as_millis() as u64,
                "health check interval too short, using minimum"
            );
            MIN_HEALTH_CHECK_INTERVAL
        } else {
            interval
        };
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if !self.is_connected() {
                        warn!(client_id = %self.options.client_id, "transport is disconnected, attempting to reconnect");
                        if !self.start().await {
                            warn!(client_id = %self.options.client_id, "health probe reconnect failed");
                        }
                    }
                }
            }
        }
    }

    fn spawn_driver(&self) -> Driver {
        let cancel = CancellationToken::new();
        self.shared.set_state(ConnectionState::Connecting);

        let task = DriverTask {
            connector: self.connector.clone(),
            options: self.options.clone(),
            shared: self.shared.clone(),
            cancel: cancel.clone(),
        };
        let handle = tokio::spawn(task.run());

        Driver { cancel, handle }
    }
}

impl Drop for TransportConnection {
    fn drop(&mut self) {
        if let Some(running) = self.driver.get_mut().take() {
            running.cancel.cancel();
        }
    }
}

struct DriverTask {
    connector: Arc<dyn Connector>,
    options: ConnectionOptions,
    shared: Arc<Shared>,
    cancel: CancellationToken,
}

impl DriverTask {
    async fn run(self) {
        let client_id = self.options.client_id.as_str();

        loop {
            self.shared.set_state(ConnectionState::Connecting);
            let attempt = tokio::select! {
                () = self.cancel.cancelled() => break,
                () = self.shared.abandon_attempt.notified() => None,
                result = tokio::time::timeout(
                    self.options.connect_timeout,
                    self.connector.connect(client_id),
                ) => Some(result),
            };

            match attempt {
                None => {
                    self.shared.finish_attempt(ConnectionState::Reconnecting);
                    debug!(client_id, "connect attempt abandoned");
                }
                Some(Ok(Ok(session))) => {
                    self.shared.install(&session.outbound);
                    self.shared.finish_attempt(ConnectionState::Connected);
                    info!(client_id, "transport connected");

                    let end = self.pump(session).await;
                    self.shared.clear_session();
                    if let SessionEnd::Cancelled = end {
                        break;
                    }
                    self.shared.set_state(ConnectionState::Reconnecting);
                    warn!(
                        client_id,
                        delay_ms = self.options.reconnect_delay.as_millis() as u64,
                        "transport connection lost, reconnecting"
                    );
                }
                Some(Ok(Err(err))) => {
                    self.shared.finish_attempt(ConnectionState::Reconnecting);
                    warn!(client_id, error = %err, "transport connection failed");
                }
                Some(Err(_)) => {
                    self.shared.finish_attempt(ConnectionState::Reconnecting);
                    warn!(
                        client_id,
                        timeout_ms = self.options.connect_timeout.as_millis() as u64,
                        "transport connection timed out"
                    );
                }
            }

            tokio::select! {
                () = self.cancel.cancelled() => break,
                () = tokio::time::sleep(self.options.reconnect_delay) => {}
                () = self.shared.retry_now.notified() => {}
            }
        }

        self.shared.clear_session();
        self.shared.set_state(ConnectionState::Disconnected);
    }

    async fn pump(&self, mut session: Session) -> SessionEnd {
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => return SessionEnd::Cancelled,
                frame = session.inbound.recv() => match frame {
                    Some(frame) => self.shared.handle_frame(frame, &session.outbound),
                    None => return SessionEnd::Lost,
                },
            }
        }
    }
}
