//! Subscriber facade
//!
//! Registers handlers in a `SubscriptionRegistry`, keeps the transport's
//! subscription list in step with it, and runs the dispatch loop that feeds
//! inbound messages to every matching handler.
//!
//! Dispatch runs the handlers of one message sequentially, in the order
//! `SubscriptionRegistry::resolve` returns them. A handler that returns an
//! error or panics is logged with its subscription id and topic; the
//! remaining handlers still run and the loop keeps going.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::codec::{Codec, JsonCodec};
use crate::routing::topic::shared_pattern;
use crate::routing::{Handler, SubscriptionId, SubscriptionRegistry};
use crate::transport::{InboundMessage, TransportConnection};
use crate::utils::error::{HandlerError, PatternError};
use crate::utils::lock;

struct DispatchLoop {
    cancel: CancellationToken,
    handle: JoinHandle<UnboundedReceiver<InboundMessage>>,
}

pub struct Subscriber<C = JsonCodec> {
    connection: Arc<TransportConnection>,
    registry: Arc<SubscriptionRegistry>,
    codec: C,
    dispatch: tokio::sync::Mutex<Option<DispatchLoop>>,
    // Held across a registry change and the matching transport change.
    membership: Mutex<()>,
}

impl Subscriber<JsonCodec> {
    pub fn new(connection: Arc<TransportConnection>) -> Self {
        Self::with_codec(connection, JsonCodec)
    }
}

impl<C: Codec> Subscriber<C> {
    pub fn with_codec(connection: Arc<TransportConnection>, codec: C) -> Self {
        Self {
            connection,
            registry: Arc::new(SubscriptionRegistry::new()),
            codec,
            dispatch: tokio::sync::Mutex::new(None),
            membership: Mutex::new(()),
        }
    }

    pub fn connection(&self) -> &Arc<TransportConnection> {
        &self.connection
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Registers `handler` on `pattern`.
    ///
    /// The first handler on a pattern also asserts the pattern on the
    /// transport; it is re-asserted automatically after every reconnect.
    pub fn subscribe<F, Fut>(&self, pattern: &str, handler: F) -> Result<SubscriptionId, PatternError>
    where
        F: Fn(Arc<InboundMessage>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |message| handler(message).boxed());
        let _membership = lock(&self.membership);
        let registration = self.registry.register(pattern, handler)?;

        if registration.first_for_pattern {
            self.connection.add_subscription(pattern);
            info!(pattern, subscription = %registration.id, "subscribed");
        } else {
            debug!(pattern, subscription = %registration.id, "handler added to existing subscription");
        }

        Ok(registration.id)
    }

    /// Like `subscribe`, but hands the handler the topic and a decoded payload.
    ///
    /// Payloads that fail to decode are logged and skipped; the handler is
    /// not called for them.
    pub fn subscribe_typed<T, F, Fut>(&self, pattern: &str, handler: F) -> Result<SubscriptionId, PatternError>
    where
        T: DeserializeOwned + Send + 'static,
        F: Fn(String, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        let codec = self.codec.clone();
        let handler = Arc::new(handler);

        self.subscribe(pattern, move |message: Arc<InboundMessage>| {
            let decoded = codec.decode::<T>(&message.payload);
            let handler = handler.clone();
            async move {
                match decoded {
                    Ok(value) => handler(message.topic.clone(), value).await,
                    Err(err) => {
                        warn!(topic = %message.topic, error = %err, "dropping undecodable payload");
                        Ok(())
                    }
                }
            }
        })
    }

    /// Joins the load-balanced group `group` on `pattern`: the broker hands
    /// each message to one member of the group.
    pub fn subscribe_shared<F, Fut>(
        &self,
        group: &str,
        pattern: &str,
        handler: F,
    ) -> Result<SubscriptionId, PatternError>
    where
        F: Fn(Arc<InboundMessage>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.subscribe(&shared_pattern(group, pattern), handler)
    }

    /// Removes a handler. The transport subscription goes with the last
    /// handler of its pattern. Returns `false` for an unknown id.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let _membership = lock(&self.membership);
        let Some(removed) = self.registry.unregister(id) else {
            return false;
        };
        if removed.last_for_pattern {
            self.connection.remove_subscription(&removed.pattern);
            info!(pattern = %removed.pattern, subscription = %id, "unsubscribed");
        }
        true
    }

    /// Starts dispatching and connects. Returns whether the transport is up;
    /// when it is not, the connection keeps retrying in the background.
    pub async fn start(&self) -> bool {
        {
            let mut dispatch = self.dispatch.lock().await;
            if dispatch.is_none() {
                match self.connection.take_inbound() {
                    Some(inbound) => *dispatch = Some(self.spawn_dispatch(inbound)),
                    None => warn!(
                        client_id = %self.connection.client_id(),
                        "inbound stream is owned by another consumer"
                    ),
                }
            }
        }
        self.connection.start().await
    }

    /// Stops dispatching and disconnects. Safe to call without `start`.
    pub async fn stop(&self) {
        if let Some(running) = self.dispatch.lock().await.take() {
            running.cancel.cancel();
            match running.handle.await {
                Ok(inbound) => self.connection.restore_inbound(inbound),
                Err(err) => error!(error = %err, "dispatch loop failed"),
            }
        }
        self.connection.stop().await;
    }

    /// Delivers one message to every matching handler. Returns how many
    /// handlers completed without fault.
    pub async fn dispatch(&self, message: InboundMessage) -> usize {
        dispatch(&self.registry, Arc::new(message)).await
    }

    fn spawn_dispatch(&self, mut inbound: UnboundedReceiver<InboundMessage>) -> DispatchLoop {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let registry = self.registry.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    message = inbound.recv() => match message {
                        Some(message) => {
                            dispatch(&registry, Arc::new(message)).await;
                        }
                        None => break,
                    },
                }
            }
            inbound
        });

        DispatchLoop { cancel, handle }
    }
}

async fn dispatch(registry: &SubscriptionRegistry, message: Arc<InboundMessage>) -> usize {
    let handlers = registry.resolve(&message.topic);
    if handlers.is_empty() {
        debug!(topic = %message.topic, "no handler for topic");
        return 0;
    }

    let mut completed = 0;
    for resolved in handlers {
        let call = std::panic::catch_unwind(AssertUnwindSafe(|| (resolved.handler)(message.clone())));
        let outcome = match call {
            Ok(future) => AssertUnwindSafe(future).catch_unwind().await,
            Err(panic) => Err(panic),
        };

        match outcome {
            Ok(Ok(())) => completed += 1,
            Ok(Err(err)) => {
                warn!(
                    subscription = %resolved.id,
                    topic = %message.topic,
                    error = %err,
                    "handler failed"
                );
            }
            Err(_) => {
                error!(
                    subscription = %resolved.id,
                    topic = %message.topic,
                    "handler panicked"
                );
            }
        }
    }
    completed
}
