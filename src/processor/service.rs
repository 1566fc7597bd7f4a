//! Event processor
//!
//! Bridges meter traffic to persistence and billing:
//! - readings arriving under `{readings_base}/#` are stored, then the
//!   user's billing snapshot is recomputed and published on
//!   `{billing_base}/{user}`
//! - a message on `{billing_base}/{user}/reset` deletes the user's readings
//!   and publishes a zeroed snapshot
//!
//! Each message gets its own `ReadingScope`. Store and publish failures are
//! logged by the dispatch loop and only affect the message at hand.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::billing::{BillingSnapshot, BillingSnapshotBuilder};
use crate::client::{Publisher, Subscriber};
use crate::config::{Settings, TopicSettings};
use crate::notify::{BILLING_UPDATE_EVENT, Broadcaster, METER_READING_EVENT};
use crate::persistence::ScopeFactory;
use crate::processor::payload::{ReadingPayload, reset_target};
use crate::routing::SubscriptionId;
use crate::transport::InboundMessage;
use crate::utils::error::{HandlerError, PatternError};

#[derive(Debug, Clone)]
pub struct ProcessorOptions {
    pub topics: TopicSettings,
    pub rate_per_kwh: f64,
    pub health_check_interval: Duration,
}

impl ProcessorOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            topics: settings.topics.clone(),
            rate_per_kwh: settings.processor.rate_per_kwh,
            health_check_interval: Duration::from_secs(settings.processor.health_check_interval_secs),
        }
    }
}

impl Default for ProcessorOptions {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

/// What the handlers need, shared between them.
struct Context {
    scopes: Arc<dyn ScopeFactory>,
    publisher: Publisher,
    topics: TopicSettings,
    builder: BillingSnapshotBuilder,
    broadcaster: Option<Arc<dyn Broadcaster>>,
}

impl Context {
    async fn ingest(&self, reading: ReadingPayload) -> Result<(), HandlerError> {
        let ReadingPayload { user_id, value } = reading;
        let scope = self.scopes.new_scope()?;

        let stored = scope.add(&user_id, value, Utc::now()).await?;
        info!(user_id = %user_id, value, "reading stored");

        self.broadcast(
            &user_id,
            METER_READING_EVENT,
            json!({
                "UserId": stored.user_id,
                "Value": stored.value,
                "Timestamp": stored.timestamp,
            }),
        )
        .await;

        let readings = scope.get_by_user(&user_id).await?;
        let snapshot = self.builder.build(&user_id, &readings);
        self.publish_snapshot(&snapshot).await
    }

    async fn billing_command(&self, message: Arc<InboundMessage>) -> Result<(), HandlerError> {
        let Some(user_id) = reset_target(&message.topic) else {
            debug!(topic = %message.topic, "not a billing command");
            return Ok(());
        };

        info!(user_id, "billing reset requested");
        let scope = self.scopes.new_scope()?;
        let removed = scope.delete_by_user(user_id).await?;
        info!(user_id, removed, "readings reset");

        let snapshot = self.builder.build_zero(user_id);
        self.publish_snapshot(&snapshot).await
    }

    async fn publish_snapshot(&self, snapshot: &BillingSnapshot) -> Result<(), HandlerError> {
        let topic = self.topics.billing_topic(&snapshot.user_id);
        self.publisher.publish(&topic, snapshot, false).await?;
        debug!(
            topic = %topic,
            total_kwh = snapshot.total_consumption,
            readings = snapshot.reading_count,
            "billing snapshot published"
        );

        match serde_json::to_value(snapshot) {
            Ok(payload) => {
                self.broadcast(&snapshot.user_id, BILLING_UPDATE_EVENT, payload)
                    .await
            }
            Err(err) => warn!(user_id = %snapshot.user_id, error = %err, "snapshot not broadcast"),
        }
        Ok(())
    }

    async fn broadcast(&self, group: &str, event: &str, payload: serde_json::Value) {
        let Some(broadcaster) = &self.broadcaster else {
            return;
        };
        if let Err(err) = broadcaster.notify(group, event, payload).await {
            warn!(group, event, error = %err, "broadcast failed");
        }
    }
}

struct Running {
    subscriptions: Vec<SubscriptionId>,
    health_cancel: CancellationToken,
    health: JoinHandle<()>,
}

pub struct EventProcessor {
    scopes: Arc<dyn ScopeFactory>,
    publisher: Publisher,
    subscriber: Subscriber,
    options: ProcessorOptions,
    broadcaster: Option<Arc<dyn Broadcaster>>,
    running: tokio::sync::Mutex<Option<Running>>,
}

impl EventProcessor {
    pub fn new(
        scopes: Arc<dyn ScopeFactory>,
        publisher: Publisher,
        subscriber: Subscriber,
        options: ProcessorOptions,
    ) -> Self {
        Self {
            scopes,
            publisher,
            subscriber,
            options,
            broadcaster: None,
            running: tokio::sync::Mutex::new(None),
        }
    }

    /// Announces accepted readings and billing updates to `broadcaster`.
    pub fn with_broadcaster(mut self, broadcaster: Arc<dyn Broadcaster>) -> Self {
        self.broadcaster = Some(broadcaster);
        self
    }

    pub fn subscriber(&self) -> &Subscriber {
        &self.subscriber
    }

    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    /// Pattern the reading handler is registered on: the readings wildcard,
    /// or its shared-group form when shared subscriptions are enabled.
    pub fn readings_pattern(&self) -> String {
        let topics = &self.options.topics;
        if topics.enable_shared_subscriptions {
            topics.shared_readings_topic(&topics.shared_group)
        } else {
            topics.all_readings_topic()
        }
    }

    /// Subscribes the handlers, connects, and starts the health probe.
    ///
    /// Returns whether the broker was reachable. When it was not, the
    /// processor keeps retrying in the background and picks up traffic once
    /// connected. Calling `start` on a running processor does nothing.
    pub async fn start(&self) -> Result<bool, PatternError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Ok(self.subscriber.is_connected());
        }

        let context = Arc::new(Context {
            scopes: self.scopes.clone(),
            publisher: self.publisher.clone(),
            topics: self.options.topics.clone(),
            builder: BillingSnapshotBuilder::new(self.options.rate_per_kwh),
            broadcaster: self.broadcaster.clone(),
        });

        let readings_pattern = self.readings_pattern();
        let ingest = context.clone();
        let readings = self.subscriber.subscribe_typed(&readings_pattern, move |_, reading: ReadingPayload| {
            let context = ingest.clone();
            async move { context.ingest(reading).await }
        })?;

        let billing_pattern = self.options.topics.all_billing_topic();
        let commands = context.clone();
        let billing = match self.subscriber.subscribe(&billing_pattern, move |message| {
            let context = commands.clone();
            async move { context.billing_command(message).await }
        }) {
            Ok(id) => id,
            Err(err) => {
                self.subscriber.unsubscribe(readings);
                return Err(err);
            }
        };

        let connected = self.subscriber.start().await;
        if connected {
            info!(readings = %readings_pattern, billing = %billing_pattern, "event processor started");
        } else {
            warn!("broker unreachable, event processor will keep retrying");
        }
        if !self.publisher.connection().start().await {
            warn!("billing publisher not connected yet");
        }

        let health_cancel = CancellationToken::new();
        let token = health_cancel.clone();
        let connection = self.subscriber.connection().clone();
        let interval = self.options.health_check_interval;
        let health = tokio::spawn(async move { connection.run_health_probe(interval, token).await });

        *running = Some(Running {
            subscriptions: vec![readings, billing],
            health_cancel,
            health,
        });
        Ok(connected)
    }

    /// Stops the health probe, the subscriber and both connections.
    /// Safe to call when `start` never ran or failed.
    pub async fn stop(&self) {
        if let Some(running) = self.running.lock().await.take() {
            running.health_cancel.cancel();
            if let Err(err) = running.health.await {
                if err.is_panic() {
                    error!("health probe panicked");
                }
            }
            for id in running.subscriptions {
                self.subscriber.unsubscribe(id);
            }
        }

        self.subscriber.stop().await;
        self.publisher.connection().stop().await;
        info!("event processor stopped");
    }
}
