//! Broker engine
//!
//! An in-memory development broker responsible for:
//! - managing topic filters and subscriber lists
//! - routing publishes to every client with a matching filter
//! - delivering shared-subscription traffic to one member per group
//! - keeping the last retained payload per topic and replaying it on subscribe
//! - acknowledging publishes so clients get at-least-once handoff
//!
//! The API is synchronous and designed to be held behind a lock
//! (`Arc<Mutex<Broker>>`) by the WebSocket server and the loopback connector.
//! Callers should not hold the lock across network I/O; delivery only
//! pushes frames onto per-client channels.

use std::collections::HashMap;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::broker::client::Client;
use crate::broker::message::RetainedMessage;
use crate::broker::topic::{SubscriberId, Topic};
use crate::routing::topic::{matches, validate_pattern};
use crate::transport::message::{ClientMessage, QOS_AT_LEAST_ONCE, ServerMessage};
use crate::utils::error::PatternError;

#[derive(Debug, Default)]
pub struct Broker {
    pub topics: HashMap<String, Topic>,
    pub clients: HashMap<SubscriberId, Client>,
    pub retained: HashMap<String, RetainedMessage>,
}

impl Broker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_client(&mut self, client: Client) {
        self.clients.insert(client.id.clone(), client);
    }

    pub fn remove_client(&mut self, client_id: &SubscriberId) {
        self.clients.remove(client_id);
    }

    /// Subscribes a client to a filter, creating the filter entry if needed,
    /// then replays matching retained messages to that client.
    pub fn subscribe(&mut self, filter: &str, subscriber: SubscriberId) -> Result<(), PatternError> {
        validate_pattern(filter)?;

        self.topics
            .entry(filter.to_string())
            .or_insert_with(|| Topic::new(filter))
            .subscribe(subscriber.clone());

        if let Some(client) = self.clients.get(&subscriber) {
            let _ = client.sender.send(ServerMessage::SubAck {
                topic: filter.to_string(),
            });

            for retained in self.retained.values().filter(|r| matches(filter, &r.topic)) {
                let _ = client.sender.send(ServerMessage::Message {
                    topic: retained.topic.clone(),
                    payload: retained.payload.clone(),
                    timestamp: retained.timestamp,
                    message_id: Uuid::new_v4().to_string(),
                    qos: QOS_AT_LEAST_ONCE,
                    retain: true,
                });
            }
        }

        Ok(())
    }

    /// Unsubscribes a client from a filter; empty filters are dropped.
    pub fn unsubscribe(&mut self, filter: &str, subscriber: &SubscriberId) {
        if let Some(topic) = self.topics.get_mut(filter) {
            topic.unsubscribe(subscriber);
            if topic.subscribers.is_empty() {
                self.topics.remove(filter);
            }
        }
    }

    /// Routes a message to every matching subscriber and returns how many
    /// clients it was handed to.
    ///
    /// A retained publish replaces the topic's retained payload; a retained
    /// publish with an empty payload clears it.
    pub fn publish(&mut self, topic: &str, payload: &str, retain: bool) -> usize {
        let timestamp = chrono::Utc::now().timestamp_millis();

        if retain {
            if payload.is_empty() {
                self.retained.remove(topic);
            } else {
                self.retained.insert(
                    topic.to_string(),
                    RetainedMessage {
                        topic: topic.to_string(),
                        payload: payload.to_string(),
                        timestamp,
                    },
                );
            }
        }

        let mut recipients: Vec<SubscriberId> = Vec::new();
        for entry in self.topics.values_mut() {
            if !matches(&entry.filter, topic) {
                continue;
            }
            if entry.is_shared() {
                if let Some(member) = entry.next_member() {
                    if !recipients.contains(member) {
                        recipients.push(member.clone());
                    }
                }
            } else {
                for id in &entry.subscribers {
                    if !recipients.contains(id) {
                        recipients.push(id.clone());
                    }
                }
            }
        }

        let mut delivered = 0;
        for id in &recipients {
            match self.clients.get(id) {
                Some(client) => {
                    let frame = ServerMessage::Message {
                        topic: topic.to_string(),
                        payload: payload.to_string(),
                        timestamp,
                        message_id: Uuid::new_v4().to_string(),
                        qos: QOS_AT_LEAST_ONCE,
                        retain: false,
                    };
                    if let Err(e) = client.sender.send(frame) {
                        warn!(client_id = %id, error = %e, "failed to deliver message");
                    } else {
                        delivered += 1;
                    }
                }
                None => warn!(client_id = %id, "no client registered with id"),
            }
        }

        debug!(topic = %topic, delivered, retain, "routed publish");
        delivered
    }

    /// Applies one client frame.
    pub fn handle(&mut self, client_id: &SubscriberId, frame: ClientMessage) {
        match frame {
            ClientMessage::Subscribe { topic } => {
                if let Err(e) = self.subscribe(&topic, client_id.clone()) {
                    self.reply(client_id, ServerMessage::Error {
                        message: e.to_string(),
                    });
                } else {
                    debug!(client_id = %client_id, topic = %topic, "subscribed");
                }
            }
            ClientMessage::Unsubscribe { topic } => {
                self.unsubscribe(&topic, client_id);
                debug!(client_id = %client_id, topic = %topic, "unsubscribed");
            }
            ClientMessage::Publish {
                topic,
                payload,
                message_id,
                qos,
                retain,
            } => {
                self.publish(&topic, &payload, retain);
                if qos >= QOS_AT_LEAST_ONCE {
                    self.reply(client_id, ServerMessage::PubAck { message_id });
                }
            }
            ClientMessage::Ack { message_id } => {
                debug!(client_id = %client_id, message_id = %message_id, "delivery acknowledged");
            }
        }
    }

    /// Removes a client and unsubscribes it from every filter.
    pub fn cleanup_client(&mut self, client_id: &SubscriberId) {
        self.remove_client(client_id);

        self.topics.retain(|_, topic| {
            topic.unsubscribe(client_id);
            !topic.subscribers.is_empty()
        });

        debug!(client_id = %client_id, "cleaned up client");
    }

    /// Drops every client session. Returns how many were dropped.
    pub fn disconnect_all(&mut self) -> usize {
        let ids: Vec<SubscriberId> = self.clients.keys().cloned().collect();
        for id in &ids {
            self.cleanup_client(id);
        }
        info!(count = ids.len(), "disconnected all clients");
        ids.len()
    }

    fn reply(&self, client_id: &SubscriberId, frame: ServerMessage) {
        if let Some(client) = self.clients.get(client_id) {
            let _ = client.sender.send(frame);
        }
    }
}
