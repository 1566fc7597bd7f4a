//! Subscription registry
//!
//! Maps subscription patterns to ordered handler lists and resolves every
//! handler whose pattern matches an inbound topic.
//!
//! Ordering:
//! - handlers registered on the same pattern run in registration order
//! - patterns are visited in the order they were first registered, so the
//!   first-registered pattern's handlers come first
//!
//! The pattern list lives behind a single `RwLock`; a registration inserts
//! the pattern and its handler in one write, so `resolve` never observes a
//! pattern without its handler.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use futures::future::BoxFuture;

use crate::routing::topic::{matches, validate_pattern};
use crate::transport::InboundMessage;
use crate::utils::error::{HandlerError, PatternError};

pub type HandlerFuture = BoxFuture<'static, Result<(), HandlerError>>;

/// A dispatched callback. Receives the message shared with sibling handlers.
pub type Handler = Arc<dyn Fn(Arc<InboundMessage>) -> HandlerFuture + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Outcome of `register`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    pub id: SubscriptionId,
    /// No other handler was registered on this pattern before.
    pub first_for_pattern: bool,
}

/// Outcome of `unregister`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unregistration {
    pub pattern: String,
    /// The pattern has no handlers left and was dropped from the registry.
    pub last_for_pattern: bool,
}

/// A handler selected by `resolve`, with the pattern that selected it.
#[derive(Clone)]
pub struct ResolvedHandler {
    pub id: SubscriptionId,
    pub pattern: String,
    pub handler: Handler,
}

impl fmt::Debug for ResolvedHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedHandler")
            .field("id", &self.id)
            .field("pattern", &self.pattern)
            .finish()
    }
}

struct PatternEntry {
    pattern: String,
    handlers: Vec<(SubscriptionId, Handler)>,
}

#[derive(Default)]
pub struct SubscriptionRegistry {
    entries: RwLock<Vec<PatternEntry>>,
    next_id: AtomicU64,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `handler` under `pattern`.
    ///
    /// Fails with `PatternError` when the pattern is empty or `#` is not its
    /// final segment.
    pub fn register(&self, pattern: &str, handler: Handler) -> Result<Registration, PatternError> {
        validate_pattern(pattern)?;

        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);

        let first_for_pattern = match entries.iter_mut().find(|e| e.pattern == pattern) {
            Some(entry) => {
                entry.handlers.push((id, handler));
                false
            }
            None => {
                entries.push(PatternEntry {
                    pattern: pattern.to_string(),
                    handlers: vec![(id, handler)],
                });
                true
            }
        };

        Ok(Registration {
            id,
            first_for_pattern,
        })
    }

    /// Removes a handler. Returns `None` when the id is unknown.
    pub fn unregister(&self, id: SubscriptionId) -> Option<Unregistration> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);

        let index = entries
            .iter()
            .position(|e| e.handlers.iter().any(|(h, _)| *h == id))?;

        entries[index].handlers.retain(|(h, _)| *h != id);
        let last_for_pattern = entries[index].handlers.is_empty();
        let pattern = if last_for_pattern {
            entries.remove(index).pattern
        } else {
            entries[index].pattern.clone()
        };

        Some(Unregistration {
            pattern,
            last_for_pattern,
        })
    }

    /// Every handler whose pattern matches `topic`, in dispatch order.
    pub fn resolve(&self, topic: &str) -> Vec<ResolvedHandler> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);

        entries
            .iter()
            .filter(|e| matches(&e.pattern, topic))
            .flat_map(|e| {
                e.handlers.iter().map(|(id, handler)| ResolvedHandler {
                    id: *id,
                    pattern: e.pattern.clone(),
                    handler: handler.clone(),
                })
            })
            .collect()
    }

    /// Registered patterns in first-registration order.
    pub fn patterns(&self) -> Vec<String> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.iter().map(|e| e.pattern.clone()).collect()
    }

    /// Total number of registered handlers.
    pub fn len(&self) -> usize {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.iter().map(|e| e.handlers.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("patterns", &self.patterns())
            .field("handlers", &self.len())
            .finish()
    }
}
