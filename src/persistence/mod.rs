//! The `persistence` module defines the reading store collaborator the
//! processor writes to, and two implementations of it.
//!
//! - `SledReadingStore` keeps readings in a `sled` embedded database, one
//!   tree per user, so they survive restarts.
//! - `MemoryReadingStore` keeps them in process, for tests and demos.
//!
//! Handlers never hold a store across messages. They acquire a
//! `ReadingScope` from a `ScopeFactory` per message; the scope is released
//! when it is dropped, on every exit path.

pub mod memory;
pub mod sled_store;

use std::fmt;
use std::ops::Deref;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::error::StoreError;

pub use memory::MemoryReadingStore;
pub use sled_store::SledReadingStore;

/// One meter reading in kWh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub user_id: String,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

#[async_trait]
pub trait ReadingStore: Send + Sync {
    /// Appends a reading and returns it.
    async fn add(
        &self,
        user_id: &str,
        value: f64,
        timestamp: DateTime<Utc>,
    ) -> Result<Reading, StoreError>;

    /// Readings of one user in insertion order.
    async fn get_by_user(&self, user_id: &str) -> Result<Vec<Reading>, StoreError>;

    /// Deletes every reading of a user and returns how many were removed.
    async fn delete_by_user(&self, user_id: &str) -> Result<usize, StoreError>;

    async fn all(&self) -> Result<Vec<Reading>, StoreError>;
}

/// A store handle acquired for one unit of work.
pub struct ReadingScope {
    store: Box<dyn ReadingStore>,
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl ReadingScope {
    pub fn new(store: Box<dyn ReadingStore>) -> Self {
        Self {
            store,
            release: None,
        }
    }

    /// Runs `release` when the scope is dropped.
    pub fn with_release(
        store: Box<dyn ReadingStore>,
        release: impl FnOnce() + Send + Sync + 'static,
    ) -> Self {
        Self {
            store,
            release: Some(Box::new(release)),
        }
    }
}

impl Deref for ReadingScope {
    type Target = dyn ReadingStore;

    fn deref(&self) -> &Self::Target {
        self.store.as_ref()
    }
}

impl Drop for ReadingScope {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for ReadingScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadingScope")
            .field("has_release", &self.release.is_some())
            .finish()
    }
}

/// Hands out a fresh `ReadingScope` per message.
pub trait ScopeFactory: Send + Sync {
    fn new_scope(&self) -> Result<ReadingScope, StoreError>;
}

#[cfg(test)]
mod tests;
