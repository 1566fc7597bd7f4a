use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::persistence::{Reading, ReadingScope, ReadingStore, ScopeFactory};
use crate::utils::error::StoreError;
use crate::utils::lock;

/// Keeps readings in process. Clones share the same readings.
#[derive(Debug, Clone, Default)]
pub struct MemoryReadingStore {
    readings: Arc<Mutex<Vec<Reading>>>,
}

impl MemoryReadingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        lock(&self.readings).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ReadingStore for MemoryReadingStore {
    async fn add(
        &self,
        user_id: &str,
        value: f64,
        timestamp: DateTime<Utc>,
    ) -> Result<Reading, StoreError> {
        let reading = Reading {
            user_id: user_id.to_string(),
            value,
            timestamp,
        };
        lock(&self.readings).push(reading.clone());
        Ok(reading)
    }

    async fn get_by_user(&self, user_id: &str) -> Result<Vec<Reading>, StoreError> {
        Ok(lock(&self.readings)
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn delete_by_user(&self, user_id: &str) -> Result<usize, StoreError> {
        let mut readings = lock(&self.readings);
        let before = readings.len();
        readings.retain(|r| r.user_id != user_id);
        Ok(before - readings.len())
    }

    async fn all(&self) -> Result<Vec<Reading>, StoreError> {
        Ok(lock(&self.readings).clone())
    }
}

impl ScopeFactory for MemoryReadingStore {
    fn new_scope(&self) -> Result<ReadingScope, StoreError> {
        Ok(ReadingScope::new(Box::new(self.clone())))
    }
}
