use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sled::Db;

use crate::persistence::{Reading, ReadingScope, ReadingStore, ScopeFactory};
use crate::utils::error::StoreError;

const TREE_PREFIX: &str = "readings/";

/// Readings stored in `sled`, one tree per user.
///
/// Keys are big-endian ids from `Db::generate_id`, so iterating a tree
/// yields readings in insertion order.
#[derive(Clone)]
pub struct SledReadingStore {
    db: Db,
}

impl SledReadingStore {
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    /// A store deleted when the last handle is dropped.
    pub fn temporary() -> Result<Self, StoreError> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    pub async fn flush(&self) -> Result<(), StoreError> {
        self.db.flush_async().await?;
        Ok(())
    }

    fn tree_name(user_id: &str) -> String {
        format!("{TREE_PREFIX}{user_id}")
    }

    fn load_tree(tree: &sled::Tree) -> Result<Vec<Reading>, StoreError> {
        let mut readings = Vec::new();
        for entry in tree.iter() {
            let (_, value) = entry?;
            readings.push(serde_json::from_slice(&value)?);
        }
        Ok(readings)
    }
}

#[async_trait]
impl ReadingStore for SledReadingStore {
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

        let serialized = serde_json::to_vec(&reading)?;
        let key = self.db.generate_id()?;
        let tree = self.db.open_tree(Self::tree_name(user_id))?;
        tree.insert(key.to_be_bytes(), serialized)?;

        Ok(reading)
    }

    async fn get_by_user(&self, user_id: &str) -> Result<Vec<Reading>, StoreError> {
        let tree = self.db.open_tree(Self::tree_name(user_id))?;
        Self::load_tree(&tree)
    }

    async fn delete_by_user(&self, user_id: &str) -> Result<usize, StoreError> {
        let name = Self::tree_name(user_id);
        let removed = self.db.open_tree(&name)?.len();
        self.db.drop_tree(name.as_bytes())?;
        Ok(removed)
    }

    async fn all(&self) -> Result<Vec<Reading>, StoreError> {
        let mut readings = Vec::new();
        for name in self.db.tree_names() {
            if !name.starts_with(TREE_PREFIX.as_bytes()) {
                continue;
            }
            let tree = self.db.open_tree(&name)?;
            readings.extend(Self::load_tree(&tree)?);
        }
        Ok(readings)
    }
}

impl ScopeFactory for SledReadingStore {
    fn new_scope(&self) -> Result<ReadingScope, StoreError> {
        Ok(ReadingScope::new(Box::new(self.clone())))
    }
}

impl std::fmt::Debug for SledReadingStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledReadingStore")
            .field("db", &"sled::Db")
            .finish()
    }
}
