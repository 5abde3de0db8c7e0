use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::store::{Store, StoreError};
use crate::models::{CacheEntry, DeadLetter, Operation};

#[derive(Default)]
struct State {
    operations: HashMap<Uuid, Operation>,
    cache: HashMap<String, CacheEntry>,
    metadata: HashMap<String, String>,
    dead_letters: Vec<DeadLetter>,
}

/// In-process store. Contents are lost when the process exits.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn add_operation(&self, op: &Operation) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if state.operations.contains_key(&op.id) {
            return Err(StoreError::DuplicateId(op.id));
        }
        state.operations.insert(op.id, op.clone());
        Ok(())
    }

    async fn list_operations(&self) -> Result<Vec<Operation>, StoreError> {
        Ok(self.state.read().await.operations.values().cloned().collect())
    }

    async fn update_operation(&self, op: &Operation) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if let Some(existing) = state.operations.get_mut(&op.id) {
            existing.retry_count = op.retry_count;
            existing.last_error = op.last_error.clone();
            existing.next_attempt_at = op.next_attempt_at;
        }
        Ok(())
    }

    async fn remove_operation(&self, id: Uuid) -> Result<(), StoreError> {
        self.state.write().await.operations.remove(&id);
        Ok(())
    }

    async fn count_operations(&self) -> Result<u64, StoreError> {
        Ok(self.state.read().await.operations.len() as u64)
    }

    async fn clear_operations(&self) -> Result<(), StoreError> {
        self.state.write().await.operations.clear();
        Ok(())
    }

    async fn latest_enqueued_at(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .operations
            .values()
            .map(|op| op.enqueued_at)
            .max())
    }

    async fn set_cache(
        &self,
        key: &str,
        data: &[u8],
        stored_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.state
            .write()
            .await
            .cache
            .insert(key.to_string(), CacheEntry::new(key, data, stored_at));
        Ok(())
    }

    async fn get_cache(&self, key: &str) -> Result<Option<CacheEntry>, StoreError> {
        Ok(self.state.read().await.cache.get(key).cloned())
    }

    async fn clear_cache(&self) -> Result<(), StoreError> {
        self.state.write().await.cache.clear();
        Ok(())
    }

    async fn set_metadata(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.state
            .write()
            .await
            .metadata
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get_metadata(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.state.read().await.metadata.get(key).cloned())
    }

    async fn add_dead_letter(&self, letter: &DeadLetter) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state
            .dead_letters
            .retain(|existing| existing.operation.id != letter.operation.id);
        state.dead_letters.push(letter.clone());
        state.dead_letters.sort_by_key(|l| l.dropped_at);
        Ok(())
    }

    async fn list_dead_letters(&self) -> Result<Vec<DeadLetter>, StoreError> {
        Ok(self.state.read().await.dead_letters.clone())
    }

    async fn clear_dead_letters(&self) -> Result<(), StoreError> {
        self.state.write().await.dead_letters.clear();
        Ok(())
    }
}
