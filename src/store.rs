//! Replay persistence.
//!
//! The service only sees the [`ReplayStore`] trait. [`MemoryReplayStore`] is
//! the bundled implementation; it keeps replays in a concurrent map for the
//! lifetime of the process.

use crate::models::{NewReplay, Replay, ReplayId};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

/// Store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("replay store is at capacity ({0} replays)")]
    AtCapacity(usize),

    #[error("database error: {0}")]
    DatabaseError(String),
}

/// Single-document create/read over replays
#[async_trait]
pub trait ReplayStore: Send + Sync {
    /// Insert a new replay and return it with its generated id
    async fn create(&self, replay: NewReplay) -> Result<Replay, StoreError>;

    /// Look up a replay by id; `Ok(None)` when no row matches
    async fn find_one(&self, id: &ReplayId) -> Result<Option<Replay>, StoreError>;
}

/// Thread-safe in-memory replay store
#[derive(Clone, Default)]
pub struct MemoryReplayStore {
    replays: Arc<DashMap<ReplayId, Replay>>,

    /// Maximum number of stored replays (`None` = unlimited)
    capacity: Option<usize>,
}

impl MemoryReplayStore {
    /// Create a new empty, unbounded store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that refuses inserts beyond `capacity` replays
    pub fn with_capacity_limit(capacity: usize) -> Self {
        Self {
            replays: Arc::new(DashMap::new()),
            capacity: Some(capacity),
        }
    }

    /// Current number of stored replays
    pub fn len(&self) -> usize {
        self.replays.len()
    }

    /// Check if store is empty
    pub fn is_empty(&self) -> bool {
        self.replays.is_empty()
    }
}

#[async_trait]
impl ReplayStore for MemoryReplayStore {
    async fn create(&self, replay: NewReplay) -> Result<Replay, StoreError> {
        if let Some(capacity) = self.capacity {
            if self.replays.len() >= capacity {
                return Err(StoreError::AtCapacity(capacity));
            }
        }

        let stored = Replay {
            id: ReplayId::generate(),
            data: replay.data,
            user_id: replay.user_id,
        };
        self.replays.insert(stored.id, stored.clone());

        debug!(replay_id = %stored.id, "Stored replay");

        Ok(stored)
    }

    async fn find_one(&self, id: &ReplayId) -> Result<Option<Replay>, StoreError> {
        Ok(self.replays.get(id).map(|entry| entry.value().clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ReplayData;
    use serde_json::json;

    fn new_replay(user_id: u64) -> NewReplay {
        let mut data = ReplayData::new();
        data.insert("frames".to_string(), json!([1, 2, 3]));
        NewReplay { data, user_id }
    }

    #[tokio::test]
    async fn create_then_find() {
        let store = MemoryReplayStore::new();

        let created = store.create(new_replay(7)).await.unwrap();
        assert_eq!(created.user_id, 7);
        assert_eq!(store.len(), 1);

        let found = store.find_one(&created.id).await.unwrap();
        assert_eq!(found, Some(created));
    }

    #[tokio::test]
    async fn find_unknown_is_none() {
        let store = MemoryReplayStore::new();
        let missing = ReplayId::generate();
        assert!(store.find_one(&missing).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn capacity_limit_rejects_inserts() {
        let store = MemoryReplayStore::with_capacity_limit(1);

        store.create(new_replay(1)).await.unwrap();
        let err = store.create(new_replay(2)).await.unwrap_err();

        assert!(matches!(err, StoreError::AtCapacity(1)));
        assert_eq!(store.len(), 1);
    }
}
