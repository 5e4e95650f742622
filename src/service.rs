//! Replay business operations.

use crate::models::{NewReplay, Replay, ReplayData, ReplayId, UserId};
use crate::store::{ReplayStore, StoreError};
use std::sync::Arc;
use tracing::error;

/// Service errors
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Any failure of the underlying store
    #[error(transparent)]
    Storage(#[from] StoreError),
}

/// Orchestrates replay store calls. Each call is a single attempt.
#[derive(Clone)]
pub struct ReplayService {
    store: Arc<dyn ReplayStore>,
}

impl ReplayService {
    pub fn new(store: Arc<dyn ReplayStore>) -> Self {
        Self { store }
    }

    /// Create a replay owned by `user_id`
    pub async fn create_replay(
        &self,
        data: ReplayData,
        user_id: UserId,
    ) -> Result<Replay, ServiceError> {
        self.store
            .create(NewReplay { data, user_id })
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to create replay");
                ServiceError::from(e)
            })
    }

    /// Fetch a replay; `Ok(None)` when it does not exist
    pub async fn get_replay(&self, id: &ReplayId) -> Result<Option<Replay>, ServiceError> {
        self.store.find_one(id).await.map_err(|e| {
            error!(error = %e, replay_id = %id, "Failed to fetch replay");
            ServiceError::from(e)
        })
    }
}
