//! HTTP request handlers for the replay API.
//!
//! Handlers only run after the API key gate and the body validator have
//! accepted the request; they map service outcomes onto the envelope.

use crate::auth::ApiKeyGate;
use crate::config::Config;
use crate::envelope::{Envelope, FailReason};
use crate::models::{Replay, ReplayId};
use crate::schemas::{CreateReplayBody, GetReplayBody};
use crate::service::{ReplayService, ServiceError};
use crate::store::ReplayStore;
use crate::validation::Validated;
use axum::{extract::State, http::StatusCode};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// Message sent instead of raw error text when details are hidden
pub const GENERIC_ERROR_MESSAGE: &str = "Temporary server error";

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub service: ReplayService,
    /// API key gate for the replay routes
    pub gate: ApiKeyGate,
    /// Forward raw error text in error responses
    pub expose_error_details: bool,
    pub max_body_size: usize,
    pub request_timeout: std::time::Duration,
}

impl AppState {
    pub fn new(config: &Config, store: Arc<dyn ReplayStore>) -> Self {
        Self {
            service: ReplayService::new(store),
            gate: ApiKeyGate::new(config.api_key.as_deref()),
            expose_error_details: config.expose_error_details,
            max_body_size: config.max_body_size,
            request_timeout: config.request_timeout,
        }
    }

    fn error_envelope<T, F>(&self, err: &ServiceError) -> Envelope<T, F> {
        if self.expose_error_details {
            Envelope::Error(err.to_string())
        } else {
            Envelope::Error(GENERIC_ERROR_MESSAGE.to_string())
        }
    }
}

// === Health Check ===

/// GET /ping - Responds if the app is up and running
pub async fn ping() -> StatusCode {
    StatusCode::OK
}

// === Create Replay ===

/// POST /replay - Store a replay and return its id
pub async fn create_replay(
    State(state): State<AppState>,
    Validated(body): Validated<CreateReplayBody>,
) -> Envelope<ReplayId> {
    match state.service.create_replay(body.data, body.user_id).await {
        Ok(replay) => {
            info!(replay_id = %replay.id, "Replay created");
            Envelope::Success(replay.id)
        }
        Err(e) => state.error_envelope(&e),
    }
}

// === Get Replay ===

/// Fail reasons for GET /replay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GetReplayFail {
    ReplayNotFound,
}

impl FailReason for GetReplayFail {
    fn status_code(&self) -> StatusCode {
        match self {
            GetReplayFail::ReplayNotFound => StatusCode::NOT_FOUND,
        }
    }
}

/// GET /replay - Fetch a replay by id
pub async fn get_replay(
    State(state): State<AppState>,
    Validated(body): Validated<GetReplayBody>,
) -> Envelope<Replay, GetReplayFail> {
    match state.service.get_replay(&body.id).await {
        Ok(Some(replay)) => Envelope::Success(replay),
        Ok(None) => Envelope::Fail(GetReplayFail::ReplayNotFound),
        Err(e) => state.error_envelope(&e),
    }
}
