//! # Replay API
//!
//! Stores and retrieves opaque game-session "replays" behind an API key, and
//! sweeps expired rows out of a key-value table on a schedule.
//!
//! ## Request Pipeline
//!
//! ```text
//! request ─▶ limits/trace ─▶ API key gate ─▶ validator ─▶ handler ─▶ service ─▶ store
//!                                 │               │           │
//!                                401          400 invalid   200 / 404 / 500
//! ```
//!
//! Every reply except 401 is a `{statusCode, status, data}` envelope.
//!
//! ## API Overview
//!
//! | Endpoint | Method | Description |
//! |----------|--------|-------------|
//! | `/ping` | GET | Health check (unauthenticated) |
//! | `/replay` | POST | Create a replay from `{data, userId}` |
//! | `/replay` | GET | Fetch a replay by `{_id}` |
//!
//! ## Expiry Sweeper
//!
//! [`expiry::Sweeper`] lists every row of a [`table::TableStore`] and
//! deletes those whose `expire` timestamp has passed.

pub mod auth;
pub mod config;
pub mod envelope;
pub mod expiry;
pub mod handlers;
pub mod models;
pub mod schemas;
pub mod service;
pub mod store;
pub mod table;
pub mod validation;

pub use config::Config;
pub use handlers::AppState;
pub use store::{MemoryReplayStore, ReplayStore};

use axum::{
    http::{header, HeaderName, Method},
    middleware,
    routing::get,
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

/// Build the Axum router with all endpoints and middleware.
pub fn build_router(state: AppState) -> Router {
    // Gate only the replay routes; /ping stays open
    let replay_routes = Router::new()
        .route(
            "/replay",
            get(handlers::get_replay).post(handlers::create_replay),
        )
        .route_layer(middleware::from_fn_with_state(
            state.gate.clone(),
            auth::require_api_key,
        ));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([
            header::CONTENT_TYPE,
            HeaderName::from_static(auth::API_KEY_HEADER),
        ]);

    Router::new()
        .route("/ping", get(handlers::ping))
        .merge(replay_routes)
        // Innermost first; the trace layer wraps everything
        .layer(RequestBodyLimitLayer::new(state.max_body_size))
        .layer(TimeoutLayer::new(state.request_timeout))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
