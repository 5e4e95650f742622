//! API key gate for the replay routes.
//!
//! A single process-wide secret is injected at construction. The gate keeps
//! only SHA-256(secret) and compares it with the hash of the presented
//! `apikey` header, so the plaintext secret is not held after startup.
//!
//! # Behaviour
//!
//! - Missing or mismatched header: 401 with an empty body, pipeline halts
//! - No secret configured: every request is rejected
//! - The gate runs before body validation

use crate::envelope::{Envelope, NoFail};
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use ring::digest::{digest, SHA256};
use std::sync::Arc;
use tracing::debug;

/// Header carrying the shared secret
pub const API_KEY_HEADER: &str = "apikey";

/// Hash a token using SHA-256 and return hex-encoded result
pub fn hash_token(token: &str) -> String {
    let hash = digest(&SHA256, token.as_bytes());
    hex::encode(hash.as_ref())
}

/// Shared-secret verifier
#[derive(Clone)]
pub struct ApiKeyGate {
    /// SHA-256 hash of the configured key (hex-encoded)
    key_hash: Option<Arc<str>>,
}

impl ApiKeyGate {
    /// Build a gate for `api_key`; `None` rejects everything
    pub fn new(api_key: Option<&str>) -> Self {
        Self {
            key_hash: api_key.map(|key| Arc::from(hash_token(key))),
        }
    }

    /// Check whether a key is configured
    pub fn is_configured(&self) -> bool {
        self.key_hash.is_some()
    }

    /// Verify a presented header value
    pub fn verify(&self, presented: Option<&str>) -> bool {
        match (&self.key_hash, presented) {
            (Some(expected), Some(presented)) => hash_token(presented) == **expected,
            _ => false,
        }
    }
}

/// Middleware rejecting requests without the right `apikey` header
pub async fn require_api_key(
    State(gate): State<ApiKeyGate>,
    request: Request,
    next: Next,
) -> Response {
    let presented = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok());

    if !gate.verify(presented) {
        debug!(
            header_present = presented.is_some(),
            path = %request.uri().path(),
            "API key verification failed"
        );
        return Envelope::<(), NoFail>::Unauthorized.into_response();
    }

    next.run(request).await
}
