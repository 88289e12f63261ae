//! OAuth 2.0 authorization server endpoints
//!
//! ## Supported OAuth 2.0 Flows
//! - Client Credentials Grant (RFC 6749 Section 4.4)
//! - Token Introspection (RFC 7662)
//!
//! Tokens are self-contained signed JWTs; nothing is stored per token.

pub mod handlers;
pub mod models;

use crate::state::AppState;
use axum::routing::{post, Router};

/// Creates OAuth 2.0 routes
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/token", post(handlers::token))
        .route("/introspect", post(handlers::introspect))
}
