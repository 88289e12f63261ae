pub(crate) mod health;
pub(crate) mod oauth;

use crate::gateway;
use crate::state::AppState;
use axum::{routing::any, Router};

/// Combines all API routes into a single router
pub(super) fn router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .nest("/oauth2", oauth::router())
        // Everything else is matched against the configured API endpoints
        .fallback(any(gateway::handle))
}
