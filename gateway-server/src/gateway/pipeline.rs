//! Ordered policy execution
//!
//! A pipeline runs its policies strictly in configured order. Every policy
//! receives the request context and a [`Next`] handle for the rest of the
//! chain: it can call `next.run(ctx)` to continue, return a response to stop
//! the chain, or fail with a [`PolicyError`] which is rendered as a terminal
//! error response. A chain that runs out of policies without producing a
//! response answers 404.

use super::context::RequestContext;
use super::policies::Policy;
use crate::errors::ApiError;
use axum::response::{IntoResponse, Response};
use log::{debug, error, warn};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Failures raised by a policy, as opposed to deliberate rejections
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("Credential store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("Upstream request failed: {0}")]
    Upstream(String),
    #[error("Upstream request timed out: {0}")]
    UpstreamTimeout(String),
    #[error("Invalid request: {0}")]
    BadRequest(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for PolicyError {
    fn into_response(self) -> Response {
        match &self {
            Self::StoreUnavailable(_) => {
                warn!("{}", self);
                ApiError::unavailable().into_response()
            }
            Self::Upstream(_) => {
                warn!("{}", self);
                ApiError::bad_gateway().into_response()
            }
            Self::UpstreamTimeout(_) => {
                warn!("{}", self);
                ApiError::gateway_timeout().into_response()
            }
            Self::BadRequest(detail) => {
                debug!("{}", self);
                ApiError::new(
                    crate::api::oauth::models::OAuthError::invalid_request(detail),
                    http::StatusCode::BAD_REQUEST,
                )
                .into_response()
            }
            Self::Internal(_) => {
                error!("{}", self);
                ApiError::internal().into_response()
            }
        }
    }
}

/// The remainder of a policy chain
pub struct Next<'a> {
    remaining: &'a [Policy],
}

impl<'a> Next<'a> {
    /// Runs the next policy, or answers 404 when none are left
    pub fn run(self, ctx: RequestContext) -> BoxFuture<'a, Result<Response, PolicyError>> {
        Box::pin(async move {
            match self.remaining.split_first() {
                Some((policy, rest)) => policy.apply(ctx, Next { remaining: rest }).await,
                None => {
                    debug!(
                        "Pipeline for endpoint '{}' ended without a response",
                        ctx.endpoint.name
                    );
                    Ok(ApiError::not_found().into_response())
                }
            }
        })
    }
}

/// A named, immutable chain of policies
#[derive(Debug, Clone)]
pub struct Pipeline {
    pub name: String,
    policies: Arc<[Policy]>,
}

impl Pipeline {
    pub fn new(name: impl Into<String>, policies: Vec<Policy>) -> Self {
        Self {
            name: name.into(),
            policies: policies.into(),
        }
    }

    pub fn policies(&self) -> &[Policy] {
        &self.policies
    }

    /// Runs the whole chain for one request
    pub async fn run(&self, ctx: RequestContext) -> Response {
        debug!(
            "Running pipeline '{}' for endpoint '{}'",
            self.name, ctx.endpoint.name
        );
        let next = Next {
            remaining: &self.policies,
        };
        match next.run(ctx).await {
            Ok(response) => response,
            Err(e) => e.into_response(),
        }
    }
}
