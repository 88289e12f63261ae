use crate::gateway::matcher::ApiEndpoint;
use axum::body::Body;
use axum::extract::Request;
use gateway_core::AccessTokenClaims;
use std::sync::Arc;

/// The authenticated caller, attached by the oauth2 policy
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    pub consumer_id: String,
    /// Credential the token was issued to
    pub client_id: Option<String>,
    pub scopes: Vec<String>,
}

impl From<AccessTokenClaims> for Identity {
    fn from(claims: AccessTokenClaims) -> Self {
        Self {
            consumer_id: claims.consumer_id,
            client_id: claims.client_id,
            scopes: claims.scopes,
        }
    }
}

/// State of one request as it moves through a pipeline.
///
/// Created fresh for every request and owned by the policy currently running;
/// whatever a policy changes is what the next policy sees.
#[derive(Debug)]
pub struct RequestContext {
    pub request: Request<Body>,
    /// The endpoint the request was matched to
    pub endpoint: Arc<ApiEndpoint>,
    /// The literal path prefix that selected the endpoint
    pub matched_prefix: String,
    pub identity: Option<Identity>,
}

impl RequestContext {
    pub fn new(request: Request<Body>, endpoint: Arc<ApiEndpoint>, matched_prefix: String) -> Self {
        Self {
            request,
            endpoint,
            matched_prefix,
            identity: None,
        }
    }
}
