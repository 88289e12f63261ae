//! OAuth 2.0 data models and request/response structures

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// OAuth 2.0 Token Request (client credentials grant)
///
/// Every field is optional on the wire so that missing parameters are
/// reported as `invalid_request` rather than a deserialization failure.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct TokenRequest {
    /// OAuth 2.0 grant type - must be "client_credentials"
    pub grant_type: Option<String>,
    /// Client identifier; may instead be sent with HTTP Basic authentication
    pub client_id: Option<String>,
    /// Client secret; may instead be sent with HTTP Basic authentication
    pub client_secret: Option<String>,
    /// Requested scopes (space-separated)
    pub scope: Option<String>,
}

/// OAuth 2.0 Token Response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TokenResponse {
    /// The access token string
    pub access_token: String,
    /// Token type - always "Bearer"
    pub token_type: String,
    /// Token lifetime in seconds
    pub expires_in: u64,
    /// Granted scopes (space-separated)
    pub scope: String,
}

/// OAuth 2.0 Token Introspection Request
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct IntrospectionRequest {
    /// The token to introspect
    pub token: Option<String>,
    /// Optional hint about the token type
    pub token_type_hint: Option<String>,
    /// Client identifier of the caller
    pub client_id: Option<String>,
    /// Client secret of the caller
    pub client_secret: Option<String>,
}

/// OAuth 2.0 Token Introspection Response (RFC 7662)
#[derive(Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct IntrospectionResponse {
    /// Whether the token is active
    pub active: bool,
    /// Token scopes (space-separated)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Client identifier that was issued the token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Token subject
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    /// Consumer the token represents
    #[serde(rename = "consumerId", skip_serializing_if = "Option::is_none")]
    pub consumer_id: Option<String>,
    /// Token issuer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    /// Token audience
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
    /// Token expiration timestamp (Unix time)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<u64>,
    /// Token issued at timestamp (Unix time)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<u64>,
    /// Token type - "Bearer" for active tokens
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
}

impl IntrospectionResponse {
    pub fn inactive() -> Self {
        Self::default()
    }
}

/// OAuth 2.0 Error Response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OAuthError {
    /// Error code
    pub error: String,
    /// Human-readable error description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

impl OAuthError {
    /// An error carrying only its code
    pub fn code(error: &str) -> Self {
        Self {
            error: error.to_string(),
            error_description: None,
        }
    }

    /// Create an invalid_request error
    pub fn invalid_request(description: &str) -> Self {
        Self {
            error: "invalid_request".to_string(),
            error_description: Some(description.to_string()),
        }
    }

    /// Create an invalid_client error
    pub fn invalid_client(description: &str) -> Self {
        Self {
            error: "invalid_client".to_string(),
            error_description: Some(description.to_string()),
        }
    }

    /// Create an invalid_scope error
    pub fn invalid_scope(description: &str) -> Self {
        Self {
            error: "invalid_scope".to_string(),
            error_description: Some(description.to_string()),
        }
    }

    /// Create an unsupported_grant_type error
    pub fn unsupported_grant_type() -> Self {
        Self {
            error: "unsupported_grant_type".to_string(),
            error_description: Some("Supported grant types: client_credentials".to_string()),
        }
    }

    /// Create a server_error
    pub fn server_error(description: &str) -> Self {
        Self {
            error: "server_error".to_string(),
            error_description: Some(description.to_string()),
        }
    }
}
