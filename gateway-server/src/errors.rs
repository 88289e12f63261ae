use crate::api::oauth::models::OAuthError;
use crate::config::ConfigError;
use crate::gateway::BuildError;
use axum::response::IntoResponse;
use axum::Json;
use gateway_core::StoreError;
use http::header::WWW_AUTHENTICATE;
use http::{HeaderValue, StatusCode};
use thiserror::Error;

/// An OAuth2-style error response
#[derive(Debug, Clone)]
pub struct ApiError {
    pub error: OAuthError,
    pub status_code: StatusCode,
    /// Value of the `WWW-Authenticate` header, if any
    pub challenge: Option<String>,
}

impl ApiError {
    /// Create a new ApiError with an OAuth2 error body and status code
    pub fn new(error: OAuthError, status_code: StatusCode) -> Self {
        Self {
            error,
            status_code,
            challenge: None,
        }
    }

    /// Attach a `WWW-Authenticate` challenge
    pub fn with_challenge<S: ToString>(mut self, challenge: S) -> Self {
        self.challenge = Some(challenge.to_string());
        self
    }

    /// 404 for requests no endpoint matches
    pub fn not_found() -> Self {
        Self::new(OAuthError::code("not_found"), StatusCode::NOT_FOUND)
    }

    /// 500 with a server_error body
    pub fn internal() -> Self {
        Self::new(OAuthError::code("server_error"), StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// 503 with a server_error body
    pub fn unavailable() -> Self {
        Self::new(OAuthError::code("server_error"), StatusCode::SERVICE_UNAVAILABLE)
    }

    /// 502 with a bad_gateway body
    pub fn bad_gateway() -> Self {
        Self::new(OAuthError::code("bad_gateway"), StatusCode::BAD_GATEWAY)
    }

    /// 504 with a gateway_timeout body
    pub fn gateway_timeout() -> Self {
        Self::new(OAuthError::code("gateway_timeout"), StatusCode::GATEWAY_TIMEOUT)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let mut response = (self.status_code, Json(self.error)).into_response();
        if let Some(challenge) = self.challenge {
            match HeaderValue::from_str(&challenge) {
                Ok(value) => {
                    response.headers_mut().insert(WWW_AUTHENTICATE, value);
                }
                Err(e) => log::warn!("Invalid WWW-Authenticate challenge: {}", e),
            }
        }
        response
    }
}

/// Errors that abort startup
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Failed to initialize credential store: {0}")]
    Store(#[from] StoreError),
    #[error("Invalid gateway configuration: {0}")]
    Gateway(#[from] BuildError),
    #[error("Failed to create HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}
