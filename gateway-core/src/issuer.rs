//! OAuth 2.0 client credentials grant (RFC 6749 Section 4.4)

use crate::store::{CredentialStore, Store, StoreError};
use crate::token::{now_epoch_seconds, AccessTokenClaims, TokenCodec, TokenError};
use log::{debug, info, warn};
use std::collections::HashSet;
use thiserror::Error;

pub const CLIENT_CREDENTIALS: &str = "client_credentials";
pub const BEARER: &str = "Bearer";
/// Longest accepted token lifetime, one year in seconds
pub const MAX_TTL: u64 = 365 * 24 * 60 * 60;

/// Reasons a token request is refused
#[derive(Debug, Error)]
pub enum IssueError {
    #[error("Unsupported grant type: {0}")]
    UnsupportedGrant(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Client authentication failed")]
    InvalidClient,
    #[error("Scope not granted to client: {0}")]
    InvalidScope(String),
    #[error("Credential store error: {0}")]
    Store(#[from] StoreError),
    #[error("Token error: {0}")]
    Token(#[from] TokenError),
}

/// A parsed token request
#[derive(Debug, Clone, Default)]
pub struct TokenRequest {
    pub grant_type: String,
    pub client_id: String,
    pub client_secret: String,
    /// Space-delimited scope list as sent on the wire
    pub scope: Option<String>,
}

/// Result of a successful grant
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: u64,
    pub claims: AccessTokenClaims,
}

/// Static claim settings for issued tokens
#[derive(Debug, Clone)]
pub struct IssuerSettings {
    pub issuer: String,
    pub audience: String,
    /// Fixed `sub` claim; the consumer id is used when absent
    pub subject: Option<String>,
    /// Token lifetime in seconds
    pub ttl: u64,
}

/// Issues signed access tokens for OAuth2 credentials
#[derive(Clone)]
pub struct TokenIssuer {
    store: Store,
    codec: TokenCodec,
    settings: IssuerSettings,
}

impl TokenIssuer {
    pub fn new(store: Store, codec: TokenCodec, settings: IssuerSettings) -> Self {
        Self {
            store,
            codec,
            settings,
        }
    }

    pub fn settings(&self) -> &IssuerSettings {
        &self.settings
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    pub async fn issue(&self, request: &TokenRequest) -> Result<IssuedToken, IssueError> {
        self.issue_at(request, now_epoch_seconds()).await
    }

    /// Runs the grant as of `now` (seconds since the epoch)
    pub async fn issue_at(
        &self,
        request: &TokenRequest,
        now: u64,
    ) -> Result<IssuedToken, IssueError> {
        if request.grant_type != CLIENT_CREDENTIALS {
            warn!(
                "Unsupported grant type '{}' from client '{}'",
                request.grant_type, request.client_id
            );
            return Err(IssueError::UnsupportedGrant(request.grant_type.clone()));
        }

        if request.client_id.is_empty() {
            return Err(IssueError::InvalidRequest("client_id is required".to_string()));
        }
        if request.client_secret.is_empty() {
            debug!("Client '{}' sent no secret", request.client_id);
            return Err(IssueError::InvalidClient);
        }

        let credential = self
            .store
            .verify_client(&request.client_id, &request.client_secret)
            .await?
            .ok_or(IssueError::InvalidClient)?;

        let consumer_id = self
            .store
            .resolve_owner(&credential.id)
            .await?
            .ok_or(IssueError::InvalidClient)?;

        let scopes = approve_scopes(&credential.scopes, request.scope.as_deref())?;

        debug!(
            "Granting {} scopes to client '{}': {:?}",
            scopes.len(),
            credential.id,
            scopes
        );

        let exp = now.checked_add(self.settings.ttl).ok_or_else(|| {
            TokenError::Signing(format!("ttl {} overflows the expiry claim", self.settings.ttl))
        })?;
        let claims = AccessTokenClaims {
            iss: self.settings.issuer.clone(),
            aud: self.settings.audience.clone().into(),
            sub: self
                .settings
                .subject
                .clone()
                .unwrap_or_else(|| consumer_id.clone()),
            iat: now,
            exp,
            consumer_id,
            scopes,
            client_id: Some(credential.id.clone()),
        };
        let access_token = self.codec.encode(&claims)?;

        info!(
            "Issued access token to client '{}' with {} scopes",
            credential.id,
            claims.scopes.len()
        );

        Ok(IssuedToken {
            access_token,
            token_type: BEARER,
            expires_in: self.settings.ttl,
            claims,
        })
    }
}

/// Approves the requested scopes against the granted ones.
///
/// An empty request yields every granted scope. Any requested scope that is
/// not granted fails the whole request. The result keeps grant order.
pub fn approve_scopes(granted: &[String], requested: Option<&str>) -> Result<Vec<String>, IssueError> {
    let requested: HashSet<&str> = requested
        .map(|s| s.split_whitespace().collect())
        .unwrap_or_default();

    if requested.is_empty() {
        return Ok(granted.to_vec());
    }

    if let Some(missing) = requested
        .iter()
        .find(|scope| !granted.iter().any(|g| g == *scope))
    {
        return Err(IssueError::InvalidScope(missing.to_string()));
    }

    Ok(granted
        .iter()
        .filter(|scope| requested.contains(scope.as_str()))
        .cloned()
        .collect())
}
