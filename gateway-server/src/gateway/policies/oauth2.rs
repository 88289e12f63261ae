//! Bearer token authentication policy
//!
//! Rejections carry only an OAuth2 error code; why a token failed is logged
//! and never echoed, except that an expired token says so in its
//! `WWW-Authenticate` challenge so clients know to fetch a new one.

use crate::api::oauth::models::OAuthError;
use crate::config::access_tokens::signing_key;
use crate::config::{AccessTokensConfig, ConfigError, OAuth2PolicyConfig};
use crate::errors::ApiError;
use crate::gateway::context::{Identity, RequestContext};
use crate::gateway::pipeline::{Next, PolicyError};
use axum::response::{IntoResponse, Response};
use gateway_core::token::parse_algorithm;
use gateway_core::{CredentialStore, Store, StoreError, TokenCodec, TokenError};
use http::header::AUTHORIZATION;
use http::{HeaderMap, StatusCode};
use log::{debug, info, warn};
use std::fmt;
use std::time::Duration;

/// Re-validation of a token's credential against the store
#[derive(Clone)]
pub struct ExistenceCheck {
    store: Store,
    retries: u32,
    backoff: Duration,
}

impl fmt::Debug for ExistenceCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExistenceCheck")
            .field("retries", &self.retries)
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}

impl ExistenceCheck {
    pub fn new(store: Store, retries: u32, backoff: Duration) -> Self {
        Self {
            store,
            retries,
            backoff,
        }
    }

    async fn verify(&self, credential_id: &str, consumer_id: &str) -> Result<bool, StoreError> {
        check_with_retry(
            &self.store,
            credential_id,
            consumer_id,
            self.retries,
            self.backoff,
        )
        .await
    }
}

/// Runs the liveness check, retrying transient store failures with
/// exponential backoff. Only this read is retried.
pub(crate) async fn check_with_retry<S: CredentialStore + ?Sized>(
    store: &S,
    credential_id: &str,
    consumer_id: &str,
    retries: u32,
    backoff: Duration,
) -> Result<bool, StoreError> {
    let mut attempt = 0;
    loop {
        match store.is_credential_live(credential_id, consumer_id).await {
            Err(e) if e.is_transient() && attempt < retries => {
                let delay = backoff.saturating_mul(2u32.saturating_pow(attempt));
                warn!(
                    "Credential check for '{}' failed (attempt {}/{}), retrying in {:?}: {}",
                    credential_id,
                    attempt + 1,
                    retries + 1,
                    delay,
                    e
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            result => return result,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OAuth2Policy {
    codec: TokenCodec,
    issuer: String,
    audience: String,
    existence_check: Option<ExistenceCheck>,
}

impl OAuth2Policy {
    pub fn new(
        codec: TokenCodec,
        issuer: impl Into<String>,
        audience: impl Into<String>,
        existence_check: Option<ExistenceCheck>,
    ) -> Self {
        Self {
            codec,
            issuer: issuer.into(),
            audience: audience.into(),
            existence_check,
        }
    }

    /// Builds the policy, taking anything the policy leaves unset from the
    /// `access_tokens` section
    pub fn from_config(
        config: &OAuth2PolicyConfig,
        defaults: &AccessTokensConfig,
        store: &Store,
    ) -> Result<Self, ConfigError> {
        let algorithm_name = config.algorithm.as_deref().unwrap_or(&defaults.algorithm);
        let algorithm = parse_algorithm(algorithm_name)?;

        let key = if config.secret.is_some() || config.public_key_file.is_some() {
            signing_key(
                algorithm,
                config.secret.as_deref(),
                None,
                config.public_key_file.as_deref(),
            )?
        } else {
            signing_key(
                algorithm,
                defaults.secret.as_deref(),
                None,
                defaults.public_key_file.as_deref(),
            )?
        };

        let existence_check = config.check_credential_existence.then(|| {
            ExistenceCheck::new(
                store.clone(),
                config.existence_check_retries,
                Duration::from_millis(config.existence_check_backoff_ms),
            )
        });

        Ok(Self::new(
            TokenCodec::new(algorithm, &key)?,
            config.issuer.clone().unwrap_or_else(|| defaults.issuer.clone()),
            config
                .audience
                .clone()
                .unwrap_or_else(|| defaults.audience.clone()),
            existence_check,
        ))
    }

    pub async fn apply(
        &self,
        mut ctx: RequestContext,
        next: Next<'_>,
    ) -> Result<Response, PolicyError> {
        let Some(token) = bearer_token(ctx.request.headers()).map(str::to_string) else {
            debug!(
                "Missing bearer token for endpoint '{}'",
                ctx.endpoint.name
            );
            return Ok(missing_token());
        };

        let claims = match self.codec.decode(&token, &self.issuer, &self.audience) {
            Ok(claims) => claims,
            Err(TokenError::Expired) => {
                debug!("Rejected expired token");
                return Ok(invalid_token(Some("token expired")));
            }
            Err(e) => {
                info!("Rejected token: {}", e);
                return Ok(invalid_token(None));
            }
        };

        if let Some(check) = &self.existence_check {
            let live = match claims.client_id.as_deref() {
                Some(client_id) => check
                    .verify(client_id, &claims.consumer_id)
                    .await
                    .map_err(|e| PolicyError::StoreUnavailable(e.to_string()))?,
                None => false,
            };
            if !live {
                info!(
                    "Token for consumer '{}' references a missing or disabled credential",
                    claims.consumer_id
                );
                return Ok(invalid_token(None));
            }
        }

        if let Some(missing) = ctx
            .endpoint
            .scopes
            .iter()
            .find(|scope| !claims.scopes.contains(*scope))
        {
            info!(
                "Consumer '{}' lacks scope '{}' for endpoint '{}'",
                claims.consumer_id, missing, ctx.endpoint.name
            );
            return Ok(insufficient_scope(&ctx.endpoint.scopes));
        }

        ctx.identity = Some(Identity::from(claims));
        next.run(ctx).await
    }
}

/// Extracts the token from an `Authorization: Bearer <token>` header
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() || token.contains(' ') {
        return None;
    }
    Some(token)
}

fn missing_token() -> Response {
    ApiError::new(OAuthError::code("invalid_request"), StatusCode::UNAUTHORIZED)
        .with_challenge("Bearer")
        .into_response()
}

fn invalid_token(description: Option<&str>) -> Response {
    let challenge = match description {
        Some(description) => {
            format!(r#"Bearer error="invalid_token", error_description="{description}""#)
        }
        None => r#"Bearer error="invalid_token""#.to_string(),
    };
    ApiError::new(OAuthError::code("invalid_token"), StatusCode::UNAUTHORIZED)
        .with_challenge(challenge)
        .into_response()
}

fn insufficient_scope(required: &[String]) -> Response {
    ApiError::new(OAuthError::code("insufficient_scope"), StatusCode::FORBIDDEN)
        .with_challenge(format!(
            r#"Bearer error="insufficient_scope", scope="{}""#,
            required.join(" ")
        ))
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ApiEndpointConfig;
    use crate::gateway::matcher::ApiEndpoint;
    use crate::gateway::pipeline::Pipeline;
    use crate::gateway::policies::probe::{Probe, ProbeAction};
    use crate::gateway::policies::Policy;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::extract::Request;
    use gateway_core::models::{
        Application, Credential, IssuedCredential, NewApplication, NewCredential, NewUser, User,
    };
    use gateway_core::store::memory::InMemoryStore;
    use gateway_core::token::now_epoch_seconds;
    use gateway_core::AccessTokenClaims;
    use http::header::WWW_AUTHENTICATE;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    const SECRET: &str = "ssssst";

    fn claims(exp: u64) -> AccessTokenClaims {
        AccessTokenClaims {
            iss: "gateway-issuer".to_string(),
            aud: "something".into(),
            sub: "consumer-1".to_string(),
            iat: now_epoch_seconds(),
            exp,
            consumer_id: "consumer-1".to_string(),
            scopes: vec!["read".to_string(), "write".to_string()],
            client_id: Some("cred-1".to_string()),
        }
    }

    fn token(claims: &AccessTokenClaims) -> String {
        TokenCodec::hs256(SECRET).unwrap().encode(claims).unwrap()
    }

    fn valid_token() -> String {
        token(&claims(now_epoch_seconds() + 600))
    }

    fn policy(existence_check: Option<ExistenceCheck>) -> OAuth2Policy {
        OAuth2Policy::new(
            TokenCodec::hs256(SECRET).unwrap(),
            "gateway-issuer",
            "something",
            existence_check,
        )
    }

    fn context(authorization: Option<&str>, scopes: &[&str]) -> RequestContext {
        let endpoint = ApiEndpoint::from_config(&ApiEndpointConfig {
            name: "authorizedEndpoint".to_string(),
            host: "*".to_string(),
            paths: vec!["/authorizedPath".to_string()],
            methods: Vec::new(),
            scopes: scopes.iter().map(|s| s.to_string()).collect(),
        })
        .unwrap();
        let mut builder = Request::builder().uri("/authorizedPath");
        if let Some(value) = authorization {
            builder = builder.header(AUTHORIZATION, value);
        }
        RequestContext::new(
            builder.body(Body::empty()).unwrap(),
            Arc::new(endpoint),
            "/authorizedPath".to_string(),
        )
    }

    /// Runs `policy` followed by a probe that records what it saw
    async fn run(policy: OAuth2Policy, ctx: RequestContext) -> (Response, Vec<String>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::new(
            "test",
            vec![
                Policy::OAuth2(policy),
                Policy::Probe(Probe::new(
                    "backend",
                    ProbeAction::Respond(StatusCode::OK),
                    log.clone(),
                )),
            ],
        );
        let response = pipeline.run(ctx).await;
        let seen = log.lock().unwrap().clone();
        (response, seen)
    }

    fn challenge(response: &Response) -> String {
        response
            .headers()
            .get(WWW_AUTHENTICATE)
            .map(|v| v.to_str().unwrap().to_string())
            .unwrap_or_default()
    }

    #[test]
    fn test_bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, "Bearer abc.def.ghi".parse().unwrap());
        assert_eq!(bearer_token(&headers), Some("abc.def.ghi"));

        headers.insert(AUTHORIZATION, "bearer abc".parse().unwrap());
        assert_eq!(bearer_token(&headers), Some("abc"));

        for malformed in ["Basic abc", "Bearer", "Bearer ", "Bearer a b", "abc"] {
            headers.insert(AUTHORIZATION, malformed.parse().unwrap());
            assert_eq!(bearer_token(&headers), None, "accepted {malformed:?}");
        }
    }

    #[tokio::test]
    async fn test_valid_token_passes_identity_downstream() {
        let header = format!("Bearer {}", valid_token());
        let (response, seen) = run(policy(None), context(Some(&header), &[])).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(seen, vec!["backend:consumer-1"]);
    }

    #[tokio::test]
    async fn test_missing_token_short_circuits() {
        let (response, seen) = run(policy(None), context(None, &[])).await;

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(challenge(&response), "Bearer");
        assert!(seen.is_empty());
    }

    #[tokio::test]
    async fn test_expired_token_mentions_expiry() {
        let header = format!("Bearer {}", token(&claims(now_epoch_seconds() - 10)));
        let (response, seen) = run(policy(None), context(Some(&header), &[])).await;

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(challenge(&response).contains(r#"error_description="token expired""#));
        assert!(seen.is_empty());
    }

    #[tokio::test]
    async fn test_wrong_audience_is_generic_invalid_token() {
        let other = AccessTokenClaims {
            aud: "another-audience".into(),
            ..claims(now_epoch_seconds() + 600)
        };
        let header = format!("Bearer {}", token(&other));
        let (response, seen) = run(policy(None), context(Some(&header), &[])).await;

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(challenge(&response), r#"Bearer error="invalid_token""#);
        assert!(seen.is_empty());
    }

    #[tokio::test]
    async fn test_endpoint_scopes_enforced() {
        let header = format!("Bearer {}", valid_token());

        let (response, seen) = run(policy(None), context(Some(&header), &["admin"])).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(challenge(&response).contains("insufficient_scope"));
        assert!(seen.is_empty());

        let (response, _) = run(policy(None), context(Some(&header), &["read"])).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    async fn provisioned() -> (Store, IssuedCredential) {
        let store = Store::in_memory();
        store.insert_scopes(&["read".to_string()]).await.unwrap();
        let user = store
            .insert_user(NewUser {
                username: "clark".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        let app = store
            .insert_application(
                &user.id,
                NewApplication {
                    name: "appy".to_string(),
                    redirect_uri: None,
                },
            )
            .await
            .unwrap();
        let issued = store
            .insert_credential(
                &app.id,
                NewCredential {
                    secret: Some(SECRET.to_string()),
                    scopes: vec!["read".to_string()],
                },
            )
            .await
            .unwrap();
        (store, issued)
    }

    #[tokio::test]
    async fn test_existence_check_rejects_disabled_credential() {
        let (store, issued) = provisioned().await;
        let live = AccessTokenClaims {
            consumer_id: issued.credential.consumer_id.clone(),
            client_id: Some(issued.credential.id.clone()),
            ..claims(now_epoch_seconds() + 600)
        };
        let header = format!("Bearer {}", token(&live));
        let check = ExistenceCheck::new(store.clone(), 0, Duration::from_millis(1));

        let (response, _) = run(policy(Some(check.clone())), context(Some(&header), &[])).await;
        assert_eq!(response.status(), StatusCode::OK);

        store
            .set_credential_active(&issued.credential.id, false)
            .await
            .unwrap();
        let (response, seen) = run(policy(Some(check)), context(Some(&header), &[])).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(seen.is_empty());
    }

    /// Delegates to an in-memory store but fails the first `failures` lookups
    struct FlakyStore {
        inner: InMemoryStore,
        failures: AtomicU32,
        lookups: AtomicU32,
    }

    impl FlakyStore {
        fn new(inner: InMemoryStore, failures: u32) -> Self {
            Self {
                inner,
                failures: AtomicU32::new(failures),
                lookups: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl CredentialStore for FlakyStore {
        async fn insert_scopes(&self, scopes: &[String]) -> Result<(), StoreError> {
            self.inner.insert_scopes(scopes).await
        }

        async fn scopes(&self) -> Result<Vec<String>, StoreError> {
            self.inner.scopes().await
        }

        async fn insert_user(&self, user: NewUser) -> Result<User, StoreError> {
            self.inner.insert_user(user).await
        }

        async fn find_user(&self, id: &str) -> Result<Option<User>, StoreError> {
            self.inner.find_user(id).await
        }

        async fn insert_application(
            &self,
            owner_id: &str,
            application: NewApplication,
        ) -> Result<Application, StoreError> {
            self.inner.insert_application(owner_id, application).await
        }

        async fn find_application(&self, id: &str) -> Result<Option<Application>, StoreError> {
            self.inner.find_application(id).await
        }

        async fn insert_credential(
            &self,
            consumer_id: &str,
            credential: NewCredential,
        ) -> Result<IssuedCredential, StoreError> {
            self.inner.insert_credential(consumer_id, credential).await
        }

        async fn lookup_credential(&self, id: &str) -> Result<Option<Credential>, StoreError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(StoreError::Unavailable("connection refused".to_string()));
            }
            self.inner.lookup_credential(id).await
        }

        async fn add_scopes_to_credential(
            &self,
            id: &str,
            scopes: &[String],
        ) -> Result<Credential, StoreError> {
            self.inner.add_scopes_to_credential(id, scopes).await
        }

        async fn set_credential_active(&self, id: &str, active: bool) -> Result<(), StoreError> {
            self.inner.set_credential_active(id, active).await
        }

        async fn health_check(&self) -> Result<(), String> {
            self.inner.health_check().await
        }
    }

    async fn flaky(failures: u32) -> (FlakyStore, Credential) {
        let inner = InMemoryStore::new();
        inner.insert_scopes(&["read".to_string()]).await.unwrap();
        let user = inner
            .insert_user(NewUser {
                username: "clark".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        let app = inner
            .insert_application(&user.id, NewApplication::default())
            .await
            .unwrap();
        let issued = inner
            .insert_credential(&app.id, NewCredential::default())
            .await
            .unwrap();
        (FlakyStore::new(inner, failures), issued.credential)
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried() {
        let (store, credential) = flaky(2).await;

        let live = check_with_retry(
            &store,
            &credential.id,
            &credential.consumer_id,
            3,
            Duration::from_millis(50),
        )
        .await
        .unwrap();

        assert!(live);
        // Two failed lookups, then lookup_credential plus resolve_owner
        assert_eq!(store.lookups.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_are_bounded() {
        let (store, credential) = flaky(10).await;

        let result = check_with_retry(
            &store,
            &credential.id,
            &credential.consumer_id,
            2,
            Duration::from_millis(50),
        )
        .await;

        assert!(matches!(result, Err(StoreError::Unavailable(_))));
        assert_eq!(store.lookups.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_from_config_falls_back_to_access_tokens() {
        let defaults = AccessTokensConfig {
            algorithm: "HS256".to_string(),
            secret: Some(SECRET.to_string()),
            private_key_file: None,
            public_key_file: None,
            issuer: "gateway-issuer".to_string(),
            audience: "something".to_string(),
            subject: None,
            ttl: 60,
        };
        let config = OAuth2PolicyConfig {
            audience: Some("other".to_string()),
            ..Default::default()
        };

        let policy = OAuth2Policy::from_config(&config, &defaults, &Store::in_memory()).unwrap();

        assert_eq!(policy.issuer, "gateway-issuer");
        assert_eq!(policy.audience, "other");
        assert!(policy.existence_check.is_none());
    }
}
