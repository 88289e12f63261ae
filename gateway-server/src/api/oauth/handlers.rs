//! OAuth 2.0 endpoint handlers

use crate::api::oauth::models::{
    IntrospectionRequest, IntrospectionResponse, OAuthError, TokenRequest, TokenResponse,
};
use crate::errors::ApiError;
use crate::headers::presets;
use crate::openapi::OAUTH_TAG;
use crate::state::AppState;
use axum::{
    extract::{Form, FromRequest, Request, State},
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderMap, StatusCode,
    },
    response::{IntoResponse, Response},
    Json,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use gateway_core::issuer::CLIENT_CREDENTIALS;
use gateway_core::{CredentialStore, IssueError, StoreError};
use log::{debug, error, info, warn};
use percent_encoding::percent_decode_str;
use serde::de::DeserializeOwned;

/// Challenge sent when HTTP Basic client authentication fails
const BASIC_CHALLENGE: &str = r#"Basic realm="gateway""#;

/// OAuth 2.0 Token endpoint (RFC 6749 Section 4.4)
///
/// Issues a signed access token for the client credentials grant.
#[utoipa::path(
    post,
    path = "/oauth2/token",
    tag = OAUTH_TAG,
    request_body(
        content = TokenRequest,
        content_type = "application/x-www-form-urlencoded",
        description = "Token request; JSON bodies are also accepted"
    ),
    responses(
        (status = 200, description = "Token issued", body = TokenResponse),
        (status = 400, description = "Invalid request, grant type or scope", body = OAuthError),
        (status = 401, description = "Client authentication failed", body = OAuthError),
        (status = 503, description = "Credential store unavailable", body = OAuthError)
    )
)]
pub async fn token(
    State(state): State<AppState>,
    headers: HeaderMap,
    FormOrJson(request): FormOrJson<TokenRequest>,
) -> Response {
    let mut response = issue_token(&state, &headers, request).await;
    presets::no_store().apply(&mut response);
    response
}

async fn issue_token(state: &AppState, headers: &HeaderMap, request: TokenRequest) -> Response {
    let Some(grant_type) = request.grant_type else {
        return error_response(
            StatusCode::BAD_REQUEST,
            OAuthError::invalid_request("grant_type is required"),
        );
    };
    if grant_type != CLIENT_CREDENTIALS {
        warn!("Unsupported grant type '{}'", grant_type);
        return error_response(
            StatusCode::BAD_REQUEST,
            OAuthError::unsupported_grant_type(),
        );
    }

    let credentials = match client_credentials(
        headers,
        request.client_id.as_deref(),
        request.client_secret.as_deref(),
    ) {
        Ok(credentials) => credentials,
        Err(response) => return response,
    };
    let used_basic = credentials.basic;

    debug!(
        "Token request from client '{}' for scopes {:?}",
        credentials.id, request.scope
    );

    let request = gateway_core::TokenRequest {
        grant_type,
        client_id: credentials.id,
        client_secret: credentials.secret,
        scope: request.scope,
    };

    match state.issuer.issue(&request).await {
        Ok(issued) => Json(TokenResponse {
            access_token: issued.access_token,
            token_type: issued.token_type.to_string(),
            expires_in: issued.expires_in,
            scope: issued.claims.scopes.join(" "),
        })
        .into_response(),
        Err(IssueError::UnsupportedGrant(_)) => error_response(
            StatusCode::BAD_REQUEST,
            OAuthError::unsupported_grant_type(),
        ),
        Err(IssueError::InvalidRequest(description)) => error_response(
            StatusCode::BAD_REQUEST,
            OAuthError::invalid_request(&description),
        ),
        Err(IssueError::InvalidClient) => {
            info!("Client authentication failed for '{}'", request.client_id);
            invalid_client(used_basic)
        }
        Err(IssueError::InvalidScope(scope)) => error_response(
            StatusCode::BAD_REQUEST,
            OAuthError::invalid_scope(&format!("Scope '{scope}' is not granted to this client")),
        ),
        Err(IssueError::Store(e)) => store_failure(e),
        Err(IssueError::Token(e)) => {
            error!("Failed to sign access token: {}", e);
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                OAuthError::server_error("Failed to issue token"),
            )
        }
    }
}

/// OAuth 2.0 Token Introspection endpoint (RFC 7662)
///
/// Callers authenticate with their own client credentials. Any token that
/// fails verification, or whose credential is gone, is reported inactive.
#[utoipa::path(
    post,
    path = "/oauth2/introspect",
    tag = OAUTH_TAG,
    request_body(
        content = IntrospectionRequest,
        content_type = "application/x-www-form-urlencoded",
        description = "Introspection request; JSON bodies are also accepted"
    ),
    responses(
        (status = 200, description = "Token metadata", body = IntrospectionResponse),
        (status = 400, description = "Missing token", body = OAuthError),
        (status = 401, description = "Client authentication failed", body = OAuthError),
        (status = 503, description = "Credential store unavailable", body = OAuthError)
    )
)]
pub async fn introspect(
    State(state): State<AppState>,
    headers: HeaderMap,
    FormOrJson(request): FormOrJson<IntrospectionRequest>,
) -> Response {
    let mut response = introspect_token(&state, &headers, request).await;
    presets::no_cache().apply(&mut response);
    response
}

async fn introspect_token(
    state: &AppState,
    headers: &HeaderMap,
    request: IntrospectionRequest,
) -> Response {
    let credentials = match client_credentials(
        headers,
        request.client_id.as_deref(),
        request.client_secret.as_deref(),
    ) {
        Ok(credentials) => credentials,
        Err(response) => return response,
    };

    match state
        .store
        .verify_client(&credentials.id, &credentials.secret)
        .await
    {
        Ok(Some(_)) => {}
        Ok(None) => {
            info!("Introspection caller '{}' failed authentication", credentials.id);
            return invalid_client(credentials.basic);
        }
        Err(e) => return store_failure(e),
    }

    debug!(
        "Introspection by '{}' (token_type_hint: {:?})",
        credentials.id, request.token_type_hint
    );
    let token = match request.token.as_deref() {
        Some(token) if !token.is_empty() => token,
        _ => {
            warn!("Empty token in introspection request");
            return error_response(
                StatusCode::BAD_REQUEST,
                OAuthError::invalid_request("token parameter is required"),
            );
        }
    };

    let settings = state.issuer.settings();
    let claims = match state
        .issuer
        .codec()
        .decode(token, &settings.issuer, &settings.audience)
    {
        Ok(claims) => claims,
        Err(e) => {
            debug!("Introspected token is inactive: {}", e);
            return Json(IntrospectionResponse::inactive()).into_response();
        }
    };

    let live = match claims.client_id.as_deref() {
        Some(client_id) => match state
            .store
            .is_credential_live(client_id, &claims.consumer_id)
            .await
        {
            Ok(live) => live,
            Err(e) => return store_failure(e),
        },
        None => false,
    };
    if !live {
        debug!(
            "Introspected token for consumer '{}' has no live credential",
            claims.consumer_id
        );
        return Json(IntrospectionResponse::inactive()).into_response();
    }

    Json(IntrospectionResponse {
        active: true,
        scope: Some(claims.scopes.join(" ")),
        client_id: claims.client_id,
        sub: Some(claims.sub),
        consumer_id: Some(claims.consumer_id),
        iss: Some(claims.iss),
        aud: Some(claims.aud.to_string()),
        exp: Some(claims.exp),
        iat: Some(claims.iat),
        token_type: Some(gateway_core::issuer::BEARER.to_string()),
    })
    .into_response()
}

/// Client id and secret taken from the body or from HTTP Basic authentication
#[derive(Debug)]
struct ClientCredentials {
    id: String,
    secret: String,
    basic: bool,
}

/// Resolves the client credentials of a request.
///
/// A client must use exactly one authentication method (RFC 6749 Section
/// 2.3), so credentials in both the header and the body are rejected.
fn client_credentials(
    headers: &HeaderMap,
    body_id: Option<&str>,
    body_secret: Option<&str>,
) -> Result<ClientCredentials, Response> {
    let basic = match headers.get(AUTHORIZATION) {
        Some(value) => match parse_basic(value.to_str().unwrap_or_default()) {
            Some(credentials) => Some(credentials),
            None => {
                debug!("Ignoring non-Basic Authorization header");
                None
            }
        },
        None => None,
    };

    match (basic, body_id) {
        (Some(_), Some(_)) => Err(error_response(
            StatusCode::BAD_REQUEST,
            OAuthError::invalid_request("Client credentials must be sent only once"),
        )),
        (Some((id, secret)), None) => Ok(ClientCredentials {
            id,
            secret,
            basic: true,
        }),
        (None, Some(id)) if !id.is_empty() => Ok(ClientCredentials {
            id: id.to_string(),
            secret: body_secret.unwrap_or_default().to_string(),
            basic: false,
        }),
        _ => Err(error_response(
            StatusCode::BAD_REQUEST,
            OAuthError::invalid_request("client_id is required"),
        )),
    }
}

/// Decodes an `Authorization: Basic` value into client id and secret
fn parse_basic(value: &str) -> Option<(String, String)> {
    let (scheme, encoded) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (id, secret) = decoded.split_once(':')?;
    Some((form_decode(id)?, form_decode(secret)?))
}

/// Reverses `application/x-www-form-urlencoded` encoding of a single value
fn form_decode(value: &str) -> Option<String> {
    percent_decode_str(&value.replace('+', " "))
        .decode_utf8()
        .ok()
        .map(|decoded| decoded.into_owned())
}

fn invalid_client(used_basic: bool) -> Response {
    let error = ApiError::new(
        OAuthError::invalid_client("Client authentication failed"),
        StatusCode::UNAUTHORIZED,
    );
    if used_basic {
        error.with_challenge(BASIC_CHALLENGE).into_response()
    } else {
        error.into_response()
    }
}

fn store_failure(e: StoreError) -> Response {
    if e.is_transient() {
        warn!("Credential store unavailable: {}", e);
        error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            OAuthError::server_error("Credential store unavailable"),
        )
    } else {
        error!("Credential store error: {}", e);
        error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            OAuthError::server_error("Credential store error"),
        )
    }
}

/// Accepts a body as either `application/x-www-form-urlencoded` or JSON
pub struct FormOrJson<T>(pub T);

impl<S, T> FromRequest<S> for FormOrJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Send,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let content_type = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|ct| ct.to_str().ok())
            .unwrap_or("");

        if content_type.starts_with("application/json") {
            match Json::<T>::from_request(req, state).await {
                Ok(Json(value)) => Ok(FormOrJson(value)),
                Err(e) => {
                    debug!("Rejected JSON body: {}", e);
                    Err(error_response(
                        StatusCode::BAD_REQUEST,
                        OAuthError::invalid_request("Invalid JSON body"),
                    ))
                }
            }
        } else {
            match Form::<T>::from_request(req, state).await {
                Ok(Form(value)) => Ok(FormOrJson(value)),
                Err(e) => {
                    debug!("Rejected form body: {}", e);
                    Err(error_response(
                        StatusCode::BAD_REQUEST,
                        OAuthError::invalid_request("Invalid form body"),
                    ))
                }
            }
        }
    }
}

/// Helper function to create error responses
fn error_response(status: StatusCode, error: OAuthError) -> Response {
    ApiError::new(error, status).into_response()
}
