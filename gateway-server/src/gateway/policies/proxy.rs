use crate::config::ProxyPolicyConfig;
use crate::gateway::context::RequestContext;
use crate::gateway::pipeline::{Next, PolicyError};
use crate::gateway::BuildError;
use axum::body::{to_bytes, Body};
use axum::response::Response;
use http::header::{self, HeaderName};
use http::HeaderMap;
use log::debug;
use std::error::Error as StdError;
use url::Url;

/// Headers that describe a single connection and must not be forwarded
const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Forwards the request to a service endpoint and returns its response.
///
/// Always terminal: it never calls the rest of the chain.
#[derive(Debug, Clone)]
pub struct ProxyPolicy {
    service: String,
    base_url: Url,
    strip_path: bool,
    client: reqwest::Client,
    max_body_size: usize,
}

impl ProxyPolicy {
    pub fn new(
        service: impl Into<String>,
        base_url: Url,
        strip_path: bool,
        client: reqwest::Client,
        max_body_size: usize,
    ) -> Self {
        Self {
            service: service.into(),
            base_url,
            strip_path,
            client,
            max_body_size,
        }
    }

    /// Builds the policy against the named service's base URL
    pub fn from_config(
        config: &ProxyPolicyConfig,
        url: &str,
        client: reqwest::Client,
        max_body_size: usize,
    ) -> Result<Self, BuildError> {
        let base_url = Url::parse(url).map_err(|e| BuildError::InvalidServiceUrl {
            service: config.service_endpoint.clone(),
            reason: e.to_string(),
        })?;
        if base_url.cannot_be_a_base() {
            return Err(BuildError::InvalidServiceUrl {
                service: config.service_endpoint.clone(),
                reason: "URL cannot be used as a base".to_string(),
            });
        }
        Ok(Self::new(
            config.service_endpoint.clone(),
            base_url,
            config.strip_path,
            client,
            max_body_size,
        ))
    }

    /// Target URL for a request path and query
    pub fn target_url(&self, path: &str, query: Option<&str>, matched_prefix: &str) -> Url {
        let forwarded = if self.strip_path {
            path.strip_prefix(matched_prefix).unwrap_or(path)
        } else {
            path
        };

        let mut url = self.base_url.clone();
        let base_path = url.path().trim_end_matches('/');
        let joined = match forwarded {
            "" => format!("{base_path}/"),
            p if p.starts_with('/') => format!("{base_path}{p}"),
            p => format!("{base_path}/{p}"),
        };
        url.set_path(&joined);
        url.set_query(query);
        url
    }

    pub async fn apply(&self, ctx: RequestContext, _next: Next<'_>) -> Result<Response, PolicyError> {
        let (parts, body) = ctx.request.into_parts();
        let url = self.target_url(
            parts.uri.path(),
            parts.uri.query(),
            &ctx.matched_prefix,
        );
        debug!(
            "Forwarding {} {} to service '{}' at {}",
            parts.method,
            parts.uri.path(),
            self.service,
            url
        );

        let body = to_bytes(body, self.max_body_size)
            .await
            .map_err(|e| PolicyError::BadRequest(format!("failed to read request body: {e}")))?;

        let mut request = self
            .client
            .request(parts.method, url.clone())
            .headers(forwardable(&parts.headers));
        if !body.is_empty() {
            request = request.body(body);
        }

        let response = request.send().await.map_err(|e| {
            let detail = format!(
                "service '{}' at {}: {} ({:?})",
                self.service,
                url,
                e,
                e.source()
            );
            if e.is_timeout() {
                PolicyError::UpstreamTimeout(detail)
            } else {
                PolicyError::Upstream(detail)
            }
        })?;

        let status = response.status();
        let headers = forwardable(response.headers());
        let bytes = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                PolicyError::UpstreamTimeout(format!("reading response from '{}': {e}", self.service))
            } else {
                PolicyError::Upstream(format!("reading response from '{}': {e}", self.service))
            }
        })?;

        let mut forwarded = Response::new(Body::from(bytes));
        *forwarded.status_mut() = status;
        *forwarded.headers_mut() = headers;
        Ok(forwarded)
    }
}

/// Copies headers minus hop-by-hop ones, `Host` and `Content-Length`.
///
/// Headers listed in `Connection` are also dropped.
fn forwardable(headers: &HeaderMap) -> HeaderMap {
    let listed: Vec<String> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect();

    let mut forwarded = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if HOP_BY_HOP.contains(name)
            || name == header::HOST
            || name == header::CONTENT_LENGTH
            || listed.iter().any(|listed| listed == name.as_str())
        {
            continue;
        }
        forwarded.append(name.clone(), value.clone());
    }
    forwarded
}
