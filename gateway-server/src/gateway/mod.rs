//! Endpoint matching and policy pipelines for proxied traffic

pub mod context;
pub mod matcher;
pub mod pipeline;
pub mod policies;

use crate::config::{ConfigError, GatewayConfig, PolicyConfig};
use crate::errors::ApiError;
use crate::state::AppState;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::response::{IntoResponse, Response};
use context::RequestContext;
use gateway_core::Store;
use http::header::HOST;
use http::Method;
use log::{debug, info, warn};
use matcher::{ApiEndpoint, EndpointMatcher, RouteMatch};
use pipeline::Pipeline;
use policies::oauth2::OAuth2Policy;
use policies::proxy::ProxyPolicy;
use policies::Policy;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Inconsistencies in the endpoint, service or pipeline definitions
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Invalid API endpoint '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },
    #[error("Pipeline '{pipeline}' references unknown API endpoint '{endpoint}'")]
    UnknownApiEndpoint { pipeline: String, endpoint: String },
    #[error("Pipeline '{pipeline}' references unknown service endpoint '{service}'")]
    UnknownServiceEndpoint { pipeline: String, service: String },
    #[error("API endpoint '{0}' is bound to more than one pipeline")]
    EndpointInMultiplePipelines(String),
    #[error("Pipeline '{0}' has no policies")]
    EmptyPipeline(String),
    #[error("Invalid URL for service endpoint '{service}': {reason}")]
    InvalidServiceUrl { service: String, reason: String },
    #[error("Invalid key material for pipeline '{pipeline}': {source}")]
    Key {
        pipeline: String,
        source: ConfigError,
    },
}

/// The compiled routing table and pipelines
#[derive(Debug)]
pub struct Gateway {
    matcher: EndpointMatcher,
    pipelines: Vec<Pipeline>,
}

impl Gateway {
    /// Validates the configuration and builds every policy instance
    pub fn build(
        config: &GatewayConfig,
        store: &Store,
        client: reqwest::Client,
    ) -> Result<Self, BuildError> {
        let services: HashMap<&str, &str> = config
            .service_endpoints
            .iter()
            .map(|s| (s.name.as_str(), s.url.as_str()))
            .collect();

        let mut endpoints = HashMap::new();
        for endpoint_config in &config.api_endpoints {
            let endpoint = ApiEndpoint::from_config(endpoint_config)?;
            endpoints.insert(endpoint_config.name.as_str(), Arc::new(endpoint));
        }

        let max_body_size = config.proxy.max_body_size;
        let mut bindings: HashMap<&str, usize> = HashMap::new();
        let mut pipelines = Vec::with_capacity(config.pipelines.len());

        for (index, pipeline_config) in config.pipelines.iter().enumerate() {
            if pipeline_config.policies.is_empty() {
                return Err(BuildError::EmptyPipeline(pipeline_config.name.clone()));
            }

            for name in &pipeline_config.api_endpoints {
                if !endpoints.contains_key(name.as_str()) {
                    return Err(BuildError::UnknownApiEndpoint {
                        pipeline: pipeline_config.name.clone(),
                        endpoint: name.clone(),
                    });
                }
                if bindings.insert(name.as_str(), index).is_some() {
                    return Err(BuildError::EndpointInMultiplePipelines(name.clone()));
                }
            }

            let mut policies = Vec::with_capacity(pipeline_config.policies.len());
            for policy_config in &pipeline_config.policies {
                let policy = match policy_config {
                    PolicyConfig::OAuth2(oauth2) => Policy::OAuth2(
                        OAuth2Policy::from_config(oauth2, &config.access_tokens, store).map_err(
                            |source| BuildError::Key {
                                pipeline: pipeline_config.name.clone(),
                                source,
                            },
                        )?,
                    ),
                    PolicyConfig::Proxy(proxy) => {
                        let url = services
                            .get(proxy.service_endpoint.as_str())
                            .ok_or_else(|| BuildError::UnknownServiceEndpoint {
                                pipeline: pipeline_config.name.clone(),
                                service: proxy.service_endpoint.clone(),
                            })?;
                        Policy::Proxy(ProxyPolicy::from_config(
                            proxy,
                            url,
                            client.clone(),
                            max_body_size,
                        )?)
                    }
                };
                policies.push(policy);
            }

            let pipeline = Pipeline::new(pipeline_config.name.clone(), policies);
            info!(
                "Pipeline '{}': [{}] for endpoints {:?}",
                pipeline.name,
                pipeline
                    .policies()
                    .iter()
                    .map(Policy::name)
                    .collect::<Vec<_>>()
                    .join(", "),
                pipeline_config.api_endpoints
            );
            pipelines.push(pipeline);
        }

        // Routes follow api_endpoints order so that ties resolve to the
        // endpoint defined first
        let mut matcher = EndpointMatcher::new();
        for endpoint_config in &config.api_endpoints {
            let name = endpoint_config.name.as_str();
            match (bindings.get(name), endpoints.get(name)) {
                (Some(&pipeline), Some(endpoint)) => matcher.add(endpoint.clone(), pipeline),
                _ => warn!("API endpoint '{}' is not bound to any pipeline", name),
            }
        }

        if matcher.is_empty() {
            warn!("No API endpoints are routed; every proxied request will answer 404");
        }

        Ok(Self { matcher, pipelines })
    }

    pub fn resolve(&self, host: &str, path: &str, method: &Method) -> Option<RouteMatch> {
        self.matcher.resolve(host, path, method)
    }

    pub fn pipeline(&self, index: usize) -> Option<&Pipeline> {
        self.pipelines.get(index)
    }

    pub fn route_count(&self) -> usize {
        self.matcher.len()
    }
}

/// Host used for matching: the `Host` header, or the authority of an
/// absolute-form request target
fn request_host(request: &Request<Body>) -> String {
    request
        .headers()
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .or_else(|| request.uri().host().map(str::to_string))
        .unwrap_or_default()
}

/// Runs every request no other route claimed through its matching pipeline
pub(crate) async fn handle(State(state): State<AppState>, request: Request) -> Response {
    let host = request_host(&request);
    let Some(route) = state
        .gateway
        .resolve(&host, request.uri().path(), request.method())
    else {
        debug!(
            "No API endpoint matches {} {}{}",
            request.method(),
            host,
            request.uri().path()
        );
        return ApiError::not_found().into_response();
    };

    let Some(pipeline) = state.gateway.pipeline(route.pipeline) else {
        return ApiError::internal().into_response();
    };

    let ctx = RequestContext::new(request, route.endpoint, route.matched_prefix);
    pipeline.run(ctx).await
}
