//! Endpoint, pipeline and policy definitions
//!
//! These are plain serde types read as lists so that configuration order is
//! preserved; the order of `api_endpoints` breaks ties between equally
//! specific matches.

use serde::Deserialize;

/// A named backend base URL
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ServiceEndpointConfig {
    pub name: String,
    pub url: String,
}

/// Host and path rules for an API endpoint
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ApiEndpointConfig {
    pub name: String,
    /// `*`, `*.example.com` or an exact host name
    #[serde(default = "default_host")]
    pub host: String,
    /// Literal path prefixes; a trailing `*` drops the segment boundary check
    pub paths: Vec<String>,
    /// Allowed HTTP methods; empty means any
    #[serde(default)]
    pub methods: Vec<String>,
    /// Scopes a token must carry to access this endpoint
    #[serde(default)]
    pub scopes: Vec<String>,
}

fn default_host() -> String {
    "*".to_string()
}

/// An ordered policy chain applied to the listed API endpoints
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct PipelineConfig {
    pub name: String,
    pub api_endpoints: Vec<String>,
    pub policies: Vec<PolicyConfig>,
}

/// Configuration of a single policy, tagged by `type`
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PolicyConfig {
    #[serde(rename = "oauth2")]
    OAuth2(OAuth2PolicyConfig),
    Proxy(ProxyPolicyConfig),
}

/// Bearer token authentication. Anything left unset falls back to the
/// `access_tokens` section.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct OAuth2PolicyConfig {
    #[serde(default)]
    pub issuer: Option<String>,
    #[serde(default)]
    pub audience: Option<String>,
    #[serde(default)]
    pub algorithm: Option<String>,
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub public_key_file: Option<String>,
    /// Re-check the token's credential and consumer in the store
    #[serde(default)]
    pub check_credential_existence: bool,
    /// Retries of the existence check when the store is unavailable
    #[serde(default = "default_existence_retries")]
    pub existence_check_retries: u32,
    /// Delay before the first retry in milliseconds; doubles on each attempt
    #[serde(default = "default_existence_backoff_ms")]
    pub existence_check_backoff_ms: u64,
}

fn default_existence_retries() -> u32 {
    3
}

fn default_existence_backoff_ms() -> u64 {
    50
}

impl Default for OAuth2PolicyConfig {
    fn default() -> Self {
        Self {
            issuer: None,
            audience: None,
            algorithm: None,
            secret: None,
            public_key_file: None,
            check_credential_existence: false,
            existence_check_retries: default_existence_retries(),
            existence_check_backoff_ms: default_existence_backoff_ms(),
        }
    }
}

/// Forwarding to a named service endpoint
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ProxyPolicyConfig {
    pub service_endpoint: String,
    /// Remove the matched path prefix before forwarding
    #[serde(default)]
    pub strip_path: bool,
}
