pub(crate) use crate::config::access_tokens::AccessTokensConfig;
pub(crate) use crate::config::gateway::{
    ApiEndpointConfig, OAuth2PolicyConfig, PipelineConfig, PolicyConfig, ProxyPolicyConfig,
    ServiceEndpointConfig,
};
pub(crate) use crate::config::proxy::ProxyConfig;
pub(crate) use crate::config::store::{StoreBackend, StoreConfig};
use confique::Config;
use gateway_core::TokenError;
use thiserror::Error;

pub mod access_tokens;
pub mod gateway;
pub mod proxy;
pub mod store;

/// Default location of the configuration file
pub const DEFAULT_CONFIG_FILE: &str = "gateway.toml";

/// Errors raised while loading configuration or deriving key material from it
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] confique::Error),
    #[error("Missing key material: {0}")]
    MissingKey(String),
    #[error("Failed to read key file '{path}': {source}")]
    KeyFile {
        path: String,
        source: std::io::Error,
    },
    #[error("Invalid key material: {0}")]
    Token(#[from] TokenError),
    #[error("Access token ttl must be between 1 and {max} seconds, got {ttl}")]
    InvalidTtl { ttl: u64, max: u64 },
}

/// Main configuration structure for the gateway
///
/// Values are read from environment variables (`GATEWAY_*`) first, then from
/// the TOML file named by `GATEWAY_CONFIG_FILE`. The loaded value is an
/// immutable snapshot for the lifetime of the process.
#[derive(Debug, Config, Clone)]
pub struct GatewayConfig {
    /// The port the gateway will listen to (default: 8080)
    #[config(env = "GATEWAY_PORT", default = 8080)]
    pub port: u16,

    /// Access token issuance and default verification settings
    #[config(nested)]
    pub access_tokens: AccessTokensConfig,

    /// Credential store configuration
    #[config(nested)]
    pub store: StoreConfig,

    /// Outbound HTTP client settings for the proxy policy
    #[config(nested)]
    pub proxy: ProxyConfig,

    /// Named backend base URLs
    #[config(default = [])]
    pub service_endpoints: Vec<ServiceEndpointConfig>,

    /// Host and path rules, in priority order for ties
    #[config(default = [])]
    pub api_endpoints: Vec<ApiEndpointConfig>,

    /// Ordered policy chains bound to API endpoints
    #[config(default = [])]
    pub pipelines: Vec<PipelineConfig>,
}

impl GatewayConfig {
    /// Loads configuration from the environment and the configuration file
    pub fn new() -> Result<Self, ConfigError> {
        let path = std::env::var("GATEWAY_CONFIG_FILE")
            .unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Self::from_file(path)
    }

    /// Loads configuration from the environment and the given TOML file.
    /// A missing file is not an error.
    pub fn from_file(path: impl Into<std::path::PathBuf>) -> Result<Self, ConfigError> {
        Ok(Self::builder().env().file(path.into()).load()?)
    }

    #[cfg(test)]
    pub fn for_test_with_backend(backend: &wiremock::MockServer) -> Self {
        Self {
            port: 0, // Let the OS choose a port
            access_tokens: AccessTokensConfig {
                algorithm: "HS256".to_string(),
                secret: Some("ssssst".to_string()),
                private_key_file: None,
                public_key_file: None,
                issuer: "gateway-issuer".to_string(),
                audience: "something".to_string(),
                subject: None,
                ttl: 3600,
            },
            store: StoreConfig {
                backend: StoreBackend::InMemory,
                redis_url: String::new(),
            },
            proxy: ProxyConfig {
                timeout: 5,
                connect_timeout: 2,
                max_body_size: 1024 * 1024,
            },
            service_endpoints: vec![ServiceEndpointConfig {
                name: "backend".to_string(),
                url: backend.uri(),
            }],
            api_endpoints: vec![ApiEndpointConfig {
                name: "authorizedEndpoint".to_string(),
                host: "*".to_string(),
                paths: vec!["/authorizedPath".to_string()],
                methods: Vec::new(),
                scopes: Vec::new(),
            }],
            pipelines: vec![PipelineConfig {
                name: "pipeline1".to_string(),
                api_endpoints: vec!["authorizedEndpoint".to_string()],
                policies: vec![
                    PolicyConfig::OAuth2(OAuth2PolicyConfig::default()),
                    PolicyConfig::Proxy(ProxyPolicyConfig {
                        service_endpoint: "backend".to_string(),
                        strip_path: false,
                    }),
                ],
            }],
        }
    }
}
