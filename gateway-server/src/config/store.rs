use confique::Config;
use serde::Deserialize;

/// Specifies which credential store implementation to use
#[derive(Debug, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum StoreBackend {
    #[default]
    InMemory,
    Redis,
}

/// Configuration for the credential store
#[derive(Debug, Config, Clone)]
pub struct StoreConfig {
    /// Store backend: "in-memory" (default) or "redis"
    #[config(env = "GATEWAY_STORE_BACKEND", default = "in-memory")]
    pub backend: StoreBackend,

    /// Redis connection string, required for the "redis" backend
    #[config(env = "GATEWAY_STORE_REDIS_URL", default = "")]
    pub redis_url: String,
}
