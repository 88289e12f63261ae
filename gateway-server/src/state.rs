use crate::config::{GatewayConfig, ProxyConfig, StoreBackend};
use crate::errors::StartupError;
use crate::gateway::Gateway;
use gateway_core::{CredentialStore, Store, TokenIssuer};
use log::{info, warn};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;

/// Everything a request handler needs, built once at startup and shared
/// read-only between requests
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub store: Arc<Store>,
    pub issuer: Arc<TokenIssuer>,
    pub gateway: Arc<Gateway>,
}

impl AppState {
    fn create_proxy_client(config: &ProxyConfig) -> Result<Client, reqwest::Error> {
        Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .connect_timeout(Duration::from_secs(config.connect_timeout))
            // Configure connection pool
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .build()
    }

    async fn create_store(config: &GatewayConfig) -> Result<Store, StartupError> {
        match config.store.backend {
            StoreBackend::InMemory => {
                info!("Using in-memory credential store");
                Ok(Store::in_memory())
            }
            StoreBackend::Redis => {
                info!("Using Redis credential store");
                Ok(Store::redis(&config.store.redis_url).await?)
            }
        }
    }

    /// Builds the state, creating the credential store from configuration
    pub async fn new(config: GatewayConfig) -> Result<Self, StartupError> {
        let store = Self::create_store(&config).await?;
        Self::with_store(config, store)
    }

    /// Builds the state around an existing store
    pub fn with_store(config: GatewayConfig, store: Store) -> Result<Self, StartupError> {
        let codec = config.access_tokens.codec()?;
        let issuer = TokenIssuer::new(
            store.clone(),
            codec,
            config.access_tokens.issuer_settings()?,
        );
        let client = Self::create_proxy_client(&config.proxy)?;
        let gateway = Gateway::build(&config, &store, client)?;

        Ok(Self {
            config: Arc::new(config),
            store: Arc::new(store),
            issuer: Arc::new(issuer),
            gateway: Arc::new(gateway),
        })
    }

    /// Check if all components are healthy
    pub async fn health_check(&self) -> bool {
        match self.store.health_check().await {
            Ok(()) => true,
            Err(e) => {
                warn!("Credential store health check failed: {}", e);
                false
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn for_testing(config: &GatewayConfig) -> Self {
        Self::with_store(config.clone(), Store::in_memory()).expect("Failed to build test state")
    }
}
