use confique::Config;

/// Outbound HTTP client settings shared by every proxy policy
#[derive(Debug, Config, Clone)]
pub struct ProxyConfig {
    /// Total timeout for a forwarded request in seconds (default: 30)
    #[config(env = "GATEWAY_PROXY_TIMEOUT", default = 30)]
    pub timeout: u64,

    /// Timeout for establishing a backend connection in seconds (default: 5)
    #[config(env = "GATEWAY_PROXY_CONNECT_TIMEOUT", default = 5)]
    pub connect_timeout: u64,

    /// Largest request body forwarded to a backend, in bytes (default: 10 MiB)
    #[config(env = "GATEWAY_PROXY_MAX_BODY_SIZE", default = 10485760)]
    pub max_body_size: usize,
}
