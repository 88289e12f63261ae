pub mod oauth2;
#[cfg(test)]
pub(crate) mod probe;
pub mod proxy;

use super::context::RequestContext;
use super::pipeline::{Next, PolicyError};
use axum::response::Response;

/// A configured policy instance, built once at startup
#[derive(Debug, Clone)]
pub enum Policy {
    OAuth2(oauth2::OAuth2Policy),
    Proxy(proxy::ProxyPolicy),
    #[cfg(test)]
    Probe(probe::Probe),
}

impl Policy {
    pub fn name(&self) -> &'static str {
        match self {
            Self::OAuth2(_) => "oauth2",
            Self::Proxy(_) => "proxy",
            #[cfg(test)]
            Self::Probe(_) => "probe",
        }
    }

    pub async fn apply(&self, ctx: RequestContext, next: Next<'_>) -> Result<Response, PolicyError> {
        match self {
            Self::OAuth2(policy) => policy.apply(ctx, next).await,
            Self::Proxy(policy) => policy.apply(ctx, next).await,
            #[cfg(test)]
            Self::Probe(policy) => policy.apply(ctx, next).await,
        }
    }
}
