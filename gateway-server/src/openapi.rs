use crate::api::{health, oauth};
use utoipa::OpenApi;

pub(crate) const HEALTH_TAG: &str = "Health API";
pub(crate) const OAUTH_TAG: &str = "OAuth 2.0 API";

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health_check,
        health::ready_check,
        oauth::handlers::token,
        oauth::handlers::introspect,
    ),
    tags(
        (name = HEALTH_TAG, description = "Health check endpoints"),
        (name = OAUTH_TAG, description = "Client credentials token issuance and introspection"),
    ),
    info(
        title = "API Gateway",
        description = "OAuth2 token issuance and policy-driven request proxying",
        version = "0.1.0"
    )
)]
pub(crate) struct ApiDoc;
