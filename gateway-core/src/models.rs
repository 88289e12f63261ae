//! Consumer, application and credential records

use serde::{Deserialize, Serialize};

/// Credential type used by the client credentials grant
pub const OAUTH2_CREDENTIAL: &str = "oauth2";

/// An end user that owns applications
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub firstname: Option<String>,
    #[serde(default)]
    pub lastname: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    pub is_active: bool,
}

/// Profile fields supplied when provisioning a user
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewUser {
    pub username: String,
    pub firstname: Option<String>,
    pub lastname: Option<String>,
    pub email: Option<String>,
}

/// An application owned by a user. The application id doubles as the
/// consumer id carried in access tokens.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Application {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub redirect_uri: Option<String>,
    pub owner_id: String,
    pub is_active: bool,
}

/// Fields supplied when provisioning an application
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewApplication {
    pub name: String,
    pub redirect_uri: Option<String>,
}

/// An OAuth2 credential belonging to exactly one application
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Credential {
    pub id: String,
    pub consumer_id: String,
    /// Hex encoded SHA-256 digest of the client secret
    pub secret_digest: String,
    /// Granted scopes, in grant order
    pub scopes: Vec<String>,
    pub is_active: bool,
}

impl Credential {
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|granted| granted == scope)
    }
}

/// Options for a new credential
#[derive(Debug, Clone, Default)]
pub struct NewCredential {
    /// Client secret; a random one is generated when absent
    pub secret: Option<String>,
    pub scopes: Vec<String>,
}

/// A freshly created credential together with its plaintext secret.
///
/// The plaintext is only available at creation time.
#[derive(Debug, Clone)]
pub struct IssuedCredential {
    pub credential: Credential,
    pub secret: String,
}
