use crate::models::{
    Application, Credential, IssuedCredential, NewApplication, NewCredential, NewUser, User,
};
use crate::secret;
use async_trait::async_trait;
use log::debug;
use thiserror::Error;

pub mod memory;
pub mod redis;

/// Errors that can occur during credential store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    #[error("Failed to serialize record: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("User not found: {0}")]
    UserNotFound(String),
    #[error("Application not found: {0}")]
    ApplicationNotFound(String),
    #[error("Credential not found: {0}")]
    CredentialNotFound(String),
    #[error("Scope is not registered: {0}")]
    UnknownScope(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

impl StoreError {
    /// Whether the failure came from the backend rather than the request, so an
    /// idempotent read may be retried
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Persistence interface for scopes, consumers and OAuth2 credentials.
///
/// Implementations must be thread-safe and cheap to clone so a single store can
/// be shared by every request handler.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Registers scope names in the global scope registry
    async fn insert_scopes(&self, scopes: &[String]) -> Result<(), StoreError>;

    /// Returns every registered scope
    async fn scopes(&self) -> Result<Vec<String>, StoreError>;

    async fn insert_user(&self, user: NewUser) -> Result<User, StoreError>;

    async fn find_user(&self, id: &str) -> Result<Option<User>, StoreError>;

    /// Creates an application owned by the given user
    async fn insert_application(
        &self,
        owner_id: &str,
        application: NewApplication,
    ) -> Result<Application, StoreError>;

    async fn find_application(&self, id: &str) -> Result<Option<Application>, StoreError>;

    /// Creates an OAuth2 credential for an application
    async fn insert_credential(
        &self,
        consumer_id: &str,
        credential: NewCredential,
    ) -> Result<IssuedCredential, StoreError>;

    async fn lookup_credential(&self, id: &str) -> Result<Option<Credential>, StoreError>;

    /// Grants additional registered scopes to a credential, keeping grant order
    async fn add_scopes_to_credential(
        &self,
        id: &str,
        scopes: &[String],
    ) -> Result<Credential, StoreError>;

    async fn set_credential_active(&self, id: &str, active: bool) -> Result<(), StoreError>;

    /// Checks connectivity to the backend
    async fn health_check(&self) -> Result<(), String>;

    /// Returns the credential when it exists, is active and `secret` matches.
    async fn verify_client(
        &self,
        id: &str,
        secret: &str,
    ) -> Result<Option<Credential>, StoreError> {
        let credential = match self.lookup_credential(id).await? {
            Some(credential) => credential,
            None => {
                // Spend the same hashing work as a real comparison
                let _ = secret::verify(secret, &secret::digest(id));
                debug!("Credential '{}' not found", id);
                return Ok(None);
            }
        };

        if !secret::verify(secret, &credential.secret_digest) {
            debug!("Secret mismatch for credential '{}'", id);
            return Ok(None);
        }

        if !credential.is_active {
            debug!("Credential '{}' is disabled", id);
            return Ok(None);
        }

        Ok(Some(credential))
    }

    /// Scopes granted to a credential, in grant order
    async fn granted_scopes(&self, id: &str) -> Result<Vec<String>, StoreError> {
        self.lookup_credential(id)
            .await?
            .map(|credential| credential.scopes)
            .ok_or_else(|| StoreError::CredentialNotFound(id.to_string()))
    }

    /// Whether a credential still exists, is active and belongs to an active
    /// consumer with the given id
    async fn is_credential_live(
        &self,
        credential_id: &str,
        consumer_id: &str,
    ) -> Result<bool, StoreError> {
        match self.lookup_credential(credential_id).await? {
            Some(credential) if credential.is_active && credential.consumer_id == consumer_id => {}
            _ => return Ok(false),
        }
        Ok(self.resolve_owner(credential_id).await?.as_deref() == Some(consumer_id))
    }

    /// Resolves the consumer that owns a credential.
    ///
    /// Returns `None` when the owning application or its user is missing or
    /// inactive.
    async fn resolve_owner(&self, credential_id: &str) -> Result<Option<String>, StoreError> {
        let credential = match self.lookup_credential(credential_id).await? {
            Some(credential) => credential,
            None => return Ok(None),
        };

        let application = match self.find_application(&credential.consumer_id).await? {
            Some(application) if application.is_active => application,
            _ => {
                debug!(
                    "Application '{}' for credential '{}' is missing or inactive",
                    credential.consumer_id, credential_id
                );
                return Ok(None);
            }
        };

        match self.find_user(&application.owner_id).await? {
            Some(user) if user.is_active => Ok(Some(application.id)),
            _ => {
                debug!(
                    "Owner '{}' of application '{}' is missing or inactive",
                    application.owner_id, application.id
                );
                Ok(None)
            }
        }
    }
}

/// Credential store with a uniform interface regardless of backend.
///
/// The concrete backend is chosen at startup from configuration.
#[derive(Clone)]
pub enum Store {
    /// Process-local store, lost on restart
    InMemory(memory::InMemoryStore),
    /// Redis-backed store shared between gateway instances
    Redis(redis::RedisStore),
}

impl Store {
    pub fn in_memory() -> Self {
        Self::InMemory(memory::InMemoryStore::new())
    }

    pub async fn redis(url: &str) -> Result<Self, StoreError> {
        if url.is_empty() {
            return Err(StoreError::Config(
                "Redis URL is required for the Redis store".to_string(),
            ));
        }
        let store = redis::RedisStore::new(url).await.map_err(StoreError::Config)?;
        Ok(Self::Redis(store))
    }
}

#[async_trait]
impl CredentialStore for Store {
    async fn insert_scopes(&self, scopes: &[String]) -> Result<(), StoreError> {
        match self {
            Self::InMemory(store) => store.insert_scopes(scopes).await,
            Self::Redis(store) => store.insert_scopes(scopes).await,
        }
    }

    async fn scopes(&self) -> Result<Vec<String>, StoreError> {
        match self {
            Self::InMemory(store) => store.scopes().await,
            Self::Redis(store) => store.scopes().await,
        }
    }

    async fn insert_user(&self, user: NewUser) -> Result<User, StoreError> {
        match self {
            Self::InMemory(store) => store.insert_user(user).await,
            Self::Redis(store) => store.insert_user(user).await,
        }
    }

    async fn find_user(&self, id: &str) -> Result<Option<User>, StoreError> {
        match self {
            Self::InMemory(store) => store.find_user(id).await,
            Self::Redis(store) => store.find_user(id).await,
        }
    }

    async fn insert_application(
        &self,
        owner_id: &str,
        application: NewApplication,
    ) -> Result<Application, StoreError> {
        match self {
            Self::InMemory(store) => store.insert_application(owner_id, application).await,
            Self::Redis(store) => store.insert_application(owner_id, application).await,
        }
    }

    async fn find_application(&self, id: &str) -> Result<Option<Application>, StoreError> {
        match self {
            Self::InMemory(store) => store.find_application(id).await,
            Self::Redis(store) => store.find_application(id).await,
        }
    }

    async fn insert_credential(
        &self,
        consumer_id: &str,
        credential: NewCredential,
    ) -> Result<IssuedCredential, StoreError> {
        match self {
            Self::InMemory(store) => store.insert_credential(consumer_id, credential).await,
            Self::Redis(store) => store.insert_credential(consumer_id, credential).await,
        }
    }

    async fn lookup_credential(&self, id: &str) -> Result<Option<Credential>, StoreError> {
        match self {
            Self::InMemory(store) => store.lookup_credential(id).await,
            Self::Redis(store) => store.lookup_credential(id).await,
        }
    }

    async fn add_scopes_to_credential(
        &self,
        id: &str,
        scopes: &[String],
    ) -> Result<Credential, StoreError> {
        match self {
            Self::InMemory(store) => store.add_scopes_to_credential(id, scopes).await,
            Self::Redis(store) => store.add_scopes_to_credential(id, scopes).await,
        }
    }

    async fn set_credential_active(&self, id: &str, active: bool) -> Result<(), StoreError> {
        match self {
            Self::InMemory(store) => store.set_credential_active(id, active).await,
            Self::Redis(store) => store.set_credential_active(id, active).await,
        }
    }

    async fn health_check(&self) -> Result<(), String> {
        match self {
            Self::InMemory(store) => store.health_check().await,
            Self::Redis(store) => store.health_check().await,
        }
    }
}

/// Appends `additional` to `granted`, skipping scopes already present.
pub(crate) fn merge_scopes(granted: &mut Vec<String>, additional: &[String]) {
    for scope in additional {
        if !granted.contains(scope) {
            granted.push(scope.clone());
        }
    }
}
