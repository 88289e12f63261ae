use super::{merge_scopes, CredentialStore, StoreError};
use crate::models::{
    Application, Credential, IssuedCredential, NewApplication, NewCredential, NewUser, User,
};
use crate::secret;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct Records {
    scopes: Vec<String>,
    users: HashMap<String, User>,
    applications: HashMap<String, Application>,
    credentials: HashMap<String, Credential>,
}

impl Records {
    fn check_registered(&self, scopes: &[String]) -> Result<(), StoreError> {
        match scopes.iter().find(|scope| !self.scopes.contains(scope)) {
            Some(unknown) => Err(StoreError::UnknownScope(unknown.clone())),
            None => Ok(()),
        }
    }
}

/// Process-local credential store
#[derive(Clone, Default)]
pub struct InMemoryStore {
    records: Arc<RwLock<Records>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for InMemoryStore {
    async fn insert_scopes(&self, scopes: &[String]) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        merge_scopes(&mut records.scopes, scopes);
        Ok(())
    }

    async fn scopes(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.records.read().await.scopes.clone())
    }

    async fn insert_user(&self, user: NewUser) -> Result<User, StoreError> {
        let mut records = self.records.write().await;
        if records.users.values().any(|u| u.username == user.username) {
            return Err(StoreError::Conflict(format!(
                "username '{}' already exists",
                user.username
            )));
        }
        let user = User {
            id: secret::generate_id(),
            username: user.username,
            firstname: user.firstname,
            lastname: user.lastname,
            email: user.email,
            is_active: true,
        };
        records.users.insert(user.id.clone(), user.clone());
        Ok(user)
    }

    async fn find_user(&self, id: &str) -> Result<Option<User>, StoreError> {
        Ok(self.records.read().await.users.get(id).cloned())
    }

    async fn insert_application(
        &self,
        owner_id: &str,
        application: NewApplication,
    ) -> Result<Application, StoreError> {
        let mut records = self.records.write().await;
        if !records.users.contains_key(owner_id) {
            return Err(StoreError::UserNotFound(owner_id.to_string()));
        }
        let application = Application {
            id: secret::generate_id(),
            name: application.name,
            redirect_uri: application.redirect_uri,
            owner_id: owner_id.to_string(),
            is_active: true,
        };
        records
            .applications
            .insert(application.id.clone(), application.clone());
        Ok(application)
    }

    async fn find_application(&self, id: &str) -> Result<Option<Application>, StoreError> {
        Ok(self.records.read().await.applications.get(id).cloned())
    }

    async fn insert_credential(
        &self,
        consumer_id: &str,
        credential: NewCredential,
    ) -> Result<IssuedCredential, StoreError> {
        let mut records = self.records.write().await;
        if !records.applications.contains_key(consumer_id) {
            return Err(StoreError::ApplicationNotFound(consumer_id.to_string()));
        }
        records.check_registered(&credential.scopes)?;

        let secret = credential.secret.unwrap_or_else(secret::generate_secret);
        let mut scopes = Vec::new();
        merge_scopes(&mut scopes, &credential.scopes);
        let credential = Credential {
            id: secret::generate_id(),
            consumer_id: consumer_id.to_string(),
            secret_digest: secret::digest(&secret),
            scopes,
            is_active: true,
        };
        records
            .credentials
            .insert(credential.id.clone(), credential.clone());
        Ok(IssuedCredential { credential, secret })
    }

    async fn lookup_credential(&self, id: &str) -> Result<Option<Credential>, StoreError> {
        Ok(self.records.read().await.credentials.get(id).cloned())
    }

    async fn add_scopes_to_credential(
        &self,
        id: &str,
        scopes: &[String],
    ) -> Result<Credential, StoreError> {
        let mut records = self.records.write().await;
        records.check_registered(scopes)?;
        let credential = records
            .credentials
            .get_mut(id)
            .ok_or_else(|| StoreError::CredentialNotFound(id.to_string()))?;
        merge_scopes(&mut credential.scopes, scopes);
        Ok(credential.clone())
    }

    async fn set_credential_active(&self, id: &str, active: bool) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        let credential = records
            .credentials
            .get_mut(id)
            .ok_or_else(|| StoreError::CredentialNotFound(id.to_string()))?;
        credential.is_active = active;
        Ok(())
    }

    async fn health_check(&self) -> Result<(), String> {
        Ok(())
    }
}
