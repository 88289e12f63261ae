use super::{merge_scopes, CredentialStore, StoreError};
use crate::models::{
    Application, Credential, IssuedCredential, NewApplication, NewCredential, NewUser, User,
    OAUTH2_CREDENTIAL,
};
use crate::secret;
use async_trait::async_trait;
use log::{debug, error};
use redis::{aio::ConnectionManager, AsyncCommands, Client};
use serde::{de::DeserializeOwned, Serialize};

const SCOPES_KEY: &str = "scopes";

/// Replaces KEYS[1] with ARGV[2] only while it still holds ARGV[1]
const COMPARE_AND_SET: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    redis.call('SET', KEYS[1], ARGV[2])
    return 1
end
return 0
"#;

/// Attempts at an optimistic credential update before giving up
const UPDATE_ATTEMPTS: usize = 16;

fn user_key(id: &str) -> String {
    format!("user:{id}")
}

fn username_key(username: &str) -> String {
    format!("username:{username}")
}

fn application_key(id: &str) -> String {
    format!("application:{id}")
}

fn credential_key(id: &str) -> String {
    format!("credential:{OAUTH2_CREDENTIAL}:{id}")
}

fn unavailable(key: &str, err: redis::RedisError) -> StoreError {
    error!("Redis error on key {}: {}", key, err);
    StoreError::Unavailable(err.to_string())
}

/// Credential store backed by Redis; records are stored as JSON documents
#[derive(Clone)]
pub struct RedisStore {
    _client: Client,
    conn_manager: ConnectionManager,
}

impl RedisStore {
    /// Connects to Redis and verifies the connection with a PING
    pub async fn new(redis_url: &str) -> Result<Self, String> {
        let client = match Client::open(redis_url) {
            Ok(client) => client,
            Err(err) => {
                return Err(format!("Failed to connect to Redis: {}", err));
            }
        };

        let conn_manager = match ConnectionManager::new(client.clone()).await {
            Ok(manager) => manager,
            Err(err) => {
                return Err(format!(
                    "Failed to create Redis connection manager: {}",
                    err
                ));
            }
        };

        let mut conn = conn_manager.clone();
        if let Err(err) = redis::cmd("PING").query_async::<String>(&mut conn).await {
            return Err(format!("Failed to ping Redis: {}", err));
        }

        Ok(Self {
            _client: client,
            conn_manager,
        })
    }

    async fn read<T: DeserializeOwned + Send>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let mut conn = self.conn_manager.clone();
        let value: Option<String> = conn.get(key).await.map_err(|e| unavailable(key, e))?;
        match value {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn write<T: Serialize + Sync>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let json = serde_json::to_string(value)?;
        let mut conn = self.conn_manager.clone();
        conn.set::<_, _, ()>(key, json)
            .await
            .map_err(|e| unavailable(key, e))
    }

    /// Applies `change` to a stored credential atomically.
    ///
    /// The record is rewritten only if it is unchanged since it was read;
    /// otherwise the read and `change` are repeated.
    async fn update_credential<F>(&self, id: &str, mut change: F) -> Result<Credential, StoreError>
    where
        F: FnMut(&mut Credential) + Send,
    {
        let key = credential_key(id);
        let script = redis::Script::new(COMPARE_AND_SET);
        let mut conn = self.conn_manager.clone();

        for _ in 0..UPDATE_ATTEMPTS {
            let current: Option<String> = conn.get(&key).await.map_err(|e| unavailable(&key, e))?;
            let current = current.ok_or_else(|| StoreError::CredentialNotFound(id.to_string()))?;

            let mut credential: Credential = serde_json::from_str(&current)?;
            change(&mut credential);
            let updated = serde_json::to_string(&credential)?;

            let swapped: bool = script
                .key(&key)
                .arg(&current)
                .arg(&updated)
                .invoke_async(&mut conn)
                .await
                .map_err(|e| unavailable(&key, e))?;
            if swapped {
                return Ok(credential);
            }
            debug!("Credential '{}' changed during update, retrying", id);
        }

        Err(StoreError::Conflict(format!(
            "credential '{id}' kept changing during update"
        )))
    }

    async fn check_registered(&self, scopes: &[String]) -> Result<(), StoreError> {
        let mut conn = self.conn_manager.clone();
        for scope in scopes {
            let registered: bool = conn
                .sismember(SCOPES_KEY, scope)
                .await
                .map_err(|e| unavailable(SCOPES_KEY, e))?;
            if !registered {
                return Err(StoreError::UnknownScope(scope.clone()));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for RedisStore {
    async fn insert_scopes(&self, scopes: &[String]) -> Result<(), StoreError> {
        if scopes.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn_manager.clone();
        conn.sadd::<_, _, ()>(SCOPES_KEY, scopes)
            .await
            .map_err(|e| unavailable(SCOPES_KEY, e))
    }

    async fn scopes(&self) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn_manager.clone();
        let mut scopes: Vec<String> = conn
            .smembers(SCOPES_KEY)
            .await
            .map_err(|e| unavailable(SCOPES_KEY, e))?;
        scopes.sort();
        Ok(scopes)
    }

    async fn insert_user(&self, user: NewUser) -> Result<User, StoreError> {
        let id = secret::generate_id();
        let name_key = username_key(&user.username);
        let mut conn = self.conn_manager.clone();
        let claimed: bool = conn
            .set_nx(&name_key, &id)
            .await
            .map_err(|e| unavailable(&name_key, e))?;
        if !claimed {
            return Err(StoreError::Conflict(format!(
                "username '{}' already exists",
                user.username
            )));
        }

        let user = User {
            id,
            username: user.username,
            firstname: user.firstname,
            lastname: user.lastname,
            email: user.email,
            is_active: true,
        };
        self.write(&user_key(&user.id), &user).await?;
        Ok(user)
    }

    async fn find_user(&self, id: &str) -> Result<Option<User>, StoreError> {
        self.read(&user_key(id)).await
    }

    async fn insert_application(
        &self,
        owner_id: &str,
        application: NewApplication,
    ) -> Result<Application, StoreError> {
        if self.find_user(owner_id).await?.is_none() {
            return Err(StoreError::UserNotFound(owner_id.to_string()));
        }
        let application = Application {
            id: secret::generate_id(),
            name: application.name,
            redirect_uri: application.redirect_uri,
            owner_id: owner_id.to_string(),
            is_active: true,
        };
        self.write(&application_key(&application.id), &application)
            .await?;
        Ok(application)
    }

    async fn find_application(&self, id: &str) -> Result<Option<Application>, StoreError> {
        self.read(&application_key(id)).await
    }

    async fn insert_credential(
        &self,
        consumer_id: &str,
        credential: NewCredential,
    ) -> Result<IssuedCredential, StoreError> {
        if self.find_application(consumer_id).await?.is_none() {
            return Err(StoreError::ApplicationNotFound(consumer_id.to_string()));
        }
        self.check_registered(&credential.scopes).await?;

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
        self.write(&credential_key(&credential.id), &credential)
            .await?;
        Ok(IssuedCredential { credential, secret })
    }

    async fn lookup_credential(&self, id: &str) -> Result<Option<Credential>, StoreError> {
        self.read(&credential_key(id)).await
    }

    async fn add_scopes_to_credential(
        &self,
        id: &str,
        scopes: &[String],
    ) -> Result<Credential, StoreError> {
        self.check_registered(scopes).await?;
        self.update_credential(id, |credential| merge_scopes(&mut credential.scopes, scopes))
            .await
    }

    async fn set_credential_active(&self, id: &str, active: bool) -> Result<(), StoreError> {
        self.update_credential(id, |credential| credential.is_active = active)
            .await
            .map(|_| ())
    }

    async fn health_check(&self) -> Result<(), String> {
        let mut conn = self.conn_manager.clone();
        match redis::cmd("PING").query_async::<String>(&mut conn).await {
            Ok(_) => Ok(()),
            Err(err) => Err(format!("Redis health check failed: {}", err)),
        }
    }
}
