//! # gateway-core
//!
//! Credential storage and access token primitives for the gateway.
//!
//! ## Components
//!
//! - **Store:** Scopes, consumers, applications and OAuth2 credentials, backed by
//!   memory or Redis.
//! - **Token:** Signs and verifies JWT access tokens.
//! - **Issuer:** The OAuth2 `client_credentials` grant on top of the store and
//!   the token codec.

pub mod issuer;
pub mod models;
pub mod secret;
pub mod store;
pub mod token;

pub use crate::issuer::{IssueError, IssuedToken, TokenIssuer, TokenRequest};
pub use crate::models::{Application, Credential, IssuedCredential, User};
pub use crate::store::{CredentialStore, Store, StoreError};
pub use crate::token::{AccessTokenClaims, Audience, SigningKey, TokenCodec, TokenError};
