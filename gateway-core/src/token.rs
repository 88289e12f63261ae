//! Signed JWT access tokens
//!
//! Tokens carry the registered claims (`iss`, `aud`, `sub`, `iat`, `exp`) plus
//! the consumer id and the ordered list of granted scopes. Verification checks,
//! in order: signature, issuer, audience, expiry. The first failing check
//! decides the error.

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

pub use jsonwebtoken::Algorithm;

/// Errors produced while signing or verifying tokens
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TokenError {
    #[error("Token signature is invalid")]
    BadSignature,
    #[error("Token issuer does not match")]
    IssuerMismatch,
    #[error("Token audience does not match")]
    AudienceMismatch,
    #[error("Token has expired")]
    Expired,
    #[error("Token is malformed: {0}")]
    Malformed(String),
    #[error("Invalid key material: {0}")]
    Key(String),
    #[error("Token signing failed: {0}")]
    Signing(String),
}

/// Claims embedded in every access token
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccessTokenClaims {
    pub iss: String,
    pub aud: Audience,
    pub sub: String,
    pub iat: u64,
    pub exp: u64,
    #[serde(rename = "consumerId")]
    pub consumer_id: String,
    pub scopes: Vec<String>,
    /// Credential the token was issued to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

/// The `aud` claim, which RFC 7519 allows as a single string or an array
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Audience {
    pub fn contains(&self, audience: &str) -> bool {
        match self {
            Self::One(aud) => aud == audience,
            Self::Many(auds) => auds.iter().any(|aud| aud == audience),
        }
    }
}

impl From<String> for Audience {
    fn from(audience: String) -> Self {
        Self::One(audience)
    }
}

impl From<&str> for Audience {
    fn from(audience: &str) -> Self {
        Self::One(audience.to_string())
    }
}

/// Space separated, like the `scope` parameter
impl fmt::Display for Audience {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::One(aud) => f.write_str(aud),
            Self::Many(auds) => f.write_str(&auds.join(" ")),
        }
    }
}

/// Key material for signing and verifying tokens
#[derive(Clone)]
pub enum SigningKey {
    /// Shared secret for the HMAC algorithms
    Secret(String),
    /// PEM encoded keys for RSA and ECDSA. A verifier only needs the public key.
    Pem {
        private_key: Option<String>,
        public_key: String,
    },
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Secret(_) => f.write_str("SigningKey::Secret(<redacted>)"),
            Self::Pem { private_key, .. } => f
                .debug_struct("SigningKey::Pem")
                .field("has_private_key", &private_key.is_some())
                .finish(),
        }
    }
}

/// Seconds since the Unix epoch
pub fn now_epoch_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Parses an algorithm name such as `HS256` or `RS256`
pub fn parse_algorithm(name: &str) -> Result<Algorithm, TokenError> {
    Algorithm::from_str(&name.to_ascii_uppercase())
        .map_err(|_| TokenError::Key(format!("unsupported algorithm '{name}'")))
}

/// Whether the algorithm signs with a shared secret
pub fn is_hmac(algorithm: Algorithm) -> bool {
    matches!(
        algorithm,
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512
    )
}

/// Stateless JWT encoder/decoder bound to one algorithm and key
#[derive(Clone)]
pub struct TokenCodec {
    algorithm: Algorithm,
    encoding_key: Option<EncodingKey>,
    decoding_key: DecodingKey,
}

impl fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCodec")
            .field("algorithm", &self.algorithm)
            .field("can_sign", &self.encoding_key.is_some())
            .finish()
    }
}

impl TokenCodec {
    pub fn new(algorithm: Algorithm, key: &SigningKey) -> Result<Self, TokenError> {
        let (encoding_key, decoding_key) = match (algorithm, key) {
            (Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512, SigningKey::Secret(secret)) => {
                if secret.is_empty() {
                    return Err(TokenError::Key("HMAC secret must not be empty".to_string()));
                }
                (
                    Some(EncodingKey::from_secret(secret.as_bytes())),
                    DecodingKey::from_secret(secret.as_bytes()),
                )
            }
            (
                Algorithm::RS256
                | Algorithm::RS384
                | Algorithm::RS512
                | Algorithm::PS256
                | Algorithm::PS384
                | Algorithm::PS512,
                SigningKey::Pem {
                    private_key,
                    public_key,
                },
            ) => (
                private_key
                    .as_ref()
                    .map(|pem| EncodingKey::from_rsa_pem(pem.as_bytes()))
                    .transpose()
                    .map_err(|e| TokenError::Key(e.to_string()))?,
                DecodingKey::from_rsa_pem(public_key.as_bytes())
                    .map_err(|e| TokenError::Key(e.to_string()))?,
            ),
            (
                Algorithm::ES256 | Algorithm::ES384,
                SigningKey::Pem {
                    private_key,
                    public_key,
                },
            ) => (
                private_key
                    .as_ref()
                    .map(|pem| EncodingKey::from_ec_pem(pem.as_bytes()))
                    .transpose()
                    .map_err(|e| TokenError::Key(e.to_string()))?,
                DecodingKey::from_ec_pem(public_key.as_bytes())
                    .map_err(|e| TokenError::Key(e.to_string()))?,
            ),
            (algorithm, _) => {
                return Err(TokenError::Key(format!(
                    "key material does not fit algorithm {algorithm:?}"
                )));
            }
        };

        Ok(Self {
            algorithm,
            encoding_key,
            decoding_key,
        })
    }

    /// HMAC codec from a shared secret
    pub fn hs256(secret: &str) -> Result<Self, TokenError> {
        Self::new(Algorithm::HS256, &SigningKey::Secret(secret.to_string()))
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Signs the claims into a compact JWT
    pub fn encode(&self, claims: &AccessTokenClaims) -> Result<String, TokenError> {
        let key = self
            .encoding_key
            .as_ref()
            .ok_or_else(|| TokenError::Key("no private key configured for signing".to_string()))?;
        encode(&Header::new(self.algorithm), claims, key)
            .map_err(|e| TokenError::Signing(e.to_string()))
    }

    /// Verifies a token against the current time
    pub fn decode(
        &self,
        token: &str,
        expected_issuer: &str,
        expected_audience: &str,
    ) -> Result<AccessTokenClaims, TokenError> {
        self.decode_at(token, expected_issuer, expected_audience, now_epoch_seconds())
    }

    /// Verifies a token as of `now` (seconds since the epoch)
    pub fn decode_at(
        &self,
        token: &str,
        expected_issuer: &str,
        expected_audience: &str,
        now: u64,
    ) -> Result<AccessTokenClaims, TokenError> {
        // Claim checks run below so each one maps to its own error
        let mut validation = Validation::new(self.algorithm);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims = HashSet::new();

        let claims = decode::<AccessTokenClaims>(token, &self.decoding_key, &validation)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => {
                    TokenError::BadSignature
                }
                _ => TokenError::Malformed(e.to_string()),
            })?
            .claims;

        if claims.iss != expected_issuer {
            debug!("Token issuer '{}' != '{}'", claims.iss, expected_issuer);
            return Err(TokenError::IssuerMismatch);
        }
        if !claims.aud.contains(expected_audience) {
            debug!("Token audience '{}' lacks '{}'", claims.aud, expected_audience);
            return Err(TokenError::AudienceMismatch);
        }
        if now >= claims.exp {
            return Err(TokenError::Expired);
        }

        Ok(claims)
    }
}
