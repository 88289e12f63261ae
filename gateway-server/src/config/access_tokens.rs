//! Access token configuration

use super::ConfigError;
use confique::Config;
use gateway_core::issuer::{IssuerSettings, MAX_TTL};
use gateway_core::token::{is_hmac, parse_algorithm, Algorithm};
use gateway_core::{SigningKey, TokenCodec};

/// Settings used to sign issued tokens and, unless a policy overrides them,
/// to verify tokens presented to protected routes
#[derive(Debug, Config, Clone)]
pub struct AccessTokensConfig {
    /// Signing algorithm, e.g. HS256 or RS256 (default: HS256)
    #[config(env = "GATEWAY_ACCESS_TOKENS_ALGORITHM", default = "HS256")]
    pub algorithm: String,

    /// Shared secret for the HMAC algorithms
    #[config(env = "GATEWAY_ACCESS_TOKENS_SECRET")]
    pub secret: Option<String>,

    /// PEM private key used to sign tokens with RSA/ECDSA algorithms
    #[config(env = "GATEWAY_ACCESS_TOKENS_PRIVATE_KEY_FILE")]
    pub private_key_file: Option<String>,

    /// PEM public key used to verify tokens with RSA/ECDSA algorithms
    #[config(env = "GATEWAY_ACCESS_TOKENS_PUBLIC_KEY_FILE")]
    pub public_key_file: Option<String>,

    /// `iss` claim of issued tokens (default: "gateway")
    #[config(env = "GATEWAY_ACCESS_TOKENS_ISSUER", default = "gateway")]
    pub issuer: String,

    /// `aud` claim of issued tokens (default: "gateway")
    #[config(env = "GATEWAY_ACCESS_TOKENS_AUDIENCE", default = "gateway")]
    pub audience: String,

    /// Fixed `sub` claim; the consumer id is used when unset
    #[config(env = "GATEWAY_ACCESS_TOKENS_SUBJECT")]
    pub subject: Option<String>,

    /// Token lifetime in seconds (default: 3600 = 1 hour)
    #[config(env = "GATEWAY_ACCESS_TOKENS_TTL", default = 3600)]
    pub ttl: u64,
}

impl AccessTokensConfig {
    /// Builds the codec used to sign and verify tokens
    pub fn codec(&self) -> Result<TokenCodec, ConfigError> {
        let algorithm = parse_algorithm(&self.algorithm)?;
        let key = signing_key(
            algorithm,
            self.secret.as_deref(),
            self.private_key_file.as_deref(),
            self.public_key_file.as_deref(),
        )?;
        Ok(TokenCodec::new(algorithm, &key)?)
    }

    pub fn issuer_settings(&self) -> Result<IssuerSettings, ConfigError> {
        if self.ttl == 0 || self.ttl > MAX_TTL {
            return Err(ConfigError::InvalidTtl {
                ttl: self.ttl,
                max: MAX_TTL,
            });
        }
        Ok(IssuerSettings {
            issuer: self.issuer.clone(),
            audience: self.audience.clone(),
            subject: self.subject.clone(),
            ttl: self.ttl,
        })
    }
}

/// Resolves key material for an algorithm from an inline secret or PEM files.
///
/// HMAC algorithms need `secret`. The asymmetric ones need `public_key_file`;
/// `private_key_file` is only required to sign.
pub fn signing_key(
    algorithm: Algorithm,
    secret: Option<&str>,
    private_key_file: Option<&str>,
    public_key_file: Option<&str>,
) -> Result<SigningKey, ConfigError> {
    if is_hmac(algorithm) {
        return match secret {
            Some(secret) if !secret.is_empty() => Ok(SigningKey::Secret(secret.to_string())),
            _ => Err(ConfigError::MissingKey(format!(
                "algorithm {algorithm:?} requires a secret"
            ))),
        };
    }

    let public_key_file = public_key_file.ok_or_else(|| {
        ConfigError::MissingKey(format!("algorithm {algorithm:?} requires a public key file"))
    })?;
    Ok(SigningKey::Pem {
        private_key: private_key_file.map(read_key_file).transpose()?,
        public_key: read_key_file(public_key_file)?,
    })
}

fn read_key_file(path: &str) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::KeyFile {
        path: path.to_string(),
        source,
    })
}
