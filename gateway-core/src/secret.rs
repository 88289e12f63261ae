//! Client secret hashing, verification and random identifier generation

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::Rng;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Hex encoded SHA-256 digest of a client secret
pub fn digest(secret: &str) -> String {
    format!("{:x}", Sha256::digest(secret.as_bytes()))
}

/// Compares a presented secret against a stored digest in constant time.
///
/// Both sides are hashed to a fixed length first so the comparison does not
/// leak the length of the stored secret.
pub fn verify(presented: &str, stored_digest: &str) -> bool {
    let presented = digest(presented);
    presented.as_bytes().ct_eq(stored_digest.as_bytes()).into()
}

/// Random URL-safe identifier with 128 bits of entropy
pub fn generate_id() -> String {
    random_urlsafe(16)
}

/// Random URL-safe client secret with 256 bits of entropy
pub fn generate_secret() -> String {
    random_urlsafe(32)
}

fn random_urlsafe(len: usize) -> String {
    let mut rng = rand::thread_rng();
    let bytes: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
    URL_SAFE_NO_PAD.encode(bytes)
}
