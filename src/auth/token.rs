//! Token generation and digesting
//!
//! This module provides functions for generating raw token secrets and the
//! digests that are stored in their place.
//! Secrets are 48 bytes from the OS random source encoded as 64 characters of
//! URL-safe Base64. Digests are HMAC-SHA256 hex strings.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// HMAC key used for token digests
///
/// This is a fixed label that binds digests to their purpose. It is not a
/// secret and is never rotated; unguessability comes from the secret alone.
pub const DIGEST_KEY: &str = "API Key body";

/// Number of random bytes in a raw secret
const SECRET_RANDOM_BYTES: usize = 48;

/// Length of an encoded raw secret
pub const SECRET_LENGTH: usize = 64;

/// Generate a new raw token secret
///
/// The raw secret should be handed to the client once and never stored or logged.
///
/// # Example
///
/// ```
/// use device_tokens::auth::token::{generate_secret, SECRET_LENGTH};
///
/// let secret = generate_secret();
/// assert_eq!(secret.len(), SECRET_LENGTH);
/// ```
pub fn generate_secret() -> String {
    let mut random_bytes = [0u8; SECRET_RANDOM_BYTES];
    OsRng.fill_bytes(&mut random_bytes);
    URL_SAFE_NO_PAD.encode(random_bytes)
}

/// Generate a unique identifier for a stored token
pub fn generate_token_id() -> String {
    let mut id_bytes = [0u8; 16];
    OsRng.fill_bytes(&mut id_bytes);
    URL_SAFE_NO_PAD.encode(id_bytes)
}

/// Compute the stored digest of a raw secret
///
/// # Example
///
/// ```
/// use device_tokens::auth::token::digest_secret;
///
/// let digest = digest_secret("secret");
/// assert_eq!(digest.len(), 64);
/// assert_eq!(digest, digest_secret("secret"));
/// ```
pub fn digest_secret(secret: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(DIGEST_KEY.as_bytes())
        .expect("HMAC-SHA256 accepts keys of any length");
    mac.update(secret.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}
