//! Keyed hashing used to derive stable per-profile addresses.
//!
//! The secret never leaves the provider; callers only see digests.

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use std::fmt;

type HmacSha256 = Hmac<Sha256>;

const SECRET_LEN: usize = 32;

/// Source of a stable keyed hash over profile-identifying strings.
pub trait SecretProvider: Send + Sync {
    /// Returns the keyed digest of `input`, or `None` when the key material
    /// is unavailable.
    fn keyed_hash(&self, input: &str) -> Option<Vec<u8>>;
}

/// HMAC-SHA256 provider backed by an in-process key.
#[derive(Clone)]
pub struct HmacSecretProvider {
    key: Vec<u8>,
}

impl HmacSecretProvider {
    /// Creates a provider with a freshly drawn random key.
    pub fn generate() -> Self {
        let mut key = vec![0u8; SECRET_LEN];
        rand::thread_rng().fill_bytes(&mut key);
        Self { key }
    }

    pub fn from_key(key: impl Into<Vec<u8>>) -> Self {
        Self { key: key.into() }
    }
}

impl fmt::Debug for HmacSecretProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HmacSecretProvider")
            .field("key", &"<redacted>")
            .finish()
    }
}

impl SecretProvider for HmacSecretProvider {
    fn keyed_hash(&self, input: &str) -> Option<Vec<u8>> {
        let mut mac = HmacSha256::new_from_slice(&self.key).ok()?;
        mac.update(input.as_bytes());
        Some(mac.finalize().into_bytes().to_vec())
    }
}
