//! WireGuard key material
//!
//! Keys are Curve25519 scalars/points, carried base64-encoded the way
//! `wg genkey` / `wg pubkey` print them.

use crate::{Error, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use rand::RngCore;
use x25519_dalek::{PublicKey, StaticSecret};

/// WireGuard key pair, both halves base64
#[derive(Clone)]
pub struct WgKeyPair {
    pub private_key: String,
    pub public_key: String,
}

impl WgKeyPair {
    /// Generate a fresh key pair
    pub fn generate() -> Self {
        let mut private_key_bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut private_key_bytes);

        // curve25519 clamping
        private_key_bytes[0] &= 248;
        private_key_bytes[31] &= 127;
        private_key_bytes[31] |= 64;

        let secret = StaticSecret::from(private_key_bytes);
        let public = PublicKey::from(&secret);

        Self {
            private_key: STANDARD.encode(private_key_bytes),
            public_key: STANDARD.encode(public.as_bytes()),
        }
    }

    /// Rebuild a key pair from a base64 private key
    pub fn from_private_key(private_key: &str) -> Result<Self> {
        let bytes = decode_key(private_key)?;
        let secret = StaticSecret::from(bytes);
        let public = PublicKey::from(&secret);
        Ok(Self {
            private_key: private_key.to_string(),
            public_key: STANDARD.encode(public.as_bytes()),
        })
    }
}

impl std::fmt::Debug for WgKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WgKeyPair")
            .field("public_key", &self.public_key)
            .finish()
    }
}

/// Decode a base64 WireGuard key into its 32 raw bytes
pub fn decode_key(key: &str) -> Result<[u8; 32]> {
    let raw = STANDARD
        .decode(key.trim())
        .map_err(|e| Error::Crypto(format!("invalid key encoding: {}", e)))?;
    raw.try_into()
        .map_err(|_| Error::Crypto("Invalid key length".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keypair_generation() {
        let kp = WgKeyPair::generate();
        assert_eq!(kp.private_key.len(), 44);
        assert_eq!(kp.public_key.len(), 44);
        assert_ne!(kp.private_key, kp.public_key);
        assert_ne!(kp.public_key, WgKeyPair::generate().public_key);
    }

    #[test]
    fn test_public_key_derivation_is_stable() {
        let kp = WgKeyPair::generate();
        let again = WgKeyPair::from_private_key(&kp.private_key).unwrap();
        assert_eq!(again.public_key, kp.public_key);
    }

    #[test]
    fn test_bad_keys_rejected() {
        assert!(decode_key("not base64!").is_err());
        assert!(decode_key(&STANDARD.encode([1u8; 16])).is_err());
    }
}
