//! Cryptographic primitives: KDF, AEAD seal/open, RNG, checksum.

use aes_gcm::Aes256Gcm;
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305,
};
use pbkdf2::pbkdf2_hmac;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::Algorithm;
use crate::error::{AppError, Result};
use crate::note::EncryptionType;

/// Salt size in bytes
pub const SALT_SIZE: usize = 32;

/// Nonce size in bytes (both AEADs use 96-bit nonces)
pub const NONCE_SIZE: usize = 12;

/// Key size in bytes
pub const KEY_SIZE: usize = 32;

/// Default PBKDF2-HMAC-SHA256 iteration count
pub const KDF_ITERATIONS: u32 = 100_000;

/// A derived 256-bit key, zeroed when dropped
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey {
    key: [u8; KEY_SIZE],
}

impl DerivedKey {
    pub fn new(key: [u8; KEY_SIZE]) -> Self {
        Self { key }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedKey")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// Generate a random salt.
pub fn generate_salt() -> [u8; SALT_SIZE] {
    let mut salt = [0u8; SALT_SIZE];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// Generate a random nonce. Fresh on every encryption; nonce reuse under
/// the same key breaks the AEAD.
pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Derive a key from a secret with PBKDF2-HMAC-SHA256.
pub fn derive_key(secret: &[u8], salt: &[u8], iterations: u32) -> DerivedKey {
    let mut key = [0u8; KEY_SIZE];
    pbkdf2_hmac::<Sha256>(secret, salt, iterations, &mut key);
    DerivedKey::new(key)
}

/// Encrypt with the given algorithm. Returns ciphertext (tag appended)
/// and the freshly generated nonce.
pub fn seal(
    algorithm: Algorithm,
    key: &DerivedKey,
    plaintext: &[u8],
) -> Result<(Vec<u8>, [u8; NONCE_SIZE])> {
    let nonce = generate_nonce();
    let ciphertext = match algorithm {
        Algorithm::Aes256Gcm => {
            let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
                .map_err(|e| AppError::CryptoFailure(format!("AES-256-GCM init: {e}")))?;
            cipher
                .encrypt(aes_gcm::Nonce::from_slice(&nonce), plaintext)
                .map_err(|e| AppError::CryptoFailure(format!("AES-256-GCM encrypt: {e}")))?
        }
        Algorithm::ChaCha20Poly1305 => {
            let cipher = ChaCha20Poly1305::new_from_slice(key.as_bytes())
                .map_err(|e| AppError::CryptoFailure(format!("ChaCha20-Poly1305 init: {e}")))?;
            cipher
                .encrypt(chacha20poly1305::Nonce::from_slice(&nonce), plaintext)
                .map_err(|e| AppError::CryptoFailure(format!("ChaCha20-Poly1305 encrypt: {e}")))?
        }
    };
    Ok((ciphertext, nonce))
}

/// Decrypt with the given algorithm. A failed authentication tag means
/// the key was wrong; callers translate that into a retry-counted
/// bad-password error.
pub fn open(
    algorithm: Algorithm,
    key: &DerivedKey,
    nonce: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>> {
    if nonce.len() != NONCE_SIZE {
        return Err(AppError::Validation(format!(
            "nonce must be {NONCE_SIZE} bytes, got {}",
            nonce.len()
        )));
    }
    match algorithm {
        Algorithm::Aes256Gcm => {
            let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
                .map_err(|e| AppError::CryptoFailure(format!("AES-256-GCM init: {e}")))?;
            cipher
                .decrypt(aes_gcm::Nonce::from_slice(nonce), ciphertext)
                .map_err(|_| AppError::BadPassword)
        }
        Algorithm::ChaCha20Poly1305 => {
            let cipher = ChaCha20Poly1305::new_from_slice(key.as_bytes())
                .map_err(|e| AppError::CryptoFailure(format!("ChaCha20-Poly1305 init: {e}")))?;
            cipher
                .decrypt(chacha20poly1305::Nonce::from_slice(nonce), ciphertext)
                .map_err(|_| AppError::BadPassword)
        }
    }
}

/// Envelope checksum: SHA-256 over all fields preceding it. Every
/// variable-width field is prefixed with its big-endian u32 length so
/// field boundaries cannot be shifted.
pub fn envelope_checksum(
    version: u8,
    kdf_iterations: u32,
    algorithm: Algorithm,
    auth_type: EncryptionType,
    salt: &[u8],
    nonce: &[u8],
    ciphertext: &[u8],
) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update([version]);
    hasher.update(kdf_iterations.to_be_bytes());
    for field in [
        algorithm.as_str().as_bytes(),
        auth_type.as_str().as_bytes(),
        salt,
        nonce,
        ciphertext,
    ] {
        hasher.update((field.len() as u32).to_be_bytes());
        hasher.update(field);
    }
    hasher.finalize().into()
}

/// Constant-time equality for secret material.
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn key() -> DerivedKey {
        derive_key(b"Str0ng!Pass", &generate_salt(), 1_000)
    }

    #[test]
    fn test_seal_open_roundtrip_both_algorithms() {
        let key = key();
        for algorithm in [Algorithm::Aes256Gcm, Algorithm::ChaCha20Poly1305] {
            let (ciphertext, nonce) = seal(algorithm, &key, b"# Hello\n").unwrap();
            let plaintext = open(algorithm, &key, &nonce, &ciphertext).unwrap();
            assert_eq!(plaintext, b"# Hello\n");
        }
    }

    #[test]
    fn test_open_with_wrong_key_is_bad_password() {
        let (ciphertext, nonce) = seal(Algorithm::Aes256Gcm, &key(), b"secret").unwrap();
        let wrong = derive_key(b"str0ng!pass", &generate_salt(), 1_000);
        let err = open(Algorithm::Aes256Gcm, &wrong, &nonce, &ciphertext).unwrap_err();
        assert_eq!(err.code(), "INVALID_PASSWORD");
    }

    #[test]
    fn test_open_with_wrong_algorithm_fails() {
        let key = key();
        let (ciphertext, nonce) = seal(Algorithm::ChaCha20Poly1305, &key, b"secret").unwrap();
        assert!(open(Algorithm::Aes256Gcm, &key, &nonce, &ciphertext).is_err());
    }

    #[test]
    fn test_tampered_ciphertext_fails_open() {
        let key = key();
        let (mut ciphertext, nonce) = seal(Algorithm::Aes256Gcm, &key, b"secret").unwrap();
        ciphertext[0] ^= 0x01;
        assert!(open(Algorithm::Aes256Gcm, &key, &nonce, &ciphertext).is_err());
    }

    #[test]
    fn test_derive_key_is_deterministic() {
        let salt = generate_salt();
        let a = derive_key(b"pw", &salt, 1_000);
        let b = derive_key(b"pw", &salt, 1_000);
        assert_eq!(a.as_bytes(), b.as_bytes());

        let c = derive_key(b"pw", &salt, 2_000);
        assert_ne!(a.as_bytes(), c.as_bytes());
    }

    #[test]
    fn test_nonce_uniqueness_sampling() {
        let nonces: HashSet<[u8; NONCE_SIZE]> = (0..1_000).map(|_| generate_nonce()).collect();
        assert_eq!(nonces.len(), 1_000);
    }

    #[test]
    fn test_checksum_changes_with_every_field() {
        let base = envelope_checksum(
            1,
            KDF_ITERATIONS,
            Algorithm::Aes256Gcm,
            EncryptionType::Password,
            b"salt",
            b"nonce",
            b"data",
        );
        let variants = [
            envelope_checksum(2, KDF_ITERATIONS, Algorithm::Aes256Gcm, EncryptionType::Password, b"salt", b"nonce", b"data"),
            envelope_checksum(1, KDF_ITERATIONS + 1, Algorithm::Aes256Gcm, EncryptionType::Password, b"salt", b"nonce", b"data"),
            envelope_checksum(1, KDF_ITERATIONS, Algorithm::ChaCha20Poly1305, EncryptionType::Password, b"salt", b"nonce", b"data"),
            envelope_checksum(1, KDF_ITERATIONS, Algorithm::Aes256Gcm, EncryptionType::Both, b"salt", b"nonce", b"data"),
            envelope_checksum(1, KDF_ITERATIONS, Algorithm::Aes256Gcm, EncryptionType::Password, b"salT", b"nonce", b"data"),
            envelope_checksum(1, KDF_ITERATIONS, Algorithm::Aes256Gcm, EncryptionType::Password, b"salt", b"noncf", b"data"),
            envelope_checksum(1, KDF_ITERATIONS, Algorithm::Aes256Gcm, EncryptionType::Password, b"salt", b"nonce", b"datb"),
        ];
        for variant in variants {
            assert_ne!(base, variant);
        }
    }

    #[test]
    fn test_checksum_length_prefix_prevents_field_shifting() {
        // Moving a byte across a field boundary must change the digest.
        let a = envelope_checksum(1, 1, Algorithm::Aes256Gcm, EncryptionType::Password, b"ab", b"c", b"d");
        let b = envelope_checksum(1, 1, Algorithm::Aes256Gcm, EncryptionType::Password, b"a", b"bc", b"d");
        assert_ne!(a, b);
    }

    #[test]
    fn test_ct_eq() {
        assert!(ct_eq(b"same", b"same"));
        assert!(!ct_eq(b"same", b"diff"));
        assert!(!ct_eq(b"same", b"longer"));
    }
}
