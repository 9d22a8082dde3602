//! On-disk encrypted envelope codec
//!
//! The envelope is a self-describing JSON record with base64 binary
//! fields. The checksum covers every preceding field and is verified
//! (constant-time) before any decryption is attempted, so a truncated or
//! tampered file is reported as an integrity failure rather than a wrong
//! password.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};

use super::primitives::{self, NONCE_SIZE};
use super::Algorithm;
use crate::error::{AppError, Result};
use crate::note::EncryptionType;

/// Current envelope format version
pub const ENVELOPE_VERSION: u8 = 1;

/// Minimum accepted salt length in bytes
pub const MIN_SALT_SIZE: usize = 16;

/// Floor for the KDF iteration count carried in the envelope
pub const MIN_KDF_ITERATIONS: u32 = 100_000;

/// The on-disk envelope record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub version: u8,
    pub algorithm: Algorithm,
    pub auth_type: EncryptionType,
    /// PBKDF2 iteration count used for this envelope's key
    pub kdf_iterations: u32,
    /// Base64 salt, at least 16 bytes
    pub salt: String,
    /// Base64 nonce, 12 bytes
    pub nonce: String,
    /// Base64 ciphertext with the 16-byte tag appended
    pub data: String,
    /// Base64 SHA-256 over all prior fields
    pub checksum: String,
}

/// Decoded binary fields of a verified envelope
#[derive(Debug)]
pub struct EnvelopeParts {
    pub salt: Vec<u8>,
    pub nonce: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

impl Envelope {
    /// Assemble an envelope, computing the checksum last.
    pub fn new(
        algorithm: Algorithm,
        auth_type: EncryptionType,
        kdf_iterations: u32,
        salt: &[u8],
        nonce: &[u8; NONCE_SIZE],
        ciphertext: &[u8],
    ) -> Self {
        let checksum = primitives::envelope_checksum(
            ENVELOPE_VERSION,
            kdf_iterations,
            algorithm,
            auth_type,
            salt,
            nonce,
            ciphertext,
        );
        Self {
            version: ENVELOPE_VERSION,
            algorithm,
            auth_type,
            kdf_iterations,
            salt: BASE64.encode(salt),
            nonce: BASE64.encode(nonce),
            data: BASE64.encode(ciphertext),
            checksum: BASE64.encode(checksum),
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self).map_err(Into::into)
    }

    /// Parse envelope bytes. Unknown algorithm or auth_type values fail
    /// serde and surface as validation errors.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Err(AppError::Validation("envelope is empty".into()));
        }
        let envelope: Envelope = serde_json::from_slice(bytes)?;
        if envelope.version != ENVELOPE_VERSION {
            return Err(AppError::Validation(format!(
                "unsupported envelope version: {}",
                envelope.version
            )));
        }
        if envelope.kdf_iterations < MIN_KDF_ITERATIONS {
            return Err(AppError::Validation(format!(
                "KDF iteration count below minimum: {}",
                envelope.kdf_iterations
            )));
        }
        Ok(envelope)
    }

    /// Quick sniff for envelope content without a full parse.
    pub fn looks_like_envelope(bytes: &[u8]) -> bool {
        let Ok(text) = std::str::from_utf8(bytes) else {
            return false;
        };
        text.trim_start().starts_with('{')
            && text.contains("\"checksum\"")
            && text.contains("\"auth_type\"")
    }

    /// Decode the binary fields and verify the checksum. Returns the
    /// parts only when the envelope is intact.
    pub fn verify(&self) -> Result<EnvelopeParts> {
        let salt = BASE64.decode(&self.salt)?;
        let nonce = BASE64.decode(&self.nonce)?;
        let ciphertext = BASE64.decode(&self.data)?;
        let expected = BASE64.decode(&self.checksum)?;

        if salt.len() < MIN_SALT_SIZE {
            return Err(AppError::Validation(format!(
                "salt must be at least {MIN_SALT_SIZE} bytes"
            )));
        }
        if nonce.len() != NONCE_SIZE {
            return Err(AppError::Validation(format!(
                "nonce must be {NONCE_SIZE} bytes"
            )));
        }

        let actual = primitives::envelope_checksum(
            self.version,
            self.kdf_iterations,
            self.algorithm,
            self.auth_type,
            &salt,
            &nonce,
            &ciphertext,
        );
        if !primitives::ct_eq(&actual, &expected) {
            return Err(AppError::IntegrityError(
                "envelope checksum mismatch".into(),
            ));
        }

        Ok(EnvelopeParts {
            salt,
            nonce,
            ciphertext,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::primitives::{derive_key, generate_salt, seal, KDF_ITERATIONS};

    fn sample(algorithm: Algorithm) -> Envelope {
        let salt = generate_salt();
        let key = derive_key(b"Str0ng!Pass", &salt, 1_000);
        let (ciphertext, nonce) = seal(algorithm, &key, b"# Hello\n").unwrap();
        Envelope::new(
            algorithm,
            EncryptionType::Password,
            KDF_ITERATIONS,
            &salt,
            &nonce,
            &ciphertext,
        )
    }

    #[test]
    fn test_json_roundtrip_preserves_fields() {
        let envelope = sample(Algorithm::Aes256Gcm);
        let bytes = envelope.to_json().unwrap();
        let parsed = Envelope::from_json(&bytes).unwrap();
        assert_eq!(parsed.version, ENVELOPE_VERSION);
        assert_eq!(parsed.algorithm, Algorithm::Aes256Gcm);
        assert_eq!(parsed.auth_type, EncryptionType::Password);
        assert_eq!(parsed.salt, envelope.salt);
        parsed.verify().unwrap();
    }

    #[test]
    fn test_wire_field_names() {
        let envelope = sample(Algorithm::ChaCha20Poly1305);
        let bytes = envelope.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["version"], 1);
        assert_eq!(value["algorithm"], "chacha20-poly1305");
        assert_eq!(value["auth_type"], "password");
        assert!(value["salt"].is_string());
        assert!(value["nonce"].is_string());
        assert!(value["data"].is_string());
        assert!(value["checksum"].is_string());
    }

    #[test]
    fn test_rejects_unknown_algorithm() {
        let mut value: serde_json::Value =
            serde_json::from_slice(&sample(Algorithm::Aes256Gcm).to_json().unwrap()).unwrap();
        value["algorithm"] = "rot13".into();
        let err = Envelope::from_json(value.to_string().as_bytes()).unwrap_err();
        assert_eq!(err.code(), "VALIDATION_FAILED");
    }

    #[test]
    fn test_rejects_unsupported_version() {
        let mut value: serde_json::Value =
            serde_json::from_slice(&sample(Algorithm::Aes256Gcm).to_json().unwrap()).unwrap();
        value["version"] = 9.into();
        let err = Envelope::from_json(value.to_string().as_bytes()).unwrap_err();
        assert_eq!(err.code(), "VALIDATION_FAILED");
    }

    #[test]
    fn test_rejects_low_iteration_count() {
        let mut value: serde_json::Value =
            serde_json::from_slice(&sample(Algorithm::Aes256Gcm).to_json().unwrap()).unwrap();
        value["kdf_iterations"] = 1_000.into();
        let err = Envelope::from_json(value.to_string().as_bytes()).unwrap_err();
        assert_eq!(err.code(), "VALIDATION_FAILED");
    }

    #[test]
    fn test_tampered_ciphertext_is_integrity_error() {
        let mut envelope = sample(Algorithm::Aes256Gcm);
        let mut raw = BASE64.decode(&envelope.data).unwrap();
        raw[0] ^= 0x01;
        envelope.data = BASE64.encode(&raw);
        let err = envelope.verify().unwrap_err();
        assert_eq!(err.code(), "INTEGRITY_ERROR");
    }

    #[test]
    fn test_tampered_salt_and_nonce_are_integrity_errors() {
        for field in ["salt", "nonce"] {
            let envelope = sample(Algorithm::ChaCha20Poly1305);
            let mut value: serde_json::Value =
                serde_json::from_slice(&envelope.to_json().unwrap()).unwrap();
            let mut raw = BASE64
                .decode(value[field].as_str().unwrap())
                .unwrap();
            raw[0] ^= 0x80;
            value[field] = BASE64.encode(&raw).into();
            let parsed = Envelope::from_json(value.to_string().as_bytes()).unwrap();
            let err = parsed.verify().unwrap_err();
            assert_eq!(err.code(), "INTEGRITY_ERROR", "field: {field}");
        }
    }

    #[test]
    fn test_envelope_sniffing() {
        let envelope = sample(Algorithm::Aes256Gcm);
        assert!(Envelope::looks_like_envelope(&envelope.to_json().unwrap()));
        assert!(!Envelope::looks_like_envelope(b"# Just Markdown\n"));
        assert!(!Envelope::looks_like_envelope(b"{\"id\": \"note\"}"));
        assert!(!Envelope::looks_like_envelope(&[0xff, 0xfe]));
    }
}
