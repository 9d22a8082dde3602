//! Cryptographic core: AEAD primitives, key derivation, and the on-disk
//! envelope codec.

use serde::{Deserialize, Serialize};

pub mod envelope;
pub mod primitives;

pub use envelope::{Envelope, EnvelopeParts, ENVELOPE_VERSION, MIN_KDF_ITERATIONS};
pub use primitives::{DerivedKey, KDF_ITERATIONS, KEY_SIZE, NONCE_SIZE, SALT_SIZE};

/// Supported AEAD algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Algorithm {
    #[serde(rename = "aes256-gcm")]
    Aes256Gcm,
    #[serde(rename = "chacha20-poly1305")]
    ChaCha20Poly1305,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Aes256Gcm => "aes256-gcm",
            Algorithm::ChaCha20Poly1305 => "chacha20-poly1305",
        }
    }

    /// Parse the short settings name ("aes256" / "chacha20") or the full
    /// envelope name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "aes256" | "aes256-gcm" => Some(Algorithm::Aes256Gcm),
            "chacha20" | "chacha20-poly1305" => Some(Algorithm::ChaCha20Poly1305),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_algorithm_names() {
        assert_eq!(Algorithm::Aes256Gcm.as_str(), "aes256-gcm");
        assert_eq!(Algorithm::ChaCha20Poly1305.as_str(), "chacha20-poly1305");
    }

    #[test]
    fn test_algorithm_parse_accepts_settings_names() {
        assert_eq!(Algorithm::parse("aes256"), Some(Algorithm::Aes256Gcm));
        assert_eq!(Algorithm::parse("chacha20"), Some(Algorithm::ChaCha20Poly1305));
        assert_eq!(Algorithm::parse("aes256-gcm"), Some(Algorithm::Aes256Gcm));
        assert_eq!(Algorithm::parse("des"), None);
    }
}
