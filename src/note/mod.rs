//! Note model
//!
//! A note is a Markdown document with optional at-rest encryption.
//! Dirty tracking compares `updated_at` against `last_saved_at`; the
//! auto-save engine only writes notes where `is_modified()` holds.

use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Maximum allowed title length in characters
pub const MAX_TITLE_LEN: usize = 200;

/// How an encrypted note is unlocked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncryptionType {
    Password,
    Biometric,
    Both,
}

impl EncryptionType {
    pub fn includes_biometric(&self) -> bool {
        matches!(self, EncryptionType::Biometric | EncryptionType::Both)
    }

    pub fn includes_password(&self) -> bool {
        matches!(self, EncryptionType::Password | EncryptionType::Both)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EncryptionType::Password => "password",
            EncryptionType::Biometric => "biometric",
            EncryptionType::Both => "both",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "password" => Some(EncryptionType::Password),
            "biometric" => Some(EncryptionType::Biometric),
            "both" => Some(EncryptionType::Both),
            _ => None,
        }
    }
}

/// A Markdown note with encryption metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Note {
    pub id: String,
    pub title: String,
    pub content: String,
    /// Path relative to the vault root
    pub file_path: String,
    pub is_encrypted: bool,
    pub encryption_type: Option<EncryptionType>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_saved_at: Option<DateTime<Utc>>,
}

impl Note {
    /// Create a new unsaved, unencrypted note.
    pub fn new(title: impl Into<String>, content: impl Into<String>, file_path: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: generate_id(),
            title: title.into(),
            content: content.into(),
            file_path: file_path.into(),
            is_encrypted: false,
            encryption_type: None,
            created_at: now,
            updated_at: now,
            last_saved_at: None,
        }
    }

    /// Replace the content and stamp the modification time.
    pub fn update_content(&mut self, content: impl Into<String>) {
        self.content = content.into();
        self.updated_at = Utc::now();
    }

    /// Mark the note as flushed to disk. Call only after a successful write.
    pub fn mark_saved(&mut self) {
        self.last_saved_at = Some(Utc::now());
    }

    /// Mark edits up to `as_of` as flushed. Writers that snapshot the
    /// content before a slow save pass the snapshot's `updated_at` so
    /// an edit made while the save was in flight stays dirty.
    pub fn mark_saved_as_of(&mut self, as_of: DateTime<Utc>) {
        self.last_saved_at = Some(as_of);
    }

    /// Whether the note has edits newer than the last successful save.
    /// A never-saved note counts as modified.
    pub fn is_modified(&self) -> bool {
        match self.last_saved_at {
            Some(saved) => self.updated_at > saved,
            None => true,
        }
    }

    /// Enable encryption for this note.
    pub fn set_encryption(&mut self, encryption_type: EncryptionType) {
        self.is_encrypted = true;
        self.encryption_type = Some(encryption_type);
        self.updated_at = Utc::now();
    }

    /// Basic invariant checks used before persisting.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.title.is_empty() || self.title.chars().count() > MAX_TITLE_LEN {
            return Err(crate::error::AppError::Validation(format!(
                "title must be 1-{MAX_TITLE_LEN} characters"
            )));
        }
        if self.is_encrypted && self.encryption_type.is_none() {
            return Err(crate::error::AppError::Validation(
                "encrypted note must declare an encryption type".into(),
            ));
        }
        Ok(())
    }
}

const ID_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const ID_SUFFIX_LEN: usize = 8;

/// Generate a timestamp-prefixed unique id, e.g. `20260830121530-kD3xQz7a`.
/// The random suffix comes from the OS CSPRNG.
pub fn generate_id() -> String {
    let stamp = Utc::now().format("%Y%m%d%H%M%S");
    let mut rng = OsRng;
    let suffix: String = (0..ID_SUFFIX_LEN)
        .map(|_| ID_CHARSET[rng.gen_range(0..ID_CHARSET.len())] as char)
        .collect();
    format!("{stamp}-{suffix}")
}
