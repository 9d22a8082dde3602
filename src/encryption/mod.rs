//! Encryption service
//!
//! Orchestrates the full encrypt/decrypt path for a note: password
//! records and strength enforcement, biometric-first authentication
//! with password fallback, lockout gating, integrity verification, and
//! the AEAD work itself. Keys are derived per operation and zeroized
//! on drop; nothing derived is cached.

use std::sync::Arc;

use zeroize::Zeroizing;

use crate::biometric::{AuthOutcome, BiometricGate};
use crate::crypto::envelope::Envelope;
use crate::crypto::primitives::{self, generate_salt, KDF_ITERATIONS};
use crate::crypto::Algorithm;
use crate::error::{AppError, Result};
use crate::note::EncryptionType;
use crate::password::{check_strength, PasswordVault};

/// Ties the password vault, biometric gate, and crypto layer together.
pub struct EncryptionService {
    passwords: Arc<PasswordVault>,
    biometrics: Arc<BiometricGate>,
}

/// A successfully opened envelope: the content plus the secret that
/// unlocked it. Callers that re-seal later (background saves) hold on
/// to the secret; it is zeroized when dropped.
pub struct Unsealed {
    pub content: Zeroizing<String>,
    /// The typed or biometric-released password.
    pub secret: Zeroizing<String>,
}

impl EncryptionService {
    pub fn new(passwords: Arc<PasswordVault>, biometrics: Arc<BiometricGate>) -> Self {
        Self {
            passwords,
            biometrics,
        }
    }

    /// Encrypt note content into envelope JSON.
    ///
    /// The first encryption for a note establishes its password record,
    /// which must clear the strength bar. Later encryptions must
    /// present the established password. Biometric auth types enroll
    /// the password with the platform so prompts can release it later.
    pub fn encrypt(
        &self,
        note_id: &str,
        plaintext: &str,
        auth_type: EncryptionType,
        algorithm: Algorithm,
        password: &str,
    ) -> Result<Vec<u8>> {
        match self.passwords.record(note_id)? {
            Some(record) => {
                if !PasswordVault::verify_password(password, &record)? {
                    return Err(self.count_failure(note_id)?);
                }
            }
            None => {
                let report = check_strength(password);
                if !report.is_acceptable() {
                    return Err(AppError::Validation(format!(
                        "password is too weak: {}",
                        report.suggestions.join(", ")
                    )));
                }
                self.passwords.set_password(note_id, password)?;
            }
        }

        if auth_type.includes_biometric() {
            self.biometrics.enroll(note_id, password)?;
        }

        let salt = generate_salt();
        let key = primitives::derive_key(password.as_bytes(), &salt, KDF_ITERATIONS);
        let (ciphertext, nonce) = primitives::seal(algorithm, &key, plaintext.as_bytes())?;
        let envelope = Envelope::new(
            algorithm,
            auth_type,
            KDF_ITERATIONS,
            &salt,
            &nonce,
            &ciphertext,
        );
        log::info!(
            "note {note_id}: encrypted with {} ({})",
            algorithm.as_str(),
            auth_type.as_str()
        );
        envelope.to_json()
    }

    /// Decrypt envelope JSON back into note content.
    ///
    /// Order matters: the envelope is parsed and its checksum verified
    /// before any authentication, so corruption surfaces as an
    /// integrity error and never burns a retry. The lockout gate comes
    /// next. Biometric-capable notes prompt first and fall back to the
    /// password when the prompt is cancelled or unavailable.
    pub fn decrypt(
        &self,
        note_id: &str,
        envelope_bytes: &[u8],
        password: Option<&str>,
        declared: Option<Algorithm>,
    ) -> Result<Zeroizing<String>> {
        Ok(self.unseal(note_id, envelope_bytes, password, declared)?.content)
    }

    /// Like [`decrypt`](Self::decrypt), but also returns the secret
    /// that opened the envelope. A note unlocked through the biometric
    /// prompt has no typed password, yet later saves must re-seal with
    /// the released one.
    pub fn unseal(
        &self,
        note_id: &str,
        envelope_bytes: &[u8],
        password: Option<&str>,
        declared: Option<Algorithm>,
    ) -> Result<Unsealed> {
        let envelope = Envelope::from_json(envelope_bytes)?;
        if let Some(expected) = declared {
            if envelope.algorithm != expected {
                return Err(AppError::Validation(format!(
                    "envelope uses {}, expected {}",
                    envelope.algorithm.as_str(),
                    expected.as_str()
                )));
            }
        }
        let parts = envelope.verify()?;

        if let Some(remaining) = self.passwords.remaining_lockout(note_id)? {
            return Err(AppError::LockedOut(remaining));
        }

        let secret = self.resolve_secret(note_id, &envelope, password)?;

        // Wrong passwords are caught against the stored record before
        // any AEAD work, so the failure is counted exactly once.
        if let Some(record) = self.passwords.record(note_id)? {
            if !PasswordVault::verify_password(&secret, &record)? {
                return Err(self.count_failure(note_id)?);
            }
        }

        let key = primitives::derive_key(secret.as_bytes(), &parts.salt, envelope.kdf_iterations);
        let plaintext =
            match primitives::open(envelope.algorithm, &key, &parts.nonce, &parts.ciphertext) {
                Ok(bytes) => bytes,
                Err(AppError::BadPassword) => return Err(self.count_failure(note_id)?),
                Err(other) => return Err(other),
            };

        self.passwords.reset_retries(note_id)?;
        let text = String::from_utf8(plaintext)
            .map_err(|_| AppError::CryptoFailure("decrypted content is not UTF-8".into()))?;
        Ok(Unsealed {
            content: Zeroizing::new(text),
            secret,
        })
    }

    /// Enroll an already-protected note for biometric unlock. The
    /// caller must present the note's password.
    pub fn setup_biometric(&self, note_id: &str, password: &str) -> Result<()> {
        let record = self
            .passwords
            .record(note_id)?
            .ok_or_else(|| AppError::NotFound(format!("no password set for note {note_id}")))?;
        if !PasswordVault::verify_password(password, &record)? {
            return Err(self.count_failure(note_id)?);
        }
        self.passwords.reset_retries(note_id)?;
        self.biometrics.enroll(note_id, password)
    }

    pub fn remove_biometric(&self, note_id: &str) -> Result<()> {
        self.biometrics.revoke(note_id)
    }

    pub fn is_biometric_enabled(&self, note_id: &str) -> Result<bool> {
        self.biometrics.is_enrolled(note_id)
    }

    /// Forget all key material associated with a note.
    pub fn forget_note(&self, note_id: &str) -> Result<()> {
        self.biometrics.revoke(note_id)?;
        self.passwords.remove(note_id)
    }

    /// Pick the secret for decryption: biometric release first when
    /// the envelope allows it, then the supplied password.
    fn resolve_secret(
        &self,
        note_id: &str,
        envelope: &Envelope,
        password: Option<&str>,
    ) -> Result<Zeroizing<String>> {
        if envelope.auth_type.includes_biometric() {
            match self
                .biometrics
                .authenticate(note_id, "Unlock encrypted note")?
            {
                AuthOutcome::Ok(secret) => return Ok(secret),
                AuthOutcome::UserCancel | AuthOutcome::Unavailable => {
                    if !envelope.auth_type.includes_password() && password.is_none() {
                        return Err(AppError::BiometricFailed(
                            "biometric authentication was cancelled or unavailable".into(),
                        ));
                    }
                    // fall through to the password path
                }
                AuthOutcome::Failed(reason) => {
                    if !envelope.auth_type.includes_password() && password.is_none() {
                        return Err(AppError::BiometricFailed(reason));
                    }
                    log::warn!("note {note_id}: biometric failed ({reason}), trying password");
                }
            }
        }
        match password {
            Some(p) => Ok(Zeroizing::new(p.to_string())),
            None => Err(AppError::Validation(
                "a password is required to decrypt this note".into(),
            )),
        }
    }

    /// Record a failed attempt and produce the error to surface,
    /// escalating to a lockout on the third failure.
    fn count_failure(&self, note_id: &str) -> Result<AppError> {
        match self.passwords.record_failure(note_id)? {
            Some(lockout) => Ok(AppError::LockedOut(lockout)),
            None => Ok(AppError::BadPassword),
        }
    }
}
