//! Biometric gate
//!
//! Platform biometric prompts (Touch ID / Face ID) are reached through
//! the [`BiometricCapability`] trait. Enrollment hands the platform a
//! password-equivalent secret to keep behind an opaque handle; a
//! successful prompt releases that secret so the normal key derivation
//! path can run. The gate itself only persists which notes are
//! enrolled and under which handle, never secret material.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::{AppError, Result};
use crate::repository::SandboxedStore;

/// Where enrollment records live inside the vault root
pub const BIOMETRIC_RECORDS_PATH: &str = ".notebook/keys/biometric_keys.json";

/// Kind of sensor backing the prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BiometricType {
    TouchId,
    FaceId,
    Generic,
}

impl BiometricType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BiometricType::TouchId => "Touch ID",
            BiometricType::FaceId => "Face ID",
            BiometricType::Generic => "biometric",
        }
    }
}

/// Whether the platform can show a biometric prompt right now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Available(BiometricType),
    Unavailable,
}

impl Availability {
    pub fn is_available(&self) -> bool {
        matches!(self, Availability::Available(_))
    }
}

/// Result of a biometric prompt
#[derive(Debug)]
pub enum AuthOutcome {
    /// Prompt succeeded; the enrolled secret is released to the caller.
    Ok(Zeroizing<String>),
    /// The user dismissed the prompt.
    UserCancel,
    /// No sensor, or biometrics disabled at the platform level.
    Unavailable,
    /// The prompt ran and rejected the user.
    Failed(String),
}

/// Platform seam. Real backends wrap the OS keychain and prompt APIs;
/// tests use [`StaticBiometric`].
pub trait BiometricCapability: Send + Sync {
    fn availability(&self) -> Availability;

    /// Store a secret behind the platform keystore, returning an
    /// opaque handle for later prompts.
    fn enroll(&self, note_id: &str, secret: &str) -> Result<String>;

    /// Prompt the user and, on success, release the enrolled secret.
    fn authenticate(&self, handle: &str, reason: &str) -> AuthOutcome;

    /// Forget the secret behind a handle.
    fn revoke(&self, handle: &str) -> Result<()>;
}

/// Persisted enrollment for one note
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollmentRecord {
    pub handle: String,
    #[serde(rename = "type")]
    pub biometric_type: BiometricType,
    pub enrolled_at: DateTime<Utc>,
}

/// Tracks which notes are biometric-enrolled and routes prompts to the
/// platform capability.
pub struct BiometricGate {
    capability: Arc<dyn BiometricCapability>,
    store: Arc<SandboxedStore>,
    records: Mutex<HashMap<String, EnrollmentRecord>>,
}

impl BiometricGate {
    pub fn new(
        capability: Arc<dyn BiometricCapability>,
        store: Arc<SandboxedStore>,
    ) -> Result<Self> {
        let records = if store.exists(BIOMETRIC_RECORDS_PATH)? {
            let data = store.read(BIOMETRIC_RECORDS_PATH)?;
            serde_json::from_slice(&data)?
        } else {
            HashMap::new()
        };
        Ok(Self {
            capability,
            store,
            records: Mutex::new(records),
        })
    }

    pub fn availability(&self) -> Availability {
        self.capability.availability()
    }

    /// Enroll a note's secret with the platform. Fails when no sensor
    /// is available.
    pub fn enroll(&self, note_id: &str, secret: &str) -> Result<()> {
        let Availability::Available(biometric_type) = self.capability.availability() else {
            return Err(AppError::BiometricFailed(
                "biometric authentication is not available on this device".into(),
            ));
        };
        let handle = self.capability.enroll(note_id, secret)?;
        let snapshot = {
            let mut records = self.lock_records()?;
            records.insert(
                note_id.to_string(),
                EnrollmentRecord {
                    handle,
                    biometric_type,
                    enrolled_at: Utc::now(),
                },
            );
            records.clone()
        };
        self.persist(&snapshot)?;
        log::info!("note {note_id}: enrolled for {}", biometric_type.as_str());
        Ok(())
    }

    /// Prompt for a note. Returns `Unavailable` rather than an error
    /// when the note is not enrolled, so callers can fall back to a
    /// password without special-casing.
    pub fn authenticate(&self, note_id: &str, reason: &str) -> Result<AuthOutcome> {
        let handle = match self.lock_records()?.get(note_id) {
            Some(record) => record.handle.clone(),
            None => return Ok(AuthOutcome::Unavailable),
        };
        Ok(self.capability.authenticate(&handle, reason))
    }

    pub fn is_enrolled(&self, note_id: &str) -> Result<bool> {
        Ok(self.lock_records()?.contains_key(note_id))
    }

    pub fn enrollment(&self, note_id: &str) -> Result<Option<EnrollmentRecord>> {
        Ok(self.lock_records()?.get(note_id).cloned())
    }

    /// Revoke a note's enrollment. Missing enrollments are fine.
    pub fn revoke(&self, note_id: &str) -> Result<()> {
        let removed = self.lock_records()?.remove(note_id);
        let Some(record) = removed else {
            return Ok(());
        };
        self.capability.revoke(&record.handle)?;
        let snapshot = self.lock_records()?.clone();
        self.persist(&snapshot)?;
        log::info!("note {note_id}: biometric enrollment revoked");
        Ok(())
    }

    fn persist(&self, records: &HashMap<String, EnrollmentRecord>) -> Result<()> {
        let data = serde_json::to_vec_pretty(records)?;
        self.store.write(BIOMETRIC_RECORDS_PATH, &data)
    }

    fn lock_records(&self) -> Result<MutexGuard<'_, HashMap<String, EnrollmentRecord>>> {
        self.records
            .lock()
            .map_err(|_| AppError::Internal("biometric record lock poisoned".into()))
    }
}

/// Backend for platforms without a sensor. Everything reports
/// unavailable and enrollment fails.
pub struct NullBiometric;

impl BiometricCapability for NullBiometric {
    fn availability(&self) -> Availability {
        Availability::Unavailable
    }

    fn enroll(&self, _note_id: &str, _secret: &str) -> Result<String> {
        Err(AppError::BiometricFailed(
            "biometric authentication is not available on this device".into(),
        ))
    }

    fn authenticate(&self, _handle: &str, _reason: &str) -> AuthOutcome {
        AuthOutcome::Unavailable
    }

    fn revoke(&self, _handle: &str) -> Result<()> {
        Ok(())
    }
}

/// In-memory backend used by tests. Prompts succeed or behave as
/// scripted, secrets live in a plain map.
pub struct StaticBiometric {
    secrets: Mutex<HashMap<String, String>>,
    outcome: Mutex<ScriptedOutcome>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScriptedOutcome {
    Succeed,
    Cancel,
    Fail,
}

impl StaticBiometric {
    pub fn new() -> Self {
        Self {
            secrets: Mutex::new(HashMap::new()),
            outcome: Mutex::new(ScriptedOutcome::Succeed),
        }
    }

    /// Make subsequent prompts report user cancellation.
    pub fn script_cancel(&self) {
        *self.outcome.lock().unwrap() = ScriptedOutcome::Cancel;
    }

    /// Make subsequent prompts fail recognition.
    pub fn script_failure(&self) {
        *self.outcome.lock().unwrap() = ScriptedOutcome::Fail;
    }

    pub fn script_success(&self) {
        *self.outcome.lock().unwrap() = ScriptedOutcome::Succeed;
    }
}

impl Default for StaticBiometric {
    fn default() -> Self {
        Self::new()
    }
}

impl BiometricCapability for StaticBiometric {
    fn availability(&self) -> Availability {
        Availability::Available(BiometricType::Generic)
    }

    fn enroll(&self, note_id: &str, secret: &str) -> Result<String> {
        let handle = format!("static-{note_id}");
        self.secrets
            .lock()
            .unwrap()
            .insert(handle.clone(), secret.to_string());
        Ok(handle)
    }

    fn authenticate(&self, handle: &str, _reason: &str) -> AuthOutcome {
        match *self.outcome.lock().unwrap() {
            ScriptedOutcome::Cancel => AuthOutcome::UserCancel,
            ScriptedOutcome::Fail => {
                AuthOutcome::Failed("biometric did not match".to_string())
            }
            ScriptedOutcome::Succeed => match self.secrets.lock().unwrap().get(handle) {
                Some(secret) => AuthOutcome::Ok(Zeroizing::new(secret.clone())),
                None => AuthOutcome::Unavailable,
            },
        }
    }

    fn revoke(&self, handle: &str) -> Result<()> {
        self.secrets.lock().unwrap().remove(handle);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn gate_with_static() -> (TempDir, Arc<StaticBiometric>, BiometricGate) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(SandboxedStore::new(dir.path()).unwrap());
        let capability = Arc::new(StaticBiometric::new());
        let gate = BiometricGate::new(
            Arc::clone(&capability) as Arc<dyn BiometricCapability>,
            store,
        )
        .unwrap();
        (dir, capability, gate)
    }

    #[test]
    fn test_enroll_and_authenticate_releases_secret() {
        let (_dir, _cap, gate) = gate_with_static();
        gate.enroll("note-1", "hunter2!Secret").unwrap();
        assert!(gate.is_enrolled("note-1").unwrap());

        match gate.authenticate("note-1", "unlock note").unwrap() {
            AuthOutcome::Ok(secret) => assert_eq!(secret.as_str(), "hunter2!Secret"),
            other => panic!("expected released secret, got {other:?}"),
        }
    }

    #[test]
    fn test_unenrolled_note_reports_unavailable() {
        let (_dir, _cap, gate) = gate_with_static();
        assert!(matches!(
            gate.authenticate("note-1", "unlock").unwrap(),
            AuthOutcome::Unavailable
        ));
    }

    #[test]
    fn test_cancel_and_failure_are_distinct() {
        let (_dir, cap, gate) = gate_with_static();
        gate.enroll("note-1", "s3cret!!").unwrap();

        cap.script_cancel();
        assert!(matches!(
            gate.authenticate("note-1", "unlock").unwrap(),
            AuthOutcome::UserCancel
        ));

        cap.script_failure();
        assert!(matches!(
            gate.authenticate("note-1", "unlock").unwrap(),
            AuthOutcome::Failed(_)
        ));
    }

    #[test]
    fn test_revoke_removes_enrollment_and_secret() {
        let (_dir, _cap, gate) = gate_with_static();
        gate.enroll("note-1", "s3cret!!").unwrap();
        gate.revoke("note-1").unwrap();
        assert!(!gate.is_enrolled("note-1").unwrap());
        assert!(matches!(
            gate.authenticate("note-1", "unlock").unwrap(),
            AuthOutcome::Unavailable
        ));
        // Revoking again is a no-op.
        gate.revoke("note-1").unwrap();
    }

    #[test]
    fn test_null_backend_rejects_enrollment() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(SandboxedStore::new(dir.path()).unwrap());
        let gate = BiometricGate::new(Arc::new(NullBiometric), store).unwrap();
        assert!(!gate.availability().is_available());
        let err = gate.enroll("note-1", "s3cret!!").unwrap_err();
        assert_eq!(err.code(), "BIOMETRIC_FAILED");
    }

    #[test]
    fn test_enrollments_persist_across_reopen() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(SandboxedStore::new(dir.path()).unwrap());
        let capability = Arc::new(StaticBiometric::new());
        {
            let gate = BiometricGate::new(
                Arc::clone(&capability) as Arc<dyn BiometricCapability>,
                Arc::clone(&store),
            )
            .unwrap();
            gate.enroll("note-1", "s3cret!!").unwrap();
        }
        let gate = BiometricGate::new(capability, store).unwrap();
        assert!(gate.is_enrolled("note-1").unwrap());
        let record = gate.enrollment("note-1").unwrap().unwrap();
        assert_eq!(record.biometric_type, BiometricType::Generic);
    }
}
