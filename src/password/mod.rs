//! Password vault
//!
//! Hashing and verification of note passwords (PBKDF2-HMAC-SHA256,
//! constant-time compare), strength evaluation, and the per-note
//! retry/lockout state machine. Records are persisted through the
//! sandboxed store; retry state lives in memory for the process
//! lifetime.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto::primitives::{ct_eq, derive_key, generate_salt, KDF_ITERATIONS, KEY_SIZE};
use crate::error::{AppError, Result};
use crate::repository::SandboxedStore;

mod strength;
pub use strength::{check_strength, StrengthLabel, StrengthReport};

/// Where password records live inside the vault root
pub const PASSWORD_RECORDS_PATH: &str = ".notebook/keys/password_hashes.json";

/// Failed attempts before a lockout
pub const MAX_RETRY_ATTEMPTS: u32 = 3;

/// How long a lockout lasts
pub const LOCKOUT_DURATION: Duration = Duration::from_secs(5 * 60);

/// A stored password hash for one note
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PasswordRecord {
    pub algorithm: String,
    pub iterations: u32,
    /// Base64 salt
    pub salt: String,
    /// Base64 PBKDF2 output, 32 bytes
    pub hash: String,
    pub created_at: DateTime<Utc>,
}

/// Per-note retry state: Idle -> Failing(n) -> LockedUntil(t)
#[derive(Debug, Clone, Default)]
struct RetryState {
    fail_count: u32,
    locked_until: Option<Instant>,
}

/// Password hashing, verification, and lockout tracking
pub struct PasswordVault {
    store: Arc<SandboxedStore>,
    records: Mutex<HashMap<String, PasswordRecord>>,
    retries: Mutex<HashMap<String, RetryState>>,
    lockout: Duration,
}

impl PasswordVault {
    /// Open the vault, loading any persisted records.
    pub fn new(store: Arc<SandboxedStore>) -> Result<Self> {
        Self::with_lockout_duration(store, LOCKOUT_DURATION)
    }

    /// Shorter lockouts for tests.
    pub fn with_lockout_duration(store: Arc<SandboxedStore>, lockout: Duration) -> Result<Self> {
        let records = if store.exists(PASSWORD_RECORDS_PATH)? {
            let data = store.read(PASSWORD_RECORDS_PATH)?;
            serde_json::from_slice(&data)?
        } else {
            HashMap::new()
        };
        Ok(Self {
            store,
            records: Mutex::new(records),
            retries: Mutex::new(HashMap::new()),
            lockout,
        })
    }

    /// Hash a password with a fresh salt.
    pub fn hash_password(password: &str) -> Result<PasswordRecord> {
        if password.is_empty() {
            return Err(AppError::Validation("password must not be empty".into()));
        }
        let salt = generate_salt();
        let key = derive_key(password.as_bytes(), &salt, KDF_ITERATIONS);
        Ok(PasswordRecord {
            algorithm: "pbkdf2-sha256".to_string(),
            iterations: KDF_ITERATIONS,
            salt: BASE64.encode(salt),
            hash: BASE64.encode(key.as_bytes()),
            created_at: Utc::now(),
        })
    }

    /// Re-derive and compare in constant time.
    pub fn verify_password(password: &str, record: &PasswordRecord) -> Result<bool> {
        if record.algorithm != "pbkdf2-sha256" {
            return Err(AppError::Validation(format!(
                "unsupported hash algorithm: {}",
                record.algorithm
            )));
        }
        let salt = BASE64.decode(&record.salt)?;
        let expected = BASE64.decode(&record.hash)?;
        if expected.len() != KEY_SIZE {
            return Err(AppError::Validation("malformed password hash".into()));
        }
        let computed = derive_key(password.as_bytes(), &salt, record.iterations);
        Ok(ct_eq(computed.as_bytes(), &expected))
    }

    /// Store (or replace) the password record for a note.
    pub fn set_password(&self, note_id: &str, password: &str) -> Result<()> {
        let record = Self::hash_password(password)?;
        let snapshot = {
            let mut records = self.lock_records()?;
            records.insert(note_id.to_string(), record);
            records.clone()
        };
        self.persist(&snapshot)
    }

    /// Look up a note's record.
    pub fn record(&self, note_id: &str) -> Result<Option<PasswordRecord>> {
        Ok(self.lock_records()?.get(note_id).cloned())
    }

    /// Remove a note's record (note deletion).
    pub fn remove(&self, note_id: &str) -> Result<()> {
        let snapshot = {
            let mut records = self.lock_records()?;
            records.remove(note_id);
            records.clone()
        };
        self.reset_retries(note_id)?;
        self.persist(&snapshot)
    }

    // ----- retry / lockout state machine -----

    /// Record a failed attempt. Three failures lock the note for the
    /// lockout duration, which is returned when it engages.
    pub fn record_failure(&self, note_id: &str) -> Result<Option<Duration>> {
        let mut retries = self.lock_retries()?;
        let state = retries.entry(note_id.to_string()).or_default();
        let now = Instant::now();

        // A lockout that already expired resets the machine first.
        if let Some(until) = state.locked_until {
            if now >= until {
                *state = RetryState::default();
            }
        }

        state.fail_count += 1;

        if state.fail_count >= MAX_RETRY_ATTEMPTS {
            state.locked_until = Some(now + self.lockout);
            log::warn!(
                "note {note_id}: {} failed attempts, locked for {:?}",
                state.fail_count,
                self.lockout
            );
            return Ok(Some(self.lockout));
        }
        Ok(None)
    }

    /// Whether the note is currently locked out.
    pub fn is_locked(&self, note_id: &str) -> Result<bool> {
        Ok(self.remaining_lockout(note_id)?.is_some())
    }

    /// Time left on the lockout, if one is active. An expired lockout
    /// resets the state machine to idle.
    pub fn remaining_lockout(&self, note_id: &str) -> Result<Option<Duration>> {
        let mut retries = self.lock_retries()?;
        let Some(state) = retries.get_mut(note_id) else {
            return Ok(None);
        };
        match state.locked_until {
            Some(until) => {
                let now = Instant::now();
                if now >= until {
                    *state = RetryState::default();
                    Ok(None)
                } else {
                    Ok(Some(until - now))
                }
            }
            None => Ok(None),
        }
    }

    /// Clear retry state after a successful verification.
    pub fn reset_retries(&self, note_id: &str) -> Result<()> {
        self.lock_retries()?.remove(note_id);
        Ok(())
    }

    /// Current failure count for a note.
    pub fn fail_count(&self, note_id: &str) -> Result<u32> {
        Ok(self
            .lock_retries()?
            .get(note_id)
            .map(|s| s.fail_count)
            .unwrap_or(0))
    }

    fn persist(&self, records: &HashMap<String, PasswordRecord>) -> Result<()> {
        let data = serde_json::to_vec_pretty(records)?;
        self.store.write(PASSWORD_RECORDS_PATH, &data)
    }

    fn lock_records(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, PasswordRecord>>> {
        self.records
            .lock()
            .map_err(|_| AppError::Internal("password record lock poisoned".into()))
    }

    fn lock_retries(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, RetryState>>> {
        self.retries
            .lock()
            .map_err(|_| AppError::Internal("retry state lock poisoned".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn vault() -> (TempDir, PasswordVault) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(SandboxedStore::new(dir.path()).unwrap());
        let vault = PasswordVault::new(store).unwrap();
        (dir, vault)
    }

    #[test]
    fn test_hash_and_verify() {
        let record = PasswordVault::hash_password("Str0ng!Pass").unwrap();
        assert_eq!(record.algorithm, "pbkdf2-sha256");
        assert!(record.iterations >= 100_000);
        assert!(PasswordVault::verify_password("Str0ng!Pass", &record).unwrap());
        assert!(!PasswordVault::verify_password("str0ng!pass", &record).unwrap());
        assert!(!PasswordVault::verify_password("", &record).unwrap());
    }

    #[test]
    fn test_hash_uses_fresh_salts() {
        let a = PasswordVault::hash_password("Str0ng!Pass").unwrap();
        let b = PasswordVault::hash_password("Str0ng!Pass").unwrap();
        assert_ne!(a.salt, b.salt);
        assert_ne!(a.hash, b.hash);
    }

    #[test]
    fn test_records_persist_across_reopen() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(SandboxedStore::new(dir.path()).unwrap());
        {
            let vault = PasswordVault::new(Arc::clone(&store)).unwrap();
            vault.set_password("note-1", "Str0ng!Pass").unwrap();
        }
        let vault = PasswordVault::new(store).unwrap();
        let record = vault.record("note-1").unwrap().expect("record survives");
        assert!(PasswordVault::verify_password("Str0ng!Pass", &record).unwrap());
    }

    #[test]
    fn test_lockout_after_three_failures() {
        let (_dir, vault) = vault();
        assert!(vault.record_failure("n").unwrap().is_none());
        assert!(vault.record_failure("n").unwrap().is_none());
        let lockout = vault.record_failure("n").unwrap();
        assert_eq!(lockout, Some(LOCKOUT_DURATION));

        assert!(vault.is_locked("n").unwrap());
        let remaining = vault.remaining_lockout("n").unwrap().unwrap();
        assert!(remaining > Duration::ZERO && remaining <= LOCKOUT_DURATION);
        assert_eq!(vault.fail_count("n").unwrap(), 3);
    }

    fn vault_with_lockout(lockout: Duration) -> (TempDir, PasswordVault) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(SandboxedStore::new(dir.path()).unwrap());
        let vault = PasswordVault::with_lockout_duration(store, lockout).unwrap();
        (dir, vault)
    }

    #[test]
    fn test_expired_lockout_resets_state() {
        let (_dir, vault) = vault_with_lockout(Duration::from_millis(25));
        for _ in 0..3 {
            vault.record_failure("n").unwrap();
        }
        assert!(vault.is_locked("n").unwrap());

        std::thread::sleep(Duration::from_millis(40));
        assert!(!vault.is_locked("n").unwrap());
        assert_eq!(vault.fail_count("n").unwrap(), 0);
    }

    #[test]
    fn test_failure_after_expired_lockout_starts_fresh_run() {
        let (_dir, vault) = vault_with_lockout(Duration::from_millis(25));
        for _ in 0..3 {
            vault.record_failure("n").unwrap();
        }
        std::thread::sleep(Duration::from_millis(40));

        // The old run is gone: this failure is the first of a new one.
        assert!(vault.record_failure("n").unwrap().is_none());
        assert_eq!(vault.fail_count("n").unwrap(), 1);
        assert!(!vault.is_locked("n").unwrap());
    }

    #[test]
    fn test_reset_clears_lockout() {
        let (_dir, vault) = vault();
        for _ in 0..3 {
            vault.record_failure("n").unwrap();
        }
        assert!(vault.is_locked("n").unwrap());
        vault.reset_retries("n").unwrap();
        assert!(!vault.is_locked("n").unwrap());
        assert_eq!(vault.fail_count("n").unwrap(), 0);
    }

    #[test]
    fn test_notes_have_independent_retry_state() {
        let (_dir, vault) = vault();
        for _ in 0..3 {
            vault.record_failure("a").unwrap();
        }
        assert!(vault.is_locked("a").unwrap());
        assert!(!vault.is_locked("b").unwrap());
        assert_eq!(vault.fail_count("b").unwrap(), 0);
    }

    #[test]
    fn test_remove_drops_record_and_retries() {
        let (_dir, vault) = vault();
        vault.set_password("n", "Str0ng!Pass").unwrap();
        vault.record_failure("n").unwrap();
        vault.remove("n").unwrap();
        assert!(vault.record("n").unwrap().is_none());
        assert_eq!(vault.fail_count("n").unwrap(), 0);
    }
}
