//! Application settings
//!
//! A small validated JSON document stored at `.notebook/settings.json`
//! inside the vault root. Loads fall back to defaults when the file is
//! missing; invalid documents are rejected rather than silently
//! repaired. Writes go through the sandboxed store's atomic rename.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::crypto::Algorithm;
use crate::error::{AppError, Result};
use crate::repository::SandboxedStore;

/// Where the settings document lives inside the vault root
pub const SETTINGS_PATH: &str = ".notebook/settings.json";

const MIN_AUTO_SAVE_INTERVAL: u32 = 1;
const MAX_AUTO_SAVE_INTERVAL: u32 = 60;

pub const SUPPORTED_ENCRYPTION: &[&str] = &["aes256", "chacha20"];
pub const SUPPORTED_THEMES: &[&str] = &["light", "dark", "auto"];

/// User preferences for encryption, auto-save, and appearance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// "aes256" or "chacha20"
    pub default_encryption: String,
    /// Minutes between auto-saves, 1 to 60
    pub auto_save_interval: u32,
    /// Relative directory the editor saves new notes under
    pub default_save_location: String,
    pub biometric_enabled: bool,
    /// "light", "dark", or "auto"
    pub theme: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_encryption: "aes256".to_string(),
            auto_save_interval: 5,
            default_save_location: "notes".to_string(),
            biometric_enabled: false,
            theme: "auto".to_string(),
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        if self.auto_save_interval < MIN_AUTO_SAVE_INTERVAL
            || self.auto_save_interval > MAX_AUTO_SAVE_INTERVAL
        {
            return Err(AppError::Validation(format!(
                "auto_save_interval must be between {MIN_AUTO_SAVE_INTERVAL} and {MAX_AUTO_SAVE_INTERVAL} minutes"
            )));
        }
        if !SUPPORTED_ENCRYPTION.contains(&self.default_encryption.as_str()) {
            return Err(AppError::Validation(format!(
                "unsupported encryption algorithm: {}",
                self.default_encryption
            )));
        }
        if !SUPPORTED_THEMES.contains(&self.theme.as_str()) {
            return Err(AppError::Validation(format!(
                "unsupported theme: {}",
                self.theme
            )));
        }
        Ok(())
    }

    pub fn set_encryption(&mut self, algorithm: &str) -> Result<()> {
        if !SUPPORTED_ENCRYPTION.contains(&algorithm) {
            return Err(AppError::Validation(format!(
                "unsupported encryption algorithm: {algorithm}"
            )));
        }
        self.default_encryption = algorithm.to_string();
        Ok(())
    }

    pub fn set_auto_save_interval(&mut self, minutes: u32) -> Result<()> {
        if !(MIN_AUTO_SAVE_INTERVAL..=MAX_AUTO_SAVE_INTERVAL).contains(&minutes) {
            return Err(AppError::Validation(format!(
                "auto_save_interval must be between {MIN_AUTO_SAVE_INTERVAL} and {MAX_AUTO_SAVE_INTERVAL} minutes"
            )));
        }
        self.auto_save_interval = minutes;
        Ok(())
    }

    pub fn set_theme(&mut self, theme: &str) -> Result<()> {
        if !SUPPORTED_THEMES.contains(&theme) {
            return Err(AppError::Validation(format!("unsupported theme: {theme}")));
        }
        self.theme = theme.to_string();
        Ok(())
    }

    /// No validation here, the location may not exist yet.
    pub fn set_save_location(&mut self, location: &str) {
        self.default_save_location = location.to_string();
    }

    pub fn set_biometric(&mut self, enabled: bool) {
        self.biometric_enabled = enabled;
    }

    pub fn toggle_biometric(&mut self) -> bool {
        self.biometric_enabled = !self.biometric_enabled;
        self.biometric_enabled
    }

    pub fn is_default(&self) -> bool {
        *self == Settings::default()
    }

    /// The configured algorithm as a crypto identifier.
    pub fn default_algorithm(&self) -> Result<Algorithm> {
        Algorithm::parse(&self.default_encryption).ok_or_else(|| {
            AppError::Validation(format!(
                "unsupported encryption algorithm: {}",
                self.default_encryption
            ))
        })
    }
}

/// Loads, caches, and persists the settings document.
pub struct SettingsStore {
    store: Arc<SandboxedStore>,
    current: Mutex<Settings>,
}

impl SettingsStore {
    /// Load settings from the vault, falling back to defaults when no
    /// document exists yet.
    pub fn new(store: Arc<SandboxedStore>) -> Result<Self> {
        let current = if store.exists(SETTINGS_PATH)? {
            let data = store.read(SETTINGS_PATH)?;
            let settings: Settings = serde_json::from_slice(&data)?;
            settings.validate()?;
            settings
        } else {
            Settings::default()
        };
        Ok(Self {
            store,
            current: Mutex::new(current),
        })
    }

    pub fn get(&self) -> Result<Settings> {
        Ok(self.lock()?.clone())
    }

    /// Apply a mutation and persist the result. The stored document is
    /// untouched when the mutation leaves the settings invalid.
    pub fn update<F>(&self, apply: F) -> Result<Settings>
    where
        F: FnOnce(&mut Settings) -> Result<()>,
    {
        let mut guard = self.lock()?;
        let mut candidate = guard.clone();
        apply(&mut candidate)?;
        candidate.validate()?;
        let data = serde_json::to_vec_pretty(&candidate)?;
        self.store.write(SETTINGS_PATH, &data)?;
        *guard = candidate.clone();
        log::info!("settings updated");
        Ok(candidate)
    }

    /// Persist the current settings even if the file is missing.
    pub fn flush(&self) -> Result<()> {
        let snapshot = self.lock()?.clone();
        snapshot.validate()?;
        let data = serde_json::to_vec_pretty(&snapshot)?;
        self.store.write(SETTINGS_PATH, &data)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Settings>> {
        self.current
            .lock()
            .map_err(|_| AppError::Internal("settings lock poisoned".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, Arc<SandboxedStore>) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(SandboxedStore::new(dir.path()).unwrap());
        (dir, store)
    }

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        settings.validate().unwrap();
        assert_eq!(settings.default_encryption, "aes256");
        assert_eq!(settings.auto_save_interval, 5);
        assert!(!settings.biometric_enabled);
        assert_eq!(settings.theme, "auto");
        assert!(settings.is_default());
    }

    #[test]
    fn test_validation_rejects_out_of_range_interval() {
        let mut settings = Settings::default();
        settings.auto_save_interval = 0;
        assert_eq!(settings.validate().unwrap_err().code(), "VALIDATION_FAILED");
        settings.auto_save_interval = 61;
        assert!(settings.validate().is_err());
        settings.auto_save_interval = 60;
        settings.validate().unwrap();
    }

    #[test]
    fn test_mutators_reject_invalid_values() {
        let mut settings = Settings::default();
        assert!(settings.set_encryption("des").is_err());
        assert!(settings.set_theme("sepia").is_err());
        assert!(settings.set_auto_save_interval(0).is_err());

        settings.set_encryption("chacha20").unwrap();
        settings.set_theme("dark").unwrap();
        settings.set_auto_save_interval(10).unwrap();
        assert!(!settings.is_default());
    }

    #[test]
    fn test_missing_file_loads_defaults() {
        let (_dir, store) = store();
        let settings_store = SettingsStore::new(store).unwrap();
        assert!(settings_store.get().unwrap().is_default());
    }

    #[test]
    fn test_update_persists_and_survives_reopen() {
        let (_dir, store) = store();
        {
            let settings_store = SettingsStore::new(Arc::clone(&store)).unwrap();
            settings_store
                .update(|s| {
                    s.set_encryption("chacha20")?;
                    s.set_auto_save_interval(2)
                })
                .unwrap();
        }
        let settings_store = SettingsStore::new(store).unwrap();
        let settings = settings_store.get().unwrap();
        assert_eq!(settings.default_encryption, "chacha20");
        assert_eq!(settings.auto_save_interval, 2);
    }

    #[test]
    fn test_failed_update_leaves_document_untouched() {
        let (_dir, store) = store();
        let settings_store = SettingsStore::new(Arc::clone(&store)).unwrap();
        settings_store
            .update(|s| s.set_theme("dark"))
            .unwrap();

        let err = settings_store
            .update(|s| s.set_auto_save_interval(0))
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION_FAILED");
        assert_eq!(settings_store.get().unwrap().theme, "dark");

        // On-disk copy still parses to the last good state.
        let data = store.read(SETTINGS_PATH).unwrap();
        let on_disk: Settings = serde_json::from_slice(&data).unwrap();
        assert_eq!(on_disk.theme, "dark");
        assert_eq!(on_disk.auto_save_interval, 5);
    }

    #[test]
    fn test_corrupt_document_is_rejected() {
        let (_dir, store) = store();
        store
            .write(SETTINGS_PATH, b"{\"auto_save_interval\": 999}")
            .unwrap();
        assert!(SettingsStore::new(store).is_err());
    }

    #[test]
    fn test_default_algorithm_maps_to_crypto_identifier() {
        let mut settings = Settings::default();
        assert_eq!(settings.default_algorithm().unwrap(), Algorithm::Aes256Gcm);
        settings.set_encryption("chacha20").unwrap();
        assert_eq!(
            settings.default_algorithm().unwrap(),
            Algorithm::ChaCha20Poly1305
        );
    }
}
