//! Secure storage core for an encrypted Markdown notebook.
//!
//! [`Vault`] wires the pieces together: a sandboxed file store, the
//! settings document, password and biometric key management, the
//! envelope crypto layer, and the auto-save engine. Library consumers
//! (desktop shell, CLI) talk to the vault; the modules underneath are
//! public for direct use in tests and tools.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;

use zeroize::Zeroizing;

pub mod autosave;
pub mod biometric;
pub mod crypto;
pub mod encryption;
pub mod error;
pub mod note;
pub mod password;
pub mod repository;
pub mod settings;

use autosave::{AutoSaveEngine, NoteSaver, SaveStatus};
use biometric::{BiometricCapability, BiometricGate, NullBiometric};
use crypto::envelope::Envelope;
use crypto::Algorithm;
use encryption::EncryptionService;
use error::{AppError, Result};
use note::{EncryptionType, Note};
use password::PasswordVault;
use repository::{FileEntry, SandboxedStore};
use settings::{Settings, SettingsStore};

/// Internal state directory inside the vault root
pub const STATE_DIR: &str = ".notebook";

/// Shared state behind the vault. Implements [`NoteSaver`] so the
/// auto-save engine can drive saves without owning the vault.
struct VaultCore {
    store: Arc<SandboxedStore>,
    settings: SettingsStore,
    encryption: EncryptionService,
    /// Notes currently open in the session, by id.
    notes: StdMutex<HashMap<String, Note>>,
    /// Session passwords for open encrypted notes, needed to re-seal
    /// on save. Zeroized when the note closes.
    secrets: StdMutex<HashMap<String, Zeroizing<String>>>,
}

/// Root handle over one notebook directory.
pub struct Vault {
    core: Arc<VaultCore>,
    autosave: AutoSaveEngine,
}

impl Vault {
    /// Open (or initialize) a vault rooted at `root` with no biometric
    /// hardware.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        Self::open_with_capability(root, Arc::new(NullBiometric))
    }

    /// Open a vault with a platform biometric backend.
    pub fn open_with_capability(
        root: impl Into<PathBuf>,
        capability: Arc<dyn BiometricCapability>,
    ) -> Result<Self> {
        let store = Arc::new(SandboxedStore::new(root)?);
        store.mkdir(STATE_DIR)?;

        let settings = SettingsStore::new(Arc::clone(&store))?;
        store.mkdir(&settings.get()?.default_save_location)?;

        let passwords = Arc::new(PasswordVault::new(Arc::clone(&store))?);
        let biometrics = Arc::new(BiometricGate::new(capability, Arc::clone(&store))?);
        let encryption = EncryptionService::new(passwords, biometrics);

        let core = Arc::new(VaultCore {
            store,
            settings,
            encryption,
            notes: StdMutex::new(HashMap::new()),
            secrets: StdMutex::new(HashMap::new()),
        });
        let autosave = AutoSaveEngine::new(Arc::clone(&core) as Arc<dyn NoteSaver>);
        log::info!("vault opened");
        Ok(Self { core, autosave })
    }

    /// Default vault location under the user's documents directory.
    pub fn default_root() -> Result<PathBuf> {
        let base = dirs::document_dir()
            .or_else(dirs::home_dir)
            .ok_or_else(|| AppError::Internal("cannot determine home directory".into()))?;
        Ok(base.join("QuillVault"))
    }

    // ----- notes -----

    /// Create a new note in the configured save location and register
    /// it as open. Nothing touches disk until the first save.
    pub fn create_note(&self, title: &str, content: &str) -> Result<Note> {
        let location = self.core.settings.get()?.default_save_location;
        let note = Note::new(title, content, String::new());
        let mut note = Note {
            file_path: format!("{location}/{}.md", note.id),
            ..note
        };
        note.validate()?;
        self.core
            .lock_notes()?
            .insert(note.id.clone(), note.clone());
        log::info!("note {}: created at {}", note.id, note.file_path);
        Ok(note)
    }

    /// Open a note file, decrypting it when it holds an envelope. The
    /// note id is taken from the file name stem.
    pub fn open_note(&self, rel_path: &str, password: Option<&str>) -> Result<Note> {
        if !repository::is_markdown_path(rel_path) {
            return Err(AppError::Validation(format!(
                "not a Markdown note: {rel_path}"
            )));
        }
        let bytes = self.core.store.read(rel_path)?;
        let note_id = note_id_from_path(rel_path);

        let mut note = if Envelope::looks_like_envelope(&bytes) {
            let envelope = Envelope::from_json(&bytes)?;
            let auth_type = envelope.auth_type;
            let unsealed = self
                .core
                .encryption
                .unseal(&note_id, &bytes, password, None)?;
            // Keep whichever secret opened the envelope, typed or
            // biometric-released, so background saves can re-seal.
            self.core
                .lock_secrets()?
                .insert(note_id.clone(), unsealed.secret);
            let mut note = Note::new(
                title_from_content(&unsealed.content, &note_id),
                unsealed.content.as_str(),
                rel_path,
            );
            note.set_encryption(auth_type);
            note
        } else {
            let content = String::from_utf8(bytes)
                .map_err(|_| AppError::Validation(format!("{rel_path} is not UTF-8 text")))?;
            Note::new(title_from_content(&content, &note_id), content, rel_path)
        };
        note.id = note_id.clone();
        note.mark_saved();

        self.core.lock_notes()?.insert(note_id, note.clone());
        Ok(note)
    }

    /// Snapshot of an open note.
    pub fn note(&self, note_id: &str) -> Result<Note> {
        self.core
            .lock_notes()?
            .get(note_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("note {note_id} is not open")))
    }

    /// Replace an open note's content.
    pub fn update_content(&self, note_id: &str, content: &str) -> Result<()> {
        let mut notes = self.core.lock_notes()?;
        let note = notes
            .get_mut(note_id)
            .ok_or_else(|| AppError::NotFound(format!("note {note_id} is not open")))?;
        note.update_content(content);
        Ok(())
    }

    /// Save an open note now. Goes through the auto-save engine when
    /// it is tracking the note so explicit and periodic saves cannot
    /// overlap.
    pub async fn save_note(&self, note_id: &str) -> Result<()> {
        if self.autosave.is_active(note_id)? {
            self.autosave.save_now(note_id).await
        } else {
            self.core.save(note_id)
        }
    }

    /// Turn encryption on for an open note and persist it re-sealed.
    /// The plaintext file, if any, is replaced by the `.enc` envelope.
    pub fn encrypt_note(
        &self,
        note_id: &str,
        password: &str,
        auth_type: EncryptionType,
    ) -> Result<Note> {
        let old_path = {
            let mut notes = self.core.lock_notes()?;
            let note = notes
                .get_mut(note_id)
                .ok_or_else(|| AppError::NotFound(format!("note {note_id} is not open")))?;
            if note.is_encrypted {
                return Err(AppError::Validation(format!(
                    "note {note_id} is already encrypted"
                )));
            }
            let old_path = note.file_path.clone();
            note.set_encryption(auth_type);
            note.file_path = format!("{old_path}.enc");
            old_path
        };

        self.core
            .lock_secrets()?
            .insert(note_id.to_string(), Zeroizing::new(password.to_string()));

        if let Err(err) = self.core.save(note_id) {
            // Roll the in-memory state back so the note is still usable.
            let mut notes = self.core.lock_notes()?;
            if let Some(note) = notes.get_mut(note_id) {
                note.is_encrypted = false;
                note.encryption_type = None;
                note.file_path = old_path;
            }
            self.core.lock_secrets()?.remove(note_id);
            return Err(err);
        }

        if self.core.store.exists(&old_path)? {
            self.core.store.delete(&old_path)?;
        }
        self.note(note_id)
    }

    /// Permanently remove encryption from an open note: write the
    /// plaintext `.md`, delete the envelope, and forget key material.
    pub fn remove_encryption(&self, note_id: &str, password: &str) -> Result<Note> {
        let (envelope_path, content, snapshot_at) = {
            let notes = self.core.lock_notes()?;
            let note = notes
                .get(note_id)
                .ok_or_else(|| AppError::NotFound(format!("note {note_id} is not open")))?;
            if !note.is_encrypted {
                return Err(AppError::Validation(format!(
                    "note {note_id} is not encrypted"
                )));
            }
            (note.file_path.clone(), note.content.clone(), note.updated_at)
        };

        // Re-verify the password against the stored envelope before
        // dropping protection.
        if self.core.store.exists(&envelope_path)? {
            let bytes = self.core.store.read(&envelope_path)?;
            self.core
                .encryption
                .decrypt(note_id, &bytes, Some(password), None)?;
        }

        let plain_path = envelope_path
            .strip_suffix(".enc")
            .unwrap_or(&envelope_path)
            .to_string();
        self.core.store.write_markdown(&plain_path, &content)?;
        if plain_path != envelope_path && self.core.store.exists(&envelope_path)? {
            self.core.store.delete(&envelope_path)?;
        }
        self.core.encryption.forget_note(note_id)?;
        self.core.lock_secrets()?.remove(note_id);

        let mut notes = self.core.lock_notes()?;
        let note = notes
            .get_mut(note_id)
            .ok_or_else(|| AppError::NotFound(format!("note {note_id} is not open")))?;
        note.is_encrypted = false;
        note.encryption_type = None;
        note.file_path = plain_path;
        note.mark_saved_as_of(snapshot_at);
        Ok(note.clone())
    }

    /// List note files under the configured save location.
    pub fn list_notes(&self) -> Result<Vec<FileEntry>> {
        let location = self.core.settings.get()?.default_save_location;
        let mut entries = self.core.store.list(&location)?;
        entries.retain(|e| e.is_directory || e.is_markdown());
        Ok(entries)
    }

    /// Delete a note's file and every trace of its key material.
    pub fn delete_note(&self, note_id: &str) -> Result<()> {
        self.autosave.stop(note_id)?;
        let path = self.core.lock_notes()?.remove(note_id).map(|n| n.file_path);
        if let Some(path) = path {
            if self.core.store.exists(&path)? {
                self.core.store.delete(&path)?;
            }
        }
        self.core.lock_secrets()?.remove(note_id);
        self.core.encryption.forget_note(note_id)?;
        log::info!("note {note_id}: deleted");
        Ok(())
    }

    /// Close an open note, dropping its session secret. The file stays.
    pub fn close_note(&self, note_id: &str) -> Result<()> {
        self.autosave.stop(note_id)?;
        self.core.lock_notes()?.remove(note_id);
        self.core.lock_secrets()?.remove(note_id);
        Ok(())
    }

    // ----- auto-save -----

    /// Start auto-save for an open note at the configured interval.
    pub fn enable_auto_save(&self, note_id: &str) -> Result<()> {
        self.note(note_id)?;
        let minutes = self.core.settings.get()?.auto_save_interval;
        self.autosave
            .start(note_id, Duration::from_secs(u64::from(minutes) * 60))
    }

    pub fn disable_auto_save(&self, note_id: &str) -> Result<()> {
        self.autosave.stop(note_id)
    }

    pub fn resume_auto_save(&self, note_id: &str) -> Result<()> {
        self.autosave.resume(note_id)
    }

    pub fn save_status(&self, note_id: &str) -> Result<Option<SaveStatus>> {
        self.autosave.status(note_id)
    }

    // ----- settings and services -----

    pub fn settings(&self) -> Result<Settings> {
        self.core.settings.get()
    }

    pub fn update_settings<F>(&self, apply: F) -> Result<Settings>
    where
        F: FnOnce(&mut Settings) -> Result<()>,
    {
        self.core.settings.update(apply)
    }

    /// The algorithm new encryptions should use, per settings.
    pub fn default_algorithm(&self) -> Result<Algorithm> {
        self.core.settings.get()?.default_algorithm()
    }

    pub fn encryption(&self) -> &EncryptionService {
        &self.core.encryption
    }

    pub fn store(&self) -> &SandboxedStore {
        &self.core.store
    }

    /// Stop all background tasks. Open notes are not flushed.
    pub fn shutdown(&self) -> Result<()> {
        self.autosave.shutdown()
    }
}

impl VaultCore {
    /// Persist one open note: plaintext Markdown, or a sealed envelope
    /// when the note is encrypted.
    fn save(&self, note_id: &str) -> Result<()> {
        let note = {
            let notes = self.lock_notes()?;
            notes
                .get(note_id)
                .cloned()
                .ok_or_else(|| AppError::NotFound(format!("note {note_id} is not open")))?
        };
        note.validate()?;

        if note.is_encrypted {
            let auth_type = note.encryption_type.unwrap_or(EncryptionType::Password);
            let password = {
                let secrets = self.lock_secrets()?;
                secrets
                    .get(note_id)
                    .cloned()
                    .ok_or_else(|| AppError::BadPassword)?
            };
            let algorithm = self.settings.get()?.default_algorithm()?;
            let envelope =
                self.encryption
                    .encrypt(note_id, &note.content, auth_type, algorithm, &password)?;
            self.store.write(&note.file_path, &envelope)?;
        } else {
            self.store.write_markdown(&note.file_path, &note.content)?;
        }

        // Stamp against the snapshot, not the clock: an edit made while
        // the save ran must leave the note dirty for the next pass.
        if let Some(open) = self.lock_notes()?.get_mut(note_id) {
            open.mark_saved_as_of(note.updated_at);
        }
        Ok(())
    }

    fn lock_notes(&self) -> Result<MutexGuard<'_, HashMap<String, Note>>> {
        self.notes
            .lock()
            .map_err(|_| AppError::Internal("note table poisoned".into()))
    }

    fn lock_secrets(&self) -> Result<MutexGuard<'_, HashMap<String, Zeroizing<String>>>> {
        self.secrets
            .lock()
            .map_err(|_| AppError::Internal("secret table poisoned".into()))
    }
}

impl NoteSaver for VaultCore {
    fn is_dirty(&self, note_id: &str) -> Result<bool> {
        Ok(self
            .lock_notes()?
            .get(note_id)
            .map(|n| n.is_modified())
            .unwrap_or(false))
    }

    fn is_encrypted(&self, note_id: &str) -> Result<bool> {
        Ok(self
            .lock_notes()?
            .get(note_id)
            .map(|n| n.is_encrypted)
            .unwrap_or(false))
    }

    fn save(&self, note_id: &str) -> Result<()> {
        VaultCore::save(self, note_id)
    }
}

/// Note id from a file path: the stem with note extensions stripped.
fn note_id_from_path(rel_path: &str) -> String {
    let name = rel_path.rsplit('/').next().unwrap_or(rel_path);
    name.trim_end_matches(".enc")
        .trim_end_matches(".md")
        .to_string()
}

/// Title from the first Markdown heading, falling back to the note id.
fn title_from_content(content: &str, fallback: &str) -> String {
    content
        .lines()
        .find_map(|line| line.strip_prefix("# ").map(|t| t.trim().to_string()))
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| fallback.to_string())
}
