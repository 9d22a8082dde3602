//! Auto-save engine
//!
//! One tokio task per started note, woken by an interval timer and a
//! control channel. Ticks skip clean notes and skip entirely when a
//! save is already running; explicit saves wait for the in-flight save
//! instead. Encrypted saves retry with a linear backoff. An
//! authentication failure pauses the note's auto-save until the caller
//! resumes it, so a locked-out note does not burn retries in the
//! background.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::time::sleep;

use crate::error::{AppError, Result};

/// Attempts per save of an encrypted note
const MAX_SAVE_ATTEMPTS: u32 = 3;

/// Base delay between retries; attempt n waits n times this
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// What the engine saves through. The vault implements this; tests
/// substitute scripted savers.
pub trait NoteSaver: Send + Sync + 'static {
    /// Whether the note has unsaved changes.
    fn is_dirty(&self, note_id: &str) -> Result<bool>;

    /// Whether saving involves encryption (retried on failure).
    fn is_encrypted(&self, note_id: &str) -> Result<bool>;

    /// Persist the note's current content.
    fn save(&self, note_id: &str) -> Result<()>;
}

/// Last error recorded for a note's saves
#[derive(Debug, Clone, Serialize)]
pub struct SaveError {
    pub code: String,
    pub message: String,
}

/// Per-note save bookkeeping
#[derive(Debug, Clone, Default, Serialize)]
pub struct SaveStatus {
    pub last_saved_at: Option<DateTime<Utc>>,
    pub pending: bool,
    pub last_error: Option<SaveError>,
    pub save_count: u64,
    /// Set after an authentication failure; cleared by `resume`.
    pub paused: bool,
}

enum Control {
    SetInterval(Duration),
    Stop,
}

struct Inner {
    saver: Arc<dyn NoteSaver>,
    statuses: StdMutex<HashMap<String, SaveStatus>>,
    /// Serializes saves per note. Ticks skip when held, explicit saves
    /// wait.
    save_locks: StdMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    retry_delay: Duration,
}

/// Schedules periodic saves for open notes.
pub struct AutoSaveEngine {
    inner: Arc<Inner>,
    /// Control channels into the per-note loops. Dropping a sender
    /// ends its loop once any in-flight save completes.
    tasks: StdMutex<HashMap<String, mpsc::Sender<Control>>>,
}

impl AutoSaveEngine {
    pub fn new(saver: Arc<dyn NoteSaver>) -> Self {
        Self::with_retry_delay(saver, RETRY_DELAY)
    }

    /// Shorter retry delays for tests.
    pub fn with_retry_delay(saver: Arc<dyn NoteSaver>, retry_delay: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                saver,
                statuses: StdMutex::new(HashMap::new()),
                save_locks: StdMutex::new(HashMap::new()),
                retry_delay,
            }),
            tasks: StdMutex::new(HashMap::new()),
        }
    }

    /// Start (or retune) auto-save for a note. Starting an already
    /// started note just updates its interval.
    pub fn start(&self, note_id: &str, interval: Duration) -> Result<()> {
        if interval.is_zero() {
            return Err(AppError::Validation(
                "auto-save interval must be positive".into(),
            ));
        }
        let mut tasks = self.lock_tasks()?;
        if let Some(tx) = tasks.get(note_id) {
            // Already running; a full channel means the task is wedged,
            // treat it as gone and restart below.
            if tx.try_send(Control::SetInterval(interval)).is_ok() {
                return Ok(());
            }
            tasks.remove(note_id);
        }

        self.inner.lock_statuses()?.entry(note_id.to_string()).or_default();

        let (tx, rx) = mpsc::channel(8);
        let inner = Arc::clone(&self.inner);
        let id = note_id.to_string();
        tokio::spawn(run_note_loop(inner, id, interval, rx));
        tasks.insert(note_id.to_string(), tx);
        log::info!("note {note_id}: auto-save started every {interval:?}");
        Ok(())
    }

    /// Stop auto-save for a note. Stopping an unstarted note is a
    /// no-op. Status is kept for inspection.
    pub fn stop(&self, note_id: &str) -> Result<()> {
        let tx = self.lock_tasks()?.remove(note_id);
        if let Some(tx) = tx {
            // Best effort; dropping the sender ends the loop too, and
            // either way an in-flight save runs to completion.
            let _ = tx.try_send(Control::Stop);
            log::info!("note {note_id}: auto-save stopped");
        }
        Ok(())
    }

    /// Save immediately, waiting for any in-flight save to finish
    /// first. Works for paused notes too; a successful explicit save
    /// does not unpause.
    pub async fn save_now(&self, note_id: &str) -> Result<()> {
        if !self.inner.lock_statuses()?.contains_key(note_id) {
            return Err(AppError::NotFound(format!(
                "auto-save is not tracking note {note_id}"
            )));
        }
        let lock = self.inner.save_lock(note_id)?;
        let _guard = lock.lock().await;
        self.inner.save_with_retry(note_id).await
    }

    /// Clear the pause set by an authentication failure.
    pub fn resume(&self, note_id: &str) -> Result<()> {
        let mut statuses = self.inner.lock_statuses()?;
        if let Some(status) = statuses.get_mut(note_id) {
            status.paused = false;
            status.last_error = None;
        }
        Ok(())
    }

    pub fn is_active(&self, note_id: &str) -> Result<bool> {
        Ok(self.lock_tasks()?.contains_key(note_id))
    }

    pub fn status(&self, note_id: &str) -> Result<Option<SaveStatus>> {
        Ok(self.inner.lock_statuses()?.get(note_id).cloned())
    }

    pub fn all_statuses(&self) -> Result<HashMap<String, SaveStatus>> {
        Ok(self.inner.lock_statuses()?.clone())
    }

    /// Stop every note's auto-save task.
    pub fn shutdown(&self) -> Result<()> {
        let mut tasks = self.lock_tasks()?;
        for (note_id, tx) in tasks.drain() {
            let _ = tx.try_send(Control::Stop);
            log::debug!("note {note_id}: auto-save stopped at shutdown");
        }
        Ok(())
    }

    fn lock_tasks(&self) -> Result<MutexGuard<'_, HashMap<String, mpsc::Sender<Control>>>> {
        self.tasks
            .lock()
            .map_err(|_| AppError::Internal("auto-save task table poisoned".into()))
    }
}

async fn run_note_loop(
    inner: Arc<Inner>,
    note_id: String,
    mut interval: Duration,
    mut rx: mpsc::Receiver<Control>,
) {
    loop {
        tokio::select! {
            _ = sleep(interval) => {
                if let Err(err) = inner.tick(&note_id).await {
                    log::error!("note {note_id}: auto-save tick failed: {err}");
                }
            }
            msg = rx.recv() => match msg {
                Some(Control::SetInterval(new_interval)) => interval = new_interval,
                Some(Control::Stop) | None => break,
            }
        }
    }
}

impl Inner {
    /// One timer firing: skip clean or paused notes, skip when a save
    /// is already running.
    async fn tick(&self, note_id: &str) -> Result<()> {
        if self
            .lock_statuses()?
            .get(note_id)
            .map(|s| s.paused)
            .unwrap_or(false)
        {
            return Ok(());
        }
        if !self.saver.is_dirty(note_id)? {
            return Ok(());
        }
        let lock = self.save_lock(note_id)?;
        let Ok(_guard) = lock.try_lock() else {
            // An explicit save is running; this tick's work is covered.
            return Ok(());
        };
        match self.save_with_retry(note_id).await {
            Ok(()) => Ok(()),
            Err(err) => {
                log::warn!("note {note_id}: auto-save failed: {err}");
                Ok(())
            }
        }
    }

    /// Run one save, retrying encrypted saves with a linear backoff.
    /// Status is updated either way; auth failures pause the note.
    async fn save_with_retry(&self, note_id: &str) -> Result<()> {
        self.set_pending(note_id, true)?;
        let encrypted = self.saver.is_encrypted(note_id).unwrap_or(false);
        let attempts = if encrypted { MAX_SAVE_ATTEMPTS } else { 1 };

        let mut outcome = Ok(());
        for attempt in 1..=attempts {
            outcome = self.saver.save(note_id);
            match &outcome {
                Ok(()) => break,
                Err(err) if err.is_auth_failure() => break,
                Err(err) => {
                    if attempt < attempts {
                        log::warn!(
                            "note {note_id}: save attempt {attempt} failed ({err}), retrying"
                        );
                        sleep(self.retry_delay * attempt).await;
                    }
                }
            }
        }

        let mut statuses = self.lock_statuses()?;
        let status = statuses.entry(note_id.to_string()).or_default();
        status.pending = false;
        match &outcome {
            Ok(()) => {
                status.last_saved_at = Some(Utc::now());
                status.save_count += 1;
                status.last_error = None;
            }
            Err(err) => {
                status.last_error = Some(SaveError {
                    code: err.code().to_string(),
                    message: err.to_string(),
                });
                if err.is_auth_failure() {
                    status.paused = true;
                    log::warn!("note {note_id}: auto-save paused after auth failure");
                }
            }
        }
        outcome
    }

    fn set_pending(&self, note_id: &str, pending: bool) -> Result<()> {
        let mut statuses = self.lock_statuses()?;
        statuses.entry(note_id.to_string()).or_default().pending = pending;
        Ok(())
    }

    fn save_lock(&self, note_id: &str) -> Result<Arc<AsyncMutex<()>>> {
        let mut locks = self
            .save_locks
            .lock()
            .map_err(|_| AppError::Internal("auto-save lock table poisoned".into()))?;
        Ok(Arc::clone(
            locks
                .entry(note_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
        ))
    }

    fn lock_statuses(&self) -> Result<MutexGuard<'_, HashMap<String, SaveStatus>>> {
        self.statuses
            .lock()
            .map_err(|_| AppError::Internal("auto-save status table poisoned".into()))
    }
}
