//! Debounced, atomic publication of the state snapshot.
//!
//! Mutations schedule a write; bursts inside one debounce window collapse
//! into a single flush. The flush itself writes to a temp file in the same
//! directory and renames over the target, so a concurrent reader never sees
//! a partial file.

use std::path::PathBuf;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

use crate::error::{Error, Result};
use crate::state::ObsState;

/// Publishes [`ObsState`] snapshots to a well-known file path.
#[derive(Debug)]
pub struct StatePublisher {
    path: PathBuf,
    debounce: Duration,
    pending: Option<ObsState>,
    deadline: Option<Instant>,
}

impl StatePublisher {
    /// Creates a publisher targeting `path`.
    #[must_use]
    pub fn new(path: PathBuf, debounce: Duration) -> Self {
        Self {
            path,
            debounce,
            pending: None,
            deadline: None,
        }
    }

    /// Schedules a write of `state`. If a write is already pending, the
    /// payload is replaced and the existing deadline stands, so a burst of
    /// mutations produces one flush.
    pub fn schedule(&mut self, state: &ObsState) {
        self.pending = Some(state.clone());
        if self.deadline.is_none() {
            self.deadline = Some(Instant::now() + self.debounce);
        }
    }

    /// Resolves when the debounce window elapses. Never resolves while no
    /// write is pending, which makes it safe as a `select!` branch.
    pub async fn debounce_elapsed(&self) {
        match self.deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }

    /// Flushes the pending snapshot, if any.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] on a failed write. The previous file is left in
    /// place; the next scheduled mutation retries.
    pub fn flush(&mut self) -> Result<()> {
        self.deadline = None;
        let Some(state) = self.pending.take() else {
            return Ok(());
        };
        self.write_atomic(&state)
    }

    /// Writes `state` immediately, discarding any pending debounced payload.
    /// Used for connect/disconnect transitions and the final shutdown flush.
    pub fn write_now(&mut self, state: &ObsState) -> Result<()> {
        self.pending = None;
        self.deadline = None;
        self.write_atomic(state)
    }

    fn write_atomic(&self, state: &ObsState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::io("creating state directory", e))?;
        }

        // Compact JSON; the file is machine-read.
        let json = serde_json::to_string(state)?;

        let temp_path = self.path.with_extension("json.tmp");
        std::fs::write(&temp_path, &json).map_err(|e| Error::io("writing temp state file", e))?;

        // Owner read/write only, set before the rename exposes the file.
        #[cfg(unix)]
        {
            let mut perms = std::fs::metadata(&temp_path)
                .map_err(|e| Error::io("reading temp file metadata", e))?
                .permissions();
            perms.set_mode(0o600);
            std::fs::set_permissions(&temp_path, perms)
                .map_err(|e| Error::io("setting file permissions", e))?;
        }

        std::fs::rename(&temp_path, &self.path)
            .map_err(|e| Error::io("renaming state file", e))?;

        debug!(path = %self.path.display(), "state file written");
        Ok(())
    }
}
