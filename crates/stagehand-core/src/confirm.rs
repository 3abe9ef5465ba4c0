//! Single-use tokens gating two-phase destructive operations.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use thiserror::Error;
use uuid::Uuid;

/// A destructive request awaiting explicit confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingConfirmation {
    /// Token the client must echo back.
    pub token: String,
    /// Stage file the request concerns.
    pub file_path: Utf8PathBuf,
    /// Scene group the request would overwrite.
    pub group_name: String,
}

/// Failures reported by [`ConfirmationStore::consume`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfirmError {
    /// The token was never issued or has already been used.
    #[error("confirmation token not found")]
    NotFound,
    /// The token outlived its time-to-live.
    #[error("confirmation token expired")]
    Expired,
    /// A previous holder of the store lock panicked.
    #[error("confirmation store lock poisoned")]
    Poisoned,
}

struct Stashed {
    confirmation: PendingConfirmation,
    created_at: Instant,
}

/// Thread-safe store of pending confirmations.
pub struct ConfirmationStore {
    ttl: Duration,
    entries: Mutex<HashMap<String, Stashed>>,
}

impl ConfirmationStore {
    /// Builds a store whose tokens lapse after `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Records a pending confirmation and returns its token. Lapsed entries
    /// are purged on the way.
    ///
    /// # Errors
    ///
    /// Fails only when the lock is poisoned.
    pub fn stash(
        &self,
        file_path: Utf8PathBuf,
        group_name: impl Into<String>,
    ) -> Result<String, ConfirmError> {
        let mut entries = self.lock()?;
        let ttl = self.ttl;
        entries.retain(|_, stashed| stashed.created_at.elapsed() <= ttl);

        let token = format!("confirm-{}", Uuid::new_v4().simple());
        entries.insert(
            token.clone(),
            Stashed {
                confirmation: PendingConfirmation {
                    token: token.clone(),
                    file_path,
                    group_name: group_name.into(),
                },
                created_at: Instant::now(),
            },
        );
        Ok(token)
    }

    /// Removes and returns the confirmation for `token`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfirmError::NotFound`] for unknown or used tokens and
    /// [`ConfirmError::Expired`] for lapsed ones. Either way the token cannot
    /// be used again.
    pub fn consume(&self, token: &str) -> Result<PendingConfirmation, ConfirmError> {
        let stashed = self.lock()?.remove(token).ok_or(ConfirmError::NotFound)?;
        if stashed.created_at.elapsed() > self.ttl {
            return Err(ConfirmError::Expired);
        }
        Ok(stashed.confirmation)
    }

    /// Number of confirmations still held, lapsed or not.
    ///
    /// # Errors
    ///
    /// Fails only when the lock is poisoned.
    pub fn len(&self) -> Result<usize, ConfirmError> {
        Ok(self.lock()?.len())
    }

    /// Whether no confirmations are held.
    ///
    /// # Errors
    ///
    /// Fails only when the lock is poisoned.
    pub fn is_empty(&self) -> Result<bool, ConfirmError> {
        Ok(self.lock()?.is_empty())
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, Stashed>>, ConfirmError> {
        self.entries.lock().map_err(|_| ConfirmError::Poisoned)
    }
}
