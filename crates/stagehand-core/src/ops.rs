//! Acknowledge-then-poll bookkeeping for long-running requests.
//!
//! A handler calls [`AsyncOperationTable::begin`] to obtain an [`AckToken`],
//! hands the work to another execution context, and returns the token to the
//! client straight away. The worker later settles the entry with
//! [`complete`](AsyncOperationTable::complete) or
//! [`fail`](AsyncOperationTable::fail), and the client collects the outcome
//! with [`poll`](AsyncOperationTable::poll).
//!
//! Terminal entries are removed by the first poll that observes them. A poll
//! that cancels a pending entry removes it as well and remembers the token, so
//! a worker that finishes afterwards gets [`Settlement::DiscardedAfterCancel`]
//! instead of resurrecting the entry.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

const OPS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::ops");

/// Number of canceled tokens remembered for discarding late results.
const CANCELED_MEMORY: usize = 256;

/// Callback run when a client cancels a pending operation.
pub type CancelHook = Box<dyn FnOnce() + Send>;

/// Opaque token identifying an asynchronous operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AckToken(String);

impl AckToken {
    fn generate() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_nanos())
            .unwrap_or_default();
        Self(format!("ack-{nanos:x}-{}", Uuid::new_v4().simple()))
    }

    /// Borrows the token text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for AckToken {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl fmt::Display for AckToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle state of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    /// Work has been scheduled but not settled.
    Pending,
    /// Work finished and produced a payload.
    Complete,
    /// Work finished with a failure message.
    Error,
    /// The client abandoned the operation.
    Canceled,
}

impl OperationStatus {
    /// Returns the wire name of the status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Complete => "complete",
            Self::Error => "error",
            Self::Canceled => "canceled",
        }
    }
}

/// How a cancellation request related to the operation's completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelResolution {
    /// The poll did not ask for cancellation.
    NotRequested,
    /// The operation was still pending and is now canceled.
    CanceledBeforeCompletion,
    /// The operation had already settled; its real outcome is reported.
    CompletedBeforeCancel,
}

/// Outcome observed by a poll.
#[derive(Debug, Clone, PartialEq)]
pub struct PollReport {
    /// Token that was polled.
    pub token: AckToken,
    /// Observed status.
    pub status: OperationStatus,
    /// Progress or failure message.
    pub message: String,
    /// Result payload for completed operations.
    pub payload: Option<Value>,
    /// How any requested cancellation was resolved.
    pub cancel: CancelResolution,
}

/// What happened to a result handed back by a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// The result was stored for the next poll.
    Recorded,
    /// The client canceled first; the result was dropped.
    DiscardedAfterCancel,
    /// The entry was already settled; the first result stands.
    AlreadySettled,
    /// No such operation is known.
    UnknownToken,
}

/// Failures reported by the operation table.
#[derive(Debug, Error)]
pub enum OpsError {
    /// The token was never issued or its outcome was already collected.
    #[error("operation token '{token}' not found")]
    NotFound { token: AckToken },
    /// A previous holder of the table lock panicked.
    #[error("operation table lock poisoned")]
    Poisoned,
}

struct Entry {
    status: OperationStatus,
    message: String,
    payload: Option<Value>,
    cancel_hook: Option<CancelHook>,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<AckToken, Entry>,
    canceled: VecDeque<AckToken>,
}

impl Inner {
    fn remember_canceled(&mut self, token: AckToken) {
        if self.canceled.len() == CANCELED_MEMORY {
            self.canceled.pop_front();
        }
        self.canceled.push_back(token);
    }
}

/// Thread-safe table of in-flight operations.
#[derive(Default)]
pub struct AsyncOperationTable {
    inner: Mutex<Inner>,
}

impl AsyncOperationTable {
    /// Builds an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a pending operation and returns its token.
    ///
    /// # Errors
    ///
    /// Fails only when the lock is poisoned.
    pub fn begin(&self, message: impl Into<String>) -> Result<AckToken, OpsError> {
        self.insert(message.into(), None)
    }

    /// Registers a pending operation whose worker can be told to stop.
    ///
    /// # Errors
    ///
    /// Fails only when the lock is poisoned.
    pub fn begin_with_cancel(
        &self,
        message: impl Into<String>,
        hook: CancelHook,
    ) -> Result<AckToken, OpsError> {
        self.insert(message.into(), Some(hook))
    }

    /// Stores a successful result.
    ///
    /// # Errors
    ///
    /// Fails only when the lock is poisoned.
    pub fn complete(&self, token: &AckToken, payload: Value) -> Result<Settlement, OpsError> {
        self.settle(token, OperationStatus::Complete, String::from("complete"), Some(payload))
    }

    /// Stores a failure.
    ///
    /// # Errors
    ///
    /// Fails only when the lock is poisoned.
    pub fn fail(&self, token: &AckToken, message: impl Into<String>) -> Result<Settlement, OpsError> {
        self.settle(token, OperationStatus::Error, message.into(), None)
    }

    /// Reports the operation's state, optionally canceling it.
    ///
    /// Canceling a pending operation runs its hook (outside the table lock)
    /// and removes the entry. Any poll that observes a terminal state removes
    /// the entry too, so the next poll reports [`OpsError::NotFound`].
    ///
    /// # Errors
    ///
    /// Returns [`OpsError::NotFound`] for unknown or already collected tokens.
    pub fn poll(&self, token: &AckToken, cancel: bool) -> Result<PollReport, OpsError> {
        let mut inner = self.lock()?;
        let Some(entry) = inner.entries.get_mut(token) else {
            return Err(OpsError::NotFound {
                token: token.clone(),
            });
        };

        if entry.status == OperationStatus::Pending && !cancel {
            return Ok(PollReport {
                token: token.clone(),
                status: OperationStatus::Pending,
                message: entry.message.clone(),
                payload: None,
                cancel: CancelResolution::NotRequested,
            });
        }

        let Some(mut entry) = inner.entries.remove(token) else {
            return Err(OpsError::NotFound {
                token: token.clone(),
            });
        };

        if entry.status == OperationStatus::Pending {
            inner.remember_canceled(token.clone());
            drop(inner);
            if let Some(hook) = entry.cancel_hook.take() {
                hook();
            }
            debug!(target: OPS_TARGET, %token, "operation canceled before completion");
            return Ok(PollReport {
                token: token.clone(),
                status: OperationStatus::Canceled,
                message: String::from("canceled by client"),
                payload: None,
                cancel: CancelResolution::CanceledBeforeCompletion,
            });
        }

        debug!(
            target: OPS_TARGET,
            %token,
            status = entry.status.as_str(),
            "operation outcome collected"
        );
        Ok(PollReport {
            token: token.clone(),
            status: entry.status,
            message: entry.message,
            payload: entry.payload,
            cancel: if cancel {
                CancelResolution::CompletedBeforeCancel
            } else {
                CancelResolution::NotRequested
            },
        })
    }

    /// Number of operations awaiting collection.
    ///
    /// # Errors
    ///
    /// Fails only when the lock is poisoned.
    pub fn len(&self) -> Result<usize, OpsError> {
        Ok(self.lock()?.entries.len())
    }

    /// Whether no operations await collection.
    ///
    /// # Errors
    ///
    /// Fails only when the lock is poisoned.
    pub fn is_empty(&self) -> Result<bool, OpsError> {
        Ok(self.lock()?.entries.is_empty())
    }

    fn insert(&self, message: String, hook: Option<CancelHook>) -> Result<AckToken, OpsError> {
        let mut inner = self.lock()?;
        let mut token = AckToken::generate();
        while inner.entries.contains_key(&token) {
            token = AckToken::generate();
        }
        inner.entries.insert(
            token.clone(),
            Entry {
                status: OperationStatus::Pending,
                message,
                payload: None,
                cancel_hook: hook,
            },
        );
        debug!(target: OPS_TARGET, %token, "operation started");
        Ok(token)
    }

    fn settle(
        &self,
        token: &AckToken,
        status: OperationStatus,
        message: String,
        payload: Option<Value>,
    ) -> Result<Settlement, OpsError> {
        let mut inner = self.lock()?;
        if let Some(entry) = inner.entries.get_mut(token) {
            if entry.status != OperationStatus::Pending {
                return Ok(Settlement::AlreadySettled);
            }
            entry.status = status;
            entry.message = message;
            entry.payload = payload;
            entry.cancel_hook = None;
            debug!(target: OPS_TARGET, %token, status = status.as_str(), "operation settled");
            return Ok(Settlement::Recorded);
        }
        if inner.canceled.contains(token) {
            debug!(target: OPS_TARGET, %token, "late result discarded after cancel");
            return Ok(Settlement::DiscardedAfterCancel);
        }
        Ok(Settlement::UnknownToken)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, OpsError> {
        self.inner.lock().map_err(|_| OpsError::Poisoned)
    }
}
