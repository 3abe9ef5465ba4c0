//! Transports carrying protocol messages to the dispatcher.
//!
//! Two transports exist: newline-delimited messages on standard input and
//! output, and HTTP with a server-sent event stream for notifications. Each
//! runs on its own thread and stops when its [`TransportHandle`] asks it to.

mod errors;
pub mod http;
pub mod line;
#[cfg(unix)]
mod poll;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

pub use self::errors::TransportError;
pub use self::http::{HttpListener, HttpRouter, SseHub};
pub use self::line::{LineEvent, LineSource, LineTransport, ReaderSource, SharedOutput, StdinSource};

/// Tracing target for transport activity.
pub(crate) const TRANSPORT_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::transport");

/// Handle to a transport's background thread.
pub struct TransportHandle {
    name: &'static str,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl TransportHandle {
    /// Runs `body` on a named thread, passing it the shutdown flag.
    pub(crate) fn spawn<F>(name: &'static str, body: F) -> Result<Self, TransportError>
    where
        F: FnOnce(Arc<AtomicBool>) + Send + 'static,
    {
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&shutdown);
        let handle = thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || body(flag))
            .map_err(|source| TransportError::Spawn { name, source })?;
        Ok(Self {
            name,
            shutdown,
            handle: Some(handle),
        })
    }

    /// Asks the thread to stop at its next tick.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Whether the thread has already returned.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Waits for the thread to return.
    pub fn join(mut self) -> Result<(), TransportError> {
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| TransportError::ThreadPanic { name: self.name }),
            None => Ok(()),
        }
    }
}

impl Drop for TransportHandle {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}
