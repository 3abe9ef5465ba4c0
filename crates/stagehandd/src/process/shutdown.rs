use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use thiserror::Error;
use tracing::info;

use super::PROCESS_TARGET;

/// Non-blocking view of whether the process has been asked to stop. The
/// main loop polls it between scene pumps.
pub trait ShutdownSignal: Send {
    /// Returns `true` once shutdown should proceed.
    fn requested(&mut self) -> bool;
}

/// Errors reported by shutdown signal listeners.
#[derive(Debug, Error)]
pub enum ShutdownError {
    /// Installing signal handlers failed.
    #[error("failed to install signal handlers: {source}")]
    Install {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Shutdown listener raised by termination signals.
#[derive(Debug)]
pub struct SystemShutdownSignal {
    flag: Arc<AtomicBool>,
    logged: bool,
}

impl SystemShutdownSignal {
    /// Registers handlers for `SIGTERM`, `SIGINT`, `SIGQUIT` and `SIGHUP`.
    pub fn install() -> Result<Self, ShutdownError> {
        let flag = Arc::new(AtomicBool::new(false));
        for signal in [SIGTERM, SIGINT, SIGQUIT, SIGHUP] {
            signal_hook::flag::register(signal, Arc::clone(&flag))
                .map_err(|source| ShutdownError::Install { source })?;
        }
        Ok(Self {
            flag,
            logged: false,
        })
    }
}

impl ShutdownSignal for SystemShutdownSignal {
    fn requested(&mut self) -> bool {
        let raised = self.flag.load(Ordering::SeqCst);
        if raised && !self.logged {
            info!(target: PROCESS_TARGET, "shutdown signal received");
            self.logged = true;
        }
        raised
    }
}

/// Shutdown driven by a shared flag, for embedding hosts and tests.
#[derive(Debug, Clone, Default)]
pub struct FlagShutdown {
    flag: Arc<AtomicBool>,
}

impl FlagShutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests shutdown.
    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }
}

impl ShutdownSignal for FlagShutdown {
    fn requested(&mut self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn flag_shutdown_is_shared_between_clones() {
        let trigger = FlagShutdown::new();
        let mut signal = trigger.clone();
        assert!(!signal.requested());
        trigger.trigger();
        assert!(signal.requested());
    }
}
