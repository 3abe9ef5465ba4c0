//! Process supervision: signal handling and the daemon's run loop.

mod errors;
pub(crate) mod launch;
pub(crate) mod shutdown;

use std::time::Duration;

pub use errors::LaunchError;
pub use launch::{report_launch_failure, run_daemon, serve};
pub use shutdown::{FlagShutdown, ShutdownError, ShutdownSignal, SystemShutdownSignal};

pub(crate) const PROCESS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::process");
/// How long the main loop waits for scene tasks before checking signals.
pub(crate) const MAIN_LOOP_TICK: Duration = Duration::from_millis(20);
/// How often the notes file is checked for edits.
pub(crate) const NOTES_POLL_INTERVAL: Duration = Duration::from_secs(1);
