//! Structured health reporting for daemon lifecycle events.

use std::fmt;
use std::sync::Arc;

use stagehand_config::Config;

use crate::bootstrap::BootstrapError;
use crate::transport::TransportError;

/// Transports the daemon can serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Newline-delimited messages on standard input and output.
    Stdio,
    /// HTTP requests plus a server-sent event stream.
    Http,
}

impl TransportKind {
    /// Lower-case name used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stdio => "stdio",
            Self::Http => "http",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observer trait used to surface lifecycle events to telemetry sinks.
pub trait HealthReporter: Send + Sync {
    /// Invoked before configuration loading begins.
    fn bootstrap_starting(&self);

    /// Invoked after bootstrap completes successfully.
    fn bootstrap_succeeded(&self, config: &Config);

    /// Invoked when bootstrap fails.
    fn bootstrap_failed(&self, error: &BootstrapError);

    /// Invoked once a transport accepts traffic.
    fn transport_started(&self, kind: TransportKind, endpoint: &str);

    /// Invoked when a transport cannot be started.
    fn transport_failed(&self, kind: TransportKind, error: &TransportError);

    /// Invoked after every transport has stopped.
    fn shutdown_complete(&self);
}

impl<T> HealthReporter for Arc<T>
where
    T: HealthReporter,
{
    fn bootstrap_starting(&self) {
        (**self).bootstrap_starting();
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        (**self).bootstrap_succeeded(config);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        (**self).bootstrap_failed(error);
    }

    fn transport_started(&self, kind: TransportKind, endpoint: &str) {
        (**self).transport_started(kind, endpoint);
    }

    fn transport_failed(&self, kind: TransportKind, error: &TransportError) {
        (**self).transport_failed(kind, error);
    }

    fn shutdown_complete(&self) {
        (**self).shutdown_complete();
    }
}

/// Default reporter that records lifecycle events using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredHealthReporter;

impl StructuredHealthReporter {
    /// Builds a new reporter.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl HealthReporter for StructuredHealthReporter {
    fn bootstrap_starting(&self) {
        tracing::info!(
            target: "stagehandd::health",
            event = "bootstrap_starting",
            "starting daemon bootstrap"
        );
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        tracing::info!(
            target: "stagehandd::health",
            event = "bootstrap_succeeded",
            stdio = config.stdio_enabled(),
            http = config.http_enabled(),
            mapping_file = %config.mapping_file(),
            log_filter = %config.log_filter(),
            log_format = %config.log_format(),
            "daemon bootstrap completed"
        );
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        tracing::error!(
            target: "stagehandd::health",
            event = "bootstrap_failed",
            error = %error,
            "daemon bootstrap failed"
        );
    }

    fn transport_started(&self, kind: TransportKind, endpoint: &str) {
        tracing::info!(
            target: "stagehandd::health",
            event = "transport_started",
            transport = %kind,
            endpoint,
            "transport accepting requests"
        );
    }

    fn transport_failed(&self, kind: TransportKind, error: &TransportError) {
        tracing::error!(
            target: "stagehandd::health",
            event = "transport_failed",
            transport = %kind,
            error = %error,
            "transport failed to start"
        );
    }

    fn shutdown_complete(&self) {
        tracing::info!(
            target: "stagehandd::health",
            event = "shutdown_complete",
            "daemon stopped"
        );
    }
}
