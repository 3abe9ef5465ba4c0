//! Daemon bootstrap orchestration.

use std::sync::Arc;

use ortho_config::{OrthoConfig, OrthoError};
use thiserror::Error;

use stagehand_config::{Config, ConfigError};
use stagehand_core::{DocumentEngine, GroupMappingStore, StageRegistry};

use crate::dispatch::{Dispatcher, ServerContext};
use crate::health::HealthReporter;
use crate::notes::OperatorNotes;
use crate::scene::{self, SceneGraph, SceneHost};
use crate::telemetry::{self, TelemetryError, TelemetryHandle};

/// Trait abstracting configuration loading for testability.
pub trait ConfigLoader: Send + Sync {
    /// Loads the daemon configuration.
    fn load(&self) -> Result<Config, Arc<OrthoError>>;
}

/// Loader that delegates to [`Config::load`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemConfigLoader;

impl ConfigLoader for SystemConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Config::load()
    }
}

/// Loader returning a configuration resolved elsewhere.
#[derive(Debug, Clone)]
pub struct StaticConfigLoader {
    config: Config,
}

impl StaticConfigLoader {
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

impl ConfigLoader for StaticConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Ok(self.config.clone())
    }
}

/// Errors surfaced during bootstrap.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Configuration failed to load.
    #[error("failed to load configuration: {source}")]
    Configuration {
        /// Underlying loader error.
        #[source]
        source: Arc<OrthoError>,
    },
    /// Configuration loaded but its values cannot be used together.
    #[error("invalid configuration: {source}")]
    Invalid {
        #[source]
        source: ConfigError,
    },
    /// Telemetry initialisation failed.
    #[error("failed to initialise telemetry: {source}")]
    Telemetry {
        /// Underlying telemetry error.
        #[source]
        source: TelemetryError,
    },
}

/// A bootstrapped daemon, ready for its transports to start.
pub struct Daemon {
    config: Config,
    telemetry: TelemetryHandle,
    reporter: Arc<dyn HealthReporter>,
    dispatcher: Dispatcher,
    host: SceneHost,
}

impl Daemon {
    /// Accessor for the resolved configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Accessor for the telemetry handle, primarily useful for testing.
    #[must_use]
    pub fn telemetry(&self) -> TelemetryHandle {
        self.telemetry
    }

    /// Dispatcher shared by every transport.
    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub(crate) fn reporter(&self) -> &Arc<dyn HealthReporter> {
        &self.reporter
    }

    pub(crate) fn into_host(self) -> SceneHost {
        self.host
    }
}

/// Bootstraps the daemon using the supplied collaborators.
///
/// `scene` becomes owned by the returned daemon's scene host; it is only
/// ever touched by the thread that later serves the daemon.
pub fn bootstrap_with(
    loader: &dyn ConfigLoader,
    reporter: Arc<dyn HealthReporter>,
    engine: Arc<dyn DocumentEngine>,
    scene: Box<dyn SceneGraph>,
) -> Result<Daemon, BootstrapError> {
    reporter.bootstrap_starting();

    let config = match loader.load() {
        Ok(config) => config,
        Err(source) => {
            let error = BootstrapError::Configuration { source };
            reporter.bootstrap_failed(&error);
            return Err(error);
        }
    };

    if let Err(source) = config.validate() {
        let error = BootstrapError::Invalid { source };
        reporter.bootstrap_failed(&error);
        return Err(error);
    }

    let telemetry = match telemetry::initialise(&config) {
        Ok(handle) => handle,
        Err(source) => {
            let error = BootstrapError::Telemetry { source };
            reporter.bootstrap_failed(&error);
            return Err(error);
        }
    };

    let host_version = scene.host_version();
    let (queue, receiver) = scene::channel();
    let host = SceneHost::new(scene, receiver);
    let context = ServerContext::new(
        StageRegistry::new(engine),
        GroupMappingStore::open(config.mapping_file()),
        queue,
        OperatorNotes::load(config.notes_path()),
    )
    .with_confirmation_ttl(config.confirmation_ttl())
    .with_scene_timeout(config.scene_call_timeout())
    .with_host_version(host_version);

    reporter.bootstrap_succeeded(&config);
    Ok(Daemon {
        config,
        telemetry,
        reporter,
        dispatcher: Dispatcher::new(Arc::new(context)),
        host,
    })
}
