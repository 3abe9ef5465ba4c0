//! Supervises daemon launch sequencing and the main-thread run loop.

use std::sync::Arc;
use std::time::Instant;

use serde_json::json;
use tracing::{error, info, warn};

use stagehand_config::Config;
use stagehand_core::MemoryDocumentEngine;

use crate::bootstrap::{ConfigLoader, Daemon, StaticConfigLoader, SystemConfigLoader, bootstrap_with};
use crate::events::EventSink;
use crate::health::{HealthReporter, StructuredHealthReporter, TransportKind};
use crate::scene::MemorySceneGraph;
use crate::telemetry;
use crate::transport::{
    HttpListener, HttpRouter, LineSource, LineTransport, SharedOutput, SseHub, StdinSource,
    TransportError, TransportHandle,
};

use super::errors::LaunchError;
use super::shutdown::{ShutdownSignal, SystemShutdownSignal};
use super::{MAIN_LOOP_TICK, NOTES_POLL_INTERVAL, PROCESS_TARGET};

/// File the standalone scene graph saves to when no path is given.
const SCENE_FILE_NAME: &str = "stagehand_scene.json";

/// Runs the daemon using the production collaborators: configuration from
/// the environment, the in-memory document engine and scene graph, standard
/// input and output, and termination signals.
pub fn run_daemon() -> Result<(), LaunchError> {
    let mut shutdown = SystemShutdownSignal::install()?;
    let config = SystemConfigLoader.load()?;
    info!(target: PROCESS_TARGET, "starting daemon runtime");

    let scene = MemorySceneGraph::new().with_scene_path(config.project_root().join(SCENE_FILE_NAME));
    let reporter: Arc<dyn HealthReporter> = Arc::new(StructuredHealthReporter::new());
    let daemon = bootstrap_with(
        &StaticConfigLoader::new(config),
        reporter,
        Arc::new(MemoryDocumentEngine::new()),
        Box::new(scene),
    )?;
    serve(
        daemon,
        Box::new(StdinSource::new()),
        SharedOutput::stdout(),
        &mut shutdown,
    )
}

/// Logs a launch failure. Startup can fail before configuration reaches
/// telemetry, so the default subscriber is installed when none exists yet.
pub fn report_launch_failure(failure: &LaunchError) {
    if let Err(telemetry_error) = telemetry::initialise(&Config::default()) {
        warn!(target: PROCESS_TARGET, error = %telemetry_error, "default telemetry unavailable");
    }
    error!(target: PROCESS_TARGET, error = %failure, "daemon exited with an error");
}

/// Starts the enabled transports and pumps the scene host on the calling
/// thread until `shutdown` fires or every transport has stopped.
pub fn serve(
    daemon: Daemon,
    input: Box<dyn LineSource>,
    output: SharedOutput,
    shutdown: &mut dyn ShutdownSignal,
) -> Result<(), LaunchError> {
    let reporter = Arc::clone(daemon.reporter());
    let dispatcher = daemon.dispatcher().clone();
    let config = daemon.config().clone();
    let mut host = daemon.into_host();
    let events = dispatcher.context().events().clone();

    let mut transports: Vec<TransportHandle> = Vec::new();
    if config.stdio_enabled() {
        events.subscribe(Arc::new(output.clone()));
        match LineTransport::start(input, dispatcher.clone(), output) {
            Ok(handle) => {
                reporter.transport_started(TransportKind::Stdio, "stdio");
                transports.push(handle);
            }
            Err(error) => {
                reporter.transport_failed(TransportKind::Stdio, &error);
                return Err(error.into());
            }
        }
    }

    if config.http_enabled() {
        let started = HttpListener::bind(config.http_host(), config.http_port()).and_then(|listener| {
            let addr = listener.local_addr();
            let hub = Arc::new(SseHub::new());
            let sink: Arc<dyn EventSink> = hub.clone();
            events.subscribe(sink);
            let router = HttpRouter::new(dispatcher.clone(), hub, config.request_timeout());
            listener.start(Arc::new(router)).map(|handle| (addr, handle))
        });
        match started {
            Ok((addr, handle)) => {
                reporter.transport_started(TransportKind::Http, &addr.to_string());
                transports.push(handle);
            }
            Err(error) => {
                reporter.transport_failed(TransportKind::Http, &error);
                if let Err(stop_error) = stop_all(transports) {
                    warn!(
                        target: PROCESS_TARGET,
                        error = %stop_error,
                        "stdio transport did not stop after HTTP failure"
                    );
                }
                return Err(error.into());
            }
        }
    }

    let mut notes_checked = Instant::now();
    loop {
        if shutdown.requested() {
            break;
        }
        if host.pump_for(MAIN_LOOP_TICK).is_none() {
            warn!(target: PROCESS_TARGET, "scene queue closed; stopping");
            break;
        }
        if notes_checked.elapsed() >= NOTES_POLL_INTERVAL {
            if let Some(notes) = dispatcher.context().notes().refresh() {
                events.publish("notes_changed", json!({ "notes": notes }));
            }
            notes_checked = Instant::now();
        }
        if transports.iter().all(TransportHandle::is_finished) {
            info!(target: PROCESS_TARGET, "every transport has stopped");
            break;
        }
    }

    let outcome = stop_all(transports);
    reporter.shutdown_complete();
    info!(target: PROCESS_TARGET, "shutdown sequence completed");
    outcome.map_err(LaunchError::from)
}

/// Signals every transport, then joins them. Reports the first failure.
fn stop_all(transports: Vec<TransportHandle>) -> Result<(), TransportError> {
    for transport in &transports {
        transport.shutdown();
    }
    let mut first_error = None;
    for transport in transports {
        if let Err(error) = transport.join() {
            warn!(target: PROCESS_TARGET, %error, "transport did not stop cleanly");
            first_error.get_or_insert(error);
        }
    }
    first_error.map_or(Ok(()), Err)
}
