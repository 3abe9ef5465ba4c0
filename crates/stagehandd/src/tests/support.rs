//! Shared doubles and fixtures for the daemon suites.

use std::ffi::OsString;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use ortho_config::{OrthoConfig, OrthoError};
use serde_json::{Value, json};
use tempfile::TempDir;

use stagehand_config::{Config, LogFormat};
use stagehand_core::{
    DocumentEngine, EngineError, GroupMappingStore, MemoryDocumentEngine, StageDocument,
    StageRegistry,
};

use crate::bootstrap::{BootstrapError, ConfigLoader};
use crate::dispatch::{Dispatcher, ServerContext};
use crate::events::{EventSink, ServerEvent};
use crate::health::{HealthReporter, TransportKind};
use crate::notes::OperatorNotes;
use crate::scene::{self, MemorySceneGraph, SceneHost};
use crate::transport::TransportError;

/// Notes every fixture server attaches to successful responses.
pub const FIXTURE_NOTES: &str = "Keep the hero car red";

/// Structured health events tracked during tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthEvent {
    BootstrapStarting,
    BootstrapSucceeded,
    BootstrapFailed(String),
    TransportStarted(TransportKind),
    TransportFailed(TransportKind),
    ShutdownComplete,
}

/// Reporter that keeps every lifecycle event in memory.
#[derive(Default)]
pub struct RecordingHealthReporter {
    events: Mutex<Vec<HealthEvent>>,
}

impl RecordingHealthReporter {
    /// Captures a copy of the recorded events.
    pub fn events(&self) -> Vec<HealthEvent> {
        self.events
            .lock()
            .expect("health reporter mutex poisoned")
            .clone()
    }

    fn record(&self, event: HealthEvent) {
        self.events
            .lock()
            .expect("health reporter mutex poisoned")
            .push(event);
    }
}

impl HealthReporter for RecordingHealthReporter {
    fn bootstrap_starting(&self) {
        self.record(HealthEvent::BootstrapStarting);
    }

    fn bootstrap_succeeded(&self, _config: &Config) {
        self.record(HealthEvent::BootstrapSucceeded);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        self.record(HealthEvent::BootstrapFailed(error.to_string()));
    }

    fn transport_started(&self, kind: TransportKind, _endpoint: &str) {
        self.record(HealthEvent::TransportStarted(kind));
    }

    fn transport_failed(&self, kind: TransportKind, _error: &TransportError) {
        self.record(HealthEvent::TransportFailed(kind));
    }

    fn shutdown_complete(&self) {
        self.record(HealthEvent::ShutdownComplete);
    }
}

/// Loader rooting the project and notes file in a temporary directory.
pub struct TestConfigLoader {
    dir: TempDir,
    http: bool,
    http_host: String,
    stdio: bool,
}

impl TestConfigLoader {
    /// Stdio only; the HTTP transport stays off so tests never contend for
    /// ports.
    #[must_use]
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("failed to create temporary project root"),
            http: false,
            http_host: String::from("127.0.0.1"),
            stdio: true,
        }
    }

    /// Enables HTTP on an OS-chosen loopback port.
    #[must_use]
    pub fn with_http(mut self) -> Self {
        self.http = true;
        self
    }

    /// Enables HTTP on `host` instead of the loopback default.
    #[must_use]
    pub fn with_http_host(mut self, host: &str) -> Self {
        self.http = true;
        self.http_host = host.to_owned();
        self
    }

    #[must_use]
    pub fn without_stdio(mut self) -> Self {
        self.stdio = false;
        self
    }

    pub fn root(&self) -> Utf8PathBuf {
        utf8(self.dir.path())
    }
}

impl ConfigLoader for TestConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Ok(Config {
            log_filter: Some(String::from("stagehandd=debug")),
            log_format: Some(LogFormat::Compact),
            disable_stdio: Some(!self.stdio),
            disable_http: Some(!self.http),
            http_host: Some(self.http_host.clone()),
            http_port: Some(0),
            project_root: Some(self.root()),
            notes_path: Some(self.root().join("notes.txt")),
            ..Config::default()
        })
    }
}

/// Loader that fails by passing a port that does not parse.
pub struct FailingConfigLoader;

impl ConfigLoader for FailingConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        let args = vec![
            OsString::from("stagehandd"),
            OsString::from("--http-port"),
            OsString::from("not-a-port"),
        ];
        Config::load_from_iter(args)
    }
}

/// Engine whose every document operation fails with an I/O error.
pub struct FailingEngine;

impl DocumentEngine for FailingEngine {
    fn name(&self) -> &str {
        "failing"
    }

    fn version(&self) -> &str {
        "0"
    }

    fn create(&self, path: Option<&Utf8Path>) -> Result<Box<dyn StageDocument>, EngineError> {
        Err(EngineError::Write {
            path: path.map_or_else(|| Utf8PathBuf::from("<memory>"), Utf8Path::to_owned),
            source: std::io::Error::other("device unavailable"),
        })
    }

    fn open(&self, path: &Utf8Path) -> Result<Box<dyn StageDocument>, EngineError> {
        Err(EngineError::Read {
            path: path.to_owned(),
            source: std::io::Error::other("device unavailable"),
        })
    }
}

/// Sink recording every published event.
#[derive(Default)]
pub struct CollectingSink {
    events: Mutex<Vec<ServerEvent>>,
}

impl CollectingSink {
    pub fn names(&self) -> Vec<String> {
        self.events
            .lock()
            .expect("event sink mutex poisoned")
            .iter()
            .map(|event| event.name.clone())
            .collect()
    }

    pub fn last(&self, name: &str) -> Option<ServerEvent> {
        self.events
            .lock()
            .expect("event sink mutex poisoned")
            .iter()
            .rev()
            .find(|event| event.name == name)
            .cloned()
    }
}

impl EventSink for CollectingSink {
    fn publish(&self, event: &ServerEvent) {
        self.events
            .lock()
            .expect("event sink mutex poisoned")
            .push(event.clone());
    }
}

/// A dispatcher wired to real services, with a scene host pumped on a
/// background thread standing in for the host's main loop.
pub struct TestServer {
    dir: TempDir,
    dispatcher: Dispatcher,
    events: Arc<CollectingSink>,
    stop: Arc<AtomicBool>,
    host: Option<JoinHandle<()>>,
}

impl TestServer {
    pub fn start() -> Self {
        Self::with_engine(Arc::new(MemoryDocumentEngine::new()))
    }

    /// Scene contents: `/root/Car` (a mesh, selected) holding `/root/Car/Wheel`,
    /// and an empty `/root/Lights`.
    pub fn with_engine(engine: Arc<dyn DocumentEngine>) -> Self {
        let dir = TempDir::new().expect("failed to create temporary project root");
        let root = utf8(dir.path());
        let (queue, receiver) = scene::channel();
        let stop = Arc::new(AtomicBool::new(false));
        let host_stop = Arc::clone(&stop);
        let scene_file = root.join("scene.json");
        let host = thread::spawn(move || {
            let mut graph = MemorySceneGraph::new().with_scene_path(scene_file);
            graph.add_node("/root", "Car", "MeshInstance3D").expect("add car");
            graph.add_node("/root/Car", "Wheel", "MeshInstance3D").expect("add wheel");
            graph.add_node("/root", "Lights", "Node3D").expect("add lights");
            graph.select(["/root/Car"]);
            let mut host = SceneHost::new(Box::new(graph), receiver);
            host.run_until(&host_stop, Duration::from_millis(5));
        });

        let context = ServerContext::new(
            StageRegistry::new(engine),
            GroupMappingStore::open(root.join("mappings.json")),
            queue,
            OperatorNotes::fixed(FIXTURE_NOTES),
        )
        .with_scene_timeout(Duration::from_secs(2))
        .with_host_version("test host 1.0");
        let events = Arc::new(CollectingSink::default());
        context.events().subscribe(Arc::clone(&events) as Arc<dyn EventSink>);

        Self {
            dir,
            dispatcher: Dispatcher::new(Arc::new(context)),
            events,
            stop,
            host: Some(host),
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn events(&self) -> &CollectingSink {
        &self.events
    }

    /// Absolute path of `name` inside the server's temporary directory.
    pub fn path(&self, name: &str) -> String {
        utf8(self.dir.path()).join(name).into_string()
    }

    /// Sends a raw message and parses the reply, if any.
    pub fn send(&self, message: &str) -> Option<Value> {
        self.dispatcher
            .handle(message.as_bytes())
            .map(|line| serde_json::from_str(&line).expect("response is JSON"))
    }

    /// Sends a request and returns the full response envelope.
    pub fn call(&self, method: &str, params: Value) -> Value {
        self.send(&request(1, method, params).to_string())
            .expect("requests with an id are answered")
    }

    /// Sends a request that must succeed and returns its result.
    pub fn ok(&self, method: &str, params: Value) -> Value {
        let response = self.call(method, params);
        assert!(
            response.get("error").is_none(),
            "{method} failed: {response}"
        );
        response["result"].clone()
    }

    /// Sends a request that must fail and returns its error object.
    pub fn err(&self, method: &str, params: Value) -> Value {
        let response = self.call(method, params);
        assert!(
            response.get("result").is_none(),
            "{method} unexpectedly succeeded: {response}"
        );
        response["error"].clone()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(host) = self.host.take() {
            host.join().expect("scene host thread panicked");
        }
    }
}

/// Builds a JSON-RPC request with nested params.
pub fn request(id: u64, method: &str, params: Value) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params})
}

pub fn utf8(path: &std::path::Path) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(path.to_path_buf()).expect("temporary paths are UTF-8")
}

/// Polls `scene/dtack` until the operation leaves `pending`.
pub fn settle(server: &TestServer, ack: &str) -> Value {
    for _ in 0..200 {
        let report = server.ok("scene/dtack", json!({"ack": ack}));
        if report["status"] != "pending" {
            return report;
        }
        thread::sleep(Duration::from_millis(5));
    }
    panic!("operation {ack} never settled");
}

/// Strips surrounding double quotes from a step argument.
pub fn strip_quotes(text: &str) -> &str {
    text.trim_matches('"')
}
