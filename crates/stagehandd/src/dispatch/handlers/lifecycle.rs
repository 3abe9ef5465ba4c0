use std::sync::atomic::Ordering;

use serde_json::{Value, json};
use tracing::info;

use crate::dispatch::context::ServerContext;
use crate::dispatch::errors::DispatchError;
use crate::dispatch::request::Params;
use crate::dispatch::router::{DISPATCH_TARGET, METHODS};

/// Protocol revision announced during the handshake.
pub(crate) const PROTOCOL_VERSION: &str = "2024-11-05";
const SERVER_NAME: &str = "stagehand";

pub(crate) fn initialize(
    context: &ServerContext,
    _params: &Params<'_>,
) -> Result<Value, DispatchError> {
    if !context.initialized.swap(true, Ordering::SeqCst) {
        info!(target: DISPATCH_TARGET, "client session initialised");
    }
    let tools: Vec<Value> = METHODS
        .iter()
        .filter(|entry| entry.advertised)
        .map(|entry| json!({"name": entry.name, "description": entry.description}))
        .collect();
    let engine = context.registry.engine();
    Ok(json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {"tools": {"tools": tools}},
        "serverInfo": {"name": SERVER_NAME, "version": env!("CARGO_PKG_VERSION")},
        "_meta": {
            "serverVersion": env!("CARGO_PKG_VERSION"),
            "hostVersion": context.host_version,
            "engineVersion": format!("{} {}", engine.name(), engine.version()),
        },
    }))
}

pub(crate) fn initialized(
    _context: &ServerContext,
    _params: &Params<'_>,
) -> Result<Value, DispatchError> {
    Ok(json!({}))
}
