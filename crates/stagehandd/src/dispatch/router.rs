//! Method table and the entry point every transport calls.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};

use super::context::ServerContext;
use super::errors::DispatchError;
use super::handlers::{lifecycle, mapping, reflect, scene, stage};
use super::request::{Params, Request};
use super::response::Response;

/// Tracing target for dispatch operations.
pub(crate) const DISPATCH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::dispatch");

pub(crate) type Handler = fn(&ServerContext, &Params<'_>) -> Result<Value, DispatchError>;

/// A routable method.
pub(crate) struct MethodEntry {
    pub name: &'static str,
    pub description: &'static str,
    pub handler: Handler,
    /// Lifecycle methods are not advertised as tools.
    pub advertised: bool,
}

const fn tool(name: &'static str, description: &'static str, handler: Handler) -> MethodEntry {
    MethodEntry {
        name,
        description,
        handler,
        advertised: true,
    }
}

pub(crate) const METHODS: &[MethodEntry] = &[
    MethodEntry {
        name: "initialize",
        description: "Start a session and describe the server",
        handler: lifecycle::initialize,
        advertised: false,
    },
    MethodEntry {
        name: "initialized",
        description: "Acknowledge a completed handshake",
        handler: lifecycle::initialized,
        advertised: false,
    },
    tool("usd/create_stage", "Create a new stage, optionally backed by a file", stage::create_stage),
    tool("usd/open_stage", "Open an existing stage file", stage::open_stage),
    tool("usd/register_stage", "Register a stage file without loading it", stage::register_stage),
    tool("usd/close_stage", "Forget a stage", stage::close_stage),
    tool("usd/unload_stage", "Drop a file-backed stage's document from memory", stage::unload_stage),
    tool("usd/save_stage", "Save a stage, optionally to another file", stage::save_stage),
    tool("usd/export_stage", "Serialise a stage to text", stage::export_stage),
    tool("usd/query_generation", "Read a stage's change counter", stage::query_generation),
    tool("usd/list_stages", "List registered stages and their reflection state", stage::list_stages),
    tool("usd/create_prim", "Define a prim in a stage", stage::create_prim),
    tool("usd/set_attribute", "Set an attribute on a prim", stage::set_attribute),
    tool("usd/get_attribute", "Read an attribute from a prim", stage::get_attribute),
    tool("usd/set_transform", "Set a prim's translate, rotate and scale", stage::set_transform),
    tool("usd/list_prims", "List the prims in a stage", stage::list_prims),
    tool("usd/set_group_mapping", "Map a stage file to a scene group", mapping::set_group_mapping),
    tool("usd/remove_group_mapping", "Remove a stage file's group mapping", mapping::remove_group_mapping),
    tool("usd/list_group_mappings", "List stage-to-group mappings", mapping::list_group_mappings),
    tool("usd/reflect_to_scene", "Replace a mapped scene group with the stage's content", reflect::reflect_to_scene),
    tool("usd/confirm_reflect", "Carry out a reflect that awaited confirmation", reflect::confirm_reflect),
    tool("scene/query_scene_tree", "Start an asynchronous scene tree query", scene::query_scene_tree),
    tool("scene/dtack", "Poll or cancel an asynchronous operation", scene::dtack),
    tool("scene/get_node_properties", "Read a scene node's properties", scene::get_node_properties),
    tool("scene/update_node_property", "Set a scene node property", scene::update_node_property),
    tool("scene/duplicate_node", "Duplicate a scene node", scene::duplicate_node),
    tool("scene/save_scene", "Save the scene", scene::save_scene),
    tool("scene/get_bounding_box", "Compute a node's bounds", scene::get_bounding_box),
    tool("scene/get_selection", "List the selected nodes", scene::get_selection),
];

fn lookup(method: &str) -> Option<&'static MethodEntry> {
    METHODS.iter().find(|entry| entry.name == method)
}

/// Routes raw messages to handlers and frames the replies.
#[derive(Clone)]
pub struct Dispatcher {
    context: Arc<ServerContext>,
}

impl Dispatcher {
    pub fn new(context: Arc<ServerContext>) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &ServerContext {
        &self.context
    }

    /// Handles one message. Returns the response line, or `None` when the
    /// message was a notification.
    pub fn handle(&self, raw: &[u8]) -> Option<String> {
        let request = match Request::parse(raw) {
            Ok(request) => request,
            Err(rejected) => {
                debug!(target: DISPATCH_TARGET, error = %rejected.error, "rejected message");
                if rejected.silent {
                    return None;
                }
                let message = rejected.error.to_string();
                return Some(
                    Response::failure(rejected.id.as_ref(), &rejected.error, &message).to_line(),
                );
            }
        };

        let outcome = match lookup(&request.method) {
            Some(entry) => {
                debug!(target: DISPATCH_TARGET, method = entry.name, "dispatching");
                (entry.handler)(&self.context, &request.params())
            }
            None => Err(DispatchError::method_not_found(&request.method)),
        };

        let id = request.id.as_ref()?;
        Some(match outcome {
            Ok(result) => Response::success(id, result, &self.context.notes.current()).to_line(),
            Err(error) => {
                info!(
                    target: DISPATCH_TARGET,
                    method = %request.method,
                    code = error.code(),
                    error = %error,
                    "request failed"
                );
                let message = error.to_string();
                Response::failure(Some(id), &error, &message).to_line()
            }
        })
    }
}
