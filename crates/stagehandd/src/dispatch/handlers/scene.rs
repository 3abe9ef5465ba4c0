//! `scene/*` handlers. Everything here reaches the scene graph through the
//! main-thread queue.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use camino::Utf8PathBuf;
use serde_json::{Value, json};
use stagehand_core::{AckToken, OperationStatus, OpsError, Settlement};
use tracing::debug;

use crate::dispatch::context::ServerContext;
use crate::dispatch::errors::DispatchError;
use crate::dispatch::request::Params;
use crate::dispatch::router::DISPATCH_TARGET;
use crate::events::EventBus;

const SCENE_ROOT: &str = "/root";

/// Starts a tree query on the main thread and answers with an ack token
/// straight away.
pub(crate) fn query_scene_tree(
    context: &ServerContext,
    params: &Params<'_>,
) -> Result<Value, DispatchError> {
    let path = params.optional_str("path")?.unwrap_or(SCENE_ROOT).to_owned();
    let depth = params
        .optional_u64("depth")?
        .map(|depth| usize::try_from(depth).unwrap_or(usize::MAX));

    let canceled = Arc::new(AtomicBool::new(false));
    let hook_flag = Arc::clone(&canceled);
    let token = context
        .ops
        .begin_with_cancel(
            format!("querying scene tree at {path}"),
            Box::new(move || hook_flag.store(true, Ordering::SeqCst)),
        )
        .map_err(DispatchError::from_ops)?;

    let ops = Arc::clone(&context.ops);
    let events = context.events.clone();
    let task_token = token.clone();
    let submitted = context.scene.submit(Box::new(move |graph| {
        if canceled.load(Ordering::SeqCst) {
            debug!(target: DISPATCH_TARGET, ack = %task_token, "query canceled before it ran");
            return;
        }
        let (settlement, status) = match graph.query(&path, depth) {
            Ok(tree) => match serde_json::to_value(tree) {
                Ok(payload) => (ops.complete(&task_token, payload), OperationStatus::Complete),
                Err(error) => (
                    ops.fail(&task_token, format!("failed to encode scene tree: {error}")),
                    OperationStatus::Error,
                ),
            },
            Err(error) => (ops.fail(&task_token, error.to_string()), OperationStatus::Error),
        };
        report_settlement(&events, &task_token, status, settlement);
    }));

    if let Err(error) = submitted {
        // Nobody will ever settle the entry; withdraw it.
        if let Err(cancel_error) = context.ops.poll(&token, true) {
            debug!(target: DISPATCH_TARGET, ack = %token, error = %cancel_error, "withdraw failed");
        }
        return Err(DispatchError::from_scene("query scene tree", error));
    }

    Ok(json!({
        "ack": token,
        "status": "pending",
        "message": "Scene tree query queued; poll scene/dtack with the ack token",
    }))
}

fn report_settlement(
    events: &EventBus,
    token: &AckToken,
    status: OperationStatus,
    settlement: Result<Settlement, OpsError>,
) {
    match settlement {
        Ok(Settlement::Recorded) => {
            events.publish(
                "operation_settled",
                json!({"ack": token, "status": status.as_str()}),
            );
        }
        Ok(other) => {
            debug!(target: DISPATCH_TARGET, ack = %token, settlement = ?other, "result not recorded");
        }
        Err(error) => {
            debug!(target: DISPATCH_TARGET, ack = %token, %error, "result not recorded");
        }
    }
}

pub(crate) fn dtack(context: &ServerContext, params: &Params<'_>) -> Result<Value, DispatchError> {
    let token = AckToken::from(params.required_str("ack")?);
    let cancel = params.optional_bool("cancel")?.unwrap_or(false);
    let report = context
        .ops
        .poll(&token, cancel)
        .map_err(DispatchError::from_ops)?;
    let mut result = json!({
        "ack": report.token,
        "status": report.status.as_str(),
        "message": report.message,
        "cancel": report.cancel,
    });
    if let Some(payload) = report.payload {
        result["result"] = payload;
    }
    Ok(result)
}

pub(crate) fn get_node_properties(
    context: &ServerContext,
    params: &Params<'_>,
) -> Result<Value, DispatchError> {
    let path = params.required_str("path")?.to_owned();
    let lookup = path.clone();
    let properties = context.scene_call("get node properties", move |graph| {
        graph.node_properties(&lookup)
    })?;
    Ok(json!({"path": path, "properties": properties}))
}

pub(crate) fn update_node_property(
    context: &ServerContext,
    params: &Params<'_>,
) -> Result<Value, DispatchError> {
    let path = params.required_str("path")?.to_owned();
    let property = params.required_str("property")?.to_owned();
    let value = params.required_value("value")?.clone();
    let (target, name) = (path.clone(), property.clone());
    context.scene_call("update node property", move |graph| {
        graph.update_node_property(&target, &name, value)
    })?;
    Ok(json!({"success": true, "path": path, "property": property}))
}

pub(crate) fn duplicate_node(
    context: &ServerContext,
    params: &Params<'_>,
) -> Result<Value, DispatchError> {
    let source = params.required_str("path")?.to_owned();
    let new_name = params.optional_str("new_name")?.map(str::to_owned);
    let target = source.clone();
    let copy = context.scene_call("duplicate node", move |graph| {
        graph.duplicate_node(&target, new_name.as_deref())
    })?;
    Ok(json!({"success": true, "source": source, "path": copy}))
}

pub(crate) fn save_scene(
    context: &ServerContext,
    params: &Params<'_>,
) -> Result<Value, DispatchError> {
    let target = params.optional_str("file_path")?.map(Utf8PathBuf::from);
    let saved = context.scene_call("save scene", move |graph| {
        graph.save_scene(target.as_deref())
    })?;
    Ok(json!({"success": true, "file_path": saved}))
}

pub(crate) fn get_bounding_box(
    context: &ServerContext,
    params: &Params<'_>,
) -> Result<Value, DispatchError> {
    let path = params.required_str("path")?.to_owned();
    let lookup = path.clone();
    let bounds = context.scene_call("get bounding box", move |graph| {
        graph.bounding_box(&lookup)
    })?;
    Ok(json!({"path": path, "min": bounds.min, "max": bounds.max, "size": bounds.size()}))
}

pub(crate) fn get_selection(
    context: &ServerContext,
    _params: &Params<'_>,
) -> Result<Value, DispatchError> {
    let selection = context.scene_call("get selection", |graph| Ok(graph.selection()))?;
    Ok(json!({"count": selection.len(), "selection": selection}))
}
