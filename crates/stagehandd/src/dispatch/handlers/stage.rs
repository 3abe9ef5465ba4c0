//! `usd/*` handlers operating on registered stages.

use camino::Utf8Path;
use serde_json::{Value, json};
use stagehand_core::{AttributeValue, StageHandle, Transform};

use crate::dispatch::context::ServerContext;
use crate::dispatch::errors::DispatchError;
use crate::dispatch::request::Params;

fn stage_changed(context: &ServerContext, handle: StageHandle, generation: u64, method: &str) {
    context.events.publish(
        "stage_changed",
        json!({"stage_id": handle, "generation": generation, "method": method}),
    );
}

pub(crate) fn create_stage(
    context: &ServerContext,
    params: &Params<'_>,
) -> Result<Value, DispatchError> {
    let file_path = params.optional_str("file_path")?.map(Utf8Path::new);
    let handle = context
        .registry
        .create(file_path)
        .map_err(|error| DispatchError::from_registry("create USD stage", error))?;
    stage_changed(context, handle, 0, "usd/create_stage");
    Ok(json!({"stage_id": handle, "generation": 0, "file_path": file_path}))
}

pub(crate) fn open_stage(
    context: &ServerContext,
    params: &Params<'_>,
) -> Result<Value, DispatchError> {
    let file_path = Utf8Path::new(params.required_str("file_path")?);
    let handle = context
        .registry
        .open(file_path)
        .map_err(|error| DispatchError::from_registry("open USD stage", error))?;
    stage_changed(context, handle, 0, "usd/open_stage");
    Ok(json!({"stage_id": handle, "generation": 0, "file_path": file_path}))
}

pub(crate) fn register_stage(
    context: &ServerContext,
    params: &Params<'_>,
) -> Result<Value, DispatchError> {
    let file_path = Utf8Path::new(params.required_str("file_path")?);
    let generation = params.optional_u64("generation")?.unwrap_or(0);
    let handle = context
        .registry
        .register(file_path, generation)
        .map_err(|error| DispatchError::from_registry("register USD stage", error))?;
    stage_changed(context, handle, generation, "usd/register_stage");
    Ok(json!({
        "stage_id": handle,
        "generation": generation,
        "file_path": file_path,
        "loaded": false,
    }))
}

pub(crate) fn close_stage(
    context: &ServerContext,
    params: &Params<'_>,
) -> Result<Value, DispatchError> {
    let handle = params.stage_handle()?;
    let closed = context
        .registry
        .close(handle)
        .map_err(|error| DispatchError::from_registry("close USD stage", error))?;
    if !closed {
        return Err(DispatchError::operation_failed(format!(
            "Stage not found: {handle}"
        )));
    }
    context
        .events
        .publish("stage_closed", json!({"stage_id": handle}));
    Ok(json!({"success": true, "stage_id": handle}))
}

pub(crate) fn unload_stage(
    context: &ServerContext,
    params: &Params<'_>,
) -> Result<Value, DispatchError> {
    let handle = params.stage_handle()?;
    context
        .registry
        .unload(handle)
        .map_err(|error| DispatchError::from_registry("unload USD stage", error))?;
    Ok(json!({"success": true, "stage_id": handle, "loaded": false}))
}

pub(crate) fn save_stage(
    context: &ServerContext,
    params: &Params<'_>,
) -> Result<Value, DispatchError> {
    let handle = params.stage_handle()?;
    let target = params.optional_str("file_path")?.map(Utf8Path::new);
    let generation = context
        .registry
        .save(handle, target)
        .map_err(|error| DispatchError::from_registry("save USD stage", error))?;
    let mut result = json!({"success": true, "stage_id": handle, "generation": generation});
    if let Some(target) = target {
        result["file_path"] = json!(target);
    }
    Ok(result)
}

pub(crate) fn export_stage(
    context: &ServerContext,
    params: &Params<'_>,
) -> Result<Value, DispatchError> {
    let handle = params.stage_handle()?;
    let text = context
        .registry
        .export_text(handle)
        .map_err(|error| DispatchError::from_registry("export USD stage", error))?;
    let generation = context
        .registry
        .generation(handle)
        .map_err(|error| DispatchError::from_registry("export USD stage", error))?;
    Ok(json!({"stage_id": handle, "text": text, "generation": generation}))
}

pub(crate) fn query_generation(
    context: &ServerContext,
    params: &Params<'_>,
) -> Result<Value, DispatchError> {
    let handle = params.stage_handle()?;
    let generation = context
        .registry
        .generation(handle)
        .map_err(|error| DispatchError::from_registry("query generation", error))?;
    Ok(json!({"stage_id": handle, "generation": generation}))
}

/// Reflection state of a stage as seen from the mapping table.
fn reflection_state(
    context: &ServerContext,
    file_path: Option<&Utf8Path>,
    generation: u64,
) -> Result<(Option<String>, bool, &'static str), DispatchError> {
    let Some(path) = file_path else {
        return Ok((None, false, "not_reflected"));
    };
    let group_name = context
        .mappings
        .get_group_name(path)
        .map_err(|error| DispatchError::from_mapping("list stages", error))?;
    if group_name.is_none() {
        return Ok((None, false, "not_reflected"));
    }
    let needs_update = context
        .mappings
        .needs_update(path, generation)
        .map_err(|error| DispatchError::from_mapping("list stages", error))?;
    let status = if needs_update { "modified" } else { "up_to_date" };
    Ok((group_name, needs_update, status))
}

pub(crate) fn list_stages(
    context: &ServerContext,
    _params: &Params<'_>,
) -> Result<Value, DispatchError> {
    let summaries = context
        .registry
        .summaries()
        .map_err(|error| DispatchError::from_registry("list stages", error))?;
    let mut stages = Vec::with_capacity(summaries.len());
    for summary in summaries {
        let (group_name, needs_update, reflection) =
            reflection_state(context, summary.file_path.as_deref(), summary.generation)?;
        stages.push(json!({
            "stage_id": summary.handle,
            "file_path": summary.file_path,
            "loaded": summary.loaded,
            "generation": summary.generation,
            "group_name": group_name,
            "needs_update": needs_update,
            "reflection": reflection,
        }));
    }
    Ok(json!({"count": stages.len(), "stages": stages}))
}

pub(crate) fn create_prim(
    context: &ServerContext,
    params: &Params<'_>,
) -> Result<Value, DispatchError> {
    let handle = params.stage_handle()?;
    let prim_path = params.required_str("prim_path")?;
    let prim_type = params.optional_str("prim_type")?.unwrap_or("Xform");
    let generation = context
        .registry
        .create_prim(handle, prim_path, prim_type)
        .map_err(|error| DispatchError::from_registry("create prim", error))?;
    stage_changed(context, handle, generation, "usd/create_prim");
    Ok(json!({
        "success": true,
        "stage_id": handle,
        "prim_path": prim_path,
        "prim_type": prim_type,
        "generation": generation,
    }))
}

pub(crate) fn set_attribute(
    context: &ServerContext,
    params: &Params<'_>,
) -> Result<Value, DispatchError> {
    let handle = params.stage_handle()?;
    let prim_path = params.required_str("prim_path")?;
    let attr_name = params.required_str("attr_name")?;
    let value_type = params.required_str("value_type")?;
    let value = params.value_text("value")?;
    let generation = context
        .registry
        .set_attribute(handle, prim_path, attr_name, AttributeValue::new(value_type, value))
        .map_err(|error| DispatchError::from_registry("set attribute", error))?;
    stage_changed(context, handle, generation, "usd/set_attribute");
    Ok(json!({
        "success": true,
        "stage_id": handle,
        "prim_path": prim_path,
        "attr_name": attr_name,
        "generation": generation,
    }))
}

pub(crate) fn get_attribute(
    context: &ServerContext,
    params: &Params<'_>,
) -> Result<Value, DispatchError> {
    let handle = params.stage_handle()?;
    let prim_path = params.required_str("prim_path")?;
    let attr_name = params.required_str("attr_name")?;
    let attribute = context
        .registry
        .get_attribute(handle, prim_path, attr_name)
        .map_err(|error| DispatchError::from_registry("get attribute", error))?;
    Ok(json!({
        "stage_id": handle,
        "prim_path": prim_path,
        "attr_name": attr_name,
        "value": attribute.value,
        "value_type": attribute.value_type,
    }))
}

pub(crate) fn set_transform(
    context: &ServerContext,
    params: &Params<'_>,
) -> Result<Value, DispatchError> {
    let handle = params.stage_handle()?;
    let prim_path = params.required_str("prim_path")?;
    let component = |name: &str, fallback: f64| -> Result<f64, DispatchError> {
        Ok(params.optional_f64(name)?.unwrap_or(fallback))
    };
    let transform = Transform {
        translate: [component("tx", 0.0)?, component("ty", 0.0)?, component("tz", 0.0)?],
        rotate: [component("rx", 0.0)?, component("ry", 0.0)?, component("rz", 0.0)?],
        scale: [component("sx", 1.0)?, component("sy", 1.0)?, component("sz", 1.0)?],
    };
    let generation = context
        .registry
        .set_transform(handle, prim_path, &transform)
        .map_err(|error| DispatchError::from_registry("set transform", error))?;
    stage_changed(context, handle, generation, "usd/set_transform");
    Ok(json!({
        "success": true,
        "stage_id": handle,
        "prim_path": prim_path,
        "generation": generation,
        "tx": transform.translate[0], "ty": transform.translate[1], "tz": transform.translate[2],
        "rx": transform.rotate[0], "ry": transform.rotate[1], "rz": transform.rotate[2],
        "sx": transform.scale[0], "sy": transform.scale[1], "sz": transform.scale[2],
    }))
}

pub(crate) fn list_prims(
    context: &ServerContext,
    params: &Params<'_>,
) -> Result<Value, DispatchError> {
    let handle = params.stage_handle()?;
    let prims = context
        .registry
        .list_prims(handle)
        .map_err(|error| DispatchError::from_registry("list prims", error))?;
    let paths: Vec<&str> = prims.iter().map(|prim| prim.path.as_str()).collect();
    Ok(json!({
        "stage_id": handle,
        "count": prims.len(),
        "prims": paths,
        "details": prims,
    }))
}
