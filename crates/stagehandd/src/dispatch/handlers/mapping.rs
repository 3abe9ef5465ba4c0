//! Group-mapping handlers.

use camino::Utf8Path;
use serde_json::{Value, json};

use crate::dispatch::context::ServerContext;
use crate::dispatch::errors::DispatchError;
use crate::dispatch::request::Params;

/// Scene group names become node names, so the separators a scene path uses
/// are not allowed.
fn validate_group_name(group_name: &str) -> Result<(), DispatchError> {
    if group_name.trim().is_empty() || group_name.contains(['/', ':', '.', '@', '%', '"']) {
        return Err(DispatchError::invalid_params(format!(
            "Invalid group_name parameter: {group_name}"
        )));
    }
    Ok(())
}

pub(crate) fn set_group_mapping(
    context: &ServerContext,
    params: &Params<'_>,
) -> Result<Value, DispatchError> {
    let file_path = Utf8Path::new(params.required_str("file_path")?);
    let group_name = params.required_str("group_name")?;
    validate_group_name(group_name)?;
    context
        .mappings
        .set(file_path, group_name)
        .map_err(|error| DispatchError::from_mapping("set group mapping", error))?;
    context.events.publish(
        "mapping_changed",
        json!({"file_path": file_path, "group_name": group_name}),
    );
    Ok(json!({"success": true, "file_path": file_path, "group_name": group_name}))
}

pub(crate) fn remove_group_mapping(
    context: &ServerContext,
    params: &Params<'_>,
) -> Result<Value, DispatchError> {
    let file_path = Utf8Path::new(params.required_str("file_path")?);
    let removed = context
        .mappings
        .remove(file_path)
        .map_err(|error| DispatchError::from_mapping("remove group mapping", error))?;
    if !removed {
        return Err(DispatchError::operation_failed(format!(
            "No group mapping for {file_path}"
        )));
    }
    context.events.publish(
        "mapping_changed",
        json!({"file_path": file_path, "group_name": Value::Null}),
    );
    Ok(json!({"success": true, "file_path": file_path}))
}

pub(crate) fn list_group_mappings(
    context: &ServerContext,
    _params: &Params<'_>,
) -> Result<Value, DispatchError> {
    let mappings = context
        .mappings
        .list()
        .map_err(|error| DispatchError::from_mapping("list group mappings", error))?;
    let mut listed = Vec::with_capacity(mappings.len());
    for mapping in mappings {
        let current = context
            .registry
            .generation_for_path(&mapping.file_path)
            .map_err(|error| DispatchError::from_registry("list group mappings", error))?;
        listed.push(json!({
            "file_path": mapping.file_path,
            "group_name": mapping.group_name,
            "last_generation": mapping.last_generation,
            "current_generation": current,
            "needs_update": current.is_some_and(|generation| generation > mapping.last_generation),
        }));
    }
    Ok(json!({"count": listed.len(), "mappings": listed}))
}
