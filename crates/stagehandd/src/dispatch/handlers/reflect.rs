//! Two-phase reflection of a stage file into its mapped scene group.
//!
//! `reflect_to_scene` without `force` only stashes a confirmation token; the
//! scene is replaced once the client echoes the token through
//! `confirm_reflect`.

use camino::{Utf8Path, Utf8PathBuf};
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::dispatch::context::ServerContext;
use crate::dispatch::errors::DispatchError;
use crate::dispatch::request::Params;
use crate::dispatch::router::DISPATCH_TARGET;
use crate::scene::ImportRequest;

pub(crate) fn reflect_to_scene(
    context: &ServerContext,
    params: &Params<'_>,
) -> Result<Value, DispatchError> {
    let file_path = Utf8Path::new(params.required_str("file_path")?);
    let force = params.optional_bool("force")?.unwrap_or(false);
    let group_name = context
        .mappings
        .get_group_name(file_path)
        .map_err(|error| DispatchError::from_mapping("reflect to scene", error))?
        .ok_or_else(|| {
            DispatchError::operation_failed(format!("No group mapping for {file_path}"))
        })?;

    if force {
        return perform(context, file_path.to_path_buf(), group_name);
    }

    let token = context
        .confirmations
        .stash(file_path.to_path_buf(), group_name.clone())
        .map_err(DispatchError::from_confirm)?;
    Ok(json!({
        "status": "confirmation_required",
        "token": token,
        "file_path": file_path,
        "group_name": group_name,
        "message": format!(
            "Reflecting will replace scene group '{group_name}'. Call usd/confirm_reflect with the token to proceed."
        ),
    }))
}

pub(crate) fn confirm_reflect(
    context: &ServerContext,
    params: &Params<'_>,
) -> Result<Value, DispatchError> {
    let token = params.required_str("token")?;
    let pending = context
        .confirmations
        .consume(token)
        .map_err(DispatchError::from_confirm)?;
    perform(context, pending.file_path, pending.group_name)
}

fn perform(
    context: &ServerContext,
    file_path: Utf8PathBuf,
    group_name: String,
) -> Result<Value, DispatchError> {
    let snapshot = context
        .registry
        .snapshot_for_path(&file_path)
        .map_err(|error| DispatchError::from_registry("load stage for reflect", error))?;
    let (prims, generation) = match snapshot {
        Some(snapshot) => (snapshot.prims, Some(snapshot.generation)),
        None => {
            let document = context.registry.engine().open(&file_path).map_err(|error| {
                DispatchError::from_engine("load stage for reflect", error)
            })?;
            (document.prims(), None)
        }
    };

    let request = ImportRequest {
        file_path: file_path.clone(),
        group_name: group_name.clone(),
        prims,
        generation,
    };
    let outcome = context.scene_call("reflect to scene", move |graph| {
        graph.import_document_as_group(&request)
    })?;

    if let Some(generation) = generation {
        if let Err(error) = context.mappings.update_generation(&file_path, generation) {
            warn!(
                target: DISPATCH_TARGET,
                %file_path,
                %error,
                "scene reflected but generation not recorded"
            );
            return Err(DispatchError::from_mapping("record reflected generation", error));
        }
    }
    info!(
        target: DISPATCH_TARGET,
        %file_path,
        group = %group_name,
        nodes = outcome.node_count,
        "stage reflected into scene"
    );
    context.events.publish(
        "scene_reflected",
        json!({"file_path": file_path, "group_name": group_name, "generation": generation}),
    );
    Ok(json!({
        "status": "reflected",
        "file_path": file_path,
        "group_name": group_name,
        "group_path": outcome.group_path,
        "node_count": outcome.node_count,
        "replaced": outcome.replaced,
        "generation": generation,
    }))
}
