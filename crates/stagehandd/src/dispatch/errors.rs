//! JSON-RPC error surface for request dispatch.
//!
//! Collaborator failures are translated here. The client sees the operation
//! and its subject; the underlying cause is logged instead.

use stagehand_core::{ConfirmError, EngineError, MappingError, OpsError, RegistryError};
use thiserror::Error;
use tracing::warn;

use crate::scene::SceneError;

use super::router::DISPATCH_TARGET;

/// Errors returned to clients as JSON-RPC error objects.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// The message was not valid JSON or lacked a method.
    #[error("Parse error: {message}")]
    Parse { message: String },

    /// No handler is registered for the method.
    #[error("Method not found: {method}")]
    MethodNotFound { method: String },

    /// A parameter was missing or malformed.
    #[error("{message}")]
    InvalidParams { message: String },

    /// The server could not service the request, for example because the
    /// scene host stopped answering.
    #[error("{message}")]
    Internal { message: String },

    /// The operation itself failed.
    #[error("{message}")]
    OperationFailed { message: String },
}

impl DispatchError {
    /// Numeric JSON-RPC error code.
    pub fn code(&self) -> i64 {
        match self {
            Self::Parse { .. } => -32700,
            Self::MethodNotFound { .. } => -32601,
            Self::InvalidParams { .. } => -32602,
            Self::Internal { .. } => -32603,
            Self::OperationFailed { .. } => -32000,
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }

    pub fn method_not_found(method: impl Into<String>) -> Self {
        Self::MethodNotFound {
            method: method.into(),
        }
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::InvalidParams {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn operation_failed(message: impl Into<String>) -> Self {
        Self::OperationFailed {
            message: message.into(),
        }
    }

    /// Maps a registry failure raised while performing `action`, such as
    /// "create prim".
    pub fn from_registry(action: &str, error: RegistryError) -> Self {
        match error {
            RegistryError::StageNotFound { handle } => {
                Self::operation_failed(format!("Stage not found: {handle}"))
            }
            RegistryError::NoBackingFile { handle } => {
                Self::operation_failed(format!("Stage {handle} has no backing file"))
            }
            RegistryError::Engine(engine) => Self::from_engine(action, engine),
            other @ (RegistryError::HandlesExhausted | RegistryError::Poisoned) => {
                warn!(target: DISPATCH_TARGET, action, error = %other, "stage registry unavailable");
                Self::internal("Stage registry unavailable")
            }
        }
    }

    /// Maps a document engine failure raised while performing `action`.
    pub fn from_engine(action: &str, error: EngineError) -> Self {
        match error {
            EngineError::InvalidPrimPath { path } => {
                Self::invalid_params(format!("Invalid prim_path parameter: {path}"))
            }
            EngineError::InvalidAttributeName { name } => {
                Self::invalid_params(format!("Invalid attr_name parameter: {name}"))
            }
            EngineError::UnsupportedValueType { value_type } => {
                Self::invalid_params(format!("Unsupported value_type: {value_type}"))
            }
            EngineError::InvalidValue { .. } | EngineError::NonFiniteTransform { .. } => {
                Self::invalid_params(format!("{error}"))
            }
            EngineError::MissingParent { path } => Self::operation_failed(format!(
                "Failed to {action}: parent directory of '{path}' does not exist"
            )),
            EngineError::PrimNotFound { path } => {
                Self::operation_failed(format!("Failed to {action}: prim not found: {path}"))
            }
            EngineError::AttributeNotFound { prim_path, name } => Self::operation_failed(format!(
                "Failed to {action}: attribute not found: {prim_path}.{name}"
            )),
            other => {
                warn!(target: DISPATCH_TARGET, action, error = %other, "document engine failure");
                Self::operation_failed(format!("Failed to {action}"))
            }
        }
    }

    pub fn from_ops(error: OpsError) -> Self {
        match error {
            OpsError::NotFound { token } => {
                Self::operation_failed(format!("Unknown or already collected ack: {token}"))
            }
            OpsError::Poisoned => {
                warn!(target: DISPATCH_TARGET, "operation table lock poisoned");
                Self::internal("Operation table unavailable")
            }
        }
    }

    pub fn from_confirm(error: ConfirmError) -> Self {
        match error {
            ConfirmError::NotFound => Self::operation_failed("Confirmation token not found"),
            ConfirmError::Expired => Self::operation_failed("Confirmation token expired"),
            ConfirmError::Poisoned => {
                warn!(target: DISPATCH_TARGET, "confirmation store lock poisoned");
                Self::internal("Confirmation store unavailable")
            }
        }
    }

    pub fn from_mapping(action: &str, error: MappingError) -> Self {
        warn!(target: DISPATCH_TARGET, action, error = %error, "group mapping store failure");
        match error {
            MappingError::Poisoned => Self::internal("Group mapping store unavailable"),
            MappingError::Persist { .. } | MappingError::Encode(_) => {
                Self::operation_failed(format!("Failed to {action}"))
            }
        }
    }

    /// Maps a scene failure raised while performing `action`.
    pub fn from_scene(action: &str, error: SceneError) -> Self {
        match error {
            SceneError::HostUnavailable | SceneError::TimedOut => {
                warn!(target: DISPATCH_TARGET, action, error = %error, "scene host unreachable");
                Self::internal(format!("Failed to {action}: {error}"))
            }
            SceneError::InvalidPath { .. }
            | SceneError::InvalidName { .. }
            | SceneError::InvalidValue { .. }
            | SceneError::ReadOnlyProperty { .. } => Self::invalid_params(error.to_string()),
            SceneError::NodeNotFound { .. }
            | SceneError::NameTaken { .. }
            | SceneError::RootImmutable { .. }
            | SceneError::NoScenePath => {
                Self::operation_failed(format!("Failed to {action}: {error}"))
            }
            SceneError::Write { .. } | SceneError::Encode(_) => {
                warn!(target: DISPATCH_TARGET, action, error = %error, "scene operation failed");
                Self::operation_failed(format!("Failed to {action}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use camino::Utf8PathBuf;
    use rstest::rstest;
    use stagehand_core::StageHandle;

    use super::*;

    fn handle() -> StageHandle {
        StageHandle::from_raw(7).expect("non-zero")
    }

    #[rstest]
    #[case(DispatchError::parse("x"), -32700)]
    #[case(DispatchError::method_not_found("x"), -32601)]
    #[case(DispatchError::invalid_params("x"), -32602)]
    #[case(DispatchError::internal("x"), -32603)]
    #[case(DispatchError::operation_failed("x"), -32000)]
    fn codes_follow_json_rpc(#[case] error: DispatchError, #[case] code: i64) {
        assert_eq!(error.code(), code);
    }

    #[rstest]
    fn missing_stage_names_the_handle() {
        let error = DispatchError::from_registry(
            "save stage",
            RegistryError::StageNotFound { handle: handle() },
        );
        assert_eq!(error.code(), -32000);
        assert_eq!(error.to_string(), "Stage not found: 7");
    }

    #[rstest]
    fn io_details_stay_out_of_client_messages() {
        let error = DispatchError::from_engine(
            "save USD stage",
            EngineError::Write {
                path: Utf8PathBuf::from("/secret/place.usda"),
                source: std::io::Error::other("disk on fire"),
            },
        );
        assert_eq!(error.to_string(), "Failed to save USD stage");
    }

    #[rstest]
    fn bridge_failures_are_internal() {
        let error = DispatchError::from_scene("query scene", SceneError::TimedOut);
        assert_eq!(error.code(), -32603);
    }
}
