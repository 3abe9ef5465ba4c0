//! JSON-RPC response and notification envelopes.

use serde::Serialize;
use serde_json::{Map, Value};

use super::errors::DispatchError;
use crate::events::ServerEvent;

const JSONRPC_VERSION: &str = "2.0";
static NULL_ID: Value = Value::Null;
const FALLBACK_ERROR: &str =
    r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32603,"message":"failed to encode response"}}"#;

#[derive(Debug, Serialize)]
struct ErrorObject<'a> {
    code: i64,
    message: &'a str,
}

/// One response line, borrowing its parts.
#[derive(Debug, Serialize)]
pub(crate) struct Response<'a> {
    jsonrpc: &'static str,
    id: &'a Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorObject<'a>>,
}

impl<'a> Response<'a> {
    /// A success envelope. Non-empty operator notes are attached to object
    /// results under `_meta.notes`.
    pub fn success(id: &'a Value, mut result: Value, notes: &str) -> Self {
        if !notes.is_empty() {
            if let Value::Object(fields) = &mut result {
                let meta = fields
                    .entry("_meta")
                    .or_insert_with(|| Value::Object(Map::new()));
                if let Value::Object(meta) = meta {
                    meta.insert("notes".into(), Value::String(notes.to_owned()));
                }
            }
        }
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result: Some(result),
            error: None,
        }
    }

    /// An error envelope; a missing id is sent as `null`.
    pub fn failure(id: Option<&'a Value>, error: &'a DispatchError, message: &'a str) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id: id.unwrap_or(&NULL_ID),
            result: None,
            error: Some(ErrorObject {
                code: error.code(),
                message,
            }),
        }
    }

    pub fn to_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| FALLBACK_ERROR.to_owned())
    }
}

#[derive(Debug, Serialize)]
struct Notification<'a> {
    jsonrpc: &'static str,
    method: String,
    params: &'a Value,
}

/// Frames a server event as a JSON-RPC notification named
/// `notifications/<event>`.
pub(crate) fn notification_line(event: &ServerEvent) -> String {
    let notification = Notification {
        jsonrpc: JSONRPC_VERSION,
        method: format!("notifications/{}", event.name),
        params: &event.payload,
    };
    serde_json::to_string(&notification).unwrap_or_else(|_| FALLBACK_ERROR.to_owned())
}
