//! Request envelope parsing and typed parameter access.
//!
//! Parameters are read from the top level of the message first and from a
//! nested `params` object second, so both `{"method":..,"stage_id":1}` and
//! `{"method":..,"params":{"stage_id":1}}` are accepted.

use serde_json::{Map, Value};
use stagehand_core::StageHandle;

use super::errors::DispatchError;

/// A parsed JSON-RPC message.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Request {
    /// Correlation id; `None` marks a notification.
    pub id: Option<Value>,
    pub method: String,
    fields: Map<String, Value>,
}

/// Why a message could not become a [`Request`].
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Rejected {
    pub id: Option<Value>,
    pub error: DispatchError,
    /// Set for well-formed objects that carry neither `method` nor `id`;
    /// these get no reply at all.
    pub silent: bool,
}

impl Request {
    /// Parses one message.
    ///
    /// Messages without a usable `method` are rejected with a parse error;
    /// the caller stays silent when such a message also lacks an id.
    pub fn parse(raw: &[u8]) -> Result<Self, Rejected> {
        let value: Value = serde_json::from_slice(raw).map_err(|error| Rejected {
            id: None,
            error: DispatchError::parse(error.to_string()),
            silent: false,
        })?;
        let Value::Object(mut fields) = value else {
            return Err(Rejected {
                id: None,
                error: DispatchError::parse("request must be a JSON object"),
                silent: false,
            });
        };
        let id = fields.remove("id").filter(|id| !id.is_null());
        match fields.remove("method") {
            Some(Value::String(method)) if !method.is_empty() => Ok(Self { id, method, fields }),
            _ => Err(Rejected {
                silent: id.is_none(),
                id,
                error: DispatchError::parse("missing method"),
            }),
        }
    }

    /// Whether no response is expected.
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    pub fn params(&self) -> Params<'_> {
        let nested = match self.fields.get("params") {
            Some(Value::Object(nested)) => Some(nested),
            _ => None,
        };
        Params {
            fields: &self.fields,
            nested,
        }
    }
}

/// Borrowed view over a request's parameters.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Params<'a> {
    fields: &'a Map<String, Value>,
    nested: Option<&'a Map<String, Value>>,
}

impl<'a> Params<'a> {
    /// Raw parameter value; JSON `null` counts as absent.
    pub fn get(&self, name: &str) -> Option<&'a Value> {
        self.fields
            .get(name)
            .filter(|_| name != "params")
            .or_else(|| self.nested.and_then(|nested| nested.get(name)))
            .filter(|value| !value.is_null())
    }

    /// A non-empty string parameter.
    pub fn required_str(&self, name: &str) -> Result<&'a str, DispatchError> {
        self.optional_str(name)?
            .ok_or_else(|| DispatchError::invalid_params(format!("Missing {name} parameter")))
    }

    /// A string parameter; empty strings read as absent.
    pub fn optional_str(&self, name: &str) -> Result<Option<&'a str>, DispatchError> {
        match self.get(name) {
            None => Ok(None),
            Some(Value::String(text)) if text.is_empty() => Ok(None),
            Some(Value::String(text)) => Ok(Some(text.as_str())),
            Some(_) => Err(DispatchError::invalid_params(format!(
                "Invalid {name} parameter: expected a string"
            ))),
        }
    }

    /// The `stage_id` parameter as a handle. Accepts numbers and numeric
    /// strings; zero, negatives and garbage are all invalid.
    pub fn stage_handle(&self) -> Result<StageHandle, DispatchError> {
        let raw = match self.get("stage_id") {
            Some(Value::Number(number)) => number.as_u64(),
            Some(Value::String(text)) => text.trim().parse::<u64>().ok(),
            _ => None,
        };
        raw.and_then(StageHandle::from_raw)
            .ok_or_else(|| DispatchError::invalid_params("Invalid stage_id parameter"))
    }

    pub fn optional_f64(&self, name: &str) -> Result<Option<f64>, DispatchError> {
        let invalid = || DispatchError::invalid_params(format!("Invalid {name} parameter: expected a number"));
        match self.get(name) {
            None => Ok(None),
            Some(Value::Number(number)) => number.as_f64().map(Some).ok_or_else(invalid),
            Some(Value::String(text)) => text.trim().parse().map(Some).map_err(|_| invalid()),
            Some(_) => Err(invalid()),
        }
    }

    pub fn optional_u64(&self, name: &str) -> Result<Option<u64>, DispatchError> {
        let invalid = || {
            DispatchError::invalid_params(format!(
                "Invalid {name} parameter: expected a non-negative integer"
            ))
        };
        match self.get(name) {
            None => Ok(None),
            Some(Value::Number(number)) => number.as_u64().map(Some).ok_or_else(invalid),
            Some(Value::String(text)) => text.trim().parse().map(Some).map_err(|_| invalid()),
            Some(_) => Err(invalid()),
        }
    }

    pub fn optional_bool(&self, name: &str) -> Result<Option<bool>, DispatchError> {
        match self.get(name) {
            None => Ok(None),
            Some(Value::Bool(flag)) => Ok(Some(*flag)),
            Some(Value::String(text)) if text.eq_ignore_ascii_case("true") => Ok(Some(true)),
            Some(Value::String(text)) if text.eq_ignore_ascii_case("false") => Ok(Some(false)),
            Some(_) => Err(DispatchError::invalid_params(format!(
                "Invalid {name} parameter: expected a boolean"
            ))),
        }
    }

    /// Any JSON value.
    pub fn required_value(&self, name: &str) -> Result<&'a Value, DispatchError> {
        self.get(name)
            .ok_or_else(|| DispatchError::invalid_params(format!("Missing {name} parameter")))
    }

    /// A scalar parameter rendered as text: strings verbatim, numbers and
    /// booleans in their JSON spelling.
    pub fn value_text(&self, name: &str) -> Result<String, DispatchError> {
        match self.required_value(name)? {
            Value::String(text) => Ok(text.clone()),
            scalar @ (Value::Number(_) | Value::Bool(_)) => Ok(scalar.to_string()),
            _ => Err(DispatchError::invalid_params(format!(
                "Invalid {name} parameter: expected a string, number or boolean"
            ))),
        }
    }
}
