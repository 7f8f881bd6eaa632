//! msgpack-rpc protocol layer
//!
//! Message model for the msgpack-rpc dialect spoken by Neovim:
//!
//! - Request: `[0, msgid, method, params]`
//! - Response: `[1, msgid, error, result]`
//! - Notification: `[2, method, params]`

use rmpv::Value;

use crate::rpc::error::RpcError;

// ============================================================================
// Message Type Tags
// ============================================================================

/// Tag of a request message
pub const REQUEST_TAG: u64 = 0;

/// Tag of a response message
pub const RESPONSE_TAG: u64 = 1;

/// Tag of a notification message
pub const NOTIFICATION_TAG: u64 = 2;

// ============================================================================
// Messages
// ============================================================================

/// One msgpack-rpc message in either direction
#[derive(Debug, Clone, PartialEq)]
pub enum RpcMessage {
    Request {
        id: u64,
        method: String,
        params: Vec<Value>,
    },
    Response {
        id: u64,
        error: Value,
        result: Value,
    },
    Notification {
        method: String,
        params: Vec<Value>,
    },
}

impl RpcMessage {
    /// Successful response carrying `result`
    #[cfg(test)]
    pub fn success(id: u64, result: Value) -> Self {
        RpcMessage::Response {
            id,
            error: Value::Nil,
            result,
        }
    }

    /// Error response in Neovim's `[kind, message]` shape
    pub fn failure(id: u64, message: impl Into<String>) -> Self {
        let message: String = message.into();
        RpcMessage::Response {
            id,
            error: Value::Array(vec![Value::from(0), Value::from(message)]),
            result: Value::Nil,
        }
    }

    /// Convert into the wire value
    pub fn into_value(self) -> Value {
        match self {
            RpcMessage::Request { id, method, params } => Value::Array(vec![
                Value::from(REQUEST_TAG),
                Value::from(id),
                Value::from(method),
                Value::Array(params),
            ]),
            RpcMessage::Response { id, error, result } => Value::Array(vec![
                Value::from(RESPONSE_TAG),
                Value::from(id),
                error,
                result,
            ]),
            RpcMessage::Notification { method, params } => Value::Array(vec![
                Value::from(NOTIFICATION_TAG),
                Value::from(method),
                Value::Array(params),
            ]),
        }
    }
}

impl TryFrom<Value> for RpcMessage {
    type Error = RpcError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        let Value::Array(items) = value else {
            return Err(RpcError::invalid_message("message is not an array"));
        };

        let tag = items
            .first()
            .and_then(Value::as_u64)
            .ok_or_else(|| RpcError::invalid_message("missing message type"))?;

        match (tag, items.len()) {
            (REQUEST_TAG, len) => {
                let mut items = items.into_iter().skip(1);
                let id = take_id(items.next())?;
                // From here on the peer is waiting for an answer to `id`
                let invalid = move |reason: String| RpcError::InvalidRequest { id, reason };
                if len != 4 {
                    return Err(invalid(format!("request has {len} elements")));
                }
                let method = take_method(items.next()).map_err(invalid)?;
                let params = take_params(items.next());
                Ok(RpcMessage::Request { id, method, params })
            }
            (RESPONSE_TAG, 4) => {
                let mut items = items.into_iter().skip(1);
                let id = take_id(items.next())?;
                let error = items.next().unwrap_or(Value::Nil);
                let result = items.next().unwrap_or(Value::Nil);
                Ok(RpcMessage::Response { id, error, result })
            }
            (NOTIFICATION_TAG, 3) => {
                let mut items = items.into_iter().skip(1);
                let method = take_method(items.next()).map_err(RpcError::InvalidMessage)?;
                let params = take_params(items.next());
                Ok(RpcMessage::Notification { method, params })
            }
            (tag, len) => Err(RpcError::invalid_message(format!(
                "unexpected message type {tag} with {len} elements"
            ))),
        }
    }
}

fn take_id(value: Option<Value>) -> Result<u64, RpcError> {
    value
        .as_ref()
        .and_then(Value::as_u64)
        .ok_or_else(|| RpcError::invalid_message("message id is not an unsigned integer"))
}

fn take_method(value: Option<Value>) -> Result<String, String> {
    match value {
        Some(Value::String(method)) => method
            .into_str()
            .ok_or_else(|| "method name is not UTF-8".to_string()),
        Some(Value::Binary(bytes)) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
        _ => Err("method name is not a string".to_string()),
    }
}

fn take_params(value: Option<Value>) -> Vec<Value> {
    match value {
        Some(Value::Array(params)) => params,
        Some(Value::Nil) | None => Vec::new(),
        Some(other) => vec![other],
    }
}

// ============================================================================
// Remote Errors
// ============================================================================

/// Error payload returned by the peer
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteError {
    /// Neovim error kind (0 = exception, 1 = validation), when present
    pub kind: Option<i64>,

    /// Human-readable message
    pub message: String,
}

impl RemoteError {
    /// Interpret a non-nil error value from a response
    pub fn from_value(value: &Value) -> Self {
        if let Some([kind, message]) = value.as_array().map(Vec::as_slice) {
            if let Some(text) = message.as_str() {
                return Self {
                    kind: kind.as_i64(),
                    message: text.to_string(),
                };
            }
        }

        match value.as_str() {
            Some(text) => Self {
                kind: None,
                message: text.to_string(),
            },
            None => Self {
                kind: None,
                message: value.to_string(),
            },
        }
    }
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            Some(kind) => write!(f, "{} (kind {})", self.message, kind),
            None => f.write_str(&self.message),
        }
    }
}
