//! JSON-RPC request and response message types.
//!
//! Defines the envelope carried by every WebSocket text frame.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::identifiers::RequestId;

// ============================================================================
// Constants
// ============================================================================

/// JSON-RPC protocol version.
pub const JSONRPC_VERSION: &str = "2.0";

// ============================================================================
// RpcRequest
// ============================================================================

/// An outbound JSON-RPC call.
///
/// # Format
///
/// ```json
/// {
///   "jsonrpc": "2.0",
///   "id": "uuid",
///   "method": "Invoke",
///   "params": [ { ... } ]
/// }
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct RpcRequest {
    /// Protocol version marker.
    pub jsonrpc: &'static str,

    /// Unique identifier for request/response correlation.
    pub id: RequestId,

    /// Method name.
    pub method: String,

    /// Positional or named parameters.
    pub params: Value,
}

impl RpcRequest {
    /// Creates a new request with auto-generated ID.
    #[inline]
    #[must_use]
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self::with_id(RequestId::generate(), method, params)
    }

    /// Creates a new request with specific ID.
    #[inline]
    #[must_use]
    pub fn with_id(id: RequestId, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            method: method.into(),
            params,
        }
    }
}

// ============================================================================
// RpcErrorObject
// ============================================================================

/// The `error` member of a failed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcErrorObject {
    /// Error code.
    #[serde(default)]
    pub code: i64,

    /// Error message.
    #[serde(default)]
    pub message: String,

    /// Optional extra data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

// ============================================================================
// RpcResponse
// ============================================================================

/// Outcome carried by a response frame.
#[derive(Debug, Clone, PartialEq)]
pub enum RpcResponse {
    /// `result` member (may be `null`).
    Success(Value),
    /// `error` member.
    Failure(RpcErrorObject),
}

impl RpcResponse {
    /// Converts into the result payload, or an [`Error::Rpc`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Rpc`] with the server message for a failure.
    pub fn into_result(self) -> Result<Value> {
        match self {
            Self::Success(value) => Ok(value),
            Self::Failure(err) => Err(Error::rpc(err.code, err.message)),
        }
    }
}

// ============================================================================
// InboundMessage
// ============================================================================

/// A decoded inbound frame.
///
/// A frame with an `id` and a `result`/`error` member is a response; a frame
/// with a `method` and no response member is a server-push notification.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Response to a request this client sent.
    Response {
        /// Raw `id` member.
        id: Value,
        /// Result or error.
        response: RpcResponse,
    },
    /// Unsolicited notification.
    Notification {
        /// Notification method.
        method: String,
        /// Notification params (`null` when absent).
        params: Value,
    },
    /// JSON that is neither.
    Other(Value),
}

impl InboundMessage {
    /// Classifies a parsed frame.
    ///
    /// `error` wins over `result` if a malformed frame carries both.
    #[must_use]
    pub fn classify(value: Value) -> Self {
        let Value::Object(mut map) = value else {
            return Self::Other(value);
        };

        if let Some(id) = map.get("id").cloned().filter(|id| !id.is_null()) {
            if let Some(error) = map.remove("error") {
                let error = serde_json::from_value::<RpcErrorObject>(error.clone()).unwrap_or_else(|_| {
                    RpcErrorObject {
                        code: 0,
                        message: match error {
                            Value::String(s) => s,
                            other => other.to_string(),
                        },
                        data: None,
                    }
                });
                return Self::Response {
                    id,
                    response: RpcResponse::Failure(error),
                };
            }
            if let Some(result) = map.remove("result") {
                return Self::Response {
                    id,
                    response: RpcResponse::Success(result),
                };
            }
        }

        match map.remove("method") {
            Some(Value::String(method)) => Self::Notification {
                method,
                params: map.remove("params").unwrap_or(Value::Null),
            },
            Some(other) => {
                map.insert("method".into(), other);
                Self::Other(Value::Object(map))
            }
            None => Self::Other(Value::Object(map)),
        }
    }

    /// Returns the request ID if this is a response to one of our requests.
    #[must_use]
    pub fn request_id(&self) -> Option<RequestId> {
        match self {
            Self::Response { id, .. } => RequestId::from_json(id),
            _ => None,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
