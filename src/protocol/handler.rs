//! Server handler payloads.
//!
//! Every `OpenSession`/`Invoke` result, and every server-push notification,
//! carries a list of handler objects:
//!
//! ```json
//! { "handlerType": "DN.LogicalClientEventRaisingHandler",
//!   "parameters": ["FormToShow", { "ServerId": "1F4", ... }] }
//! ```
//!
//! # Handler Types
//!
//! | `handlerType` | Decoded as |
//! |---------------|------------|
//! | `DN.LogicalClientEventRaisingHandler` + `FormToShow` | [`Handler::FormToShow`] |
//! | `DN.LogicalClientEventRaisingHandler` + `FormClosed` | [`Handler::FormClosed`] |
//! | `DN.LogicalClientChangeHandler` | [`Handler::PropertyChanges`] |
//! | `DN.CallbackResponseProperties` | [`Handler::CallbackResponse`] |
//! | `DN.SessionInitHandler` | [`Handler::SessionInit`] |
//! | anything else | [`Handler::Raw`] |

// ============================================================================
// Imports
// ============================================================================

use serde_json::{Map, Value};

use crate::error::{Error, Result};

use super::form::{LogicalForm, json_kind};

// ============================================================================
// Constants
// ============================================================================

/// Raises a named client event (`FormToShow`, `FormClosed`, ...).
pub const EVENT_RAISING_HANDLER: &str = "DN.LogicalClientEventRaisingHandler";

/// Carries property changes for controls of one form.
pub const CHANGE_HANDLER: &str = "DN.LogicalClientChangeHandler";

/// Carries the server sequence number and completed interactions.
pub const CALLBACK_RESPONSE_HANDLER: &str = "DN.CallbackResponseProperties";

/// Carries server session information.
pub const SESSION_INIT_HANDLER: &str = "DN.SessionInitHandler";

// ============================================================================
// ServerSession
// ============================================================================

/// Server-side session information returned by `OpenSession`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServerSession {
    /// Server session identifier.
    pub session_id: String,
    /// Session key, if supplied.
    pub session_key: Option<String>,
    /// Active company, if supplied.
    pub company: Option<String>,
}

// ============================================================================
// PropertyChange
// ============================================================================

/// One change instruction inside a change handler.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyChange {
    /// Change kind (`PropertyChanges`, `DataRefreshChange`, ...).
    pub kind: String,
    /// Path of the target control, in control-path grammar.
    pub control_path: Option<String>,
    /// Changed properties.
    pub changes: Map<String, Value>,
    /// The full change object.
    pub raw: Value,
}

// ============================================================================
// Handler
// ============================================================================

/// A decoded handler payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Handler {
    /// A form opened and should be shown.
    FormToShow(LogicalForm),

    /// A form was closed by the server.
    FormClosed {
        /// Closed form id.
        form_id: String,
    },

    /// Property changes for controls of one form.
    PropertyChanges {
        /// Target form id.
        form_id: String,
        /// Individual changes in server order.
        changes: Vec<PropertyChange>,
    },

    /// Sequence bookkeeping for a completed call.
    CallbackResponse {
        /// Server sequence number.
        sequence_number: Option<i64>,
        /// Completed interaction payloads.
        completed_interactions: Vec<Value>,
    },

    /// Session information.
    SessionInit(ServerSession),

    /// Any handler type this crate does not model.
    Raw {
        /// The `handlerType` member.
        handler_type: String,
        /// The `parameters` member.
        parameters: Value,
    },
}

impl Handler {
    /// Returns the `handlerType` this handler was decoded from.
    #[must_use]
    pub fn handler_type(&self) -> &str {
        match self {
            Self::FormToShow(_) | Self::FormClosed { .. } => EVENT_RAISING_HANDLER,
            Self::PropertyChanges { .. } => CHANGE_HANDLER,
            Self::CallbackResponse { .. } => CALLBACK_RESPONSE_HANDLER,
            Self::SessionInit(_) => SESSION_INIT_HANDLER,
            Self::Raw { handler_type, .. } => handler_type,
        }
    }

    /// Decodes one handler object.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the object has no `handlerType`, or a
    /// known handler type carries a malformed payload.
    pub fn decode(value: &Value) -> Result<Self> {
        let handler_type = value
            .get("handlerType")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::protocol("handler object without handlerType"))?;
        let parameters = value.get("parameters").cloned().unwrap_or(Value::Null);
        let params = parameters.as_array().map(Vec::as_slice).unwrap_or_default();

        match handler_type {
            EVENT_RAISING_HANDLER => match params.first().and_then(Value::as_str) {
                Some("FormToShow") => {
                    let form = params.get(1).ok_or_else(|| {
                        Error::protocol("FormToShow handler without a form payload")
                    })?;
                    Ok(Self::FormToShow(LogicalForm::from_value(form)?))
                }
                Some("FormClosed") => {
                    let form_id = params
                        .get(1)
                        .and_then(form_id_of)
                        .ok_or_else(|| Error::protocol("FormClosed handler without a form id"))?;
                    Ok(Self::FormClosed { form_id })
                }
                _ => Ok(Self::raw(handler_type, parameters)),
            },

            CHANGE_HANDLER => {
                let form_id = params
                    .first()
                    .and_then(Value::as_str)
                    .ok_or_else(|| Error::protocol("change handler without a form id"))?
                    .to_string();
                let changes = match params.get(1) {
                    None | Some(Value::Null) => Vec::new(),
                    Some(Value::Array(items)) => items.iter().map(decode_change).collect(),
                    Some(other) => {
                        return Err(Error::protocol(format!(
                            "change handler changes must be an array, got {}",
                            json_kind(other)
                        )));
                    }
                };
                Ok(Self::PropertyChanges { form_id, changes })
            }

            CALLBACK_RESPONSE_HANDLER => {
                let props = params.first().and_then(Value::as_object).ok_or_else(|| {
                    Error::protocol("callback response handler without properties")
                })?;
                Ok(Self::CallbackResponse {
                    sequence_number: props.get("SequenceNumber").and_then(Value::as_i64),
                    completed_interactions: props
                        .get("CompletedInteractions")
                        .and_then(Value::as_array)
                        .cloned()
                        .unwrap_or_default(),
                })
            }

            SESSION_INIT_HANDLER => {
                let props = params
                    .iter()
                    .find_map(Value::as_object)
                    .ok_or_else(|| Error::protocol("session init handler without properties"))?;
                let session_id = props
                    .get("ServerSessionId")
                    .and_then(Value::as_str)
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| Error::protocol("session init handler without ServerSessionId"))?;
                Ok(Self::SessionInit(ServerSession {
                    session_id: session_id.to_string(),
                    session_key: props
                        .get("SessionKey")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    company: props
                        .get("CompanyName")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                }))
            }

            _ => Ok(Self::raw(handler_type, parameters)),
        }
    }

    /// Decodes an RPC result into its handler list.
    ///
    /// Accepts `null` (no handlers), an array of handler objects, or an
    /// object with a `handlers` array.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] for any other shape or a malformed
    /// handler.
    pub fn decode_all(result: &Value) -> Result<Vec<Self>> {
        match result {
            Value::Null => Ok(Vec::new()),
            Value::Array(items) => items.iter().map(Self::decode).collect(),
            Value::Object(map) => match map.get("handlers") {
                Some(Value::Array(items)) => items.iter().map(Self::decode).collect(),
                _ => Err(Error::protocol("result object without a handlers array")),
            },
            other => Err(Error::protocol(format!(
                "result must be a handler list, got {}",
                json_kind(other)
            ))),
        }
    }

    /// Finds the handler objects inside notification params.
    ///
    /// Handlers appear either directly in the params array or under a
    /// `handlers` member of a params element.
    #[must_use]
    pub fn locate_in_params(params: &Value) -> Vec<&Value> {
        let items: &[Value] = match params {
            Value::Array(items) => items,
            Value::Object(_) => std::slice::from_ref(params),
            _ => return Vec::new(),
        };

        let mut found = Vec::new();
        for item in items {
            if item.get("handlerType").is_some() {
                found.push(item);
            } else if let Some(Value::Array(nested)) = item.get("handlers") {
                found.extend(nested.iter().filter(|h| h.get("handlerType").is_some()));
            }
        }
        found
    }

    /// Returns the sequence number carried in notification params, if any.
    #[must_use]
    pub fn sequence_in_params(params: &Value) -> Option<i64> {
        let items: &[Value] = match params {
            Value::Array(items) => items,
            Value::Object(_) => std::slice::from_ref(params),
            _ => return None,
        };
        items
            .iter()
            .filter_map(|item| item.get("sequenceNumber").and_then(Value::as_i64))
            .max()
    }

    fn raw(handler_type: &str, parameters: Value) -> Self {
        Self::Raw {
            handler_type: handler_type.to_string(),
            parameters,
        }
    }
}

/// Reads a form id from either a bare string or a form-like object.
fn form_id_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Object(map) => map
            .get("ServerId")
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    }
}

fn decode_change(value: &Value) -> PropertyChange {
    let kind = value
        .get("t")
        .or_else(|| value.get("$type"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let control_path = value
        .get("ControlReference")
        .and_then(|r| r.get("controlPath"))
        .and_then(Value::as_str)
        .map(str::to_string);
    let changes = value
        .get("Changes")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    PropertyChange {
        kind,
        control_path,
        changes,
        raw: value.clone(),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_decode_form_to_show() {
        let handler = Handler::decode(&json!({
            "handlerType": EVENT_RAISING_HANDLER,
            "parameters": ["FormToShow", { "ServerId": "1F4", "Children": [] }]
        }))
        .expect("decode");

        match handler {
            Handler::FormToShow(form) => assert_eq!(form.form_id(), Some("1F4")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_decode_form_to_show_malformed_is_error() {
        let err = Handler::decode(&json!({
            "handlerType": EVENT_RAISING_HANDLER,
            "parameters": ["FormToShow", "not a form"]
        }))
        .unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
    }

    #[test]
    fn test_decode_form_closed() {
        let handler = Handler::decode(&json!({
            "handlerType": EVENT_RAISING_HANDLER,
            "parameters": ["FormClosed", { "ServerId": "1F4" }]
        }))
        .expect("decode");
        assert_eq!(handler, Handler::FormClosed { form_id: "1F4".into() });
    }

    #[test]
    fn test_decode_other_event_is_raw() {
        let handler = Handler::decode(&json!({
            "handlerType": EVENT_RAISING_HANDLER,
            "parameters": ["DialogToShow", {}]
        }))
        .expect("decode");
        assert!(matches!(handler, Handler::Raw { .. }));
        assert_eq!(handler.handler_type(), EVENT_RAISING_HANDLER);
    }

    #[test]
    fn test_decode_changes() {
        let handler = Handler::decode(&json!({
            "handlerType": CHANGE_HANDLER,
            "parameters": ["1F4", [
                { "t": "PropertyChanges",
                  "ControlReference": { "controlPath": "server:c[0]/c[1]", "formId": "1F4" },
                  "Changes": { "StringValue": "C-02" } }
            ]]
        }))
        .expect("decode");

        match handler {
            Handler::PropertyChanges { form_id, changes } => {
                assert_eq!(form_id, "1F4");
                assert_eq!(changes.len(), 1);
                assert_eq!(changes[0].kind, "PropertyChanges");
                assert_eq!(changes[0].control_path.as_deref(), Some("server:c[0]/c[1]"));
                assert_eq!(changes[0].changes["StringValue"], "C-02");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_decode_changes_rejects_non_array() {
        let err = Handler::decode(&json!({
            "handlerType": CHANGE_HANDLER,
            "parameters": ["1F4", "oops"]
        }))
        .unwrap_err();
        assert!(err.to_string().contains("string"));
    }

    #[test]
    fn test_decode_callback_response() {
        let handler = Handler::decode(&json!({
            "handlerType": CALLBACK_RESPONSE_HANDLER,
            "parameters": [{ "SequenceNumber": 12, "CompletedInteractions": [{ "InvocationId": "0" }] }]
        }))
        .expect("decode");
        match handler {
            Handler::CallbackResponse { sequence_number, completed_interactions } => {
                assert_eq!(sequence_number, Some(12));
                assert_eq!(completed_interactions.len(), 1);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_decode_session_init() {
        let handler = Handler::decode(&json!({
            "handlerType": SESSION_INIT_HANDLER,
            "parameters": [{ "ServerSessionId": "S-1", "SessionKey": "k", "CompanyName": "CRONUS" }]
        }))
        .expect("decode");
        assert_eq!(
            handler,
            Handler::SessionInit(ServerSession {
                session_id: "S-1".into(),
                session_key: Some("k".into()),
                company: Some("CRONUS".into()),
            })
        );
    }

    #[test]
    fn test_decode_unknown_is_raw() {
        let handler = Handler::decode(&json!({ "handlerType": "DN.Custom", "parameters": [1] }))
            .expect("decode");
        assert_eq!(
            handler,
            Handler::Raw { handler_type: "DN.Custom".into(), parameters: json!([1]) }
        );
    }

    #[test]
    fn test_decode_without_type_is_error() {
        assert!(Handler::decode(&json!({ "parameters": [] })).is_err());
    }

    #[test]
    fn test_decode_all_shapes() {
        let one = json!({ "handlerType": "DN.X", "parameters": [] });
        assert!(Handler::decode_all(&Value::Null).expect("null").is_empty());
        assert_eq!(Handler::decode_all(&json!([one.clone()])).expect("array").len(), 1);
        assert_eq!(Handler::decode_all(&json!({ "handlers": [one] })).expect("object").len(), 1);
        assert!(Handler::decode_all(&json!(5)).is_err());
        assert!(Handler::decode_all(&json!({ "x": 1 })).is_err());
    }

    #[test]
    fn test_locate_in_params() {
        let direct = json!([{ "handlerType": "A" }, { "handlerType": "B" }]);
        assert_eq!(Handler::locate_in_params(&direct).len(), 2);

        let nested = json!([{ "sequenceNumber": 4, "handlers": [{ "handlerType": "A" }, 7] }]);
        assert_eq!(Handler::locate_in_params(&nested).len(), 1);
        assert_eq!(Handler::sequence_in_params(&nested), Some(4));

        assert!(Handler::locate_in_params(&json!("x")).is_empty());
    }
}
