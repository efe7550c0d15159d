//! Typed `OpenSession` and `Invoke` parameters.
//!
//! # Methods
//!
//! | Method | Params |
//! |--------|--------|
//! | `OpenSession` | `[OpenSessionRequest]` |
//! | `Invoke` | `[InvokeRequest]` |
//!
//! Both carry a list of [`Interaction`]s. `namedParameters` travels as a
//! JSON-encoded string, matching what the browser client sends.

// ============================================================================
// Imports
// ============================================================================

use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

// ============================================================================
// Constants
// ============================================================================

/// JSON-RPC method that opens a server session.
pub const OPEN_SESSION_METHOD: &str = "OpenSession";

/// JSON-RPC method that runs interactions in an open session.
pub const INVOKE_METHOD: &str = "Invoke";

/// Interaction that opens a page.
pub const OPEN_FORM_INTERACTION: &str = "OpenForm";

/// Interaction that closes a form.
pub const CLOSE_FORM_INTERACTION: &str = "CloseForm";

// ============================================================================
// Interaction
// ============================================================================

/// One interaction to run on the server.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Interaction {
    /// Interaction name (`OpenForm`, `InvokeAction`, `SaveValue`, ...).
    pub interaction_name: String,

    /// Interaction arguments, passed through unchanged.
    #[serde(serialize_with = "serialize_as_json_string")]
    pub named_parameters: Value,

    /// Target control path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub control_path: Option<String>,

    /// Target form id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub form_id: Option<String>,

    /// System action code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_action: Option<i64>,

    /// Client callback id, unique per call.
    pub callback_id: String,
}

impl Interaction {
    /// Creates an interaction with no target.
    #[must_use]
    pub fn new(interaction_name: impl Into<String>, named_parameters: Value) -> Self {
        Self {
            interaction_name: interaction_name.into(),
            named_parameters,
            control_path: None,
            form_id: None,
            system_action: None,
            callback_id: "0".to_string(),
        }
    }

    /// Sets the target control path.
    #[inline]
    #[must_use]
    pub fn with_control_path(mut self, control_path: impl Into<String>) -> Self {
        self.control_path = Some(control_path.into());
        self
    }

    /// Sets the target form id.
    #[inline]
    #[must_use]
    pub fn with_form_id(mut self, form_id: impl Into<String>) -> Self {
        self.form_id = Some(form_id.into());
        self
    }

    /// Sets the system action code.
    #[inline]
    #[must_use]
    pub fn with_system_action(mut self, system_action: i64) -> Self {
        self.system_action = Some(system_action);
        self
    }

    /// Sets the callback id.
    #[inline]
    #[must_use]
    pub fn with_callback_id(mut self, callback_id: impl Into<String>) -> Self {
        self.callback_id = callback_id.into();
        self
    }
}

fn serialize_as_json_string<S: Serializer>(value: &Value, serializer: S) -> Result<S::Ok, S::Error> {
    let text = match value {
        Value::Null => "{}".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    serializer.serialize_str(&text)
}

// ============================================================================
// OpenSessionRequest
// ============================================================================

/// Parameters of the `OpenSession` call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenSessionRequest {
    /// Forms the client already has open.
    pub open_form_ids: Vec<String>,

    /// Empty for a new session.
    pub session_id: String,

    /// Client sequence marker.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence_no: Option<String>,

    /// Highest server sequence number acknowledged (-1 for none).
    pub last_client_ack_sequence_number: i64,

    /// Client-generated session id used for telemetry correlation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub telemetry_client_session_id: Option<String>,

    /// Navigation context passed through unchanged.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub navigation_context: Option<Value>,

    /// Interactions run as part of opening the session.
    pub interactions_to_invoke: Vec<Interaction>,

    /// Tenant id.
    pub tenant_id: String,

    /// Company to open.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,

    /// Any further members, passed through unchanged.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl OpenSessionRequest {
    /// Creates a request for a tenant with no interactions.
    #[must_use]
    pub fn new(tenant_id: impl Into<String>) -> Self {
        Self {
            open_form_ids: Vec::new(),
            session_id: String::new(),
            sequence_no: None,
            last_client_ack_sequence_number: -1,
            telemetry_client_session_id: None,
            navigation_context: None,
            interactions_to_invoke: Vec::new(),
            tenant_id: tenant_id.into(),
            company: None,
            extra: Map::new(),
        }
    }

    /// Sets the company.
    #[inline]
    #[must_use]
    pub fn with_company(mut self, company: impl Into<String>) -> Self {
        self.company = Some(company.into());
        self
    }

    /// Adds an interaction.
    #[inline]
    #[must_use]
    pub fn with_interaction(mut self, interaction: Interaction) -> Self {
        self.interactions_to_invoke.push(interaction);
        self
    }

    /// Adds a pass-through member.
    #[inline]
    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

// ============================================================================
// InvokeRequest
// ============================================================================

/// Parameters of the `Invoke` call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokeRequest {
    /// Server session id.
    pub session_id: String,

    /// Client sequence marker.
    pub sequence_no: String,

    /// Highest server sequence number acknowledged.
    pub last_client_ack_sequence_number: i64,

    /// Forms the client has open.
    pub open_form_ids: Vec<String>,

    /// Interactions to run.
    pub interactions_to_invoke: Vec<Interaction>,
}

// ============================================================================
// Tests
// ============================================================================
