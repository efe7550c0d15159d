//! Logical form tree.
//!
//! The server describes every page as a tree: a root [`LogicalForm`] with
//! nested [`Control`] nodes. Child order is the addressing basis for control
//! paths. `DesignName` is a display label and is not unique among siblings.
//!
//! # Format
//!
//! ```json
//! {
//!   "ServerId": "1F4",
//!   "Caption": "Customer Card",
//!   "DesignName": "Customer Card",
//!   "Children": [
//!     { "t": "gc", "DesignName": "General", "Children": [
//!       { "t": "sc", "DesignName": "No.", "StringValue": "10000" }
//!     ]}
//!   ]
//! }
//! ```
//!
//! Any member other than the ones modelled explicitly is kept verbatim in
//! `properties`.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

// ============================================================================
// FormNode
// ============================================================================

/// Common view of the root form and of controls.
pub trait FormNode {
    /// Ordered child controls, or `None` for a leaf.
    fn children(&self) -> Option<&[Control]>;

    /// Display name of the node (not unique).
    fn design_name(&self) -> Option<&str>;

    /// Remaining server-supplied members.
    fn properties(&self) -> &Map<String, Value>;

    /// Gets a string property.
    #[inline]
    fn property_str(&self, key: &str) -> Option<&str> {
        self.properties().get(key).and_then(Value::as_str)
    }

    /// Gets a boolean property.
    #[inline]
    fn property_bool(&self, key: &str) -> Option<bool> {
        self.properties().get(key).and_then(Value::as_bool)
    }
}

// ============================================================================
// LogicalForm
// ============================================================================

/// Root node of a server-rendered page.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LogicalForm {
    /// Server-side form identifier used as `formId` in interactions.
    #[serde(rename = "ServerId", default, skip_serializing_if = "Option::is_none")]
    pub server_id: Option<String>,

    /// Form caption.
    #[serde(rename = "Caption", default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,

    /// Design name (not unique).
    #[serde(rename = "DesignName", default, skip_serializing_if = "Option::is_none")]
    pub design_name: Option<String>,

    /// Top-level controls.
    #[serde(rename = "Children", default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<Control>>,

    /// All other members.
    #[serde(flatten)]
    pub properties: Map<String, Value>,
}

impl LogicalForm {
    /// Decodes a form from a JSON payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the payload is not an object or a
    /// `Children` member is not an array of objects.
    pub fn from_value(value: &Value) -> Result<Self> {
        if !value.is_object() {
            return Err(Error::protocol(format!(
                "logical form must be an object, got {}",
                json_kind(value)
            )));
        }
        Self::deserialize(value).map_err(|e| Error::protocol(format!("invalid logical form: {e}")))
    }

    /// Returns the server form id, if present.
    #[inline]
    #[must_use]
    pub fn form_id(&self) -> Option<&str> {
        self.server_id.as_deref()
    }
}

impl FormNode for LogicalForm {
    #[inline]
    fn children(&self) -> Option<&[Control]> {
        self.children.as_deref()
    }

    #[inline]
    fn design_name(&self) -> Option<&str> {
        self.design_name.as_deref()
    }

    #[inline]
    fn properties(&self) -> &Map<String, Value> {
        &self.properties
    }
}

// ============================================================================
// Control
// ============================================================================

/// One node inside a logical form.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Control {
    /// Control kind tag (`gc`, `sc`, `dc`, ...).
    #[serde(rename = "t", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    /// Design name (not unique).
    #[serde(rename = "DesignName", default, skip_serializing_if = "Option::is_none")]
    pub design_name: Option<String>,

    /// Child controls.
    #[serde(rename = "Children", default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<Control>>,

    /// All other members.
    #[serde(flatten)]
    pub properties: Map<String, Value>,
}

impl Control {
    /// Creates a leaf control with a kind and design name.
    #[must_use]
    pub fn leaf(kind: impl Into<String>, design_name: impl Into<String>) -> Self {
        Self {
            kind: Some(kind.into()),
            design_name: Some(design_name.into()),
            children: None,
            properties: Map::new(),
        }
    }

    /// Creates a container control.
    #[must_use]
    pub fn group(
        kind: impl Into<String>,
        design_name: impl Into<String>,
        children: Vec<Control>,
    ) -> Self {
        Self {
            kind: Some(kind.into()),
            design_name: Some(design_name.into()),
            children: Some(children),
            properties: Map::new(),
        }
    }

    /// Adds a property.
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }
}

impl FormNode for Control {
    #[inline]
    fn children(&self) -> Option<&[Control]> {
        self.children.as_deref()
    }

    #[inline]
    fn design_name(&self) -> Option<&str> {
        self.design_name.as_deref()
    }

    #[inline]
    fn properties(&self) -> &Map<String, Value> {
        &self.properties
    }
}

// ============================================================================
// NodeRef
// ============================================================================

/// A borrowed node of a form tree: either the root or one control.
#[derive(Debug, Clone, Copy)]
pub enum NodeRef<'a> {
    /// The root form.
    Form(&'a LogicalForm),
    /// A control inside the form.
    Control(&'a Control),
}

impl<'a> NodeRef<'a> {
    /// Returns `true` if this is the root form.
    #[inline]
    #[must_use]
    pub fn is_root(&self) -> bool {
        matches!(self, Self::Form(_))
    }

    /// Returns the control, or `None` for the root.
    #[inline]
    #[must_use]
    pub fn as_control(&self) -> Option<&'a Control> {
        match self {
            Self::Form(_) => None,
            Self::Control(control) => Some(control),
        }
    }

    /// Ordered children of the node.
    #[inline]
    #[must_use]
    pub fn children(&self) -> Option<&'a [Control]> {
        match self {
            Self::Form(form) => form.children.as_deref(),
            Self::Control(control) => control.children.as_deref(),
        }
    }

    /// Design name of the node.
    #[inline]
    #[must_use]
    pub fn design_name(&self) -> Option<&'a str> {
        match self {
            Self::Form(form) => form.design_name.as_deref(),
            Self::Control(control) => control.design_name.as_deref(),
        }
    }

    /// Returns `true` if both refer to the same node in memory.
    #[inline]
    #[must_use]
    pub fn same_node(&self, other: &NodeRef<'_>) -> bool {
        match (self, other) {
            (NodeRef::Form(a), NodeRef::Form(b)) => std::ptr::eq(*a, *b),
            (NodeRef::Control(a), NodeRef::Control(b)) => std::ptr::eq(*a, *b),
            _ => false,
        }
    }
}

/// Short name of a JSON value's type for error messages.
pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ============================================================================
// Tests
// ============================================================================
