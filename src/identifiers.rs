//! Type-safe identifiers.
//!
//! Newtype wrappers prevent mixing incompatible IDs at compile time.
//!
//! | Type | Wraps | Used for |
//! |------|-------|----------|
//! | [`RequestId`] | UUID v4 | JSON-RPC request/response correlation |
//! | [`SubscriptionId`] | `u64` | Unsubscribe token for raw/handler subscribers |
//! | [`PageContextId`] | `String` | Capability token naming one open page |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{Error, Result};

// ============================================================================
// RequestId
// ============================================================================

/// Unique identifier of an outbound JSON-RPC request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Generates a fresh random request ID.
    #[inline]
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Reads a request ID from the `id` member of an inbound frame.
    ///
    /// Returns `None` for numeric or otherwise foreign ids, which can never
    /// match a request this client sent.
    #[must_use]
    pub fn from_json(value: &Value) -> Option<Self> {
        value.as_str().and_then(|s| Uuid::parse_str(s).ok()).map(Self)
    }

    /// Returns the underlying UUID.
    #[inline]
    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ============================================================================
// SubscriptionId
// ============================================================================

/// Stable token returned when registering a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Creates a subscription ID from its raw value.
    #[inline]
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

// ============================================================================
// PageContextId
// ============================================================================

/// Literal tag in the second field of a page context identifier.
const PAGE_TAG: &str = "page";

/// Opaque identifier of one open page within one session.
///
/// # Format
///
/// ```text
/// <sessionId>:page:<pageId>:<timestampMillis>
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct PageContextId(String);

/// The semantic fields of a [`PageContextId`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageContextParts {
    /// Server session the page belongs to.
    pub session_id: String,
    /// Page identifier as sent to the server.
    pub page_id: String,
    /// Creation timestamp (milliseconds since the epoch, as text).
    pub timestamp: String,
}

impl PageContextId {
    /// Builds an identifier from its fields.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPageContextId`] if the session or page id is
    /// empty or contains the `:` separator.
    pub fn build(
        session_id: &str,
        page_id: impl fmt::Display,
        timestamp: impl fmt::Display,
    ) -> Result<Self> {
        let page_id = page_id.to_string();
        check_field("session id", session_id)
            .and_then(|()| check_field("page id", &page_id))
            .map_err(|reason| {
                Error::invalid_page_context_id(format!("{session_id}:{PAGE_TAG}:{page_id}"), reason)
            })?;

        Ok(Self(format!("{session_id}:{PAGE_TAG}:{page_id}:{timestamp}")))
    }

    /// Checks that `page_id` can be embedded in an identifier.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPageContextId`] if `page_id` is empty or
    /// contains the `:` separator.
    pub fn check_page_id(page_id: &str) -> Result<()> {
        check_field("page id", page_id)
            .map_err(|reason| Error::invalid_page_context_id(page_id, reason))
    }

    /// Parses an identifier string, validating its fields.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPageContextId`] if the session id or page id is
    /// missing, or the tag is not `page`.
    pub fn parse(value: &str) -> Result<PageContextParts> {
        let mut fields = value.splitn(4, ':');
        let session_id = fields.next().unwrap_or_default();
        let tag = fields.next();
        let page_id = fields.next().unwrap_or_default();
        let timestamp = fields.next().unwrap_or_default();

        if session_id.is_empty() {
            return Err(Error::invalid_page_context_id(value, "missing session id"));
        }
        if tag != Some(PAGE_TAG) {
            return Err(Error::invalid_page_context_id(value, "missing 'page' tag"));
        }
        if page_id.is_empty() {
            return Err(Error::invalid_page_context_id(value, "missing page id"));
        }

        Ok(PageContextParts {
            session_id: session_id.to_string(),
            page_id: page_id.to_string(),
            timestamp: timestamp.to_string(),
        })
    }

    /// Wraps a string received from a caller after validating it.
    ///
    /// # Errors
    ///
    /// Same as [`PageContextId::parse`].
    pub fn from_string(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        Self::parse(&value)?;
        Ok(Self(value))
    }

    /// Returns the parsed fields of this identifier.
    #[must_use]
    pub fn parts(&self) -> PageContextParts {
        // Only constructed through `build` or `from_string`, both validated.
        Self::parse(&self.0).unwrap_or_else(|_| PageContextParts {
            session_id: String::new(),
            page_id: String::new(),
            timestamp: String::new(),
        })
    }

    /// Returns the identifier string.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PageContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for PageContextId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::from_string(value)
    }
}

impl From<PageContextId> for String {
    fn from(id: PageContextId) -> Self {
        id.0
    }
}

/// Rejects empty values and values containing the field separator.
fn check_field(field: &str, value: &str) -> std::result::Result<(), String> {
    if value.is_empty() {
        Err(format!("{field} is empty"))
    } else if value.contains(':') {
        Err(format!("{field} contains ':'"))
    } else {
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    #[test]
    fn test_request_id_unique() {
        assert_ne!(RequestId::generate(), RequestId::generate());
    }

    #[test]
    fn test_request_id_from_json() {
        let id = RequestId::generate();
        let value = Value::String(id.to_string());
        assert_eq!(RequestId::from_json(&value), Some(id));
        assert_eq!(RequestId::from_json(&Value::from(7)), None);
        assert_eq!(RequestId::from_json(&Value::from("nope")), None);
    }

    #[test]
    fn test_build_format() {
        let id = PageContextId::build("sess1", 21, 1_700_000_000_000u64).expect("valid");
        assert_eq!(id.as_str(), "sess1:page:21:1700000000000");
    }

    #[test]
    fn test_build_rejects_empty_fields() {
        assert!(PageContextId::build("", 21, 0).is_err());
        assert!(PageContextId::build("s", "", 0).is_err());
        assert!(PageContextId::build("a:b", 21, 0).is_err());
    }

    #[test]
    fn test_parse_rejects_missing_fields() {
        assert!(PageContextId::parse("sess:notpage:21:1").is_err());
        assert!(PageContextId::parse(":page:21:1").is_err());
        assert!(PageContextId::parse("sess:page::1").is_err());
        assert!(PageContextId::parse("sess:page").is_err());
        assert!(PageContextId::parse("sess").is_err());
        assert!(PageContextId::parse("").is_err());
    }

    #[test]
    fn test_parse_without_timestamp() {
        let parts = PageContextId::parse("sess:page:21").expect("valid");
        assert_eq!(parts.page_id, "21");
        assert_eq!(parts.timestamp, "");
    }

    #[test]
    fn test_from_string_validates() {
        assert!(PageContextId::from_string("s:page:1:2").is_ok());
        assert!(PageContextId::from_string("s:pg:1:2").is_err());
    }

    #[test]
    fn test_check_page_id() {
        assert!(PageContextId::check_page_id("21").is_ok());
        assert!(matches!(
            PageContextId::check_page_id("21:x"),
            Err(Error::InvalidPageContextId { .. })
        ));
        assert!(PageContextId::check_page_id("").is_err());
    }

    #[test]
    fn test_deserialize_validates() {
        let id: PageContextId = serde_json::from_value(Value::from("s:page:21:5")).expect("valid");
        assert_eq!(id.parts().page_id, "21");
        assert_eq!(serde_json::to_value(&id).expect("serialize"), "s:page:21:5");

        assert!(serde_json::from_value::<PageContextId>(Value::from("s:pg:21:5")).is_err());
        assert!(serde_json::from_value::<PageContextId>(Value::from(":page:21:5")).is_err());
    }

    proptest! {
        #[test]
        fn prop_build_parse_round_trip(
            session in "[A-Za-z0-9_-]{1,24}",
            page in 1u32..100_000,
            ts in any::<u64>(),
        ) {
            let id = PageContextId::build(&session, page, ts).expect("valid");
            let parts = PageContextId::parse(id.as_str()).expect("parse");
            prop_assert_eq!(parts.session_id, session);
            prop_assert_eq!(parts.page_id, page.to_string());
            prop_assert_eq!(parts.timestamp, ts.to_string());
        }

        #[test]
        fn prop_parse_fails_without_page_tag(
            session in "[A-Za-z0-9]{1,12}",
            tag in "[a-z]{1,6}".prop_filter("not the page tag", |t| t != "page"),
            page in "[0-9]{1,6}",
        ) {
            let value = format!("{session}:{tag}:{page}:0");
            prop_assert!(PageContextId::parse(&value).is_err());
        }
    }
}
