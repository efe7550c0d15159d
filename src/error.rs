//! Error types for the form-server session client.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use webform_client::{Client, Result};
//!
//! async fn example(client: &Client) -> Result<()> {
//!     client.authenticate_web().await?;
//!     client.connect().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Authentication | [`Error::Authentication`] |
//! | Connection | [`Error::Connection`], [`Error::ConnectionTimeout`], [`Error::ConnectionClosed`], [`Error::NotConnected`] |
//! | RPC | [`Error::Rpc`], [`Error::RequestTimeout`], [`Error::Cancelled`] |
//! | Protocol | [`Error::Protocol`], [`Error::InvalidArgument`] |
//! | Pages | [`Error::InvalidPageContextId`], [`Error::PageNotFound`] |
//! | External | [`Error::Http`], [`Error::Json`], [`Error::WebSocket`], [`Error::Url`] |
//!
//! Control-path resolution never produces an error: it returns `None` and
//! leaves the policy to the caller.

// ============================================================================
// Imports
// ============================================================================

use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::identifiers::RequestId;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when client configuration is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Authentication Errors
    // ========================================================================
    /// Login handshake failed or no session is established.
    #[error("Authentication failed: {message}")]
    Authentication {
        /// Description of the authentication failure.
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// WebSocket connection failed.
    ///
    /// Returned when the socket cannot be opened or a frame cannot be written.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// Connection timeout waiting for the socket to open.
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// WebSocket connection closed while a request was outstanding.
    #[error("Connection closed")]
    ConnectionClosed,

    /// A request was issued while no socket is open.
    #[error("Not connected")]
    NotConnected,

    // ========================================================================
    // RPC Errors
    // ========================================================================
    /// Server-reported JSON-RPC error.
    #[error("RPC Error: {message}")]
    Rpc {
        /// JSON-RPC error code.
        code: i64,
        /// Server message.
        message: String,
    },

    /// Request timed out waiting for its response.
    #[error("Request {request_id} ({method}) timed out after {timeout_ms}ms")]
    RequestTimeout {
        /// The request ID that timed out.
        request_id: RequestId,
        /// Method of the timed-out request.
        method: String,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Operation was cancelled by the caller.
    #[error("Cancelled: {operation}")]
    Cancelled {
        /// Description of the cancelled operation.
        operation: String,
    },

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Protocol violation or unexpected payload shape.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    /// Invalid argument supplied by the caller.
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Description of the invalid argument.
        message: String,
    },

    // ========================================================================
    // Page Errors
    // ========================================================================
    /// Page context identifier could not be parsed.
    #[error("Invalid page context id '{value}': {reason}")]
    InvalidPageContextId {
        /// The offending identifier.
        value: String,
        /// Which field was missing or malformed.
        reason: String,
    },

    /// No open page with this context identifier.
    #[error("Page context not found: {page_context_id}")]
    PageNotFound {
        /// The unknown identifier.
        page_context_id: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// HTTP error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// URL parse error.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an authentication error.
    #[inline]
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a connection timeout error.
    #[inline]
    pub fn connection_timeout(timeout_ms: u64) -> Self {
        Self::ConnectionTimeout { timeout_ms }
    }

    /// Creates a JSON-RPC error.
    #[inline]
    pub fn rpc(code: i64, message: impl Into<String>) -> Self {
        Self::Rpc {
            code,
            message: message.into(),
        }
    }

    /// Creates a request timeout error.
    #[inline]
    pub fn request_timeout(request_id: RequestId, method: impl Into<String>, timeout_ms: u64) -> Self {
        Self::RequestTimeout {
            request_id,
            method: method.into(),
            timeout_ms,
        }
    }

    /// Creates a cancellation error.
    #[inline]
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    #[inline]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates an invalid page context id error.
    #[inline]
    pub fn invalid_page_context_id(value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPageContextId {
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Creates a page not found error.
    #[inline]
    pub fn page_not_found(page_context_id: impl Into<String>) -> Self {
        Self::PageNotFound {
            page_context_id: page_context_id.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::ConnectionTimeout { .. } | Self::RequestTimeout { .. }
        )
    }

    /// Returns `true` if this is an authentication error.
    #[inline]
    #[must_use]
    pub fn is_authentication_error(&self) -> bool {
        matches!(self, Self::Authentication { .. })
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::ConnectionTimeout { .. }
                | Self::ConnectionClosed
                | Self::NotConnected
                | Self::WebSocket(_)
        )
    }

    /// Returns `true` if this is a server-reported RPC error.
    #[inline]
    #[must_use]
    pub fn is_rpc_error(&self) -> bool {
        matches!(self, Self::Rpc { .. })
    }
}

// ============================================================================
// Tests
// ============================================================================
