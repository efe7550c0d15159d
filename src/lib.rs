//! Web form-server session client.
//!
//! This library drives a stateful, form-based business web server the way
//! its browser client does: an HTTP cookie login followed by JSON-RPC over
//! one authenticated WebSocket.
//!
//! # Architecture
//!
//! The client follows a layered model:
//!
//! - **Auth**: two-step sign-in yielding session cookies and a CSRF token
//! - **Transport**: one socket, many concurrent requests correlated by UUID
//! - **Session**: typed `OpenSession` / `Invoke`, page contexts, server events
//!
//! Key design principles:
//!
//! - Controls are addressed positionally (`server:c[1]/c[0]`), never by name
//! - Server payloads decode into a tagged [`Handler`] union with an explicit
//!   raw fallback
//! - Subscribers run in registration order; a panicking one is isolated
//! - Every pending request is settled exactly once
//!
//! # Quick Start
//!
//! ```no_run
//! use webform_client::{Client, OpenSessionRequest, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let client = Client::builder()
//!         .base_url("https://erp.example.com/BC")
//!         .tenant("default")
//!         .username("admin")
//!         .password("secret")
//!         .build()?;
//!
//!     client.authenticate_web().await?;
//!     client.connect().await?;
//!     client.open_session(OpenSessionRequest::new("default")).await?;
//!
//!     let page = client.open_page("21").await?;
//!     println!("Opened {}", page.id);
//!
//!     client.disconnect().await;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`auth`] | Web login and credentials |
//! | [`client`] | [`Client`] facade and configuration |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | Wire types, form tree, control paths |
//! | [`session`] | Typed calls, page contexts, filter cache |
//! | [`transport`] | WebSocket transport layer |

// ============================================================================
// Modules
// ============================================================================

/// Web login and session credentials.
pub mod auth;

/// Client facade and configuration.
///
/// Use [`Client::builder()`] to create a configured client.
pub mod client;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers.
///
/// Newtype wrappers prevent mixing incompatible IDs at compile time.
pub mod identifiers;

/// Wire protocol types.
///
/// JSON-RPC envelope, handler payloads, logical forms and control paths.
pub mod protocol;

/// Session layer.
///
/// Typed calls, page contexts, filter metadata and server events.
pub mod session;

/// WebSocket transport layer.
///
/// Connection, event loop and request correlation.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Auth types
pub use auth::{AuthenticationService, CookieJar, SessionCredentials};

// Client types
pub use client::{Client, ClientBuilder, ClientOptions};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{PageContextId, PageContextParts, RequestId, SubscriptionId};

// Protocol types
pub use protocol::{
    Control, ControlPath, FormNode, Handler, Interaction, LogicalForm, NodeRef,
    OpenSessionRequest, PropertyChange, ServerSession, resolve, resolve_control,
};

// Session types
pub use session::{
    FilterField, FilterMetadata, FilterMetadataCache, HandlerEvent, HandlerEventEmitter,
    InvokeOptions, OpenPageOptions, PageContext, ProtocolAdapter, SessionManager,
};

// Transport types
pub use transport::{RequestOptions, RpcChannel, RpcTransport, TransportOptions};
