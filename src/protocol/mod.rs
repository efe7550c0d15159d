//! Wire protocol types.
//!
//! This module defines the JSON-RPC envelope, the typed call parameters,
//! the handler payloads returned by the server, and the logical form tree
//! those payloads describe.
//!
//! # Protocol Overview
//!
//! | Message Type | Direction | Purpose |
//! |--------------|-----------|---------|
//! | `RpcRequest` | Local → Remote | `OpenSession` / `Invoke` call |
//! | `InboundMessage::Response` | Remote → Local | Result or error for one call |
//! | `InboundMessage::Notification` | Remote → Local | Server-push handler list |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `form` | Logical form tree |
//! | `handler` | Handler payload decoding |
//! | `interaction` | `OpenSession` / `Invoke` params |
//! | `path` | Control path parsing and resolution |
//! | `request` | JSON-RPC envelope |

// ============================================================================
// Submodules
// ============================================================================

/// Logical form tree.
pub mod form;

/// Handler payload decoding.
pub mod handler;

/// Typed call parameters.
pub mod interaction;

/// Control path parsing and positional resolution.
pub mod path;

/// JSON-RPC request and response types.
pub mod request;

// ============================================================================
// Re-exports
// ============================================================================

pub use form::{Control, FormNode, LogicalForm, NodeRef};
pub use handler::{Handler, PropertyChange, ServerSession};
pub use interaction::{Interaction, InvokeRequest, OpenSessionRequest};
pub use path::{ControlPath, PathSegment, resolve, resolve_control};
pub use request::{InboundMessage, RpcErrorObject, RpcRequest, RpcResponse};
