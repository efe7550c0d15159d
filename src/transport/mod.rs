//! WebSocket transport layer.
//!
//! This module handles JSON-RPC communication between the local end (Rust)
//! and the form server over one authenticated WebSocket.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐                              ┌─────────────────┐
//! │  Client (Rust)  │                              │  Form server    │
//! │                 │         WebSocket            │                 │
//! │  RpcTransport   │◄────────────────────────────►│  /csh endpoint  │
//! │  → event loop   │   cookies + X-CSRF-TOKEN     │                 │
//! │                 │                              │                 │
//! └─────────────────┘                              └─────────────────┘
//! ```
//!
//! # Connection Lifecycle
//!
//! 1. `AuthenticationService::authenticate_web` - Obtain session cookies
//! 2. `RpcTransport::connect` - Derive socket URL, open WebSocket
//! 3. `RpcTransport::send_rpc_request` - Correlated request/response
//! 4. `RpcTransport::disconnect` - Close socket, reject pending requests
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `connection` | WebSocket connection and event loop |
//! | `endpoint` | Socket URL derivation |
//! | `subscribers` | Fault-isolated subscriber registry |

// ============================================================================
// Submodules
// ============================================================================

/// WebSocket connection and event loop.
pub mod connection;

/// Socket URL derivation.
pub mod endpoint;

/// Subscriber registry shared by transport and session events.
pub mod subscribers;

// ============================================================================
// Re-exports
// ============================================================================

pub use connection::{RequestOptions, RpcChannel, RpcTransport, TransportOptions};
pub use subscribers::{Subscriber, SubscriberRegistry};
