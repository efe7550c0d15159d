//! Client entry point.
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Client`] | Login, socket and session facade |
//! | [`ClientBuilder`] | Fluent configuration builder |
//! | [`ClientOptions`] | Resource bounds and overrides |

// ============================================================================
// Submodules
// ============================================================================

/// Fluent builder pattern for client configuration.
pub mod builder;

/// Core client implementation.
pub mod core;

/// Client options.
pub mod options;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::ClientBuilder;
pub use core::Client;
pub use options::ClientOptions;
