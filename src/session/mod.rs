//! Session layer: typed calls, page contexts, filter cache, server events.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `adapter` | `OpenSession` / `Invoke` with session bookkeeping |
//! | `events` | Handler event fan-out |
//! | `filters` | Filter metadata and its cache |
//! | `manager` | Page contexts |

// ============================================================================
// Submodules
// ============================================================================

/// Typed session calls.
pub mod adapter;

/// Handler event fan-out.
pub mod events;

/// Filter metadata and cache.
pub mod filters;

/// Page contexts.
pub mod manager;

// ============================================================================
// Re-exports
// ============================================================================

pub use adapter::{InvokeOptions, ProtocolAdapter};
pub use events::{HandlerEvent, HandlerEventEmitter};
pub use filters::{FilterField, FilterMetadata, FilterMetadataCache};
pub use manager::{OpenPageOptions, PageContext, SessionManager};
