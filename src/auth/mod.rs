//! Web login and session credentials.
//!
//! The form server authenticates the WebSocket with the cookies of an
//! ordinary browser login plus the antiforgery token issued with them.
//!
//! # Login Exchange
//!
//! ```text
//! GET  {base}/SignIn?tenant=T          → Set-Cookie..., hidden __RequestVerificationToken
//! POST {base}/SignIn?tenant=T (form)   → 302 + Set-Cookie (.AspNetCore.Antiforgery...=CfDJ8...)
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `cookies` | Ordered cookie jar |
//! | `service` | Login exchange and credential state |

// ============================================================================
// Submodules
// ============================================================================

/// Ordered cookie jar.
pub mod cookies;

/// Login exchange and credential state.
pub mod service;

// ============================================================================
// Re-exports
// ============================================================================

pub use cookies::CookieJar;
pub use service::AuthenticationService;

// ============================================================================
// SessionCredentials
// ============================================================================

/// Credentials the transport attaches to the WebSocket handshake.
pub trait SessionCredentials: Send + Sync {
    /// Returns `true` once a login succeeded.
    fn is_authenticated(&self) -> bool;

    /// Returns the `Cookie` header value, if any cookies are held.
    fn cookie_header(&self) -> Option<String>;

    /// Returns the CSRF token, if one was issued.
    fn csrf_token(&self) -> Option<String>;
}
