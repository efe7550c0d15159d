//! WebSocket endpoint derivation.
//!
//! The socket lives next to the sign-in page:
//!
//! ```text
//! https://host/BC           → wss://host/BC/csh?ackseqnb=-1&tenant=default&csrftoken=CfDJ8...
//! http://127.0.0.1:8080     → ws://127.0.0.1:8080/csh?ackseqnb=-1&tenant=default
//! ```

// ============================================================================
// Imports
// ============================================================================

use url::Url;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Path segment of the client service handler socket.
const SOCKET_PATH: &str = "csh";

/// Initial acknowledged sequence number sent on the handshake.
const INITIAL_ACK_SEQUENCE: &str = "-1";

// ============================================================================
// Functions
// ============================================================================

/// Normalizes a base URL string: trims whitespace and trailing slashes.
#[must_use]
pub fn normalize_base_url(base_url: &str) -> String {
    base_url.trim().trim_end_matches('/').to_string()
}

/// Derives the WebSocket URL from the server base URL.
///
/// # Errors
///
/// Returns [`Error::Config`] if the base URL scheme is not http(s) or ws(s).
pub fn socket_url(base_url: &Url, tenant: &str, csrf_token: Option<&str>) -> Result<Url> {
    let mut url = base_url.clone();

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(Error::config(format!(
                "unsupported base URL scheme '{other}', expected http or https"
            )));
        }
    };
    url.set_scheme(scheme)
        .map_err(|()| Error::config(format!("cannot switch {base_url} to {scheme}")))?;

    let path = format!("{}/{SOCKET_PATH}", url.path().trim_end_matches('/'));
    url.set_path(&path);
    url.set_fragment(None);
    url.set_query(None);

    {
        let mut query = url.query_pairs_mut();
        query.append_pair("ackseqnb", INITIAL_ACK_SEQUENCE);
        if !tenant.is_empty() {
            query.append_pair("tenant", tenant);
        }
        if let Some(token) = csrf_token {
            query.append_pair("csrftoken", token);
        }
    }

    Ok(url)
}

// ============================================================================
// Tests
// ============================================================================
