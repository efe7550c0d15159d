//! Builder pattern for client configuration.
//!
//! Provides a fluent API for configuring and creating [`Client`] instances.
//!
//! # Example
//!
//! ```no_run
//! use webform_client::Client;
//!
//! # fn example() -> webform_client::Result<()> {
//! let client = Client::builder()
//!     .base_url("https://erp.example.com/BC")
//!     .tenant("default")
//!     .username("admin")
//!     .password("secret")
//!     .build()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use url::Url;

use crate::error::{Error, Result};
use crate::transport::endpoint::normalize_base_url;

use super::core::Client;
use super::options::ClientOptions;

// ============================================================================
// ClientBuilder
// ============================================================================

/// Builder for configuring a [`Client`] instance.
///
/// Use [`Client::builder()`] to create a new builder.
#[derive(Debug, Default, Clone)]
pub struct ClientBuilder {
    /// Server base URL.
    base_url: Option<String>,
    /// Tenant id.
    tenant: Option<String>,
    /// Login name.
    username: Option<String>,
    /// Login password.
    password: Option<String>,
    /// Bounds and overrides.
    options: ClientOptions,
}

// ============================================================================
// ClientBuilder Implementation
// ============================================================================

impl ClientBuilder {
    /// Creates a new client builder with no configuration.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the server base URL (e.g. `https://host/BC`).
    #[inline]
    #[must_use]
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Sets the tenant id.
    #[inline]
    #[must_use]
    pub fn tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant = Some(tenant.into());
        self
    }

    /// Sets the login name.
    #[inline]
    #[must_use]
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Sets the login password.
    #[inline]
    #[must_use]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Sets the client options.
    #[inline]
    #[must_use]
    pub fn options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    /// Builds the client with validation.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if a required field is not set
    /// - [`Error::Config`] if the base URL is not an http(s) URL
    pub fn build(self) -> Result<Client> {
        let base_url = self.validate_base_url()?;
        let tenant = required(self.tenant, "Tenant", "tenant", "default")?;
        let username = required(self.username, "Username", "username", "admin")?;
        let password = self.password.ok_or_else(|| {
            Error::config(
                "Password is required. Use .password() to set it.\n\
                 Example: Client::builder().password(\"secret\")",
            )
        })?;

        Client::new(base_url, tenant, username, password, self.options)
    }
}

// ============================================================================
// Validation
// ============================================================================

impl ClientBuilder {
    /// Validates the base URL configuration.
    fn validate_base_url(&self) -> Result<Url> {
        let raw = self.base_url.as_deref().ok_or_else(|| {
            Error::config(
                "Base URL is required. Use .base_url() to set it.\n\
                 Example: Client::builder().base_url(\"https://erp.example.com/BC\")",
            )
        })?;

        let normalized = normalize_base_url(raw);
        let url = Url::parse(&normalized)
            .map_err(|e| Error::config(format!("Invalid base URL '{raw}': {e}")))?;

        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(Error::config(format!(
                "Base URL must use http or https, got '{other}'"
            ))),
        }
    }
}

/// Requires a non-empty string field.
fn required(value: Option<String>, label: &str, method: &str, example: &str) -> Result<String> {
    match value {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(Error::config(format!(
            "{label} is required. Use .{method}() to set it.\n\
             Example: Client::builder().{method}(\"{example}\")"
        ))),
    }
}

// ============================================================================
// Tests
// ============================================================================
