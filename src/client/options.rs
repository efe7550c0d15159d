//! Client resource bounds and overrides.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use webform_client::ClientOptions;
//!
//! let options = ClientOptions::new()
//!     .with_request_timeout(Duration::from_secs(10))
//!     .with_max_pending_requests(16)
//!     .with_company("CRONUS");
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use url::Url;

use crate::session::adapter::DEFAULT_FILTER_INTERACTION;
use crate::transport::TransportOptions;
use crate::transport::connection::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_MAX_PENDING_REQUESTS, DEFAULT_PING_INTERVAL,
    DEFAULT_REQUEST_TIMEOUT,
};

// ============================================================================
// ClientOptions
// ============================================================================

/// Client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    /// Default time a request may wait for its response.
    pub request_timeout: Duration,

    /// Default time the socket may take to open.
    pub connect_timeout: Duration,

    /// Maximum outstanding requests.
    pub max_pending_requests: usize,

    /// Keep-alive ping interval; `None` disables pings.
    pub ping_interval: Option<Duration>,

    /// Socket URL used instead of the derived one.
    pub ws_url: Option<Url>,

    /// Interaction used to discover filter fields.
    pub filter_interaction: Option<String>,

    /// Company to open pages in.
    pub company: Option<String>,
}

// ============================================================================
// Constructors
// ============================================================================

impl ClientOptions {
    /// Creates options with default bounds.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            max_pending_requests: DEFAULT_MAX_PENDING_REQUESTS,
            ping_interval: Some(DEFAULT_PING_INTERVAL),
            ws_url: None,
            filter_interaction: None,
            company: None,
        }
    }
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl ClientOptions {
    /// Sets the request timeout.
    #[inline]
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the connect timeout.
    #[inline]
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the pending request cap.
    #[inline]
    #[must_use]
    pub fn with_max_pending_requests(mut self, max: usize) -> Self {
        self.max_pending_requests = max;
        self
    }

    /// Sets the keep-alive ping interval.
    #[inline]
    #[must_use]
    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = Some(interval);
        self
    }

    /// Disables keep-alive pings.
    #[inline]
    #[must_use]
    pub fn without_ping(mut self) -> Self {
        self.ping_interval = None;
        self
    }

    /// Overrides the socket URL.
    #[inline]
    #[must_use]
    pub fn with_ws_url(mut self, url: Url) -> Self {
        self.ws_url = Some(url);
        self
    }

    /// Sets the filter interaction name.
    #[inline]
    #[must_use]
    pub fn with_filter_interaction(mut self, name: impl Into<String>) -> Self {
        self.filter_interaction = Some(name.into());
        self
    }

    /// Sets the company.
    #[inline]
    #[must_use]
    pub fn with_company(mut self, company: impl Into<String>) -> Self {
        self.company = Some(company.into());
        self
    }
}

// ============================================================================
// Conversion Methods
// ============================================================================

impl ClientOptions {
    /// Returns the transport part of these options.
    #[must_use]
    pub fn transport_options(&self) -> TransportOptions {
        TransportOptions {
            request_timeout: self.request_timeout,
            connect_timeout: self.connect_timeout,
            max_pending_requests: self.max_pending_requests,
            ping_interval: self.ping_interval,
            url_override: self.ws_url.clone(),
        }
    }

    /// Returns the filter interaction name.
    #[must_use]
    pub fn filter_interaction(&self) -> &str {
        self.filter_interaction
            .as_deref()
            .unwrap_or(DEFAULT_FILTER_INTERACTION)
    }
}

// ============================================================================
// Tests
// ============================================================================
