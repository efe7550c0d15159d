//! Client facade over login, transport and session layers.
//!
//! The [`Client`] owns one authenticated session with one physical socket.
//!
//! # Example
//!
//! ```no_run
//! use webform_client::{Client, OpenSessionRequest};
//!
//! # async fn example() -> webform_client::Result<()> {
//! let client = Client::builder()
//!     .base_url("https://erp.example.com/BC")
//!     .tenant("default")
//!     .username("admin")
//!     .password("secret")
//!     .build()?;
//!
//! client.authenticate_web().await?;
//! client.connect().await?;
//! client.open_session(OpenSessionRequest::new("default")).await?;
//!
//! let page = client.open_page("21").await?;
//! let control = client.resolve_control(&page.id, "server:c[1]/c[0]")?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;

use crate::auth::AuthenticationService;
use crate::error::{Error, Result};
use crate::identifiers::{PageContextId, SubscriptionId};
use crate::protocol::{Control, Handler, OpenSessionRequest, ServerSession};
use crate::session::{
    FilterMetadata, FilterMetadataCache, HandlerEvent, HandlerEventEmitter, InvokeOptions,
    OpenPageOptions, PageContext, ProtocolAdapter, SessionManager,
};
use crate::transport::RpcTransport;

use super::builder::ClientBuilder;
use super::options::ClientOptions;

// ============================================================================
// Types
// ============================================================================

/// Internal shared state for the client.
struct ClientInner {
    /// Login and credentials.
    auth: Arc<AuthenticationService>,
    /// The socket.
    transport: Arc<RpcTransport>,
    /// Typed calls and session bookkeeping.
    adapter: Arc<ProtocolAdapter>,
    /// Open pages.
    sessions: Arc<SessionManager>,
    /// Filter metadata by page id.
    filters: Arc<FilterMetadataCache>,
    /// Configuration.
    options: ClientOptions,
}

// ============================================================================
// Client
// ============================================================================

/// Session client for a form server.
///
/// Cloning is cheap; clones share the same session.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

// ============================================================================
// Client - Display
// ============================================================================

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("base_url", &self.inner.auth.base_url())
            .field("tenant", &self.inner.auth.tenant())
            .field("authenticated", &self.is_authenticated())
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Client - Construction
// ============================================================================

impl Client {
    /// Creates a configuration builder for the client.
    #[inline]
    #[must_use]
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Wires the layers together. Use [`Client::builder`] instead.
    pub(crate) fn new(
        base_url: Url,
        tenant: String,
        username: String,
        password: String,
        options: ClientOptions,
    ) -> Result<Self> {
        let auth = Arc::new(AuthenticationService::new(
            base_url.as_str(),
            tenant.clone(),
            username,
            password,
        )?);

        let transport = Arc::new(RpcTransport::new(
            auth.clone(),
            base_url,
            tenant,
            options.transport_options(),
        ));

        let adapter = Arc::new(ProtocolAdapter::with_filter_interaction(
            transport.clone(),
            Arc::new(HandlerEventEmitter::new()),
            options.filter_interaction(),
        ));

        let filters = Arc::new(FilterMetadataCache::new());
        let sessions = Arc::new(SessionManager::new(Arc::clone(&adapter), Arc::clone(&filters)));

        let weak_sessions = Arc::downgrade(&sessions);
        let weak_filters = Arc::downgrade(&filters);
        let weak_adapter = Arc::downgrade(&adapter);
        transport.on_disconnect(move |_| {
            if let Some(sessions) = weak_sessions.upgrade() {
                sessions.invalidate_all();
            }
            if let Some(filters) = weak_filters.upgrade() {
                filters.clear();
            }
            if let Some(adapter) = weak_adapter.upgrade() {
                adapter.reset();
            }
        });

        Ok(Self {
            inner: Arc::new(ClientInner {
                auth,
                transport,
                adapter,
                sessions,
                filters,
                options,
            }),
        })
    }
}

// ============================================================================
// Client - Lifecycle
// ============================================================================

impl Client {
    /// Runs the web login.
    ///
    /// # Errors
    ///
    /// See [`AuthenticationService::authenticate_web`].
    pub async fn authenticate_web(&self) -> Result<()> {
        self.inner.auth.authenticate_web().await
    }

    /// Opens the socket and starts decoding server-push frames.
    ///
    /// # Errors
    ///
    /// See [`RpcTransport::connect_with`].
    pub async fn connect(&self) -> Result<()> {
        self.connect_with(None, None).await
    }

    /// Opens the socket with an explicit timeout and cancellation token.
    ///
    /// # Errors
    ///
    /// See [`RpcTransport::connect_with`].
    pub async fn connect_with(
        &self,
        timeout: Option<Duration>,
        cancel: Option<CancellationToken>,
    ) -> Result<()> {
        self.inner.transport.connect_with(timeout, cancel).await?;
        self.inner.adapter.attach();
        Ok(())
    }

    /// Closes the socket and drops all page contexts and cached filters.
    ///
    /// Idempotent.
    pub async fn disconnect(&self) {
        self.inner.transport.disconnect().await;
        self.inner.sessions.invalidate_all();
        self.inner.filters.clear();
        debug!("Client state cleared");
    }

    /// Returns `true` once a login succeeded.
    #[inline]
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.inner.auth.is_authenticated()
    }

    /// Returns `true` while the socket is open.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.transport.is_connected()
    }

    /// Returns the session cookies as `name=value` strings.
    #[must_use]
    pub fn session_cookies(&self) -> Vec<String> {
        self.inner.auth.session_cookies()
    }

    /// Returns the CSRF token, if the server issued one.
    #[must_use]
    pub fn csrf_token(&self) -> Option<String> {
        self.inner.auth.csrf_token()
    }

    /// Returns the client options.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &ClientOptions {
        &self.inner.options
    }
}

// ============================================================================
// Client - Session
// ============================================================================

impl Client {
    /// Opens a server session.
    ///
    /// The configured company is used when the request names none.
    ///
    /// # Errors
    ///
    /// See [`ProtocolAdapter::open_session`].
    pub async fn open_session(&self, mut request: OpenSessionRequest) -> Result<Vec<Handler>> {
        if request.company.is_none() {
            request.company.clone_from(&self.inner.options.company);
        }

        let handlers = self.inner.adapter.open_session(request).await?;
        if let Some(session) = self.inner.adapter.server_session() {
            info!(session_id = %session.session_id, "Session opened");
        }
        Ok(handlers)
    }

    /// Runs one interaction.
    ///
    /// # Errors
    ///
    /// See [`ProtocolAdapter::invoke`].
    pub async fn invoke(&self, options: InvokeOptions) -> Result<Vec<Handler>> {
        self.inner.adapter.invoke(options).await
    }

    /// Returns the server session info, once a session is open.
    #[must_use]
    pub fn server_session(&self) -> Option<ServerSession> {
        self.inner.adapter.server_session()
    }
}

// ============================================================================
// Client - Pages
// ============================================================================

impl Client {
    /// Opens a page in the configured company.
    ///
    /// # Errors
    ///
    /// See [`SessionManager::open_page`].
    pub async fn open_page(&self, page_id: &str) -> Result<PageContext> {
        let mut options = OpenPageOptions::default();
        options.company.clone_from(&self.inner.options.company);
        self.open_page_with(page_id, options).await
    }

    /// Opens a page with explicit options.
    ///
    /// # Errors
    ///
    /// See [`SessionManager::open_page`].
    pub async fn open_page_with(&self, page_id: &str, options: OpenPageOptions) -> Result<PageContext> {
        self.inner.sessions.open_page(page_id, options).await
    }

    /// Closes a page.
    ///
    /// # Errors
    ///
    /// See [`SessionManager::close_page`].
    pub async fn close_page(&self, id: &PageContextId) -> Result<()> {
        self.inner.sessions.close_page(id).await
    }

    /// Returns an open page.
    #[must_use]
    pub fn page(&self, id: &PageContextId) -> Option<PageContext> {
        self.inner.sessions.get(id)
    }

    /// Returns all open pages.
    #[must_use]
    pub fn pages(&self) -> Vec<PageContext> {
        self.inner.sessions.contexts()
    }

    /// Returns the filterable fields of a page, fetching them once.
    ///
    /// # Errors
    ///
    /// - [`Error::PageNotFound`] if `id` is not an open page, or closed
    ///   while the metadata was being fetched
    /// - errors from [`ProtocolAdapter::fetch_filter_metadata`]
    pub async fn filter_metadata(&self, id: &PageContextId) -> Result<Arc<FilterMetadata>> {
        let context = self
            .inner
            .sessions
            .get(id)
            .ok_or_else(|| Error::page_not_found(id.as_str()))?;

        let adapter = &self.inner.adapter;
        let metadata = self
            .inner
            .filters
            .get_or_fetch(&context.page_id, || adapter.fetch_filter_metadata(&context.form_id))
            .await?;

        // The page may have closed while the fetch was in flight.
        if self.inner.sessions.get(id).is_none() {
            self.inner.filters.invalidate(&context.page_id);
            debug!(page_context_id = %id, "Page closed during filter fetch");
            return Err(Error::page_not_found(id.as_str()));
        }
        Ok(metadata)
    }

    /// Resolves a control path inside a page's form.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PageNotFound`] if `id` is not an open page.
    pub fn resolve_control(&self, id: &PageContextId, path: &str) -> Result<Option<Control>> {
        self.inner.sessions.resolve_control(id, path)
    }
}

// ============================================================================
// Client - Subscriptions
// ============================================================================

impl Client {
    /// Registers a callback for handlers pushed by the server.
    pub fn on_handler_event<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&HandlerEvent) + Send + Sync + 'static,
    {
        self.inner.adapter.emitter().subscribe(handler)
    }

    /// Registers a callback for every parsed inbound frame.
    pub fn on_raw_message<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.inner.transport.on_raw_message(handler)
    }

    /// Removes a subscription made through this client.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.adapter.emitter().unsubscribe(id) || self.inner.transport.unsubscribe(id)
    }
}

// ============================================================================
// Tests
// ============================================================================
