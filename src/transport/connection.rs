//! WebSocket connection and event loop.
//!
//! This module owns the single physical socket to the server, including
//! JSON-RPC request/response correlation and raw frame broadcast.
//!
//! # Event Loop
//!
//! Each successful [`RpcTransport::connect`] spawns a tokio task that
//! handles:
//!
//! - Incoming frames (responses, server-push notifications)
//! - Outgoing requests from the Rust API
//! - Request/response correlation by UUID
//! - Raw subscriber callbacks
//! - Keep-alive pings while idle
//!
//! When the loop ends, for any reason, every still-pending request is
//! rejected with [`Error::ConnectionClosed`] and disconnect subscribers run.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::{Value, from_str, to_string};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at, sleep, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::COOKIE;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use url::Url;

use crate::auth::SessionCredentials;
use crate::error::{Error, Result};
use crate::identifiers::{RequestId, SubscriptionId};
use crate::protocol::{InboundMessage, RpcRequest};

use super::endpoint;
use super::subscribers::{Subscriber, SubscriberRegistry};

// ============================================================================
// Constants
// ============================================================================

/// Default timeout for a request to be answered.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default timeout for the socket to open.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default cap on outstanding requests.
pub const DEFAULT_MAX_PENDING_REQUESTS: usize = 100;

/// Default keep-alive ping interval.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(30);

/// Upper bound on waiting for the close handshake in `disconnect`.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Header carrying the CSRF token on the handshake.
const CSRF_HEADER: &str = "x-csrf-token";

// ============================================================================
// Types
// ============================================================================

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

type WsSink = SplitSink<WsStream, Message>;

/// One outstanding request.
struct PendingRequest {
    /// Originating method, for logs and errors.
    method: String,
    /// Completion handle.
    response_tx: oneshot::Sender<Result<Value>>,
}

/// Map of request IDs to pending requests.
type CorrelationMap = FxHashMap<RequestId, PendingRequest>;

// ============================================================================
// TransportOptions
// ============================================================================

/// Resource bounds and endpoint overrides for the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportOptions {
    /// Default time a request may wait for its response.
    pub request_timeout: Duration,
    /// Default time the socket may take to open.
    pub connect_timeout: Duration,
    /// Maximum outstanding requests.
    pub max_pending_requests: usize,
    /// Keep-alive ping interval; `None` disables pings.
    pub ping_interval: Option<Duration>,
    /// Socket URL used verbatim instead of deriving one.
    pub url_override: Option<Url>,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            max_pending_requests: DEFAULT_MAX_PENDING_REQUESTS,
            ping_interval: Some(DEFAULT_PING_INTERVAL),
            url_override: None,
        }
    }
}

// ============================================================================
// RequestOptions
// ============================================================================

/// Per-call timeout and cancellation.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Overrides the transport's request timeout.
    pub timeout: Option<Duration>,
    /// Cancels the call when triggered.
    pub cancel: Option<CancellationToken>,
}

impl RequestOptions {
    /// Sets the timeout.
    #[inline]
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the cancellation token.
    #[inline]
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

// ============================================================================
// RpcChannel
// ============================================================================

/// What the protocol adapter needs from a transport.
#[async_trait]
pub trait RpcChannel: Send + Sync {
    /// Sends a request and waits for its result.
    async fn call(&self, method: &str, params: Value, options: RequestOptions) -> Result<Value>;

    /// Registers a raw inbound frame subscriber.
    fn subscribe_raw(&self, handler: Subscriber<Value>) -> SubscriptionId;
}

// ============================================================================
// TransportCommand
// ============================================================================

/// Internal commands for the event loop.
enum TransportCommand {
    /// Write a request whose completion handle is already registered.
    Send { request: RpcRequest },
    /// Close the socket and end the loop.
    Shutdown { done: oneshot::Sender<()> },
}

// ============================================================================
// Link
// ============================================================================

/// Handles to one running event loop.
#[derive(Clone)]
struct Link {
    /// Channel for sending commands to the event loop.
    command_tx: mpsc::UnboundedSender<TransportCommand>,
    /// Correlation map (shared with event loop).
    correlation: Arc<Mutex<CorrelationMap>>,
    /// Cleared by the event loop on exit.
    open: Arc<AtomicBool>,
}

impl Link {
    #[inline]
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

/// Shared state handed to the event loop.
struct LoopContext {
    correlation: Arc<Mutex<CorrelationMap>>,
    open: Arc<AtomicBool>,
    raw_subscribers: Arc<SubscriberRegistry<Value>>,
    disconnect_subscribers: Arc<SubscriberRegistry<()>>,
}

// ============================================================================
// RpcTransport
// ============================================================================

/// JSON-RPC over one WebSocket.
///
/// # Thread Safety
///
/// `RpcTransport` is `Send + Sync`; share it behind an `Arc`. Any number of
/// requests may be outstanding at once, and each caller receives exactly
/// the response whose id matches its request.
pub struct RpcTransport {
    /// Source of cookies and CSRF token.
    credentials: Arc<dyn SessionCredentials>,
    /// Server base URL.
    base_url: Url,
    /// Tenant id.
    tenant: String,
    /// Bounds and overrides.
    options: TransportOptions,
    /// The running event loop, if any.
    link: Mutex<Option<Link>>,
    /// Raw frame subscribers (live across reconnects).
    raw_subscribers: Arc<SubscriberRegistry<Value>>,
    /// Notified after each connection ends.
    disconnect_subscribers: Arc<SubscriberRegistry<()>>,
}

impl RpcTransport {
    /// Creates a disconnected transport.
    #[must_use]
    pub fn new(
        credentials: Arc<dyn SessionCredentials>,
        base_url: Url,
        tenant: impl Into<String>,
        options: TransportOptions,
    ) -> Self {
        Self {
            credentials,
            base_url,
            tenant: tenant.into(),
            options,
            link: Mutex::new(None),
            raw_subscribers: Arc::new(SubscriberRegistry::new("raw-message")),
            disconnect_subscribers: Arc::new(SubscriberRegistry::new("disconnect")),
        }
    }

    /// Returns the transport options.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &TransportOptions {
        &self.options
    }

    /// Returns `true` while the socket is open.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.active_link().is_some()
    }

    /// Returns the number of requests awaiting a response.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.active_link()
            .map(|link| link.correlation.lock().len())
            .unwrap_or_default()
    }

    /// Registers a callback for every parsed inbound frame.
    pub fn on_raw_message<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.raw_subscribers.subscribe(handler)
    }

    /// Registers a callback run after each connection ends.
    pub fn on_disconnect<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&()) + Send + Sync + 'static,
    {
        self.disconnect_subscribers.subscribe(handler)
    }

    /// Removes a raw-message or disconnect subscriber.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.raw_subscribers.unsubscribe(id) || self.disconnect_subscribers.unsubscribe(id)
    }

    fn active_link(&self) -> Option<Link> {
        self.link.lock().as_ref().filter(|link| link.is_open()).cloned()
    }
}

// ============================================================================
// RpcTransport - Lifecycle
// ============================================================================

impl RpcTransport {
    /// Opens the socket with the default connect timeout.
    ///
    /// # Errors
    ///
    /// See [`RpcTransport::connect_with`].
    pub async fn connect(&self) -> Result<()> {
        self.connect_with(None, None).await
    }

    /// Opens the socket.
    ///
    /// Returns immediately if already connected.
    ///
    /// # Errors
    ///
    /// - [`Error::Authentication`] if no successful login happened
    /// - [`Error::Connection`] if the handshake fails
    /// - [`Error::ConnectionTimeout`] if the socket does not open in time
    /// - [`Error::Cancelled`] if `cancel` fires first
    pub async fn connect_with(
        &self,
        connect_timeout: Option<Duration>,
        cancel: Option<CancellationToken>,
    ) -> Result<()> {
        if !self.credentials.is_authenticated() {
            return Err(Error::authentication(
                "no authenticated session; call authenticate_web() before connect()",
            ));
        }

        if self.is_connected() {
            debug!("Already connected");
            return Ok(());
        }

        let request = self.handshake_request()?;
        let uri = request.uri().clone();
        let wait = connect_timeout.unwrap_or(self.options.connect_timeout);

        debug!(%uri, timeout_ms = wait.as_millis() as u64, "Opening WebSocket");

        let ws_stream = tokio::select! {
            result = timeout(wait, connect_async(request)) => match result {
                Ok(Ok((stream, response))) => {
                    debug!(status = %response.status(), "WebSocket handshake completed");
                    stream
                }
                Ok(Err(e)) => {
                    return Err(Error::connection(format!("WebSocket handshake failed: {e}")));
                }
                Err(_) => return Err(Error::connection_timeout(wait.as_millis() as u64)),
            },
            () = cancelled(cancel.as_ref()) => return Err(Error::cancelled("connect")),
        };

        let correlation = Arc::new(Mutex::new(CorrelationMap::default()));
        let open = Arc::new(AtomicBool::new(true));
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        {
            let mut slot = self.link.lock();
            if slot.as_ref().is_some_and(Link::is_open) {
                drop(slot);
                debug!("Concurrent connect won; closing redundant socket");
                tokio::spawn(async move {
                    let mut ws_stream = ws_stream;
                    let _ = ws_stream.close(None).await;
                });
                return Ok(());
            }

            *slot = Some(Link {
                command_tx,
                correlation: Arc::clone(&correlation),
                open: Arc::clone(&open),
            });
        }

        let context = LoopContext {
            correlation,
            open,
            raw_subscribers: Arc::clone(&self.raw_subscribers),
            disconnect_subscribers: Arc::clone(&self.disconnect_subscribers),
        };
        tokio::spawn(Self::run_event_loop(
            ws_stream,
            command_rx,
            context,
            self.options.ping_interval,
        ));

        info!(%uri, "WebSocket connection established");
        Ok(())
    }

    /// Closes the socket.
    ///
    /// Idempotent: a no-op when not connected. All pending requests are
    /// rejected with [`Error::ConnectionClosed`] before this returns.
    pub async fn disconnect(&self) {
        let Some(link) = self.link.lock().take() else {
            trace!("Disconnect while not connected");
            return;
        };

        let (done_tx, done_rx) = oneshot::channel();
        if link
            .command_tx
            .send(TransportCommand::Shutdown { done: done_tx })
            .is_ok()
            && timeout(CLOSE_TIMEOUT, done_rx).await.is_err()
        {
            warn!("Close handshake did not complete in time");
        }

        info!("WebSocket disconnected");
    }

    /// Builds the handshake request with cookies and CSRF token attached.
    fn handshake_request(
        &self,
    ) -> Result<tokio_tungstenite::tungstenite::handshake::client::Request> {
        let csrf_token = self.credentials.csrf_token();
        let url = match &self.options.url_override {
            Some(url) => url.clone(),
            None => endpoint::socket_url(&self.base_url, &self.tenant, csrf_token.as_deref())?,
        };

        let mut request = url.as_str().into_client_request()?;
        let headers = request.headers_mut();

        if let Some(cookies) = self.credentials.cookie_header() {
            let value = HeaderValue::from_str(&cookies)
                .map_err(|e| Error::connection(format!("invalid cookie header: {e}")))?;
            headers.insert(COOKIE, value);
        }

        if let Some(token) = csrf_token {
            let value = HeaderValue::from_str(&token)
                .map_err(|e| Error::connection(format!("invalid CSRF token: {e}")))?;
            headers.insert(CSRF_HEADER, value);
        }

        Ok(request)
    }
}

// ============================================================================
// RpcTransport - Requests
// ============================================================================

impl RpcTransport {
    /// Sends a request with the default timeout.
    ///
    /// # Errors
    ///
    /// See [`RpcTransport::send_rpc_request_with`].
    pub async fn send_rpc_request(&self, method: &str, params: Value) -> Result<Value> {
        self.send_rpc_request_with(method, params, RequestOptions::default())
            .await
    }

    /// Sends a request and waits for its response.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] if no socket is open
    /// - [`Error::Protocol`] if too many requests are pending
    /// - [`Error::Rpc`] if the server answers with an error
    /// - [`Error::Connection`] if the frame cannot be written
    /// - [`Error::ConnectionClosed`] if the socket closes first
    /// - [`Error::RequestTimeout`] / [`Error::Cancelled`] on timeout or cancellation
    pub async fn send_rpc_request_with(
        &self,
        method: &str,
        params: Value,
        options: RequestOptions,
    ) -> Result<Value> {
        let link = self.active_link().ok_or(Error::NotConnected)?;

        let request = RpcRequest::new(method, params);
        let request_id = request.id;
        let (response_tx, mut response_rx) = oneshot::channel();

        // Check and reserve under one lock so concurrent callers cannot overshoot.
        {
            let mut correlation = link.correlation.lock();
            let pending = correlation.len();
            if pending >= self.options.max_pending_requests {
                warn!(
                    pending,
                    max = self.options.max_pending_requests,
                    "Too many pending requests"
                );
                return Err(Error::protocol(format!(
                    "Too many pending requests: {}/{}",
                    pending, self.options.max_pending_requests
                )));
            }
            correlation.insert(
                request_id,
                PendingRequest {
                    method: method.to_string(),
                    response_tx,
                },
            );
        }

        // The loop clears `open` before draining, so a reservation made after
        // the drain is caught here.
        if !link.is_open() || link.command_tx.send(TransportCommand::Send { request }).is_err() {
            link.correlation.lock().remove(&request_id);
            return Err(Error::ConnectionClosed);
        }

        let wait = options.timeout.unwrap_or(self.options.request_timeout);

        let abandoned = tokio::select! {
            result = &mut response_rx => {
                return match result {
                    Ok(result) => result,
                    Err(_) => Err(Error::ConnectionClosed),
                };
            }
            () = sleep(wait) => Error::request_timeout(request_id, method, wait.as_millis() as u64),
            () = cancelled(options.cancel.as_ref()) => {
                Error::cancelled(format!("{method} request {request_id}"))
            }
        };

        // Releases the slot. The loop skips writing a request it no longer finds.
        link.correlation.lock().remove(&request_id);
        drop(response_rx);
        debug!(%request_id, method, error = %abandoned, "Request abandoned");

        Err(abandoned)
    }
}

#[async_trait]
impl RpcChannel for RpcTransport {
    async fn call(&self, method: &str, params: Value, options: RequestOptions) -> Result<Value> {
        self.send_rpc_request_with(method, params, options).await
    }

    fn subscribe_raw(&self, handler: Subscriber<Value>) -> SubscriptionId {
        self.raw_subscribers.subscribe(move |value| handler(value))
    }
}

// ============================================================================
// Event Loop
// ============================================================================

impl RpcTransport {
    /// Event loop that handles WebSocket I/O.
    async fn run_event_loop(
        ws_stream: WsStream,
        mut command_rx: mpsc::UnboundedReceiver<TransportCommand>,
        context: LoopContext,
        ping_interval: Option<Duration>,
    ) {
        let (mut ws_write, mut ws_read) = ws_stream.split();
        let mut ping = ping_interval.map(|period| {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });
        let mut shutdown_ack = None;

        loop {
            tokio::select! {
                // Incoming frames from the server
                message = ws_read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            Self::handle_incoming_text(&text, &context);
                        }

                        Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                            Ok(text) => Self::handle_incoming_text(text, &context),
                            Err(_) => warn!(len = bytes.len(), "Dropping non-UTF-8 binary frame"),
                        },

                        Some(Ok(Message::Close(frame))) => {
                            debug!(?frame, "WebSocket closed by remote");
                            break;
                        }

                        Some(Err(e)) => {
                            error!(error = %e, "WebSocket error");
                            break;
                        }

                        None => {
                            debug!("WebSocket stream ended");
                            break;
                        }

                        // Ignore Ping, Pong, Frame
                        _ => {}
                    }
                }

                // Commands from Rust API
                command = command_rx.recv() => {
                    match command {
                        Some(TransportCommand::Send { request }) => {
                            Self::handle_send_command(
                                request,
                                &mut ws_write,
                                &context.correlation,
                            ).await;
                        }

                        Some(TransportCommand::Shutdown { done }) => {
                            debug!("Shutdown command received");
                            let _ = ws_write.close().await;
                            shutdown_ack = Some(done);
                            break;
                        }

                        None => {
                            debug!("Command channel closed");
                            let _ = ws_write.close().await;
                            break;
                        }
                    }
                }

                // Keep-alive
                () = tick(&mut ping) => {
                    if let Err(e) = ws_write.send(Message::Ping(Default::default())).await {
                        warn!(error = %e, "Keep-alive ping failed");
                        break;
                    }
                    trace!("Keep-alive ping sent");
                }
            }
        }

        context.open.store(false, Ordering::SeqCst);
        Self::fail_pending_requests(&context.correlation);
        context.disconnect_subscribers.emit(&());

        if let Some(done) = shutdown_ack {
            let _ = done.send(());
        }

        debug!("Event loop terminated");
    }

    /// Handles an incoming text frame.
    fn handle_incoming_text(text: &str, context: &LoopContext) {
        let value: Value = match from_str(text) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, len = text.len(), "Failed to parse incoming frame");
                return;
            }
        };

        trace!(len = text.len(), "Frame received");

        // Broadcast first so subscribers observe handler state before callers resume.
        context.raw_subscribers.emit(&value);

        let message = InboundMessage::classify(value);
        let InboundMessage::Response { id, response } = message else {
            return;
        };

        let Some(request_id) = RequestId::from_json(&id) else {
            debug!(%id, "Response with foreign id");
            return;
        };

        let pending = context.correlation.lock().remove(&request_id);
        match pending {
            Some(pending) => {
                trace!(%request_id, method = %pending.method, "Response matched");
                let _ = pending.response_tx.send(response.into_result());
            }
            None => warn!(%request_id, "Response for unknown request"),
        }
    }

    /// Handles a send command from the Rust API.
    ///
    /// The caller has registered the request in `correlation` already.
    async fn handle_send_command(
        request: RpcRequest,
        ws_write: &mut WsSink,
        correlation: &Arc<Mutex<CorrelationMap>>,
    ) {
        let request_id = request.id;

        if !correlation.lock().contains_key(&request_id) {
            trace!(%request_id, "Caller gone before send");
            return;
        }

        // Serialize request
        let json = match to_string(&request) {
            Ok(j) => j,
            Err(e) => {
                if let Some(pending) = correlation.lock().remove(&request_id) {
                    let _ = pending.response_tx.send(Err(Error::Json(e)));
                }
                return;
            }
        };

        // Send over WebSocket
        if let Err(e) = ws_write.send(Message::Text(json.into())).await {
            if let Some(pending) = correlation.lock().remove(&request_id) {
                let _ = pending.response_tx.send(Err(Error::connection(format!(
                    "failed to send {}: {e}",
                    pending.method
                ))));
            }
            return;
        }

        trace!(%request_id, method = %request.method, "Request sent");
    }

    /// Fails all pending requests with ConnectionClosed error.
    fn fail_pending_requests(correlation: &Arc<Mutex<CorrelationMap>>) {
        let pending: Vec<_> = correlation.lock().drain().collect();
        let count = pending.len();

        for (_, pending) in pending {
            let _ = pending.response_tx.send(Err(Error::ConnectionClosed));
        }

        if count > 0 {
            debug!(count, "Failed pending requests on shutdown");
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Resolves when the token fires, never when there is none.
async fn cancelled(token: Option<&CancellationToken>) {
    match token {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}

/// Resolves on the next ping tick, never when pings are disabled.
async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

// ============================================================================
// Tests
// ============================================================================
