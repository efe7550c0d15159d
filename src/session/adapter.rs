//! Typed `OpenSession` / `Invoke` calls over an [`RpcChannel`].
//!
//! The adapter keeps the bookkeeping the server expects on every call:
//!
//! - the server session info returned by `OpenSession`
//! - a client sequence counter for `sequenceNo`
//! - the highest server sequence number seen, sent back as
//!   `lastClientAckSequenceNumber`
//! - the ids of forms currently open
//!
//! Unsolicited frames are decoded into [`HandlerEvent`]s once
//! [`ProtocolAdapter::attach`] has registered its raw subscriber.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::identifiers::SubscriptionId;
use crate::protocol::handler::Handler;
use crate::protocol::interaction::{
    CLOSE_FORM_INTERACTION, INVOKE_METHOD, Interaction, InvokeRequest, OPEN_SESSION_METHOD,
    OpenSessionRequest,
};
use crate::protocol::{ControlPath, ServerSession};
use crate::transport::{RequestOptions, RpcChannel, SubscriberRegistry};

use super::events::{HandlerEvent, HandlerEventEmitter};
use super::filters::FilterMetadata;

// ============================================================================
// Constants
// ============================================================================

/// Default interaction used to discover filterable fields.
pub const DEFAULT_FILTER_INTERACTION: &str = "Filter";

// ============================================================================
// InvokeOptions
// ============================================================================

/// Arguments of one `Invoke` call.
///
/// Unset bookkeeping fields are filled from the adapter's session state.
#[derive(Debug, Clone, Default)]
pub struct InvokeOptions {
    /// Interaction name.
    pub interaction_name: String,
    /// Interaction arguments, passed through unchanged.
    pub named_parameters: Value,
    /// Target control path.
    pub control_path: Option<String>,
    /// Target form id.
    pub form_id: Option<String>,
    /// System action code.
    pub system_action: Option<i64>,
    /// Open form ids; defaults to the tracked set.
    pub open_form_ids: Option<Vec<String>>,
    /// Sequence marker; defaults to `<clientSessionId>#<n>`.
    pub sequence_no: Option<String>,
    /// Acknowledged server sequence; defaults to the highest seen.
    pub last_client_ack_sequence_number: Option<i64>,
    /// Response timeout override.
    pub timeout: Option<Duration>,
    /// Cancellation token.
    pub cancel: Option<CancellationToken>,
}

impl InvokeOptions {
    /// Creates options for an interaction.
    #[must_use]
    pub fn new(interaction_name: impl Into<String>, named_parameters: Value) -> Self {
        Self {
            interaction_name: interaction_name.into(),
            named_parameters,
            ..Self::default()
        }
    }

    /// Sets the target control path.
    #[inline]
    #[must_use]
    pub fn with_control_path(mut self, control_path: impl Into<String>) -> Self {
        self.control_path = Some(control_path.into());
        self
    }

    /// Sets the target form id.
    #[inline]
    #[must_use]
    pub fn with_form_id(mut self, form_id: impl Into<String>) -> Self {
        self.form_id = Some(form_id.into());
        self
    }

    /// Sets the system action code.
    #[inline]
    #[must_use]
    pub fn with_system_action(mut self, system_action: i64) -> Self {
        self.system_action = Some(system_action);
        self
    }

    /// Sets the open form ids explicitly.
    #[inline]
    #[must_use]
    pub fn with_open_form_ids(mut self, open_form_ids: Vec<String>) -> Self {
        self.open_form_ids = Some(open_form_ids);
        self
    }

    /// Sets the sequence marker explicitly.
    #[inline]
    #[must_use]
    pub fn with_sequence_no(mut self, sequence_no: impl Into<String>) -> Self {
        self.sequence_no = Some(sequence_no.into());
        self
    }

    /// Sets the acknowledged server sequence explicitly.
    #[inline]
    #[must_use]
    pub fn with_last_client_ack_sequence_number(mut self, sequence: i64) -> Self {
        self.last_client_ack_sequence_number = Some(sequence);
        self
    }

    /// Sets the response timeout.
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
// AdapterState
// ============================================================================

/// Session bookkeeping shared with the raw subscriber.
#[derive(Debug)]
struct AdapterState {
    server_session: Option<ServerSession>,
    client_session_id: String,
    client_sequence: u64,
    last_server_sequence: i64,
    open_form_ids: Vec<String>,
}

impl AdapterState {
    fn new() -> Self {
        Self {
            server_session: None,
            client_session_id: Uuid::new_v4().to_string(),
            client_sequence: 0,
            last_server_sequence: -1,
            open_form_ids: Vec::new(),
        }
    }

    fn observe_sequence(&mut self, sequence: Option<i64>) {
        if let Some(sequence) = sequence
            && sequence > self.last_server_sequence
        {
            self.last_server_sequence = sequence;
        }
    }

    fn observe(&mut self, handlers: &[Handler]) {
        for handler in handlers {
            match handler {
                Handler::SessionInit(session) => {
                    debug!(session_id = %session.session_id, "Server session initialized");
                    self.server_session = Some(session.clone());
                }
                Handler::CallbackResponse {
                    sequence_number, ..
                } => self.observe_sequence(*sequence_number),
                Handler::FormToShow(form) => {
                    if let Some(form_id) = form.form_id()
                        && !self.open_form_ids.iter().any(|id| id == form_id)
                    {
                        self.open_form_ids.push(form_id.to_string());
                    }
                }
                Handler::FormClosed { form_id } => self.forget_form(form_id),
                Handler::PropertyChanges { .. } | Handler::Raw { .. } => {}
            }
        }
    }

    fn forget_form(&mut self, form_id: &str) {
        self.open_form_ids.retain(|id| id != form_id);
    }

    fn session_id(&self) -> String {
        self.server_session
            .as_ref()
            .map_or_else(|| self.client_session_id.clone(), |s| s.session_id.clone())
    }
}

// ============================================================================
// ProtocolAdapter
// ============================================================================

/// Typed session calls over a JSON-RPC channel.
pub struct ProtocolAdapter {
    /// Underlying channel.
    channel: Arc<dyn RpcChannel>,
    /// Unsolicited handler events.
    emitter: Arc<HandlerEventEmitter>,
    /// Session bookkeeping.
    state: Arc<Mutex<AdapterState>>,
    /// Raw subscription, once attached.
    subscription: Mutex<Option<SubscriptionId>>,
    /// Notified with the form id of every closed form.
    form_closed: Arc<SubscriberRegistry<String>>,
    /// Interaction used by `fetch_filter_metadata`.
    filter_interaction: String,
}

impl ProtocolAdapter {
    /// Creates an adapter with the default filter interaction.
    #[must_use]
    pub fn new(channel: Arc<dyn RpcChannel>, emitter: Arc<HandlerEventEmitter>) -> Self {
        Self::with_filter_interaction(channel, emitter, DEFAULT_FILTER_INTERACTION)
    }

    /// Creates an adapter with a custom filter interaction.
    #[must_use]
    pub fn with_filter_interaction(
        channel: Arc<dyn RpcChannel>,
        emitter: Arc<HandlerEventEmitter>,
        filter_interaction: impl Into<String>,
    ) -> Self {
        Self {
            channel,
            emitter,
            state: Arc::new(Mutex::new(AdapterState::new())),
            subscription: Mutex::new(None),
            form_closed: Arc::new(SubscriberRegistry::new("form-closed")),
            filter_interaction: filter_interaction.into(),
        }
    }

    /// Registers the raw subscriber that turns unsolicited frames into
    /// handler events. Idempotent.
    pub fn attach(&self) -> SubscriptionId {
        let mut subscription = self.subscription.lock();
        if let Some(id) = *subscription {
            return id;
        }

        let state = Arc::clone(&self.state);
        let emitter = Arc::clone(&self.emitter);
        let form_closed = Arc::clone(&self.form_closed);
        let id = self.channel.subscribe_raw(Arc::new(move |frame: &Value| {
            dispatch_unsolicited(frame, &state, &emitter, &form_closed);
        }));

        *subscription = Some(id);
        id
    }

    /// Returns the handler event emitter.
    #[inline]
    #[must_use]
    pub fn emitter(&self) -> &Arc<HandlerEventEmitter> {
        &self.emitter
    }

    /// Registers a callback run with the form id of each closed form.
    ///
    /// Fires for `FormClosed` handlers in call responses and in server
    /// pushes alike, and for [`ProtocolAdapter::close_form`].
    pub fn on_form_closed<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&String) + Send + Sync + 'static,
    {
        self.form_closed.subscribe(handler)
    }

    /// Removes a [`ProtocolAdapter::on_form_closed`] callback.
    pub fn unsubscribe_form_closed(&self, id: SubscriptionId) -> bool {
        self.form_closed.unsubscribe(id)
    }

    /// Returns the number of form-closed callbacks.
    #[inline]
    #[must_use]
    pub fn form_closed_subscriber_count(&self) -> usize {
        self.form_closed.len()
    }

    /// Returns the server session info, once `OpenSession` returned it.
    #[must_use]
    pub fn server_session(&self) -> Option<ServerSession> {
        self.state.lock().server_session.clone()
    }

    /// Returns the server session id, or the client session id before one
    /// is known.
    #[must_use]
    pub fn session_id(&self) -> String {
        self.state.lock().session_id()
    }

    /// Returns the client-generated session id.
    #[must_use]
    pub fn client_session_id(&self) -> String {
        self.state.lock().client_session_id.clone()
    }

    /// Returns the ids of forms currently open.
    #[must_use]
    pub fn open_form_ids(&self) -> Vec<String> {
        self.state.lock().open_form_ids.clone()
    }

    /// Returns the highest server sequence number seen (-1 for none).
    #[must_use]
    pub fn last_server_sequence(&self) -> i64 {
        self.state.lock().last_server_sequence
    }

    /// Forgets the open forms and the server session.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.open_form_ids.clear();
        state.server_session = None;
        state.last_server_sequence = -1;
    }
}

// ============================================================================
// ProtocolAdapter - Calls
// ============================================================================

impl ProtocolAdapter {
    /// Opens a server session.
    ///
    /// # Errors
    ///
    /// Returns transport errors, [`Error::Rpc`] if the server rejects the
    /// call, or [`Error::Protocol`] if the result cannot be decoded.
    pub async fn open_session(&self, mut request: OpenSessionRequest) -> Result<Vec<Handler>> {
        if request.telemetry_client_session_id.is_none() {
            request.telemetry_client_session_id = Some(self.client_session_id());
        }

        debug!(tenant = %request.tenant_id, "Opening session");
        let params = json!([serde_json::to_value(&request)?]);
        let result = self
            .channel
            .call(OPEN_SESSION_METHOD, params, RequestOptions::default())
            .await?;

        let handlers = Handler::decode_all(&result)?;
        record(&handlers, &self.state, &self.form_closed);
        Ok(handlers)
    }

    /// Runs one interaction.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if the control path is malformed
    /// - [`Error::Rpc`] if the server rejects the call
    /// - [`Error::Protocol`] if the result cannot be decoded
    /// - transport errors otherwise
    pub async fn invoke(&self, options: InvokeOptions) -> Result<Vec<Handler>> {
        if let Some(path) = &options.control_path
            && ControlPath::parse(path).is_none()
        {
            return Err(Error::invalid_argument(format!(
                "malformed control path '{path}'"
            )));
        }

        let InvokeOptions {
            interaction_name,
            named_parameters,
            control_path,
            form_id,
            system_action,
            open_form_ids,
            sequence_no,
            last_client_ack_sequence_number,
            timeout,
            cancel,
        } = options;

        let request = {
            let mut state = self.state.lock();
            state.client_sequence += 1;
            let sequence = state.client_sequence;

            let mut interaction = Interaction::new(&interaction_name, named_parameters)
                .with_callback_id(sequence.to_string());
            interaction.control_path = control_path;
            interaction.form_id = form_id;
            interaction.system_action = system_action;

            InvokeRequest {
                session_id: state.session_id(),
                sequence_no: sequence_no
                    .unwrap_or_else(|| format!("{}#{sequence}", state.client_session_id)),
                last_client_ack_sequence_number: last_client_ack_sequence_number
                    .unwrap_or(state.last_server_sequence),
                open_form_ids: open_form_ids.unwrap_or_else(|| state.open_form_ids.clone()),
                interactions_to_invoke: vec![interaction],
            }
        };

        trace!(
            interaction = %interaction_name,
            sequence_no = %request.sequence_no,
            "Invoking"
        );

        let params = json!([serde_json::to_value(&request)?]);
        let result = self
            .channel
            .call(INVOKE_METHOD, params, RequestOptions { timeout, cancel })
            .await?;

        let handlers = Handler::decode_all(&result)?;
        record(&handlers, &self.state, &self.form_closed);
        Ok(handlers)
    }

    /// Closes a form on the server.
    ///
    /// # Errors
    ///
    /// Same as [`ProtocolAdapter::invoke`].
    pub async fn close_form(&self, form_id: &str) -> Result<Vec<Handler>> {
        let handlers = self
            .invoke(InvokeOptions::new(CLOSE_FORM_INTERACTION, json!({})).with_form_id(form_id))
            .await?;
        self.state.lock().forget_form(form_id);
        if !handlers
            .iter()
            .any(|h| matches!(h, Handler::FormClosed { form_id: closed } if closed == form_id))
        {
            self.form_closed.emit(&form_id.to_string());
        }
        Ok(handlers)
    }

    /// Discovers the filterable fields of an open form.
    ///
    /// # Errors
    ///
    /// Same as [`ProtocolAdapter::invoke`].
    pub async fn fetch_filter_metadata(&self, form_id: &str) -> Result<FilterMetadata> {
        let handlers = self
            .invoke(InvokeOptions::new(&self.filter_interaction, json!({})).with_form_id(form_id))
            .await?;
        Ok(FilterMetadata::from_handlers(&handlers))
    }
}

// ============================================================================
// Unsolicited Frames
// ============================================================================

/// Decodes a server-push frame and emits one event per handler.
/// Applies `handlers` to the session state, then notifies form-closed
/// subscribers outside the state lock.
fn record(
    handlers: &[Handler],
    state: &Mutex<AdapterState>,
    form_closed: &SubscriberRegistry<String>,
) {
    state.lock().observe(handlers);
    for handler in handlers {
        if let Handler::FormClosed { form_id } = handler {
            form_closed.emit(form_id);
        }
    }
}

fn dispatch_unsolicited(
    frame: &Value,
    state: &Mutex<AdapterState>,
    emitter: &HandlerEventEmitter,
    form_closed: &SubscriberRegistry<String>,
) {
    let Some(method) = frame.get("method").and_then(Value::as_str) else {
        return;
    };
    if frame.get("result").is_some() || frame.get("error").is_some() {
        return;
    }

    let params = frame.get("params").unwrap_or(&Value::Null);
    let sequence_number = Handler::sequence_in_params(params);

    let handlers: Vec<Handler> = Handler::locate_in_params(params)
        .into_iter()
        .map(|raw| {
            Handler::decode(raw).unwrap_or_else(|e| {
                warn!(method, error = %e, "Keeping undecodable handler as raw");
                Handler::Raw {
                    handler_type: raw
                        .get("handlerType")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    parameters: raw.get("parameters").cloned().unwrap_or(Value::Null),
                }
            })
        })
        .collect();

    if handlers.is_empty() {
        trace!(method, "Notification without handlers");
        return;
    }

    state.lock().observe_sequence(sequence_number);
    record(&handlers, state, form_closed);

    for handler in handlers {
        emitter.emit(&HandlerEvent {
            method: method.to_string(),
            sequence_number,
            handler,
        });
    }
}

// ============================================================================
// Tests
// ============================================================================
