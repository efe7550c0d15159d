//! End-to-end client flow: login, socket, session, pages.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::time::{sleep, timeout};

use common::{
    HttpReply, MockLoginServer, MockWsServer, PeerSender, WAIT, filter_form, form_to_show,
    init_logging, interaction_name, session_opened, sign_in_page,
};
use webform_client::{Client, ClientOptions, Error, Handler, InvokeOptions, OpenSessionRequest};

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    client: Client,
    sender: PeerSender,
    seen: Arc<Mutex<Vec<Value>>>,
    _login: MockLoginServer,
    _ws: MockWsServer,
}

impl Harness {
    fn seen_interactions(&self) -> Vec<String> {
        self.seen
            .lock()
            .iter()
            .filter_map(|request| interaction_name(request).map(str::to_string))
            .collect()
    }
}

/// Scripted server: each `OpenForm` returns a fresh form id.
fn reply(request: &Value, forms: &AtomicUsize) -> Value {
    match request["method"].as_str() {
        Some("OpenSession") => session_opened("S-42", 3),
        Some("Invoke") => match interaction_name(request) {
            Some("OpenForm") => {
                let n = forms.fetch_add(1, Ordering::SeqCst);
                json!([form_to_show(&format!("F{n}"))])
            }
            Some("Filter") => json!([filter_form(
                request["params"][0]["interactionsToInvoke"][0]["formId"]
                    .as_str()
                    .unwrap_or_default()
            )]),
            Some("Leave") => json!([{
                "handlerType": "DN.LogicalClientEventRaisingHandler",
                "parameters": ["FormClosed", {
                    "ServerId": request["params"][0]["interactionsToInvoke"][0]["formId"]
                }]
            }]),
            _ => json!([]),
        },
        _ => Value::Null,
    }
}

async fn harness() -> Harness {
    harness_with(reply).await
}

async fn harness_with(script: fn(&Value, &AtomicUsize) -> Value) -> Harness {
    init_logging();
    let login = MockLoginServer::start(
        HttpReply::new(200)
            .cookie("ARRAffinity=a1")
            .body(&sign_in_page("tok")),
        HttpReply::new(302).cookie(".AspNetCore.Antiforgery.k=CfDJ8csrf"),
    )
    .await;
    let mut ws = MockWsServer::start().await;

    let client = Client::builder()
        .base_url(&login.base_url)
        .tenant("default")
        .username("admin")
        .password("secret")
        .options(
            ClientOptions::new()
                .with_ws_url(ws.url.clone())
                .with_company("CRONUS")
                .without_ping(),
        )
        .build()
        .expect("client");

    client.authenticate_web().await.expect("login");
    client.connect().await.expect("connect");
    let peer = ws.accept().await;

    assert_eq!(
        peer.handshake.header("cookie"),
        Some("ARRAffinity=a1; .AspNetCore.Antiforgery.k=CfDJ8csrf")
    );
    assert_eq!(peer.handshake.header("x-csrf-token"), Some("CfDJ8csrf"));

    let forms = AtomicUsize::new(1);
    let (sender, seen) = peer.auto_respond(move |request| script(request, &forms));

    Harness {
        client,
        sender,
        seen,
        _login: login,
        _ws: ws,
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    timeout(WAIT, async {
        while !condition() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached");
}

fn form_closed_push(form_id: &str, sequence: i64) -> Value {
    json!({
        "jsonrpc": "2.0",
        "method": "Message",
        "params": [{
            "sequenceNumber": sequence,
            "handlers": [{
                "handlerType": "DN.LogicalClientEventRaisingHandler",
                "parameters": ["FormClosed", { "ServerId": form_id }]
            }]
        }]
    })
}

// ============================================================================
// Session
// ============================================================================

#[tokio::test]
async fn test_open_session_records_server_session() {
    let h = harness().await;

    let handlers = h
        .client
        .open_session(OpenSessionRequest::new("default"))
        .await
        .expect("open session");

    assert_eq!(handlers.len(), 2);
    let session = h.client.server_session().expect("session");
    assert_eq!(session.session_id, "S-42");
    assert_eq!(session.company.as_deref(), Some("CRONUS"));

    let request = h.seen.lock()[0].clone();
    assert_eq!(request["method"], "OpenSession");
    assert_eq!(request["params"][0]["tenantId"], "default");
    assert_eq!(request["params"][0]["company"], "CRONUS");

    h.client.disconnect().await;
}

#[tokio::test]
async fn test_invoke_acknowledges_last_sequence() {
    let h = harness().await;
    h.client
        .open_session(OpenSessionRequest::new("default"))
        .await
        .expect("open session");

    h.client
        .invoke(InvokeOptions::new("Refresh", json!({})))
        .await
        .expect("invoke");

    let request = h.seen.lock()[1].clone();
    let params = &request["params"][0];
    assert_eq!(params["lastClientAckSequenceNumber"], 3);
    assert_eq!(params["sessionId"], "S-42");
    assert_eq!(params["interactionsToInvoke"][0]["interactionName"], "Refresh");

    h.client.disconnect().await;
}

// ============================================================================
// Pages
// ============================================================================

#[tokio::test]
async fn test_open_page_and_resolve_controls() {
    let h = harness().await;
    h.client
        .open_session(OpenSessionRequest::new("default"))
        .await
        .expect("open session");

    let page = h.client.open_page("21").await.expect("open page");

    let parts = page.id.parts();
    assert_eq!(parts.session_id, "S-42");
    assert_eq!(parts.page_id, "21");
    assert_eq!(page.form_id, "F1");
    assert_eq!(page.form.caption.as_deref(), Some("Customer Card"));

    let request = h.seen.lock()[1].clone();
    assert_eq!(
        request["params"][0]["interactionsToInvoke"][0]["namedParameters"],
        r#"{"query":"page=21&company=CRONUS"}"#
    );

    // Duplicate design names resolve by position.
    let shadow = h
        .client
        .resolve_control(&page.id, "server:c[0]/c[1]")
        .expect("page")
        .expect("control");
    assert_eq!(shadow.properties["StringValue"], "shadow");

    assert!(
        h.client
            .resolve_control(&page.id, "server:c[0]/c[9]")
            .expect("page")
            .is_none()
    );
    assert!(
        h.client
            .resolve_control(&page.id, "server:c[x]")
            .expect("page")
            .is_none()
    );

    assert_eq!(h.client.pages().len(), 1);
    assert!(h.client.page(&page.id).is_some());
    h.client.disconnect().await;
}

#[tokio::test]
async fn test_two_pages_get_distinct_contexts() {
    let h = harness().await;

    let first = h.client.open_page("21").await.expect("first");
    let second = h.client.open_page("21").await.expect("second");

    assert_ne!(first.id, second.id);
    assert_ne!(first.form_id, second.form_id);
    assert_eq!(h.client.pages().len(), 2);

    let open_forms = h.seen.lock()[1]["params"][0]["openFormIds"].clone();
    assert_eq!(open_forms, json!(["F1"]));

    h.client.disconnect().await;
}

#[tokio::test]
async fn test_close_page_sends_close_form() {
    let h = harness().await;
    let page = h.client.open_page("22").await.expect("open page");

    h.client.close_page(&page.id).await.expect("close page");

    assert!(h.client.page(&page.id).is_none());
    assert_eq!(h.seen_interactions(), vec!["OpenForm", "CloseForm"]);

    let err = h.client.close_page(&page.id).await.unwrap_err();
    assert!(matches!(err, Error::PageNotFound { .. }), "{err}");

    h.client.disconnect().await;
}

#[tokio::test]
async fn test_server_form_closed_invalidates_page() {
    let h = harness().await;
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    h.client.on_handler_event(move |event| sink.lock().push(event.clone()));

    let page = h.client.open_page("21").await.expect("open page");
    let kept = h.client.open_page("30").await.expect("open page");

    h.sender.send(form_closed_push(&page.form_id, 7));
    wait_until(|| h.client.page(&page.id).is_none()).await;

    assert!(h.client.page(&kept.id).is_some());
    let events = events.lock();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].method, "Message");
    assert_eq!(events[0].sequence_number, Some(7));
    assert_eq!(
        events[0].handler,
        Handler::FormClosed {
            form_id: page.form_id.clone()
        }
    );
    drop(events);

    let err = h.client.resolve_control(&page.id, "server:c[0]").unwrap_err();
    assert!(matches!(err, Error::PageNotFound { .. }), "{err}");

    h.client.disconnect().await;
}

#[tokio::test]
async fn test_form_closed_in_invoke_response_invalidates_page() {
    let h = harness().await;
    let page = h.client.open_page("21").await.expect("open page");
    let kept = h.client.open_page("30").await.expect("open page");
    h.client.filter_metadata(&page.id).await.expect("metadata");

    h.client
        .invoke(InvokeOptions::new("Leave", json!({})).with_form_id(&page.form_id))
        .await
        .expect("invoke");

    assert!(h.client.page(&page.id).is_none());
    assert!(h.client.page(&kept.id).is_some());
    let err = h.client.resolve_control(&page.id, "server:c[0]").unwrap_err();
    assert!(matches!(err, Error::PageNotFound { .. }), "{err}");
    let err = h.client.filter_metadata(&page.id).await.unwrap_err();
    assert!(matches!(err, Error::PageNotFound { .. }), "{err}");

    h.client.disconnect().await;
}

#[tokio::test]
async fn test_open_page_rejects_page_id_with_separator() {
    let h = harness().await;

    let err = h.client.open_page("21:x").await.unwrap_err();
    assert!(matches!(err, Error::InvalidPageContextId { .. }), "{err}");
    assert!(h.client.pages().is_empty());
    assert!(h.seen_interactions().is_empty());

    h.client.disconnect().await;
}

#[tokio::test]
async fn test_open_page_encodes_page_id() {
    let h = harness().await;

    let page = h.client.open_page("a&b=c").await.expect("open page");

    assert_eq!(page.id.parts().page_id, "a&b=c");
    let request = h.seen.lock()[0].clone();
    assert_eq!(
        request["params"][0]["interactionsToInvoke"][0]["namedParameters"],
        r#"{"query":"page=a%26b%3Dc&company=CRONUS"}"#
    );

    h.client.disconnect().await;
}

// ============================================================================
// Filter Metadata
// ============================================================================

#[tokio::test]
async fn test_filter_metadata_is_fetched_once_per_page() {
    let h = harness().await;
    let page = h.client.open_page("21").await.expect("open page");

    let first = h.client.filter_metadata(&page.id).await.expect("metadata");
    let second = h.client.filter_metadata(&page.id).await.expect("metadata");

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.fields.len(), 2);
    assert_eq!(first.fields[0].id, "No");
    assert_eq!(first.fields[1].caption.as_deref(), Some("Name"));
    assert_eq!(first.fields[1].control_path, "server:c[1]");
    assert_eq!(h.seen_interactions(), vec!["OpenForm", "Filter"]);

    h.client.disconnect().await;
}

/// Like [`reply`], but the server closes a form as it answers `Filter`.
fn reply_closing_on_filter(request: &Value, forms: &AtomicUsize) -> Value {
    let mut value = reply(request, forms);
    if interaction_name(request) == Some("Filter")
        && let Some(handlers) = value.as_array_mut()
    {
        handlers.push(json!({
            "handlerType": "DN.LogicalClientEventRaisingHandler",
            "parameters": ["FormClosed", {
                "ServerId": request["params"][0]["interactionsToInvoke"][0]["formId"]
            }]
        }));
    }
    value
}

#[tokio::test]
async fn test_filter_metadata_not_cached_for_page_closed_mid_fetch() {
    let h = harness_with(reply_closing_on_filter).await;
    let page = h.client.open_page("21").await.expect("open page");

    let err = h.client.filter_metadata(&page.id).await.unwrap_err();
    assert!(matches!(err, Error::PageNotFound { .. }), "{err}");
    assert!(h.client.page(&page.id).is_none());

    // A fresh page for the same id fetches again instead of reusing the entry.
    let reopened = h.client.open_page("21").await.expect("reopen");
    let _ = h.client.filter_metadata(&reopened.id).await;
    assert_eq!(
        h.seen_interactions(),
        vec!["OpenForm", "Filter", "OpenForm", "Filter"]
    );

    h.client.disconnect().await;
}

#[tokio::test]
async fn test_filter_metadata_for_unknown_page() {
    let h = harness().await;
    let page = h.client.open_page("21").await.expect("open page");
    h.client.close_page(&page.id).await.expect("close page");

    let err = h.client.filter_metadata(&page.id).await.unwrap_err();
    assert!(matches!(err, Error::PageNotFound { .. }), "{err}");

    h.client.disconnect().await;
}

// ============================================================================
// Teardown
// ============================================================================

#[tokio::test]
async fn test_disconnect_clears_pages() {
    let h = harness().await;
    h.client
        .open_session(OpenSessionRequest::new("default"))
        .await
        .expect("open session");
    h.client.open_page("21").await.expect("open page");

    h.client.disconnect().await;

    assert!(!h.client.is_connected());
    assert!(h.client.pages().is_empty());
    assert!(h.client.server_session().is_none());

    let err = h.client.open_page("21").await.unwrap_err();
    assert!(matches!(err, Error::NotConnected), "{err}");
}

#[tokio::test]
async fn test_server_close_clears_pages() {
    let h = harness().await;
    h.client.open_page("21").await.expect("open page");

    h.sender.close();
    wait_until(|| !h.client.is_connected()).await;
    wait_until(|| h.client.pages().is_empty()).await;
}
