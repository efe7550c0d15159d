//! Shared utilities for integration tests.
//!
//! Provides in-process mock servers:
//! - A raw HTTP responder for the sign-in exchange
//! - A WebSocket peer that records the handshake and is driven by the test

#![allow(dead_code)]

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tracing_subscriber::EnvFilter;
use url::Url;

use webform_client::SessionCredentials;

// ============================================================================
// Constants
// ============================================================================

/// Upper bound on any single wait in a test.
pub const WAIT: Duration = Duration::from_secs(5);

// ============================================================================
// Logging
// ============================================================================

/// Initialize tracing once; honours `RUST_LOG`.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("webform_client=warn"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

// ============================================================================
// Credentials
// ============================================================================

/// Fixed credentials for transport tests.
#[derive(Debug, Clone)]
pub struct StaticCredentials {
    pub authenticated: bool,
    pub cookies: Option<String>,
    pub csrf_token: Option<String>,
}

impl StaticCredentials {
    pub fn logged_in() -> Self {
        Self {
            authenticated: true,
            cookies: Some("ARRAffinity=a1; .AspNetCore.Antiforgery.x=CfDJ8tok".to_string()),
            csrf_token: Some("CfDJ8tok".to_string()),
        }
    }
}

impl SessionCredentials for StaticCredentials {
    fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    fn cookie_header(&self) -> Option<String> {
        self.cookies.clone()
    }

    fn csrf_token(&self) -> Option<String> {
        self.csrf_token.clone()
    }
}

// ============================================================================
// HTTP Login Mock
// ============================================================================

/// One scripted HTTP reply.
#[derive(Debug, Clone)]
pub struct HttpReply {
    pub status: u16,
    pub set_cookies: Vec<String>,
    pub body: String,
}

impl HttpReply {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            set_cookies: Vec::new(),
            body: String::new(),
        }
    }

    pub fn cookie(mut self, header: &str) -> Self {
        self.set_cookies.push(header.to_string());
        self
    }

    pub fn body(mut self, body: &str) -> Self {
        self.body = body.to_string();
        self
    }
}

/// A request as the mock received it.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub target: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Sign-in page HTML carrying a verification token.
pub fn sign_in_page(token: &str) -> String {
    format!(
        r#"<html><body><form method="post">
<input type="text" name="username" value="">
<input name="__RequestVerificationToken" type="hidden" value="{token}" />
</form></body></html>"#
    )
}

/// Raw HTTP server answering GET and POST with scripted replies.
///
/// POSTs are answered in order from the scripted list, repeating the last.
pub struct MockLoginServer {
    pub base_url: String,
    pub requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl MockLoginServer {
    pub async fn start(get: HttpReply, post: HttpReply) -> Self {
        Self::start_sequence(get, vec![post]).await
    }

    pub async fn start_sequence(get: HttpReply, posts: Vec<HttpReply>) -> Self {
        assert!(!posts.is_empty(), "at least one POST reply");
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let requests = Arc::new(Mutex::new(Vec::new()));
        let posts = Arc::new(posts);
        let next_post = Arc::new(AtomicUsize::new(0));

        let recorded = Arc::clone(&requests);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let recorded = Arc::clone(&recorded);
                let get = get.clone();
                let posts = Arc::clone(&posts);
                let next_post = Arc::clone(&next_post);
                tokio::spawn(async move {
                    let _ = serve_http(stream, recorded, get, posts, next_post).await;
                });
            }
        });

        Self {
            base_url: format!("http://{addr}/BC/"),
            requests,
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }
}

async fn serve_http(
    mut stream: TcpStream,
    recorded: Arc<Mutex<Vec<RecordedRequest>>>,
    get: HttpReply,
    posts: Arc<Vec<HttpReply>>,
    next_post: Arc<AtomicUsize>,
) -> std::io::Result<()> {
    let mut buffer = Vec::new();
    let mut chunk = [0_u8; 4096];

    let header_end = loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buffer.extend_from_slice(&chunk[..n]);
        if let Some(pos) = find(&buffer, b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buffer[..header_end]).to_string();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next().unwrap_or_default().split(' ');
    let method = request_line.next().unwrap_or_default().to_string();
    let target = request_line.next().unwrap_or_default().to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(n, v)| (n.trim().to_string(), v.trim().to_string()))
        .collect();

    let content_length = headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.parse::<usize>().ok())
        .unwrap_or(0);

    while buffer.len() < header_end + content_length {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..n]);
    }
    let body = String::from_utf8_lossy(&buffer[header_end..]).to_string();

    recorded.lock().push(RecordedRequest {
        method: method.clone(),
        target,
        headers,
        body,
    });

    let reply = if method == "POST" {
        let index = next_post.fetch_add(1, Ordering::SeqCst).min(posts.len() - 1);
        posts[index].clone()
    } else {
        get
    };
    let mut response = format!("HTTP/1.1 {} Mock\r\n", reply.status);
    for cookie in &reply.set_cookies {
        response.push_str(&format!("Set-Cookie: {cookie}\r\n"));
    }
    if reply.status == 302 {
        response.push_str("Location: /BC/\r\n");
    }
    response.push_str("Content-Type: text/html\r\n");
    response.push_str(&format!("Content-Length: {}\r\n", reply.body.len()));
    response.push_str("Connection: close\r\n\r\n");
    response.push_str(&reply.body);

    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

// ============================================================================
// WebSocket Mock
// ============================================================================

/// Handshake data as the server saw it.
#[derive(Debug, Clone, Default)]
pub struct Handshake {
    pub uri: String,
    pub headers: Vec<(String, String)>,
}

impl Handshake {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// What the test asks the peer to do.
#[derive(Debug)]
pub enum PeerAction {
    Text(String),
    Binary(Vec<u8>),
    Close,
}

/// Cloneable handle for sending frames from the server side.
#[derive(Debug, Clone)]
pub struct PeerSender(mpsc::UnboundedSender<PeerAction>);

impl PeerSender {
    pub fn send(&self, frame: Value) {
        let _ = self.0.send(PeerAction::Text(frame.to_string()));
    }

    pub fn send_text(&self, text: &str) {
        let _ = self.0.send(PeerAction::Text(text.to_string()));
    }

    pub fn send_binary(&self, frame: Value) {
        let _ = self.0.send(PeerAction::Binary(frame.to_string().into_bytes()));
    }

    pub fn result(&self, request: &Value, result: Value) {
        self.send(json!({ "jsonrpc": "2.0", "id": request["id"], "result": result }));
    }

    pub fn error(&self, request: &Value, code: i64, message: &str) {
        self.send(json!({
            "jsonrpc": "2.0",
            "id": request["id"],
            "error": { "code": code, "message": message }
        }));
    }

    pub fn close(&self) {
        let _ = self.0.send(PeerAction::Close);
    }
}

/// Server side of one accepted socket.
pub struct MockPeer {
    pub handshake: Handshake,
    incoming: mpsc::UnboundedReceiver<Value>,
    sender: PeerSender,
}

impl MockPeer {
    /// Waits for the next request frame.
    pub async fn recv(&mut self) -> Value {
        timeout(WAIT, self.incoming.recv())
            .await
            .expect("timed out waiting for a frame")
            .expect("peer closed")
    }

    /// Waits for `n` request frames.
    pub async fn recv_n(&mut self, n: usize) -> Vec<Value> {
        let mut frames = Vec::with_capacity(n);
        for _ in 0..n {
            frames.push(self.recv().await);
        }
        frames
    }

    pub fn sender(&self) -> PeerSender {
        self.sender.clone()
    }

    /// Answers every request with `reply(request)` from a background task.
    ///
    /// Returns the requests seen.
    pub fn auto_respond<F>(mut self, reply: F) -> (PeerSender, Arc<Mutex<Vec<Value>>>)
    where
        F: Fn(&Value) -> Value + Send + 'static,
    {
        let sender = self.sender();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let task_sender = sender.clone();
        let task_seen = Arc::clone(&seen);
        tokio::spawn(async move {
            while let Some(request) = self.incoming.recv().await {
                task_seen.lock().push(request.clone());
                task_sender.result(&request, reply(&request));
            }
        });

        (sender, seen)
    }
}

/// WebSocket server handing each accepted socket to the test.
pub struct MockWsServer {
    pub url: Url,
    peers: mpsc::UnboundedReceiver<MockPeer>,
}

impl MockWsServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve_ws(stream, peer_tx.clone()));
            }
        });

        Self {
            url: Url::parse(&format!("ws://{addr}/BC/csh")).expect("url"),
            peers: peer_rx,
        }
    }

    /// HTTP base URL of the same host, for socket URL derivation.
    pub fn http_base(&self) -> Url {
        let mut url = self.url.clone();
        let _ = url.set_scheme("http");
        url.set_path("/BC");
        url
    }

    /// Waits for the next client socket.
    pub async fn accept(&mut self) -> MockPeer {
        timeout(WAIT, self.peers.recv())
            .await
            .expect("timed out waiting for a client")
            .expect("server stopped")
    }
}

async fn serve_ws(stream: TcpStream, peers: mpsc::UnboundedSender<MockPeer>) {
    let captured = Arc::new(Mutex::new(Handshake::default()));
    let slot = Arc::clone(&captured);

    let callback = move |request: &Request, response: Response| {
        let headers = request
            .headers()
            .iter()
            .map(|(n, v)| (n.as_str().to_string(), v.to_str().unwrap_or_default().to_string()))
            .collect();
        *slot.lock() = Handshake {
            uri: request.uri().to_string(),
            headers,
        };
        Ok::<Response, ErrorResponse>(response)
    };

    let Ok(ws_stream) = accept_hdr_async(stream, callback).await else {
        return;
    };

    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel();
    let peer = MockPeer {
        handshake: captured.lock().clone(),
        incoming: in_rx,
        sender: PeerSender(out_tx),
    };
    if peers.send(peer).is_err() {
        return;
    }

    let (mut write, mut read) = ws_stream.split();
    loop {
        tokio::select! {
            message = read.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    if let Ok(value) = serde_json::from_str::<Value>(&text) {
                        let _ = in_tx.send(value);
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                _ => {}
            },

            action = out_rx.recv() => match action {
                Some(PeerAction::Text(text)) => {
                    if write.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Some(PeerAction::Binary(bytes)) => {
                    if write.send(Message::Binary(bytes.into())).await.is_err() {
                        break;
                    }
                }
                Some(PeerAction::Close) | None => {
                    let _ = write.close().await;
                    break;
                }
            },
        }
    }
}

// ============================================================================
// Payload Helpers
// ============================================================================

/// A `FormToShow` handler for a small form.
pub fn form_to_show(form_id: &str) -> Value {
    json!({
        "handlerType": "DN.LogicalClientEventRaisingHandler",
        "parameters": ["FormToShow", {
            "ServerId": form_id,
            "Caption": "Customer Card",
            "Children": [
                { "t": "gc", "DesignName": "General", "Children": [
                    { "t": "sc", "DesignName": "No.", "StringValue": "10000" },
                    { "t": "sc", "DesignName": "No.", "StringValue": "shadow" }
                ]},
                { "t": "ac", "DesignName": "Actions" }
            ]
        }]
    })
}

/// A `FormToShow` handler for a filter pane.
pub fn filter_form(form_id: &str) -> Value {
    json!({
        "handlerType": "DN.LogicalClientEventRaisingHandler",
        "parameters": ["FormToShow", {
            "ServerId": form_id,
            "Children": [
                { "t": "sc", "Caption": "No.", "ColumnBinder": { "Name": "No" } },
                { "t": "sc", "Caption": "Name", "ColumnBinder": { "Name": "Name" } }
            ]
        }]
    })
}

/// Session-init plus callback-response handlers.
pub fn session_opened(session_id: &str, sequence: i64) -> Value {
    json!([
        { "handlerType": "DN.SessionInitHandler",
          "parameters": [{ "ServerSessionId": session_id, "CompanyName": "CRONUS" }] },
        { "handlerType": "DN.CallbackResponseProperties",
          "parameters": [{ "SequenceNumber": sequence, "CompletedInteractions": [] }] }
    ])
}

/// Interaction name of an `Invoke` request frame.
pub fn interaction_name(request: &Value) -> Option<&str> {
    request["params"][0]["interactionsToInvoke"][0]["interactionName"].as_str()
}
