//! SSE transport and client integration tests
//!
//! Streams that end on their own are served by `wiremock`. Tests that need
//! the event stream to stay open while the client POSTs run against a small
//! in-process `axum` server speaking HTTP+SSE MCP: it announces
//! `/messages?sessionId=abc` as its endpoint and answers requests either on
//! the stream or in the POST body.
//!
//! # wiremock body helpers
//!
//! Use `set_body_raw(bytes, "text/event-stream")` for event streams so the
//! content type is exact.

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{Stream, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use mcplex::client::{ClientOptions, McpClient};
use mcplex::config::ServerConfig;
use mcplex::error::McpError;
use mcplex::transport::sse::SseTransport;
use mcplex::transport::{self, Transport};
use mcplex::types::{Envelope, RequestId};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn event_stream(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body.as_bytes().to_vec(), "text/event-stream")
}

async fn collect(transport: &SseTransport, deadline: Duration) -> Vec<Envelope> {
    let mut stream = transport.receive();
    let mut messages = Vec::new();
    while let Ok(Some(envelope)) = tokio::time::timeout(deadline, stream.next()).await {
        messages.push(envelope);
    }
    messages
}

/// One POST seen by [`SseMcpServer`].
#[derive(Debug, Clone)]
struct Posted {
    uri: String,
    authorization: Option<String>,
    body: Value,
}

#[derive(Clone, Default)]
struct ServerState {
    stream_tx: Arc<Mutex<Option<mpsc::UnboundedSender<Event>>>>,
    posts: Arc<Mutex<Vec<Posted>>>,
    announce_endpoint: bool,
    reply_in_body: bool,
    fail_posts: bool,
}

/// In-process HTTP+SSE MCP server.
struct SseMcpServer {
    addr: SocketAddr,
    state: ServerState,
}

impl SseMcpServer {
    async fn start(announce_endpoint: bool, reply_in_body: bool, fail_posts: bool) -> Self {
        let state = ServerState {
            announce_endpoint,
            reply_in_body,
            fail_posts,
            ..ServerState::default()
        };
        let app = Router::new()
            .route("/sse", get(open_stream))
            .route("/message", post(post_message))
            .route("/messages", post(post_message))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Self { addr, state }
    }

    fn stream_url(&self) -> String {
        format!("http://{}/sse", self.addr)
    }

    fn posts(&self) -> Vec<Posted> {
        self.state.posts.lock().unwrap().clone()
    }
}

async fn open_stream(
    State(state): State<ServerState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::unbounded_channel();
    let _ = tx.send(Event::default().comment("open"));
    if state.announce_endpoint {
        let _ = tx.send(Event::default().event("endpoint").data("/messages?sessionId=abc"));
    }
    *state.stream_tx.lock().unwrap() = Some(tx);
    Sse::new(UnboundedReceiverStream::new(rx).map(Ok::<Event, Infallible>))
}

async fn post_message(
    State(state): State<ServerState>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if state.announce_endpoint && query.get("sessionId").map(String::as_str) != Some("abc") {
        return StatusCode::NOT_FOUND.into_response();
    }
    let uri = match query.get("sessionId") {
        Some(session) => format!("/messages?sessionId={session}"),
        None => "/message".to_string(),
    };
    state.posts.lock().unwrap().push(Posted {
        uri,
        authorization: headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        body: body.clone(),
    });
    if state.fail_posts {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    let Some(reply) = reply_to(&body) else {
        return StatusCode::ACCEPTED.into_response();
    };
    if state.reply_in_body {
        return Json(reply).into_response();
    }
    if let Some(tx) = state.stream_tx.lock().unwrap().as_ref() {
        let _ = tx.send(Event::default().data(reply.to_string()));
    }
    StatusCode::ACCEPTED.into_response()
}

/// JSON-RPC reply for a request body; `None` for notifications.
fn reply_to(body: &Value) -> Option<Value> {
    let id = body.get("id").cloned()?;
    let reply = match body["method"].as_str().unwrap_or("") {
        "initialize" => json!({"jsonrpc": "2.0", "id": id, "result": {
            "protocolVersion": "2025-06-18",
            "capabilities": {"tools": {}},
            "serverInfo": {"name": "sse-mcp", "version": "1.0.0"}
        }}),
        "tools/list" => json!({"jsonrpc": "2.0", "id": id, "result": {
            "tools": [{"name": "lookup", "description": "Look something up"}]
        }}),
        "tools/call" => json!({"jsonrpc": "2.0", "id": id, "result": {
            "content": [{"type": "text", "text": format!("looked up {}", body["params"]["arguments"]["q"])}]
        }}),
        "ping" => json!({"jsonrpc": "2.0", "id": id, "result": {}}),
        other => json!({"jsonrpc": "2.0", "id": id, "error": {
            "code": -32601, "message": format!("Method not found: {other}")
        }}),
    };
    Some(reply)
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_connect_rejected_stream_is_connection_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let transport =
        SseTransport::new(&format!("{}/sse", server.uri()), Duration::from_secs(5)).unwrap();
    let err = transport.connect().await.unwrap_err();
    assert!(err.is_connection(), "got {err:?}");
    assert!(!transport.is_connected());
}

#[tokio::test]
async fn test_connect_unreachable_host_is_connection_error() {
    let transport = SseTransport::new("http://127.0.0.1:9/sse", Duration::from_secs(2)).unwrap();
    let err = transport.connect().await.unwrap_err();
    assert!(matches!(err, McpError::Connection(_)), "got {err:?}");
}

#[tokio::test]
async fn test_stream_stops_at_done_and_skips_malformed() {
    let server = MockServer::start().await;
    let body = concat!(
        "data: {\"jsonrpc\":\"2.0\",\"method\":\"notifications/message\",\"params\":{\"n\":1}}\n\n",
        "data: {not json\n\n",
        "event: ping\ndata: {}\n\n",
        "data: {\"jsonrpc\":\"2.0\",\"id\":7,\"result\":{}}\n\n",
        "data: [DONE]\n\n",
        "data: {\"jsonrpc\":\"2.0\",\"method\":\"after/done\"}\n\n",
    );
    Mock::given(method("GET"))
        .and(path("/sse"))
        .respond_with(event_stream(body))
        .mount(&server)
        .await;

    let transport =
        SseTransport::new(&format!("{}/sse", server.uri()), Duration::from_secs(5)).unwrap();
    transport.connect().await.unwrap();
    let messages = collect(&transport, Duration::from_secs(5)).await;

    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].method(), Some("notifications/message"));
    match &messages[1] {
        Envelope::Response(response) => assert_eq!(response.id, Some(RequestId::Number(7))),
        other => panic!("expected response, got {other:?}"),
    }
    // End of stream is terminal.
    assert!(!transport.is_connected());
}

#[tokio::test]
async fn test_connect_returns_with_announced_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sse"))
        .respond_with(event_stream(
            "event: endpoint\ndata: /messages?session=abc\n\n",
        ))
        .mount(&server)
        .await;

    let transport =
        SseTransport::new(&format!("{}/sse", server.uri()), Duration::from_secs(5)).unwrap();
    transport.connect().await.unwrap();

    let endpoint = transport.message_url().unwrap();
    assert_eq!(endpoint.path(), "/messages");
    assert_eq!(endpoint.query(), Some("session=abc"));
}

#[tokio::test]
async fn test_send_posts_json_with_headers_to_announced_endpoint() {
    let server = SseMcpServer::start(true, false, false).await;

    let mut headers = HashMap::new();
    headers.insert("Authorization".to_string(), "Bearer secret".to_string());
    let transport = SseTransport::new(&server.stream_url(), Duration::from_secs(5))
        .unwrap()
        .with_headers(headers);
    transport.connect().await.unwrap();

    transport
        .send(&Envelope::notification("notifications/initialized", None))
        .await
        .unwrap();

    let posted = server.posts();
    assert_eq!(posted.len(), 1);
    assert_eq!(posted[0].uri, "/messages?sessionId=abc");
    assert_eq!(posted[0].authorization.as_deref(), Some("Bearer secret"));
    assert_eq!(posted[0].body["method"], "notifications/initialized");
    assert!(posted[0].body.get("id").is_none());

    transport.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_send_http_error_is_connection_error() {
    let server = SseMcpServer::start(true, false, true).await;

    let transport = SseTransport::new(&server.stream_url(), Duration::from_secs(5)).unwrap();
    transport.connect().await.unwrap();
    let err = transport
        .send(&Envelope::request(1_i64, "ping", None))
        .await
        .unwrap_err();
    assert!(err.is_connection(), "got {err:?}");

    transport.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_connect_falls_back_when_no_endpoint_is_announced() {
    let server = SseMcpServer::start(false, false, false).await;

    let transport = SseTransport::new(&server.stream_url(), Duration::from_secs(5))
        .unwrap()
        .with_endpoint_timeout(Duration::from_millis(200));
    tokio::time::timeout(Duration::from_secs(2), transport.connect())
        .await
        .expect("connect did not give up waiting for an endpoint")
        .unwrap();
    assert!(transport.is_connected());
    assert_eq!(transport.message_url().unwrap().path(), "/message");

    transport
        .send(&Envelope::notification("notifications/initialized", None))
        .await
        .unwrap();
    assert_eq!(server.posts()[0].uri, "/message");

    transport.disconnect().await.unwrap();
}

// ---------------------------------------------------------------------------
// Client over SSE
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_client_handshake_over_event_stream_uses_announced_endpoint() {
    let server = SseMcpServer::start(true, false, false).await;

    let config = ServerConfig::sse(server.stream_url());
    let client = McpClient::new("sse-test", ClientOptions::default());
    tokio::time::timeout(
        Duration::from_secs(10),
        client.connect(transport::from_config(&config).unwrap()),
    )
    .await
    .expect("handshake timed out")
    .unwrap();

    assert!(client.is_connected());
    assert_eq!(client.protocol_version().as_deref(), Some("2025-06-18"));

    let tools = client.list_tools(false).await.unwrap();
    assert_eq!(tools[0].name, "lookup");
    let result = client.call_tool("lookup", json!({"q": "rust"})).await.unwrap();
    assert_eq!(result.text(), "looked up \"rust\"");

    let posted = server.posts();
    assert_eq!(posted[0].body["method"], "initialize");
    assert!(posted.iter().all(|p| p.uri == "/messages?sessionId=abc"));

    client.disconnect().await.unwrap();
    assert!(!client.is_connected());
}

#[tokio::test]
async fn test_client_handshake_with_replies_in_post_body() {
    let server = SseMcpServer::start(true, true, false).await;

    let config = ServerConfig::sse(server.stream_url());
    let client = McpClient::new("sse-test", ClientOptions::default());
    client
        .connect(transport::from_config(&config).unwrap())
        .await
        .unwrap();

    assert_eq!(
        client.server_info().map(|i| i.name).as_deref(),
        Some("sse-mcp")
    );

    let result = client.call_tool("lookup", json!({"q": "rust"})).await.unwrap();
    assert_eq!(result.text(), "looked up \"rust\"");

    let err = client.read_resource("x://y").await.unwrap_err();
    assert!(matches!(err, McpError::Capability { .. }), "got {err:?}");

    client.disconnect().await.unwrap();
    assert!(!client.is_connected());
}
