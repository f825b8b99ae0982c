//! HTTP transport tests, driving the axum application without a socket.

use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::response::Response;
use futures::StreamExt;
use serde_json::Value;
use tower::ServiceExt;

use knowledge_mcp::config::{LimitsConfig, TransportConfig};
use knowledge_mcp::mcp::router::Router;
use knowledge_mcp::mcp::session::SessionManager;
use knowledge_mcp::mcp::transport::http::SESSION_HEADER;
use knowledge_mcp::mcp::transport::HttpTransport;
use knowledge_mcp::services::{InMemoryKnowledgeStore, NewDocument, Services};

const INITIALIZE: &str = r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2025-06-18","capabilities":{},"clientInfo":{"name":"http-test","version":"1"}}}"#;
const PING: &str = r#"{"jsonrpc":"2.0","id":2,"method":"ping"}"#;

fn setup() -> (axum::Router, Arc<Router>) {
    let store = Arc::new(InMemoryKnowledgeStore::new());
    store.create_collection("ops", "Operations", None).unwrap();
    store
        .upsert_document("ops", NewDocument::text("ssl", "Docker SSL", "Use certbot"))
        .unwrap();
    let services = Services::in_memory(store, Duration::from_secs(1));
    let router = Arc::new(
        Router::new(
            &services,
            Arc::new(SessionManager::new()),
            &LimitsConfig::default(),
        )
        .unwrap(),
    );
    let app = HttpTransport::app(Arc::clone(&router), &TransportConfig::default());
    (app, router)
}

fn post(uri: &str, session: Option<&str>, body: &str) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(session) = session {
        builder = builder.header(SESSION_HEADER, session);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn session_of(response: &Response) -> String {
    response
        .headers()
        .get(SESSION_HEADER)
        .expect("session header")
        .to_str()
        .unwrap()
        .to_string()
}

async fn json_body(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn next_chunk(body: &mut axum::body::BodyDataStream) -> String {
    let chunk = tokio::time::timeout(Duration::from_secs(5), body.next())
        .await
        .expect("event within five seconds")
        .expect("stream still open")
        .unwrap();
    String::from_utf8(chunk.to_vec()).unwrap()
}

// =============================================================================
// Streamable endpoint
// =============================================================================

#[tokio::test]
async fn first_post_opens_a_session() {
    let (app, router) = setup();

    let response = app.oneshot(post("/mcp", None, INITIALIZE)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let session = session_of(&response);
    assert!(!session.is_empty());

    let body = json_body(response).await;
    assert_eq!(body["id"], 1);
    assert_eq!(body["result"]["serverInfo"]["name"], "knowledge-mcp");
    assert_eq!(router.sessions().len(), 1);
}

#[tokio::test]
async fn session_header_is_reused() {
    let (app, router) = setup();

    let response = app
        .clone()
        .oneshot(post("/mcp", None, INITIALIZE))
        .await
        .unwrap();
    let session = session_of(&response);

    let response = app
        .oneshot(post("/mcp", Some(&session), PING))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(session_of(&response), session);
    assert_eq!(json_body(response).await["id"], 2);
    assert_eq!(router.sessions().len(), 1);
}

#[tokio::test]
async fn unknown_session_is_not_found() {
    let (app, _router) = setup();

    let response = app
        .oneshot(post("/mcp", Some("no-such-session"), PING))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn notification_is_accepted_without_body() {
    let (app, router) = setup();

    let response = app
        .oneshot(post(
            "/mcp",
            None,
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert!(response.headers().get(SESSION_HEADER).is_none());
    assert!(router.sessions().is_empty());
}

#[tokio::test]
async fn client_response_without_session_opens_none() {
    let (app, router) = setup();

    let response = app
        .oneshot(post("/mcp", None, r#"{"jsonrpc":"2.0","id":9,"result":{}}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert!(router.sessions().is_empty());
}

#[tokio::test]
async fn event_stream_reply_when_accepted() {
    let (app, _router) = setup();

    let request = Request::builder()
        .method("POST")
        .uri("/mcp")
        .header("content-type", "application/json")
        .header("accept", "application/json, text/event-stream")
        .body(Body::from(PING))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    let bytes = to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("event: message"));
    assert!(text.contains(r#""id":2"#));
}

#[tokio::test]
async fn malformed_body_gets_parse_error() {
    let (app, router) = setup();

    let response = app.oneshot(post("/mcp", None, "{oops")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get(SESSION_HEADER).is_none());
    assert_eq!(json_body(response).await["error"]["code"], -32700);
    assert!(router.sessions().is_empty());
}

#[tokio::test]
async fn malformed_body_keeps_existing_session() {
    let (app, router) = setup();

    let response = app
        .clone()
        .oneshot(post("/mcp", None, INITIALIZE))
        .await
        .unwrap();
    let session = session_of(&response);

    let response = app
        .oneshot(post("/mcp", Some(&session), "{oops"))
        .await
        .unwrap();
    assert_eq!(session_of(&response), session);
    assert_eq!(json_body(response).await["error"]["code"], -32700);
    assert_eq!(router.sessions().len(), 1);
}

#[tokio::test]
async fn notification_stream_is_claimed_once() {
    let (app, router) = setup();

    let response = app
        .clone()
        .oneshot(post("/mcp", None, INITIALIZE))
        .await
        .unwrap();
    let session = session_of(&response);

    let open = || {
        Request::builder()
            .method("GET")
            .uri("/mcp")
            .header(SESSION_HEADER, session.as_str())
            .body(Body::empty())
            .unwrap()
    };

    let stream = app.clone().oneshot(open()).await.unwrap();
    assert_eq!(stream.status(), StatusCode::OK);
    let again = app.oneshot(open()).await.unwrap();
    assert_eq!(again.status(), StatusCode::CONFLICT);

    let subscribed = router
        .sessions()
        .subscribe(&session.as_str().into(), "resource://knowledge/collections")
        .unwrap();
    assert!(subscribed);
    router
        .sessions()
        .notify_resource_updated("resource://knowledge/collections");

    let mut body = stream.into_body().into_data_stream();
    let event = next_chunk(&mut body).await;
    assert!(event.contains("notifications/resources/updated"));
}

#[tokio::test]
async fn delete_ends_the_session() {
    let (app, router) = setup();

    let response = app
        .clone()
        .oneshot(post("/mcp", None, INITIALIZE))
        .await
        .unwrap();
    let session = session_of(&response);

    let delete = || {
        Request::builder()
            .method("DELETE")
            .uri("/mcp")
            .header(SESSION_HEADER, session.as_str())
            .body(Body::empty())
            .unwrap()
    };
    let response = app.clone().oneshot(delete()).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(router.sessions().is_empty());

    let response = app.oneshot(delete()).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// =============================================================================
// Legacy endpoint
// =============================================================================

#[tokio::test]
async fn legacy_stream_announces_endpoint_and_carries_replies() {
    let (app, router) = setup();

    let response = app
        .clone()
        .oneshot(Request::get("/sse").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let mut body = response.into_body().into_data_stream();

    let endpoint_event = next_chunk(&mut body).await;
    assert!(endpoint_event.contains("event: endpoint"));
    let endpoint = endpoint_event
        .lines()
        .find_map(|line| line.strip_prefix("data: "))
        .unwrap()
        .to_string();
    assert!(endpoint.starts_with("/message?sessionId="));

    let response = app.oneshot(post(&endpoint, None, PING)).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let reply = next_chunk(&mut body).await;
    assert!(reply.contains("event: message"));
    assert!(reply.contains(r#""id":2"#));

    drop(body);
    assert!(router.sessions().is_empty());
}

#[tokio::test]
async fn legacy_post_to_unknown_session_is_not_found() {
    let (app, _router) = setup();

    let response = app
        .oneshot(post("/message?sessionId=missing", None, PING))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// =============================================================================
// Ambient endpoints
// =============================================================================

#[tokio::test]
async fn health_reports_liveness() {
    let (app, _router) = setup();

    let response = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["sessions"], 0);
}

#[tokio::test]
async fn cors_preflight_exposes_session_header() {
    let (app, _router) = setup();

    let request = Request::builder()
        .method("OPTIONS")
        .uri("/mcp")
        .header("origin", "https://client.example.com")
        .header("access-control-request-method", "POST")
        .header("access-control-request-headers", "content-type, mcp-session-id")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert!(response.status().is_success());
    assert_eq!(response.headers()["access-control-allow-origin"], "*");
}
