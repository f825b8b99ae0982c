//! HTTP transport with server-sent event streams.
//!
//! # Endpoints
//!
//! - `POST /mcp` (and `POST /`): one JSON-RPC message per request. The first
//!   request without an `Mcp-Session-Id` header opens a session and the id
//!   is returned in that header. Notifications and unparseable bodies sent
//!   without the header are answered without opening one. Replies come back in the response body,
//!   as a single `message` event when the client accepts `text/event-stream`.
//! - `GET /mcp`: the session's notification stream.
//! - `DELETE /mcp`: ends the session.
//! - `GET /sse`: legacy transport. Opens a session whose stream starts with an
//!   `endpoint` event naming the URL to post to; replies and notifications
//!   follow on the same stream. Closing the stream ends the session.
//! - `POST /message?sessionId=<id>`: legacy message endpoint, answers `202`
//!   and delivers the reply on the session's stream.
//! - `GET /health`: liveness, independent of the RPC surface.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::{Query, State};
use axum::http::header::{ACCEPT, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Json;
use futures::future::BoxFuture;
use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use super::Transport;
use crate::config::TransportConfig;
use crate::error::TransportError;
use crate::mcp::protocol::parse_message;
use crate::mcp::router::Router;
use crate::mcp::session::{SessionId, SessionManager, TransportKind};

/// Header carrying the session id on the streamable HTTP endpoints.
pub const SESSION_HEADER: &str = "mcp-session-id";

/// Path clients of the legacy transport post messages to.
pub const LEGACY_MESSAGE_PATH: &str = "/message";

const EVENT_STREAM: &str = "text/event-stream";

#[derive(Clone)]
struct AppState {
    router: Arc<Router>,
}

impl AppState {
    fn sessions(&self) -> &SessionManager {
        self.router.sessions()
    }
}

#[derive(Debug, Deserialize)]
struct MessageQuery {
    #[serde(rename = "sessionId")]
    session_id: String,
}

/// Multi-session transport over HTTP.
pub struct HttpTransport {
    config: TransportConfig,
}

impl HttpTransport {
    /// Creates a transport from its configuration.
    #[must_use]
    pub const fn new(config: TransportConfig) -> Self {
        Self { config }
    }

    /// Builds the axum application serving `router`.
    pub fn app(router: Arc<Router>, config: &TransportConfig) -> axum::Router {
        axum::Router::new()
            .route("/", post(post_message))
            .route(
                "/mcp",
                post(post_message).get(open_stream).delete(delete_session),
            )
            .route("/sse", get(open_legacy_stream))
            .route(LEGACY_MESSAGE_PATH, post(post_legacy_message))
            .route("/health", get(health))
            .with_state(AppState { router })
            .layer(cors_layer(config))
            .layer(TraceLayer::new_for_http())
    }

    /// Binds the listener and serves until `shutdown` resolves.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound or serving fails.
    pub async fn run(
        self,
        router: Arc<Router>,
        shutdown: BoxFuture<'static, ()>,
    ) -> Result<(), TransportError> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|source| TransportError::Bind {
                addr: addr.clone(),
                source,
            })?;

        let sweeper = tokio::spawn(sweep_idle_sessions(
            Arc::clone(router.sessions()),
            self.config.session_idle_timeout(),
            self.config.sweep_interval(),
        ));

        info!(%addr, "HTTP transport listening");
        let app = Self::app(router, &self.config);
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await;

        sweeper.abort();
        info!("HTTP transport stopped");
        result.map_err(TransportError::Io)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Multiplexed
    }

    async fn serve(
        self: Box<Self>,
        router: Arc<Router>,
        shutdown: BoxFuture<'static, ()>,
    ) -> Result<(), TransportError> {
        (*self).run(router, shutdown).await
    }
}

/// Expires idle sessions every `interval`.
pub async fn sweep_idle_sessions(sessions: Arc<SessionManager>, idle: Duration, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let expired = sessions.expire_idle(idle);
        if !expired.is_empty() {
            debug!(count = expired.len(), "Expired idle sessions");
        }
    }
}

fn cors_layer(config: &TransportConfig) -> CorsLayer {
    let origins = if config.allows_any_origin() {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(config.allowed_origins.iter().filter_map(|origin| {
            let parsed = origin.parse::<HeaderValue>().ok();
            if parsed.is_none() {
                warn!(origin, "Ignoring invalid CORS origin");
            }
            parsed
        }))
    };

    let session_header = HeaderName::from_static(SESSION_HEADER);
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, ACCEPT, session_header.clone()])
        .expose_headers([session_header])
        .allow_credentials(config.allow_credentials)
        .max_age(Duration::from_secs(3600))
}

fn session_from_headers(headers: &HeaderMap) -> Option<SessionId> {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(SessionId::from)
}

fn accepts_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get(ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|accept| accept.contains(EVENT_STREAM))
}

fn with_session_header(mut response: Response, session: &SessionId) -> Response {
    if let Ok(value) = HeaderValue::from_str(session.as_str()) {
        response.headers_mut().insert(SESSION_HEADER, value);
    }
    response
}

fn message_event(frame: String) -> Event {
    Event::default().event("message").data(frame)
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

/// `POST /mcp`: one message in, reply in the response.
async fn post_message(State(state): State<AppState>, headers: HeaderMap, body: String) -> Response {
    let session = match session_from_headers(&headers) {
        Some(id) if state.sessions().contains(&id) => id,
        Some(id) => {
            debug!(session = %id, "Unknown session");
            return error_response(StatusCode::NOT_FOUND, "Session not found");
        }
        // Only a request opens a session.
        None if !parse_message(&body).is_ok_and(|message| message.expects_reply()) => {
            let reply = state.router.handle_frame(&SessionId::generate(), &body).await;
            return reply_response(reply, &headers);
        }
        None => state.sessions().open_parked(TransportKind::Multiplexed),
    };

    let reply = state.router.handle_frame(&session, &body).await;
    with_session_header(reply_response(reply, &headers), &session)
}

fn reply_response(reply: Option<String>, headers: &HeaderMap) -> Response {
    match reply {
        None => StatusCode::ACCEPTED.into_response(),
        Some(reply) if accepts_event_stream(headers) => {
            Sse::new(stream::once(async move { Ok::<_, Infallible>(message_event(reply)) }))
                .into_response()
        }
        Some(reply) => ([(CONTENT_TYPE, "application/json")], reply).into_response(),
    }
}

/// `GET /mcp`: the session's notification stream.
async fn open_stream(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(session) = session_from_headers(&headers) else {
        return error_response(StatusCode::BAD_REQUEST, "Missing Mcp-Session-Id header");
    };

    match state.sessions().claim_events(&session) {
        Ok(events) => {
            debug!(session = %session, "Notification stream opened");
            let stream = outbound_events(events, None);
            with_session_header(
                Sse::new(stream).keep_alive(KeepAlive::default()).into_response(),
                &session,
            )
        }
        Err(TransportError::SessionNotFound(_)) => {
            error_response(StatusCode::NOT_FOUND, "Session not found")
        }
        Err(_) => error_response(StatusCode::CONFLICT, "Stream already open for this session"),
    }
}

/// `DELETE /mcp`: ends the session.
async fn delete_session(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(session) = session_from_headers(&headers) else {
        return error_response(StatusCode::BAD_REQUEST, "Missing Mcp-Session-Id header");
    };
    if state.sessions().close(&session) {
        StatusCode::NO_CONTENT.into_response()
    } else {
        error_response(StatusCode::NOT_FOUND, "Session not found")
    }
}

/// Closes a session when its legacy event stream is dropped.
struct SessionGuard {
    router: Arc<Router>,
    session: SessionId,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.router.sessions().close(&self.session) {
            debug!(session = %self.session, "Event stream closed");
        }
    }
}

fn outbound_events(
    events: mpsc::UnboundedReceiver<String>,
    guard: Option<SessionGuard>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold((events, guard), |(mut events, guard)| async move {
        let frame = events.recv().await?;
        Some((Ok(message_event(frame)), (events, guard)))
    })
}

/// `GET /sse`: legacy transport, opens a session and its stream.
async fn open_legacy_stream(State(state): State<AppState>) -> Response {
    let (session, events) = state.sessions().open(TransportKind::Multiplexed);
    let endpoint = format!("{LEGACY_MESSAGE_PATH}?sessionId={session}");
    info!(session = %session, "Legacy event stream opened");

    let guard = SessionGuard {
        router: Arc::clone(&state.router),
        session,
    };
    let first = stream::once(async move {
        Ok::<_, Infallible>(Event::default().event("endpoint").data(endpoint))
    });
    let stream = first.chain(outbound_events(events, Some(guard)));

    Sse::new(stream).keep_alive(KeepAlive::default()).into_response()
}

/// `POST /message?sessionId=<id>`: legacy message endpoint.
async fn post_legacy_message(
    State(state): State<AppState>,
    Query(query): Query<MessageQuery>,
    body: String,
) -> Response {
    let session = SessionId::from(query.session_id.as_str());
    if !state.sessions().contains(&session) {
        return error_response(StatusCode::NOT_FOUND, "Session not found");
    }

    let router = Arc::clone(&state.router);
    tokio::spawn(async move {
        if let Some(reply) = router.handle_frame(&session, &body).await {
            if let Err(e) = router.sessions().send(&session, reply) {
                warn!(error = %e, "Dropping reply for closed stream");
            }
        }
    });

    StatusCode::ACCEPTED.into_response()
}

/// `GET /health`: liveness.
async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "sessions": state.sessions().len(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_header_detection() {
        let mut headers = HeaderMap::new();
        assert!(!accepts_event_stream(&headers));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/json, text/event-stream"),
        );
        assert!(accepts_event_stream(&headers));
    }

    #[test]
    fn session_header_is_read() {
        let mut headers = HeaderMap::new();
        headers.insert(SESSION_HEADER, HeaderValue::from_static("abc"));
        assert_eq!(session_from_headers(&headers), Some(SessionId::from("abc")));
    }

    #[test]
    fn cors_layer_accepts_explicit_origins() {
        let config = TransportConfig {
            allowed_origins: vec!["http://localhost:3000".to_string()],
            allow_credentials: true,
            ..TransportConfig::default()
        };
        let _layer = cors_layer(&config);
    }
}
