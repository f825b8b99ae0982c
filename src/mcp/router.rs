//! Message router: raw frame in, serialised reply out.
//!
//! Both transports hand every frame they receive to [`Router::handle_frame`]
//! together with the id of the session it arrived on. The router parses the
//! envelope, dispatches on the closed [`Method`] set and returns the reply
//! frame, or `None` for notifications and client responses.
//!
//! A failure only ever affects the request that caused it. Nothing here
//! closes a session.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::config::LimitsConfig;
use crate::error::ServiceError;
use crate::mcp::protocol::{
    parse_message, ErrorCode, IncomingMessage, JsonRpcError, JsonRpcErrorData,
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, Method, NotificationMethod, RequestId,
    MCP_PROTOCOL_VERSION, SERVER_NAME, SUPPORTED_PROTOCOL_VERSIONS,
};
use crate::mcp::resources::{ResourceError, ResourceProvider, ResourceUri};
use crate::mcp::session::{ClientIdentity, SessionId, SessionManager};
use crate::mcp::tools::{CallError, RegistryError, ToolRegistry};
use crate::services::{AnalyticsService, Services, ToolUsage};

/// Code used for "service unavailable" errors.
pub const SERVICE_UNAVAILABLE: i32 = -32000;

/// Last-resort reply if even an error envelope cannot be serialised.
const INTERNAL_ERROR_FRAME: &str =
    r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32603,"message":"Internal error"}}"#;

/// Server capabilities advertised during initialisation.
#[derive(Debug, Clone, Serialize)]
pub struct ServerCapabilities {
    /// Tool-related capabilities.
    pub tools: ToolCapabilities,
    /// Resource-related capabilities.
    pub resources: ResourceCapabilities,
}

impl Default for ServerCapabilities {
    fn default() -> Self {
        Self {
            tools: ToolCapabilities::default(),
            resources: ResourceCapabilities {
                subscribe: true,
                list_changed: false,
            },
        }
    }
}

/// Tool-specific capabilities.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCapabilities {
    /// Whether the tool list can change during the session.
    pub list_changed: bool,
}

/// Resource-specific capabilities.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceCapabilities {
    /// Whether clients may subscribe to resource updates.
    pub subscribe: bool,
    /// Whether resource list change notifications are sent.
    pub list_changed: bool,
}

/// Server information for initialisation response.
#[derive(Debug, Clone, Serialize)]
pub struct ServerInfo {
    /// Server name.
    pub name: String,
    /// Server version.
    pub version: String,
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            name: SERVER_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Client information received during initialisation.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientInfo {
    /// Client name.
    pub name: String,
    /// Client version.
    #[serde(default)]
    pub version: Option<String>,
}

/// Parameters for the initialize request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// Protocol version requested by client.
    pub protocol_version: String,
    /// Client capabilities.
    #[serde(default)]
    pub capabilities: Value,
    /// Client information.
    #[serde(default)]
    pub client_info: Option<ClientInfo>,
}

#[derive(Debug, Deserialize)]
struct ToolCallParams {
    name: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Deserialize)]
struct UriParams {
    uri: String,
}

/// Picks the version to answer `initialize` with.
///
/// A supported version is echoed back; anything else gets the newest.
#[must_use]
pub fn negotiate_version(requested: &str) -> &'static str {
    SUPPORTED_PROTOCOL_VERSIONS
        .iter()
        .find(|v| **v == requested)
        .copied()
        .unwrap_or(MCP_PROTOCOL_VERSION)
}

/// Dispatches JSON-RPC frames to the tool registry and resource provider.
pub struct Router {
    tools: ToolRegistry,
    resources: ResourceProvider,
    analytics: Arc<dyn AnalyticsService>,
    sessions: Arc<SessionManager>,
    permits: Semaphore,
    tool_timeout: Duration,
}

impl Router {
    /// Creates a router with the full tool set backed by `services`.
    ///
    /// # Errors
    ///
    /// Returns an error if the tool set cannot be registered.
    pub fn new(
        services: &Services,
        sessions: Arc<SessionManager>,
        limits: &LimitsConfig,
    ) -> Result<Self, RegistryError> {
        let tools = ToolRegistry::with_services(services)?;
        Ok(Self::with_tools(tools, services, sessions, limits))
    }

    /// Creates a router over an explicit tool registry.
    #[must_use]
    pub fn with_tools(
        tools: ToolRegistry,
        services: &Services,
        sessions: Arc<SessionManager>,
        limits: &LimitsConfig,
    ) -> Self {
        Self {
            tools,
            resources: ResourceProvider::new(services),
            analytics: Arc::clone(&services.analytics),
            sessions,
            permits: Semaphore::new(limits.max_concurrent_requests),
            tool_timeout: limits.tool_timeout(),
        }
    }

    /// The session manager shared with the transports.
    #[must_use]
    pub const fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// The registered tools.
    #[must_use]
    pub const fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Handles one frame received on `session`.
    ///
    /// Returns the reply frame, or `None` when the message expects no reply.
    pub async fn handle_frame(&self, session: &SessionId, frame: &str) -> Option<String> {
        self.sessions.touch(session);

        let message = match parse_message(frame) {
            Ok(message) => message,
            Err(error) => {
                debug!(session = %session, code = error.error.code, "Rejected frame");
                return Some(encode(None, &error));
            }
        };

        match message {
            IncomingMessage::Request(request) => {
                let id = request.id.clone();
                let reply = match self.handle_request(session, request).await {
                    Ok(response) => encode(Some(&id), &response),
                    Err(error) => encode(Some(&id), &error),
                };
                Some(reply)
            }
            IncomingMessage::Notification(notification) => {
                self.handle_notification(session, &notification);
                None
            }
            IncomingMessage::Response(id) => {
                debug!(session = %session, id = ?id, "Ignoring client response");
                None
            }
        }
    }

    async fn handle_request(
        &self,
        session: &SessionId,
        request: JsonRpcRequest,
    ) -> Result<JsonRpcResponse, JsonRpcError> {
        let Some(method) = Method::from_name(&request.method) else {
            return Err(JsonRpcError::method_not_found(
                request.id.clone(),
                &request.method,
            ));
        };

        let _permit = self.permits.acquire().await.map_err(|_| {
            JsonRpcError::internal_error(request.id.clone(), "Server is shutting down")
        })?;

        let started = Instant::now();
        let result = match method {
            Method::Initialize => self.initialize(session, &request),
            Method::Ping => Ok(json!({})),
            Method::ToolsList => Ok(json!({ "tools": self.tools.list() })),
            Method::ToolsCall => self.call_tool(&request).await,
            Method::ResourcesList => self.list_resources(&request).await,
            Method::ResourceTemplatesList => {
                Ok(json!({ "resourceTemplates": ResourceProvider::templates() }))
            }
            Method::ResourcesRead => self.read_resource(&request).await,
            Method::ResourcesSubscribe => self.subscribe(session, &request),
            Method::ResourcesUnsubscribe => self.unsubscribe(session, &request),
        };

        debug!(
            session = %session,
            method = %method,
            elapsed_ms = started.elapsed().as_millis(),
            ok = result.is_ok(),
            "Request handled"
        );

        result.map(|value| JsonRpcResponse::success(request.id, value))
    }

    fn handle_notification(&self, session: &SessionId, notification: &JsonRpcNotification) {
        match NotificationMethod::from_name(&notification.method) {
            Some(NotificationMethod::Initialized) => {
                self.sessions.mark_initialized(session);
                debug!(session = %session, "Client initialised");
            }
            Some(NotificationMethod::Cancelled) => {
                debug!(session = %session, params = ?notification.params, "Cancellation ignored");
            }
            None => {
                debug!(session = %session, method = %notification.method, "Unknown notification");
            }
        }
    }

    fn initialize(&self, session: &SessionId, request: &JsonRpcRequest) -> Result<Value, JsonRpcError> {
        let params: InitializeParams = parse_params(request, "initialize")?;
        let version = negotiate_version(&params.protocol_version);

        if let Some(client) = params.client_info {
            info!(
                session = %session,
                client = %client.name,
                version = ?client.version,
                protocol = version,
                "Client connected"
            );
            self.sessions.set_client(
                session,
                ClientIdentity {
                    name: client.name,
                    version: client.version,
                },
            );
        }

        Ok(json!({
            "protocolVersion": version,
            "capabilities": ServerCapabilities::default(),
            "serverInfo": ServerInfo::default(),
        }))
    }

    async fn call_tool(&self, request: &JsonRpcRequest) -> Result<Value, JsonRpcError> {
        let params: ToolCallParams = parse_params(request, "tool call")?;

        let started = Instant::now();
        let result = self
            .tools
            .call(&params.name, params.arguments, self.tool_timeout)
            .await
            .map_err(|e| match e {
                CallError::UnknownTool(_) => JsonRpcError::new(
                    Some(request.id.clone()),
                    JsonRpcErrorData::with_message(ErrorCode::MethodNotFound, e.to_string()),
                ),
                CallError::InvalidArguments { .. } => {
                    JsonRpcError::invalid_params(request.id.clone(), e.to_string())
                }
            })?;

        let usage = ToolUsage {
            tool: params.name,
            duration: started.elapsed(),
            is_error: result.is_error,
        };
        if let Err(e) = self.analytics.record(usage).await {
            warn!(error = %e, "Failed to record tool usage");
        }

        serde_json::to_value(&result).map_err(|e| {
            error!(error = %e, "Failed to serialise tool call result");
            JsonRpcError::internal_error(
                request.id.clone(),
                "Internal error: failed to serialise result",
            )
        })
    }

    async fn list_resources(&self, request: &JsonRpcRequest) -> Result<Value, JsonRpcError> {
        let resources = self
            .resources
            .list()
            .await
            .map_err(|e| resource_error(&request.id, "", e))?;
        Ok(json!({ "resources": resources }))
    }

    async fn read_resource(&self, request: &JsonRpcRequest) -> Result<Value, JsonRpcError> {
        let params: UriParams = parse_params(request, "resource read")?;
        let content = self
            .resources
            .read(&params.uri)
            .await
            .map_err(|e| resource_error(&request.id, &params.uri, e))?;
        Ok(json!({ "contents": [content] }))
    }

    fn subscribe(&self, session: &SessionId, request: &JsonRpcRequest) -> Result<Value, JsonRpcError> {
        let params: UriParams = parse_params(request, "subscribe")?;
        ResourceUri::parse(&params.uri)
            .map_err(|e| JsonRpcError::invalid_params(request.id.clone(), e.to_string()))?;

        self.sessions
            .subscribe(session, &params.uri)
            .map_err(|e| JsonRpcError::internal_error(request.id.clone(), e.to_string()))?;
        Ok(json!({}))
    }

    fn unsubscribe(
        &self,
        session: &SessionId,
        request: &JsonRpcRequest,
    ) -> Result<Value, JsonRpcError> {
        let params: UriParams = parse_params(request, "unsubscribe")?;
        self.sessions.unsubscribe(session, &params.uri);
        Ok(json!({}))
    }
}

fn parse_params<T: DeserializeOwned>(
    request: &JsonRpcRequest,
    what: &str,
) -> Result<T, JsonRpcError> {
    let params = request.params.clone().ok_or_else(|| {
        JsonRpcError::invalid_params(request.id.clone(), format!("Missing {what} params"))
    })?;
    serde_json::from_value(params).map_err(|e| {
        JsonRpcError::invalid_params(request.id.clone(), format!("Invalid {what} params: {e}"))
    })
}

fn resource_error(id: &RequestId, uri: &str, error: ResourceError) -> JsonRpcError {
    match error {
        ResourceError::InvalidUri(e) => JsonRpcError::invalid_params(id.clone(), e.to_string()),
        ResourceError::NotFound(_) => JsonRpcError::resource_not_found(id.clone(), uri),
        ResourceError::Service(ServiceError::Unavailable { service, reason }) => {
            JsonRpcError::new(
                Some(id.clone()),
                JsonRpcErrorData::with_message(
                    ErrorCode::ServerError(SERVICE_UNAVAILABLE),
                    format!("{service} unavailable: {reason}"),
                ),
            )
        }
        other => {
            error!(uri, error = %other, "Resource request failed");
            JsonRpcError::internal_error(id.clone(), other.to_string())
        }
    }
}

fn encode<T: Serialize>(id: Option<&RequestId>, message: &T) -> String {
    serde_json::to_string(message).unwrap_or_else(|e| {
        error!(error = %e, "Failed to serialise reply");
        let fallback = JsonRpcError::new(
            id.cloned(),
            JsonRpcErrorData::from_code(ErrorCode::InternalError),
        );
        serde_json::to_string(&fallback).unwrap_or_else(|_| INTERNAL_ERROR_FRAME.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::session::TransportKind;
    use crate::services::{InMemoryKnowledgeStore, NewDocument};

    fn router() -> (Router, SessionId) {
        let store = Arc::new(InMemoryKnowledgeStore::new());
        store.create_collection("ops", "Operations", None).unwrap();
        store
            .upsert_document("ops", NewDocument::text("ssl", "Docker SSL", "Use certbot"))
            .unwrap();
        let services = Services::in_memory(store, Duration::from_secs(5));
        let sessions = Arc::new(SessionManager::new());
        let (session, _rx) = sessions.open(TransportKind::Stream);
        let router = Router::new(&services, sessions, &LimitsConfig::default()).unwrap();
        (router, session)
    }

    async fn reply(router: &Router, session: &SessionId, frame: &str) -> Value {
        let reply = router.handle_frame(session, frame).await.unwrap();
        assert!(!reply.contains('\n'));
        serde_json::from_str(&reply).unwrap()
    }

    #[test]
    fn negotiate_supported_and_unknown_versions() {
        assert_eq!(negotiate_version("2024-11-05"), "2024-11-05");
        assert_eq!(negotiate_version("1999-01-01"), MCP_PROTOCOL_VERSION);
    }

    #[tokio::test]
    async fn parse_error_has_null_id() {
        let (router, session) = router();
        let value = reply(&router, &session, r#"{"method":}"#).await;
        assert_eq!(value["error"]["code"], -32700);
        assert!(value["id"].is_null());
    }

    #[tokio::test]
    async fn unknown_method() {
        let (router, session) = router();
        let value = reply(
            &router,
            &session,
            r#"{"jsonrpc":"2.0","id":3,"method":"prompts/list"}"#,
        )
        .await;
        assert_eq!(value["id"], 3);
        assert_eq!(value["error"]["code"], -32601);
    }

    #[tokio::test]
    async fn initialize_records_client() {
        let (router, session) = router();
        let value = reply(
            &router,
            &session,
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2025-03-26","capabilities":{},"clientInfo":{"name":"probe","version":"1.0"}}}"#,
        )
        .await;
        assert_eq!(value["result"]["protocolVersion"], "2025-03-26");
        assert_eq!(value["result"]["capabilities"]["resources"]["subscribe"], true);
        assert_eq!(value["result"]["serverInfo"]["name"], SERVER_NAME);

        let snapshot = router.sessions().snapshot(&session).unwrap();
        assert_eq!(snapshot.client.unwrap().name, "probe");
        assert!(!snapshot.initialized);

        let none = router
            .handle_frame(
                &session,
                r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            )
            .await;
        assert!(none.is_none());
        assert!(router.sessions().snapshot(&session).unwrap().initialized);
    }

    #[tokio::test]
    async fn initialize_without_params_is_invalid() {
        let (router, session) = router();
        let value = reply(
            &router,
            &session,
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize"}"#,
        )
        .await;
        assert_eq!(value["error"]["code"], -32602);
    }

    #[tokio::test]
    async fn client_responses_get_no_reply() {
        let (router, session) = router();
        let none = router
            .handle_frame(&session, r#"{"jsonrpc":"2.0","id":9,"result":{}}"#)
            .await;
        assert!(none.is_none());
    }

    #[tokio::test]
    async fn tool_call_records_usage() {
        let (router, session) = router();
        let value = reply(
            &router,
            &session,
            r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"get_knowledge_summary"}}"#,
        )
        .await;
        assert_eq!(value["result"]["isError"], false);

        let value = reply(
            &router,
            &session,
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"get_usage_analytics","arguments":{}}}"#,
        )
        .await;
        let text = value["result"]["content"][0]["text"].as_str().unwrap();
        let summary: Value = serde_json::from_str(text).unwrap();
        assert_eq!(summary["tools"][0]["name"], "get_knowledge_summary");
    }

    #[tokio::test]
    async fn subscribe_rejects_malformed_uri() {
        let (router, session) = router();
        let value = reply(
            &router,
            &session,
            r#"{"jsonrpc":"2.0","id":1,"method":"resources/subscribe","params":{"uri":"resource://knowledge/ops"}}"#,
        )
        .await;
        assert_eq!(value["error"]["code"], -32602);
        assert_eq!(router.sessions().subscribed_uri_count(), 0);
    }

    #[tokio::test]
    async fn unsubscribe_absent_is_ok() {
        let (router, session) = router();
        let value = reply(
            &router,
            &session,
            r#"{"jsonrpc":"2.0","id":1,"method":"resources/unsubscribe","params":{"uri":"resource://system/health"}}"#,
        )
        .await;
        assert_eq!(value["result"], json!({}));
    }
}
