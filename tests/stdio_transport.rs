//! Stream transport tests over in-memory pipes.

use std::sync::Arc;
use std::time::Duration;

use futures::future::{self, FutureExt};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf};
use tokio::task::JoinHandle;
use tokio_test::assert_ok;

use knowledge_mcp::config::LimitsConfig;
use knowledge_mcp::error::{ServiceError, TransportError};
use knowledge_mcp::mcp::router::Router;
use knowledge_mcp::mcp::session::SessionManager;
use knowledge_mcp::mcp::tools::{ToolCallResult, ToolDescriptor, ToolRegistry};
use knowledge_mcp::mcp::transport::StdioTransport;
use knowledge_mcp::services::{InMemoryKnowledgeStore, Services};

struct Client {
    lines: BufReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
}

impl Client {
    async fn send(&mut self, frame: &str) {
        self.writer.write_all(frame.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
    }

    async fn recv(&mut self) -> Value {
        let mut line = String::new();
        tokio::time::timeout(Duration::from_secs(5), self.lines.read_line(&mut line))
            .await
            .expect("reply within five seconds")
            .unwrap();
        serde_json::from_str(line.trim_end()).unwrap()
    }
}

fn router() -> Arc<Router> {
    let store = Arc::new(InMemoryKnowledgeStore::new());
    store.create_collection("ops", "Operations", None).unwrap();
    let services = Services::in_memory(store, Duration::from_secs(1));
    let tools = ToolRegistry::builder()
        .tool(
            ToolDescriptor::new(
                "slow",
                "Sleeps for a while",
                json!({ "type": "object", "properties": {} }),
            ),
            |_: Value| async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok::<_, ServiceError>(ToolCallResult::text("done"))
            },
        )
        .build()
        .unwrap();
    Arc::new(Router::with_tools(
        tools,
        &services,
        Arc::new(SessionManager::new()),
        &LimitsConfig::default(),
    ))
}

fn start(
    router: &Arc<Router>,
    shutdown: future::BoxFuture<'static, ()>,
) -> (Client, JoinHandle<Result<(), TransportError>>) {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let (server_read, server_write) = tokio::io::split(server);
    let (client_read, client_write) = tokio::io::split(client);

    let transport = StdioTransport::new(server_read, server_write);
    let handle = tokio::spawn(transport.run(Arc::clone(router), shutdown));
    (
        Client {
            lines: BufReader::new(client_read),
            writer: client_write,
        },
        handle,
    )
}

#[tokio::test]
async fn replies_follow_completion_order() {
    let router = router();
    let (mut client, _server) = start(&router, future::pending().boxed());

    client
        .send(r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"slow"}}"#)
        .await;
    client.send(r#"{"jsonrpc":"2.0","id":2,"method":"ping"}"#).await;

    let first = client.recv().await;
    let second = client.recv().await;
    assert_eq!(first["id"], 2);
    assert_eq!(second["id"], 1);
    assert_eq!(second["result"]["content"][0]["text"], "done");
}

#[tokio::test]
async fn blank_lines_and_notifications_get_no_reply() {
    let router = router();
    let (mut client, _server) = start(&router, future::pending().boxed());

    client.send("").await;
    client
        .send(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
        .await;
    client.send(r#"{"jsonrpc":"2.0","id":"x","method":"ping"}"#).await;

    let reply = client.recv().await;
    assert_eq!(reply["id"], "x");
}

#[tokio::test]
async fn garbage_line_gets_parse_error() {
    let router = router();
    let (mut client, _server) = start(&router, future::pending().boxed());

    client.send("{not json").await;

    let reply = client.recv().await;
    assert_eq!(reply["error"]["code"], -32700);
    assert!(reply["id"].is_null());
}

#[tokio::test]
async fn eof_waits_for_in_flight_requests() {
    let router = router();
    let (mut client, server) = start(&router, future::pending().boxed());

    client
        .send(r#"{"jsonrpc":"2.0","id":7,"method":"tools/call","params":{"name":"slow"}}"#)
        .await;
    client.writer.shutdown().await.unwrap();

    let reply = client.recv().await;
    assert_eq!(reply["id"], 7);
    assert_ok!(server.await.unwrap());
    assert!(router.sessions().is_empty());
}

#[tokio::test]
async fn shutdown_stops_the_loop() {
    let router = router();
    let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
    let (_client, server) = start(
        &router,
        async move {
            let _ = stopped.await;
        }
        .boxed(),
    );

    stop.send(()).unwrap();
    let result = tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("transport stops after shutdown");
    assert_ok!(result.unwrap());
}

#[tokio::test]
async fn resource_updates_are_pushed_to_subscribers() {
    let router = router();
    let (mut client, _server) = start(&router, future::pending().boxed());

    client
        .send(r#"{"jsonrpc":"2.0","id":1,"method":"resources/subscribe","params":{"uri":"resource://knowledge/collections"}}"#)
        .await;
    assert_eq!(client.recv().await["result"], json!({}));

    let reached = router
        .sessions()
        .notify_resource_updated("resource://knowledge/collections");
    assert_eq!(reached, 1);

    let notification = client.recv().await;
    assert_eq!(notification["method"], "notifications/resources/updated");
    assert_eq!(
        notification["params"]["uri"],
        "resource://knowledge/collections"
    );
    assert!(notification.get("id").is_none());
}
