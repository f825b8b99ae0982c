//! Model Context Protocol (MCP) server implementation.
//!
//! Exposes knowledge search, catalog views, component health and usage
//! analytics to AI assistants as MCP tools and resources, over stdio or
//! HTTP, using JSON-RPC 2.0 messages.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                            MCP Server                            │
//! │                                                                  │
//! │   ┌─────────────┐     ┌─────────────┐     ┌──────────────────┐   │
//! │   │  Transport  │────▶│   Router    │────▶│  Tool registry   │   │
//! │   │ stdio/HTTP  │◀────│ (dispatch)  │────▶│ Resource provider│   │
//! │   └─────────────┘     └─────────────┘     └──────────────────┘   │
//! │          ▲                   │                     │             │
//! │          │                   ▼                     ▼             │
//! │   ┌─────────────┐     ┌─────────────┐     ┌──────────────────┐   │
//! │   │  Sessions   │◀────│Subscriptions│◀────│  Collaborators   │   │
//! │   │ (outbound)  │     │             │     │ search/catalog/… │   │
//! │   └─────────────┘     └─────────────┘     └──────────────────┘   │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Protocol Version
//!
//! This implementation targets MCP protocol version 2025-06-18 and accepts
//! 2025-03-26 and 2024-11-05.

pub mod protocol;
pub mod resources;
pub mod router;
pub mod server;
pub mod session;
pub mod tools;
pub mod transport;

pub use protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, MCP_PROTOCOL_VERSION};
pub use router::Router;
pub use server::McpServer;
pub use session::{SessionId, SessionManager, TransportKind};
pub use tools::{ToolCallResult, ToolRegistry};
pub use transport::{HttpTransport, StdioTransport, Transport};
