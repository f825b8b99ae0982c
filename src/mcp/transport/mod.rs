//! Transports that carry JSON-RPC frames between clients and the router.
//!
//! - [`stdio`]: one newline-delimited stream with a single implicit session
//! - [`http`]: many sessions over HTTP with server-sent event streams
//!
//! Transports only move frames. Every frame goes to
//! [`Router::handle_frame`](crate::mcp::router::Router::handle_frame) with the
//! id of the session it arrived on, and every outbound frame (replies on the
//! stream transport, notifications on both) is pushed through the
//! [`SessionManager`](crate::mcp::session::SessionManager).

pub mod http;
pub mod stdio;

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::error::TransportError;
use crate::mcp::router::Router;
use crate::mcp::session::TransportKind;

pub use http::HttpTransport;
pub use stdio::StdioTransport;

/// A transport feeding the shared router.
#[async_trait]
pub trait Transport: Send {
    /// Kind of the sessions this transport creates.
    fn kind(&self) -> TransportKind;

    /// Serves clients until `shutdown` resolves or the input ends.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport cannot start or its I/O fails.
    async fn serve(
        self: Box<Self>,
        router: Arc<Router>,
        shutdown: BoxFuture<'static, ()>,
    ) -> Result<(), TransportError>;
}
