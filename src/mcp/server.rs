//! MCP server lifecycle.
//!
//! 1. **Startup**: collaborators are built, tools registered once and the
//!    router created around a shared session manager
//! 2. **Operation**: one transport feeds frames to the router while a
//!    background task turns catalog changes into resource notifications
//! 3. **Shutdown**: SIGINT/SIGTERM (Ctrl+C on Windows) stop the transport

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{Config, KnowledgeConfig, TransportMode};
use crate::error::{ConfigError, TransportError};
use crate::mcp::resources::ResourceUri;
use crate::mcp::router::Router;
use crate::mcp::session::SessionManager;
use crate::mcp::tools::RegistryError;
use crate::mcp::transport::{HttpTransport, StdioTransport, Transport};
use crate::services::{CatalogChange, CatalogRepository, InMemoryKnowledgeStore, Services};

/// Builds the in-memory collaborators, loading the seed file if configured.
///
/// # Errors
///
/// Returns an error if the seed file cannot be read or parsed.
pub async fn in_memory_services(config: &KnowledgeConfig) -> Result<Services, ConfigError> {
    let store = match &config.seed_file {
        Some(path) => {
            let store = InMemoryKnowledgeStore::from_seed_file(path).await?;
            info!(path = %path.display(), "Knowledge store seeded");
            store
        }
        None => InMemoryKnowledgeStore::new(),
    };
    Ok(Services::in_memory(
        Arc::new(store),
        Duration::from_millis(config.slow_probe_threshold_ms),
    ))
}

/// Resources whose content changes when `change` happens, most specific first.
#[must_use]
pub fn affected_resources(change: &CatalogChange) -> Vec<ResourceUri> {
    let collection_id = change.collection_id();
    let mut uris = Vec::with_capacity(3);
    if let Some(document_id) = change.document_id() {
        uris.push(ResourceUri::document(collection_id, document_id));
    }
    uris.push(ResourceUri::documents(collection_id));
    uris.push(ResourceUri::Collections);
    uris
}

/// Forwards catalog changes to subscribed sessions.
///
/// Returns `None` if the catalog does not report changes.
pub fn watch_catalog_changes(
    catalog: &dyn CatalogRepository,
    sessions: Arc<SessionManager>,
) -> Option<JoinHandle<()>> {
    let mut changes = catalog.subscribe_changes()?;
    Some(tokio::spawn(async move {
        loop {
            match changes.recv().await {
                Ok(change) => {
                    for uri in affected_resources(&change) {
                        let reached = sessions.notify_resource_updated(&uri.to_string());
                        if reached > 0 {
                            debug!(%uri, sessions = reached, "Resource update pushed");
                        }
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Catalog change feed lagged, notifications lost");
                }
                Err(RecvError::Closed) => break,
            }
        }
    }))
}

/// Resolves on SIGINT or SIGTERM.
#[cfg(unix)]
pub async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let (Ok(mut sigint), Ok(mut sigterm)) = (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
    ) else {
        warn!("Could not install signal handlers, shutdown on EOF only");
        return std::future::pending().await;
    };

    tokio::select! {
        _ = sigint.recv() => info!("Received SIGINT, initiating graceful shutdown"),
        _ = sigterm.recv() => info!("Received SIGTERM, initiating graceful shutdown"),
    }
}

/// Resolves on Ctrl+C.
#[cfg(windows)]
pub async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Received Ctrl+C, initiating graceful shutdown");
    } else {
        warn!("Could not install Ctrl+C handler, shutdown on EOF only");
        std::future::pending::<()>().await;
    }
}

/// The knowledge MCP server.
pub struct McpServer {
    config: Config,
    services: Services,
    router: Arc<Router>,
}

impl McpServer {
    /// Wires the router around `services`.
    ///
    /// # Errors
    ///
    /// Returns an error if the tool set cannot be registered.
    pub fn new(config: Config, services: Services) -> Result<Self, RegistryError> {
        let sessions = Arc::new(SessionManager::new());
        let router = Arc::new(Router::new(&services, sessions, &config.limits)?);
        info!(tools = router.tools().len(), "Tools registered");
        Ok(Self {
            config,
            services,
            router,
        })
    }

    /// The shared router.
    #[must_use]
    pub const fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// Runs the configured transport until shutdown.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport fails.
    pub async fn run(self) -> Result<(), TransportError> {
        let watcher = watch_catalog_changes(
            self.services.catalog.as_ref(),
            Arc::clone(self.router.sessions()),
        );

        let transport: Box<dyn Transport> = match self.config.transport.mode {
            TransportMode::Stdio => Box::new(StdioTransport::stdio()),
            TransportMode::Http => Box::new(HttpTransport::new(self.config.transport.clone())),
        };
        info!(transport = ?transport.kind(), "Serving");

        let result = transport
            .serve(Arc::clone(&self.router), shutdown_signal().boxed())
            .await;

        if let Some(watcher) = watcher {
            watcher.abort();
        }
        result
    }
}
