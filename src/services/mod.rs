//! Contracts for the collaborators the MCP surface delegates to.
//!
//! Tool adapters and the resource provider only ever talk to these traits.
//! The in-memory implementations in [`memory`], [`health`] and [`analytics`]
//! back the binary and the test-suite; a deployment can swap any of them for
//! a networked implementation without touching the protocol layer.

pub mod analytics;
pub mod health;
pub mod memory;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::ServiceError;

pub use analytics::InMemoryAnalytics;
pub use health::{CatalogProbe, HealthProbe, ProbeHealthService, SearchProbe};
pub use memory::{InMemoryKnowledgeStore, NewDocument};

/// One ranked search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    /// Collection the source document belongs to.
    pub collection_id: String,
    /// Identifier of the matching document.
    pub source_id: String,
    /// Relevance in `[0, 1]`, higher is better.
    pub score: f64,
    /// Matching text.
    pub text: String,
}

/// Lightweight collection record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionInfo {
    /// Stable identifier, used in resource URIs.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Optional description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Number of documents currently stored.
    pub document_count: usize,
    /// Sum of document sizes.
    pub total_bytes: u64,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Time of the last mutation.
    pub updated_at: DateTime<Utc>,
}

/// Lightweight document record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentInfo {
    /// Identifier, unique within its collection.
    pub id: String,
    /// Display title.
    pub title: String,
    /// MIME type of the document content.
    pub mime_type: String,
    /// Content size in bytes.
    pub size_bytes: u64,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Time of the last update.
    pub updated_at: DateTime<Utc>,
}

/// A full document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// Metadata.
    #[serde(flatten)]
    pub info: DocumentInfo,
    /// Full content.
    pub content: String,
}

/// A mutation reported by the catalog's change feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogChange {
    /// A collection was created.
    CollectionCreated {
        /// Affected collection.
        collection_id: String,
    },
    /// A collection and all its documents were removed.
    CollectionRemoved {
        /// Affected collection.
        collection_id: String,
    },
    /// A document was inserted or replaced.
    DocumentUpserted {
        /// Owning collection.
        collection_id: String,
        /// Affected document.
        document_id: String,
    },
    /// A document was removed.
    DocumentRemoved {
        /// Owning collection.
        collection_id: String,
        /// Affected document.
        document_id: String,
    },
}

impl CatalogChange {
    /// The collection touched by this change.
    #[must_use]
    pub fn collection_id(&self) -> &str {
        match self {
            Self::CollectionCreated { collection_id }
            | Self::CollectionRemoved { collection_id }
            | Self::DocumentUpserted { collection_id, .. }
            | Self::DocumentRemoved { collection_id, .. } => collection_id,
        }
    }

    /// The document touched by this change, if any.
    #[must_use]
    pub fn document_id(&self) -> Option<&str> {
        match self {
            Self::DocumentUpserted { document_id, .. }
            | Self::DocumentRemoved { document_id, .. } => Some(document_id),
            Self::CollectionCreated { .. } | Self::CollectionRemoved { .. } => None,
        }
    }
}

/// Component health states, ordered from best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Working normally.
    Healthy,
    /// Working, but slow or partially failing.
    Degraded,
    /// Failing.
    Critical,
    /// Unreachable.
    Offline,
}

/// Health report for one component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentHealth {
    /// Component name.
    pub name: String,
    /// Current status.
    pub status: HealthStatus,
    /// Probe latency, if the probe completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    /// Failed probes since startup.
    pub error_count: u64,
    /// Detail from the probe.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// When the probe ran.
    pub checked_at: DateTime<Utc>,
}

/// Aggregated health snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemHealth {
    /// Worst component status; `critical` when the health service is unreachable.
    pub status: HealthStatus,
    /// Per-component reports.
    pub components: Vec<ComponentHealth>,
    /// When the snapshot was taken.
    pub checked_at: DateTime<Utc>,
    /// Set when the snapshot could not be collected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl SystemHealth {
    /// Builds a snapshot whose status is the worst component status.
    #[must_use]
    pub fn from_components(components: Vec<ComponentHealth>) -> Self {
        let status = components
            .iter()
            .map(|c| c.status)
            .max()
            .unwrap_or(HealthStatus::Healthy);
        Self {
            status,
            components,
            checked_at: Utc::now(),
            message: None,
        }
    }

    /// Snapshot reported when the health collaborator itself failed.
    #[must_use]
    pub fn unreachable(error: &ServiceError) -> Self {
        Self {
            status: HealthStatus::Critical,
            components: Vec::new(),
            checked_at: Utc::now(),
            message: Some(format!("health service unreachable: {error}")),
        }
    }
}

/// One tool invocation, as recorded for analytics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolUsage {
    /// Tool name.
    pub tool: String,
    /// Wall-clock time spent.
    pub duration: Duration,
    /// Whether the call produced a business-level error.
    pub is_error: bool,
}

/// Usage aggregated per tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolStats {
    /// Tool name.
    pub name: String,
    /// Number of calls.
    pub calls: u64,
    /// Number of calls that returned an error result.
    pub errors: u64,
    /// Mean call latency.
    pub avg_latency_ms: f64,
    /// Time of the most recent call.
    pub last_called_at: Option<DateTime<Utc>>,
}

/// Usage summary across all tools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageSummary {
    /// Calls across all tools.
    pub total_calls: u64,
    /// Error results across all tools.
    pub total_errors: u64,
    /// Per-tool breakdown, sorted by name.
    pub tools: Vec<ToolStats>,
}

/// Ranked text search over stored documents.
#[async_trait]
pub trait SearchService: Send + Sync {
    /// Returns at most `limit` hits, best first, optionally restricted to one collection.
    async fn search(
        &self,
        query: &str,
        collection_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SearchHit>, ServiceError>;
}

/// Collection and document metadata.
#[async_trait]
pub trait CatalogRepository: Send + Sync {
    /// All collections.
    async fn list_collections(&self) -> Result<Vec<CollectionInfo>, ServiceError>;

    /// Documents of one collection.
    async fn list_documents(&self, collection_id: &str) -> Result<Vec<DocumentInfo>, ServiceError>;

    /// One document with its full content.
    async fn get_document(
        &self,
        collection_id: &str,
        document_id: &str,
    ) -> Result<Document, ServiceError>;

    /// Change feed, if the repository can report mutations.
    fn subscribe_changes(&self) -> Option<broadcast::Receiver<CatalogChange>> {
        None
    }
}

/// Component health checks.
#[async_trait]
pub trait HealthService: Send + Sync {
    /// Checks every known component.
    async fn check_all(&self) -> Result<Vec<ComponentHealth>, ServiceError>;

    /// Checks one component by name.
    async fn check_component(&self, name: &str) -> Result<ComponentHealth, ServiceError>;
}

/// Tool usage aggregation.
#[async_trait]
pub trait AnalyticsService: Send + Sync {
    /// Records one tool call.
    async fn record(&self, usage: ToolUsage) -> Result<(), ServiceError>;

    /// Current aggregate.
    async fn summary(&self) -> Result<UsageSummary, ServiceError>;
}

/// The collaborator handles shared by tool adapters and the resource provider.
#[derive(Clone)]
pub struct Services {
    /// Search backend.
    pub search: Arc<dyn SearchService>,
    /// Catalog backend.
    pub catalog: Arc<dyn CatalogRepository>,
    /// Health backend.
    pub health: Arc<dyn HealthService>,
    /// Analytics backend.
    pub analytics: Arc<dyn AnalyticsService>,
}

impl Services {
    /// Wires the in-memory store, a probing health service and in-memory analytics.
    #[must_use]
    pub fn in_memory(store: Arc<InMemoryKnowledgeStore>, slow_probe_threshold: Duration) -> Self {
        let search: Arc<dyn SearchService> = store.clone();
        let catalog: Arc<dyn CatalogRepository> = store;
        let probes: Vec<Arc<dyn HealthProbe>> = vec![
            Arc::new(CatalogProbe::new(Arc::clone(&catalog))),
            Arc::new(SearchProbe::new(Arc::clone(&search))),
        ];
        Self {
            search,
            catalog,
            health: Arc::new(ProbeHealthService::new(probes, slow_probe_threshold)),
            analytics: Arc::new(InMemoryAnalytics::new()),
        }
    }
}
