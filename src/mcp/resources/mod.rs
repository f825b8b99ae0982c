//! Resource catalog and reads.
//!
//! Descriptors are never stored. Every `resources/list` call rebuilds the
//! catalog from the backing collaborators: the fixed static resources first,
//! then the document catalog of each collection followed by one descriptor
//! per document in it. Reads always go to the collaborator; nothing is cached
//! here.

pub mod uri;

use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tracing::debug;

pub use uri::{ResourceUri, UriError, DOCUMENT_CATALOG_TEMPLATE, DOCUMENT_TEMPLATE};

use crate::error::ServiceError;
use crate::services::{AnalyticsService, CatalogRepository, HealthService, Services, SystemHealth};

const JSON_MIME_TYPE: &str = "application/json";

/// A listed resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDescriptor {
    /// Resource URI.
    pub uri: String,
    /// Display name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// MIME type of the content returned by `resources/read`.
    pub mime_type: String,
}

/// A parameterised resource shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceTemplate {
    /// RFC 6570 style template.
    pub uri_template: String,
    /// Display name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// MIME type of materialised resources.
    pub mime_type: String,
}

/// Content returned by `resources/read`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceContent {
    /// URI that was read.
    pub uri: String,
    /// MIME type of `text`.
    pub mime_type: String,
    /// Inline text, or JSON serialised to text.
    pub text: String,
}

/// Failures of `resources/read` and `resources/list`.
#[derive(Error, Debug)]
pub enum ResourceError {
    /// The URI is outside the addressing grammar.
    #[error("invalid resource URI: {0}")]
    InvalidUri(#[from] UriError),

    /// The URI is well-formed but addresses nothing.
    #[error("resource not found: {0}")]
    NotFound(String),

    /// The backing collaborator failed.
    #[error("resource backend failed: {0}")]
    Service(ServiceError),

    /// Content could not be serialised.
    #[error("failed to serialise resource content")]
    Serialise(#[from] serde_json::Error),
}

/// Builds catalogs and reads content from the collaborators.
pub struct ResourceProvider {
    catalog: Arc<dyn CatalogRepository>,
    health: Arc<dyn HealthService>,
    analytics: Arc<dyn AnalyticsService>,
}

impl ResourceProvider {
    /// Creates a provider over the shared collaborators.
    #[must_use]
    pub fn new(services: &Services) -> Self {
        Self {
            catalog: Arc::clone(&services.catalog),
            health: Arc::clone(&services.health),
            analytics: Arc::clone(&services.analytics),
        }
    }

    /// Static resources, always listed first.
    #[must_use]
    pub fn static_resources() -> Vec<ResourceDescriptor> {
        vec![
            ResourceDescriptor {
                uri: ResourceUri::SystemHealth.to_string(),
                name: "System health".to_string(),
                description: "Current status, latency and error counts of every component"
                    .to_string(),
                mime_type: JSON_MIME_TYPE.to_string(),
            },
            ResourceDescriptor {
                uri: ResourceUri::SystemAnalytics.to_string(),
                name: "Usage analytics".to_string(),
                description: "Tool call counts, error counts and latencies".to_string(),
                mime_type: JSON_MIME_TYPE.to_string(),
            },
            ResourceDescriptor {
                uri: ResourceUri::Collections.to_string(),
                name: "Knowledge collections".to_string(),
                description: "All collections with document counts and timestamps".to_string(),
                mime_type: JSON_MIME_TYPE.to_string(),
            },
        ]
    }

    /// Templated resource shapes.
    #[must_use]
    pub fn templates() -> Vec<ResourceTemplate> {
        vec![
            ResourceTemplate {
                uri_template: DOCUMENT_CATALOG_TEMPLATE.to_string(),
                name: "Collection documents".to_string(),
                description: "Documents stored in one collection".to_string(),
                mime_type: JSON_MIME_TYPE.to_string(),
            },
            ResourceTemplate {
                uri_template: DOCUMENT_TEMPLATE.to_string(),
                name: "Document".to_string(),
                description: "Full content of one document".to_string(),
                mime_type: "text/plain".to_string(),
            },
        ]
    }

    /// Lists static resources plus one document catalog per collection and
    /// one descriptor per document.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError::Service`] if the catalog cannot be enumerated.
    pub async fn list(&self) -> Result<Vec<ResourceDescriptor>, ResourceError> {
        let mut resources = Self::static_resources();

        let collections = self
            .catalog
            .list_collections()
            .await
            .map_err(ResourceError::Service)?;

        for collection in collections {
            // A collection removed between the two calls is simply skipped.
            let documents = match self.catalog.list_documents(&collection.id).await {
                Ok(documents) => documents,
                Err(ServiceError::NotFound { .. }) => continue,
                Err(e) => return Err(ResourceError::Service(e)),
            };

            resources.push(ResourceDescriptor {
                uri: ResourceUri::documents(&collection.id).to_string(),
                name: format!("{} documents", collection.name),
                description: format!(
                    "{} documents in collection '{}'",
                    documents.len(),
                    collection.name
                ),
                mime_type: JSON_MIME_TYPE.to_string(),
            });

            resources.extend(documents.into_iter().map(|doc| ResourceDescriptor {
                uri: ResourceUri::document(&collection.id, &doc.id).to_string(),
                name: doc.title,
                description: format!("Document in collection '{}'", collection.name),
                mime_type: doc.mime_type,
            }));
        }

        debug!(count = resources.len(), "Resource catalog built");
        Ok(resources)
    }

    /// Reads one resource.
    ///
    /// # Errors
    ///
    /// - [`ResourceError::InvalidUri`] if the URI is outside the grammar
    /// - [`ResourceError::NotFound`] if the addressed entity does not exist
    /// - [`ResourceError::Service`] if the collaborator failed
    pub async fn read(&self, raw_uri: &str) -> Result<ResourceContent, ResourceError> {
        let uri = ResourceUri::parse(raw_uri)?;
        let not_found = |e: ServiceError| match e {
            ServiceError::NotFound { .. } => ResourceError::NotFound(raw_uri.to_string()),
            other => ResourceError::Service(other),
        };

        match uri {
            ResourceUri::Collections => {
                let collections = self.catalog.list_collections().await.map_err(not_found)?;
                json_content(
                    raw_uri,
                    &json!({ "total": collections.len(), "collections": collections }),
                )
            }
            ResourceUri::Documents { collection_id } => {
                let documents = self
                    .catalog
                    .list_documents(&collection_id)
                    .await
                    .map_err(not_found)?;
                json_content(
                    raw_uri,
                    &json!({
                        "collection_id": collection_id,
                        "total": documents.len(),
                        "documents": documents,
                    }),
                )
            }
            ResourceUri::Document {
                collection_id,
                document_id,
            } => {
                let document = self
                    .catalog
                    .get_document(&collection_id, &document_id)
                    .await
                    .map_err(not_found)?;
                Ok(ResourceContent {
                    uri: raw_uri.to_string(),
                    mime_type: document.info.mime_type,
                    text: document.content,
                })
            }
            ResourceUri::SystemHealth => {
                let snapshot = match self.health.check_all().await {
                    Ok(components) => SystemHealth::from_components(components),
                    Err(e) => {
                        tracing::warn!(error = %e, "Health service unreachable");
                        SystemHealth::unreachable(&e)
                    }
                };
                json_content(raw_uri, &snapshot)
            }
            ResourceUri::SystemAnalytics => {
                let summary = self
                    .analytics
                    .summary()
                    .await
                    .map_err(ResourceError::Service)?;
                json_content(raw_uri, &summary)
            }
        }
    }
}

fn json_content<T: Serialize>(uri: &str, value: &T) -> Result<ResourceContent, ResourceError> {
    Ok(ResourceContent {
        uri: uri.to_string(),
        mime_type: JSON_MIME_TYPE.to_string(),
        text: serde_json::to_string_pretty(value)?,
    })
}
