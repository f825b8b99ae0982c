//! In-memory knowledge store.
//!
//! Implements [`SearchService`] and [`CatalogRepository`] over collections
//! held in process memory. Every mutation is published on a broadcast change
//! feed so subscribed MCP sessions can be told which resources changed.

use std::collections::HashSet;
use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::debug;

use super::{
    CatalogChange, CatalogRepository, CollectionInfo, Document, DocumentInfo, SearchHit,
    SearchService,
};
use crate::error::{ConfigError, ServiceError};

/// Buffered change events per subscriber before the slowest one lags.
const CHANGE_FEED_CAPACITY: usize = 256;

/// Characters of content returned in a search hit.
const SNIPPET_CHARS: usize = 500;

const DEFAULT_MIME_TYPE: &str = "text/plain";

/// A document to insert or replace.
#[derive(Debug, Clone, Deserialize)]
pub struct NewDocument {
    /// Identifier, unique within the collection.
    pub id: String,
    /// Display title.
    pub title: String,
    /// Full content.
    pub content: String,
    /// MIME type, `text/plain` when absent.
    #[serde(default)]
    pub mime_type: Option<String>,
}

impl NewDocument {
    /// A plain-text document.
    #[must_use]
    pub fn text(id: impl Into<String>, title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            content: content.into(),
            mime_type: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SeedFile {
    #[serde(default)]
    collections: Vec<SeedCollection>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SeedCollection {
    id: String,
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    documents: Vec<NewDocument>,
}

#[derive(Debug)]
struct StoredCollection {
    info: CollectionInfo,
    documents: IndexMap<String, Document>,
}

impl StoredCollection {
    fn refresh_totals(&mut self) {
        self.info.document_count = self.documents.len();
        self.info.total_bytes = self.documents.values().map(|d| d.info.size_bytes).sum();
        self.info.updated_at = Utc::now();
    }
}

/// Collections and documents held in memory.
pub struct InMemoryKnowledgeStore {
    collections: RwLock<IndexMap<String, StoredCollection>>,
    changes: broadcast::Sender<CatalogChange>,
}

impl InMemoryKnowledgeStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            collections: RwLock::new(IndexMap::new()),
            changes,
        }
    }

    /// Loads collections and documents from a JSON seed file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub async fn from_seed_file(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            tokio::fs::read_to_string(path)
                .await
                .map_err(|e| ConfigError::ReadError {
                    path: path.to_path_buf(),
                    source: e,
                })?;
        let seed: SeedFile =
            serde_json::from_str(&contents).map_err(|e| ConfigError::ParseError {
                path: path.to_path_buf(),
                source: e,
            })?;

        let store = Self::new();
        let invalid = |e: ServiceError| ConfigError::ValidationError {
            message: format!("seed file {}: {e}", path.display()),
        };
        for collection in seed.collections {
            store
                .create_collection(&collection.id, &collection.name, collection.description)
                .map_err(invalid)?;
            for document in collection.documents {
                store
                    .upsert_document(&collection.id, document)
                    .map_err(invalid)?;
            }
        }
        Ok(store)
    }

    /// Creates a collection. Returns `false` if it already existed.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::InvalidInput`] if the id cannot be used as a
    /// resource URI segment.
    pub fn create_collection(
        &self,
        id: &str,
        name: &str,
        description: Option<String>,
    ) -> Result<bool, ServiceError> {
        check_id("collection", id)?;
        let mut collections = self.collections.write();
        if collections.contains_key(id) {
            return Ok(false);
        }
        let now = Utc::now();
        collections.insert(
            id.to_string(),
            StoredCollection {
                info: CollectionInfo {
                    id: id.to_string(),
                    name: name.to_string(),
                    description,
                    document_count: 0,
                    total_bytes: 0,
                    created_at: now,
                    updated_at: now,
                },
                documents: IndexMap::new(),
            },
        );
        drop(collections);

        self.publish(CatalogChange::CollectionCreated {
            collection_id: id.to_string(),
        });
        Ok(true)
    }

    /// Removes a collection with all its documents.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::NotFound`] if the collection does not exist.
    pub fn remove_collection(&self, id: &str) -> Result<(), ServiceError> {
        self.collections
            .write()
            .shift_remove(id)
            .ok_or_else(|| ServiceError::collection_not_found(id))?;

        self.publish(CatalogChange::CollectionRemoved {
            collection_id: id.to_string(),
        });
        Ok(())
    }

    /// Inserts a document, replacing any document with the same id.
    ///
    /// # Errors
    ///
    /// Returns an error if the collection does not exist or the id is empty.
    pub fn upsert_document(
        &self,
        collection_id: &str,
        document: NewDocument,
    ) -> Result<DocumentInfo, ServiceError> {
        check_id("document", &document.id)?;

        let mut collections = self.collections.write();
        let collection = collections
            .get_mut(collection_id)
            .ok_or_else(|| ServiceError::collection_not_found(collection_id))?;

        let now = Utc::now();
        let created_at = collection
            .documents
            .get(&document.id)
            .map_or(now, |existing| existing.info.created_at);
        let info = DocumentInfo {
            id: document.id.clone(),
            title: document.title,
            mime_type: document
                .mime_type
                .unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string()),
            size_bytes: document.content.len() as u64,
            created_at,
            updated_at: now,
        };
        collection.documents.insert(
            document.id.clone(),
            Document {
                info: info.clone(),
                content: document.content,
            },
        );
        collection.refresh_totals();
        drop(collections);

        debug!(collection = collection_id, document = %info.id, "Document stored");
        self.publish(CatalogChange::DocumentUpserted {
            collection_id: collection_id.to_string(),
            document_id: info.id.clone(),
        });
        Ok(info)
    }

    /// Removes one document.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::NotFound`] if the collection or document does not exist.
    pub fn remove_document(&self, collection_id: &str, document_id: &str) -> Result<(), ServiceError> {
        let mut collections = self.collections.write();
        let collection = collections
            .get_mut(collection_id)
            .ok_or_else(|| ServiceError::collection_not_found(collection_id))?;
        collection
            .documents
            .shift_remove(document_id)
            .ok_or_else(|| ServiceError::document_not_found(document_id))?;
        collection.refresh_totals();
        drop(collections);

        self.publish(CatalogChange::DocumentRemoved {
            collection_id: collection_id.to_string(),
            document_id: document_id.to_string(),
        });
        Ok(())
    }

    fn publish(&self, change: CatalogChange) {
        // No receivers is fine: nobody is watching yet.
        let _ = self.changes.send(change);
    }
}

impl Default for InMemoryKnowledgeStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Ids become single `resource://` path segments.
fn check_id(kind: &str, id: &str) -> Result<(), ServiceError> {
    if id.trim().is_empty() || id.contains('/') {
        return Err(ServiceError::InvalidInput(format!("invalid {kind} id '{id}'")));
    }
    Ok(())
}

/// Lower-cased alphanumeric terms, deduplicated.
fn tokenize(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Fraction of query terms present in the document, rounded to two decimals.
#[allow(clippy::cast_precision_loss)] // term counts are small
fn relevance(query_terms: &HashSet<String>, document: &Document) -> f64 {
    if query_terms.is_empty() {
        return 0.0;
    }
    let mut haystack = tokenize(&document.content);
    haystack.extend(tokenize(&document.info.title));
    let matched = query_terms.iter().filter(|t| haystack.contains(*t)).count();
    let score = matched as f64 / query_terms.len() as f64;
    (score * 100.0).round() / 100.0
}

fn snippet(content: &str) -> String {
    match content.char_indices().nth(SNIPPET_CHARS) {
        Some((end, _)) => format!("{}…", &content[..end]),
        None => content.to_string(),
    }
}

#[async_trait]
impl SearchService for InMemoryKnowledgeStore {
    async fn search(
        &self,
        query: &str,
        collection_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SearchHit>, ServiceError> {
        let terms = tokenize(query);
        if terms.is_empty() {
            return Err(ServiceError::InvalidInput(
                "query must contain at least one word".to_string(),
            ));
        }

        let collections = self.collections.read();
        if let Some(id) = collection_id {
            if !collections.contains_key(id) {
                return Err(ServiceError::collection_not_found(id));
            }
        }

        let mut hits: Vec<SearchHit> = collections
            .values()
            .filter(|c| collection_id.map_or(true, |id| c.info.id == id))
            .flat_map(|c| {
                c.documents.values().filter_map(|doc| {
                    let score = relevance(&terms, doc);
                    (score > 0.0).then(|| SearchHit {
                        collection_id: c.info.id.clone(),
                        source_id: doc.info.id.clone(),
                        score,
                        text: snippet(&doc.content),
                    })
                })
            })
            .collect();
        drop(collections);

        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.collection_id.cmp(&b.collection_id))
                .then_with(|| a.source_id.cmp(&b.source_id))
        });
        hits.truncate(limit);
        Ok(hits)
    }
}

#[async_trait]
impl CatalogRepository for InMemoryKnowledgeStore {
    async fn list_collections(&self) -> Result<Vec<CollectionInfo>, ServiceError> {
        Ok(self
            .collections
            .read()
            .values()
            .map(|c| c.info.clone())
            .collect())
    }

    async fn list_documents(&self, collection_id: &str) -> Result<Vec<DocumentInfo>, ServiceError> {
        self.collections
            .read()
            .get(collection_id)
            .map(|c| c.documents.values().map(|d| d.info.clone()).collect())
            .ok_or_else(|| ServiceError::collection_not_found(collection_id))
    }

    async fn get_document(
        &self,
        collection_id: &str,
        document_id: &str,
    ) -> Result<Document, ServiceError> {
        let collections = self.collections.read();
        let collection = collections
            .get(collection_id)
            .ok_or_else(|| ServiceError::collection_not_found(collection_id))?;
        collection
            .documents
            .get(document_id)
            .cloned()
            .ok_or_else(|| ServiceError::document_not_found(document_id))
    }

    fn subscribe_changes(&self) -> Option<broadcast::Receiver<CatalogChange>> {
        Some(self.changes.subscribe())
    }
}
