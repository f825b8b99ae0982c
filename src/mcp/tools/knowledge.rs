//! Knowledge tools: search, comparison and catalog-wide views.
//!
//! Each adapter delegates to a collaborator and formats the result as JSON.
//! None of them know anything about JSON-RPC.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{empty_schema, NoArguments, ToolCallResult, ToolDescriptor, ToolRegistryBuilder};
use crate::error::ServiceError;
use crate::services::{
    CatalogRepository, CollectionInfo, DocumentInfo, SearchHit, SearchService, Services,
};

/// Default number of hits returned by the search tools.
pub const DEFAULT_SEARCH_LIMIT: usize = 5;

/// Upper bound for the `limit` argument.
pub const MAX_SEARCH_LIMIT: usize = 50;

/// Collections not updated for this many days are reported as stale.
pub const STALE_AFTER_DAYS: i64 = 90;

/// Documents larger than this are reported by the storage optimisation view.
pub const LARGE_DOCUMENT_BYTES: u64 = 1024 * 1024;

const fn default_limit() -> usize {
    DEFAULT_SEARCH_LIMIT
}

#[derive(Debug, Deserialize)]
struct SearchCollectionArgs {
    collection_id: String,
    query: String,
    #[serde(default = "default_limit")]
    limit: usize,
}

#[derive(Debug, Deserialize)]
struct SearchAllArgs {
    query: String,
    #[serde(default = "default_limit")]
    limit: usize,
    #[serde(default)]
    min_score: f64,
}

#[derive(Debug, Deserialize)]
struct CompareArgs {
    collection_a: String,
    collection_b: String,
    #[serde(default)]
    query: Option<String>,
}

fn limit_schema() -> Value {
    json!({
        "type": "integer",
        "description": "Maximum number of results",
        "minimum": 1,
        "maximum": MAX_SEARCH_LIMIT,
        "default": DEFAULT_SEARCH_LIMIT
    })
}

/// Registers the knowledge tools.
#[must_use]
pub fn register(builder: ToolRegistryBuilder, services: &Services) -> ToolRegistryBuilder {
    let search = Arc::clone(&services.search);
    let search_all = Arc::clone(&services.search);
    let compare_search = Arc::clone(&services.search);
    let compare_catalog = Arc::clone(&services.catalog);
    let summary_catalog = Arc::clone(&services.catalog);
    let health_catalog = Arc::clone(&services.catalog);
    let storage_catalog = Arc::clone(&services.catalog);

    builder
        .tool(
            ToolDescriptor::new(
                "search_knowledge",
                "Search documents within one knowledge collection, best matches first",
                json!({
                    "type": "object",
                    "properties": {
                        "collection_id": {
                            "type": "string",
                            "description": "Collection to search",
                            "minLength": 1
                        },
                        "query": {
                            "type": "string",
                            "description": "Search terms",
                            "minLength": 1
                        },
                        "limit": limit_schema()
                    },
                    "required": ["collection_id", "query"]
                }),
            ),
            move |args: SearchCollectionArgs| {
                let search = Arc::clone(&search);
                async move { search_collection(search.as_ref(), args).await }
            },
        )
        .tool(
            ToolDescriptor::new(
                "search_all_knowledge",
                "Search every knowledge collection, dropping hits below a relevance threshold",
                json!({
                    "type": "object",
                    "properties": {
                        "query": {
                            "type": "string",
                            "description": "Search terms",
                            "minLength": 1
                        },
                        "limit": limit_schema(),
                        "min_score": {
                            "type": "number",
                            "description": "Minimum relevance score between 0 and 1",
                            "minimum": 0,
                            "maximum": 1,
                            "default": 0
                        }
                    },
                    "required": ["query"]
                }),
            ),
            move |args: SearchAllArgs| {
                let search = Arc::clone(&search_all);
                async move { search_everywhere(search.as_ref(), args).await }
            },
        )
        .tool(
            ToolDescriptor::new(
                "compare_collections",
                "Compare two collections by size, freshness and shared titles, optionally \
                 scoring both against a query",
                json!({
                    "type": "object",
                    "properties": {
                        "collection_a": { "type": "string", "minLength": 1 },
                        "collection_b": { "type": "string", "minLength": 1 },
                        "query": {
                            "type": "string",
                            "description": "Optional query to compare relevance",
                            "minLength": 1
                        }
                    },
                    "required": ["collection_a", "collection_b"]
                }),
            ),
            move |args: CompareArgs| {
                let catalog = Arc::clone(&compare_catalog);
                let search = Arc::clone(&compare_search);
                async move { compare(catalog.as_ref(), search.as_ref(), args).await }
            },
        )
        .tool(
            ToolDescriptor::new(
                "get_knowledge_summary",
                "Totals across all collections: collections, documents and stored bytes",
                empty_schema(),
            ),
            move |_: NoArguments| {
                let catalog = Arc::clone(&summary_catalog);
                async move { summary(catalog.as_ref()).await }
            },
        )
        .tool(
            ToolDescriptor::new(
                "get_collection_health",
                "Per-collection findings: empty collections, stale collections and empty documents",
                empty_schema(),
            ),
            move |_: NoArguments| {
                let catalog = Arc::clone(&health_catalog);
                async move { collection_health(catalog.as_ref(), Utc::now()).await }
            },
        )
        .tool(
            ToolDescriptor::new(
                "get_storage_optimization",
                "Storage clean-up suggestions: empty collections, duplicate titles and \
                 oversized documents",
                empty_schema(),
            ),
            move |_: NoArguments| {
                let catalog = Arc::clone(&storage_catalog);
                async move { storage_optimization(catalog.as_ref()).await }
            },
        )
}

async fn search_collection(
    search: &dyn SearchService,
    args: SearchCollectionArgs,
) -> Result<ToolCallResult, ServiceError> {
    let hits = search
        .search(&args.query, Some(&args.collection_id), args.limit)
        .await?;

    let results: Vec<Value> = hits
        .iter()
        .map(|h| json!({ "source_id": h.source_id, "score": h.score, "text": h.text }))
        .collect();

    Ok(ToolCallResult::json(&json!({
        "collection_id": args.collection_id,
        "query": args.query,
        "total": results.len(),
        "results": results,
    })))
}

async fn search_everywhere(
    search: &dyn SearchService,
    args: SearchAllArgs,
) -> Result<ToolCallResult, ServiceError> {
    let hits = search.search(&args.query, None, args.limit).await?;
    let found = hits.len();
    let hits: Vec<_> = hits
        .into_iter()
        .filter(|h| h.score >= args.min_score)
        .collect();

    let mut collections: BTreeSet<&str> = BTreeSet::new();
    for hit in &hits {
        collections.insert(&hit.collection_id);
    }

    Ok(ToolCallResult::json(&json!({
        "query": args.query,
        "min_score": args.min_score,
        "total": hits.len(),
        "filtered_out": found - hits.len(),
        "collections": collections,
        "results": hits,
    })))
}

async fn find_collection(
    catalog: &dyn CatalogRepository,
    id: &str,
) -> Result<CollectionInfo, ServiceError> {
    catalog
        .list_collections()
        .await?
        .into_iter()
        .find(|c| c.id == id)
        .ok_or_else(|| ServiceError::collection_not_found(id))
}

fn titles(documents: &[DocumentInfo]) -> BTreeSet<String> {
    documents.iter().map(|d| d.title.to_lowercase()).collect()
}

async fn compare(
    catalog: &dyn CatalogRepository,
    search: &dyn SearchService,
    args: CompareArgs,
) -> Result<ToolCallResult, ServiceError> {
    let a = find_collection(catalog, &args.collection_a).await?;
    let b = find_collection(catalog, &args.collection_b).await?;

    let titles_a = titles(&catalog.list_documents(&a.id).await?);
    let titles_b = titles(&catalog.list_documents(&b.id).await?);
    let shared: Vec<&String> = titles_a.intersection(&titles_b).collect();
    let fresher = if a.updated_at >= b.updated_at { &a.id } else { &b.id };

    let mut result = json!({
        "collection_a": collection_record(&a),
        "collection_b": collection_record(&b),
        "differences": {
            "document_count": signed_difference(a.document_count as u64, b.document_count as u64),
            "total_bytes": signed_difference(a.total_bytes, b.total_bytes),
            "more_recently_updated": fresher,
        },
        "shared_titles": shared,
    });

    if let Some(query) = args.query {
        let hits_a = search.search(&query, Some(&a.id), DEFAULT_SEARCH_LIMIT).await?;
        let hits_b = search.search(&query, Some(&b.id), DEFAULT_SEARCH_LIMIT).await?;
        let best = |hits: &[SearchHit]| hits.first().map(|h| h.score);
        result["query"] = json!({
            "text": query,
            "collection_a": { "matches": hits_a.len(), "best_score": best(&hits_a) },
            "collection_b": { "matches": hits_b.len(), "best_score": best(&hits_b) },
        });
    }

    Ok(ToolCallResult::json(&result))
}

fn collection_record(c: &CollectionInfo) -> Value {
    json!({
        "id": c.id,
        "name": c.name,
        "document_count": c.document_count,
        "total_bytes": c.total_bytes,
        "updated_at": c.updated_at,
    })
}

#[allow(clippy::cast_possible_wrap)] // sizes are far below i64::MAX
const fn signed_difference(a: u64, b: u64) -> i64 {
    a as i64 - b as i64
}

async fn summary(catalog: &dyn CatalogRepository) -> Result<ToolCallResult, ServiceError> {
    let collections = catalog.list_collections().await?;

    let total_documents: usize = collections.iter().map(|c| c.document_count).sum();
    let total_bytes: u64 = collections.iter().map(|c| c.total_bytes).sum();
    let largest = collections
        .iter()
        .max_by_key(|c| c.document_count)
        .map(|c| c.id.as_str());
    let last_updated = collections.iter().map(|c| c.updated_at).max();

    Ok(ToolCallResult::json(&json!({
        "total_collections": collections.len(),
        "total_documents": total_documents,
        "total_bytes": total_bytes,
        "largest_collection": largest,
        "last_updated": last_updated,
        "collections": collections.iter().map(collection_record).collect::<Vec<_>>(),
    })))
}

async fn collection_health(
    catalog: &dyn CatalogRepository,
    now: DateTime<Utc>,
) -> Result<ToolCallResult, ServiceError> {
    let collections = catalog.list_collections().await?;
    let stale_before = now - chrono::Duration::days(STALE_AFTER_DAYS);

    let mut reports = Vec::with_capacity(collections.len());
    let mut healthy = 0usize;

    for collection in &collections {
        let documents = match catalog.list_documents(&collection.id).await {
            Ok(documents) => documents,
            Err(ServiceError::NotFound { .. }) => continue,
            Err(e) => return Err(e),
        };

        let mut issues = Vec::new();
        if documents.is_empty() {
            issues.push("collection has no documents".to_string());
        }
        if collection.updated_at < stale_before {
            issues.push(format!(
                "not updated for more than {STALE_AFTER_DAYS} days"
            ));
        }
        let empty: Vec<&str> = documents
            .iter()
            .filter(|d| d.size_bytes == 0)
            .map(|d| d.id.as_str())
            .collect();
        if !empty.is_empty() {
            issues.push(format!("{} empty document(s): {}", empty.len(), empty.join(", ")));
        }

        let status = if issues.is_empty() {
            healthy += 1;
            "healthy"
        } else {
            "needs_attention"
        };
        reports.push(json!({
            "id": collection.id,
            "name": collection.name,
            "status": status,
            "document_count": documents.len(),
            "updated_at": collection.updated_at,
            "issues": issues,
        }));
    }

    Ok(ToolCallResult::json(&json!({
        "total_collections": reports.len(),
        "healthy_collections": healthy,
        "collections_needing_attention": reports.len() - healthy,
        "collections": reports,
    })))
}

async fn storage_optimization(
    catalog: &dyn CatalogRepository,
) -> Result<ToolCallResult, ServiceError> {
    let collections = catalog.list_collections().await?;

    let mut empty_collections = Vec::new();
    let mut duplicates = Vec::new();
    let mut large_documents = Vec::new();
    let mut savings: u64 = 0;

    for collection in &collections {
        let documents = match catalog.list_documents(&collection.id).await {
            Ok(documents) => documents,
            Err(ServiceError::NotFound { .. }) => continue,
            Err(e) => return Err(e),
        };
        if documents.is_empty() {
            empty_collections.push(collection.id.clone());
            continue;
        }

        let mut by_title: BTreeMap<String, Vec<&DocumentInfo>> = BTreeMap::new();
        for doc in &documents {
            by_title.entry(doc.title.to_lowercase()).or_default().push(doc);
        }
        for (title, docs) in by_title.into_iter().filter(|(_, docs)| docs.len() > 1) {
            // Every copy beyond the largest could go.
            let largest = docs.iter().map(|d| d.size_bytes).max().unwrap_or(0);
            let total: u64 = docs.iter().map(|d| d.size_bytes).sum();
            savings += total - largest;
            duplicates.push(json!({
                "collection_id": collection.id,
                "title": title,
                "document_ids": docs.iter().map(|d| d.id.as_str()).collect::<Vec<_>>(),
            }));
        }

        large_documents.extend(
            documents
                .iter()
                .filter(|d| d.size_bytes > LARGE_DOCUMENT_BYTES)
                .map(|d| {
                    json!({
                        "collection_id": collection.id,
                        "document_id": d.id,
                        "size_bytes": d.size_bytes,
                    })
                }),
        );
    }

    let mut recommendations = Vec::new();
    if !empty_collections.is_empty() {
        recommendations.push(format!(
            "Remove {} empty collection(s)",
            empty_collections.len()
        ));
    }
    if !duplicates.is_empty() {
        recommendations.push(format!(
            "Merge {} set(s) of documents with duplicate titles",
            duplicates.len()
        ));
    }
    if !large_documents.is_empty() {
        recommendations.push(format!(
            "Split {} document(s) larger than {LARGE_DOCUMENT_BYTES} bytes",
            large_documents.len()
        ));
    }

    let total_bytes: u64 = collections.iter().map(|c| c.total_bytes).sum();

    Ok(ToolCallResult::json(&json!({
        "total_bytes": total_bytes,
        "potential_savings_bytes": savings,
        "empty_collections": empty_collections,
        "duplicate_titles": duplicates,
        "large_documents": large_documents,
        "recommendations": recommendations,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::mcp::tools::ToolRegistry;
    use crate::services::{InMemoryKnowledgeStore, NewDocument};

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn registry() -> ToolRegistry {
        let store = Arc::new(InMemoryKnowledgeStore::new());
        store.create_collection("ops", "Operations", None).unwrap();
        store.create_collection("dev", "Development", None).unwrap();
        store.create_collection("empty", "Empty", None).unwrap();
        store
            .upsert_document(
                "ops",
                NewDocument::text("ssl", "Docker SSL", "Configure SSL certificates for Docker"),
            )
            .unwrap();
        store
            .upsert_document("ops", NewDocument::text("ssl-2", "docker ssl", "Old notes on SSL"))
            .unwrap();
        store
            .upsert_document("dev", NewDocument::text("rust", "Docker SSL", "Rust in Docker"))
            .unwrap();
        store
            .upsert_document("dev", NewDocument::text("blank", "Blank", ""))
            .unwrap();
        let services = Services::in_memory(store, Duration::from_secs(5));
        ToolRegistry::with_services(&services).unwrap()
    }

    async fn call_json(name: &str, args: Value) -> Value {
        let result = registry().call(name, args, TIMEOUT).await.unwrap();
        assert!(!result.is_error, "{result:?}");
        serde_json::from_str(result.first_text().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn search_knowledge_scopes_to_collection() {
        let value = call_json(
            "search_knowledge",
            json!({ "collection_id": "dev", "query": "docker" }),
        )
        .await;
        assert_eq!(value["total"], 1);
        assert_eq!(value["results"][0]["source_id"], "rust");
    }

    #[tokio::test]
    async fn search_knowledge_unknown_collection_is_business_error() {
        let result = registry()
            .call(
                "search_knowledge",
                json!({ "collection_id": "nope", "query": "docker" }),
                TIMEOUT,
            )
            .await
            .unwrap();
        assert!(result.is_error);
        assert!(result.first_text().unwrap().contains("collection not found"));
    }

    #[tokio::test]
    async fn search_all_applies_min_score() {
        let value = call_json(
            "search_all_knowledge",
            json!({ "query": "docker certificates", "min_score": 0.9 }),
        )
        .await;
        assert_eq!(value["total"], 1);
        assert_eq!(value["results"][0]["source_id"], "ssl");
        assert_eq!(value["results"][0]["score"], 1.0);
    }

    #[tokio::test]
    async fn compare_reports_shared_titles_and_query() {
        let value = call_json(
            "compare_collections",
            json!({ "collection_a": "ops", "collection_b": "dev", "query": "docker" }),
        )
        .await;
        assert_eq!(value["shared_titles"], json!(["docker ssl"]));
        assert_eq!(value["differences"]["document_count"], 0);
        assert_eq!(value["query"]["collection_a"]["matches"], 2);
        assert_eq!(value["query"]["collection_b"]["matches"], 1);
    }

    #[tokio::test]
    async fn summary_totals() {
        let value = call_json("get_knowledge_summary", json!({})).await;
        assert_eq!(value["total_collections"], 3);
        assert_eq!(value["total_documents"], 4);
    }

    #[tokio::test]
    async fn collection_health_flags_empty_collections_and_documents() {
        let value = call_json("get_collection_health", json!({})).await;
        assert_eq!(value["healthy_collections"], 1);
        let collections = value["collections"].as_array().unwrap();
        let empty = collections.iter().find(|c| c["id"] == "empty").unwrap();
        assert_eq!(empty["status"], "needs_attention");
        let dev = collections.iter().find(|c| c["id"] == "dev").unwrap();
        assert!(dev["issues"][0].as_str().unwrap().contains("blank"));
    }

    #[tokio::test]
    async fn storage_optimization_finds_duplicates() {
        let value = call_json("get_storage_optimization", json!({})).await;
        assert_eq!(value["empty_collections"], json!(["empty"]));
        assert_eq!(value["duplicate_titles"][0]["collection_id"], "ops");
        assert!(value["potential_savings_bytes"].as_u64().unwrap() > 0);
        assert_eq!(value["recommendations"].as_array().unwrap().len(), 2);
    }
}
