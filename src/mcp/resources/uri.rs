//! The `resource://` addressing scheme.
//!
//! ```text
//! resource://knowledge/collections                        collection catalog
//! resource://knowledge/{collection_id}/documents          document catalog
//! resource://knowledge/{collection_id}/document/{doc_id}  one document
//! resource://system/health                                health snapshot
//! resource://system/analytics                             usage summary
//! ```
//!
//! Classification is by namespace, segment count and fixed keywords. Any
//! other shape is rejected.

use std::fmt;

use thiserror::Error;

/// Scheme prefix shared by every resource URI.
pub const SCHEME: &str = "resource://";

/// Template for per-collection document catalogs.
pub const DOCUMENT_CATALOG_TEMPLATE: &str = "resource://knowledge/{collection_id}/documents";

/// Template for single documents.
pub const DOCUMENT_TEMPLATE: &str = "resource://knowledge/{collection_id}/document/{document_id}";

/// Why a URI could not be classified.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UriError {
    /// The URI does not start with `resource://`.
    #[error("unsupported scheme in '{0}', expected resource://")]
    Scheme(String),

    /// The URI has an empty path segment.
    #[error("empty path segment in '{0}'")]
    EmptySegment(String),

    /// The namespace is not one of `knowledge` or `system`.
    #[error("unknown namespace '{namespace}' in '{uri}'")]
    UnknownNamespace {
        /// Offending namespace.
        namespace: String,
        /// Full URI.
        uri: String,
    },

    /// Valid namespace but no resource of that shape.
    #[error("unknown resource path '{0}'")]
    UnknownShape(String),
}

/// A classified resource URI.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceUri {
    /// All collections.
    Collections,
    /// Documents of one collection.
    Documents {
        /// Collection identifier.
        collection_id: String,
    },
    /// One document.
    Document {
        /// Collection identifier.
        collection_id: String,
        /// Document identifier.
        document_id: String,
    },
    /// Health snapshot.
    SystemHealth,
    /// Usage summary.
    SystemAnalytics,
}

impl ResourceUri {
    /// Parses and classifies a URI.
    ///
    /// # Errors
    ///
    /// Returns a [`UriError`] for anything outside the grammar.
    pub fn parse(uri: &str) -> Result<Self, UriError> {
        let path = uri
            .strip_prefix(SCHEME)
            .ok_or_else(|| UriError::Scheme(uri.to_string()))?;

        let segments: Vec<&str> = path.split('/').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(UriError::EmptySegment(uri.to_string()));
        }

        match segments.as_slice() {
            ["knowledge", "collections"] => Ok(Self::Collections),
            ["knowledge", collection, "documents"] => Ok(Self::Documents {
                collection_id: (*collection).to_string(),
            }),
            ["knowledge", collection, "document", document] => Ok(Self::Document {
                collection_id: (*collection).to_string(),
                document_id: (*document).to_string(),
            }),
            ["system", "health"] => Ok(Self::SystemHealth),
            ["system", "analytics"] => Ok(Self::SystemAnalytics),
            ["knowledge" | "system", ..] => Err(UriError::UnknownShape(uri.to_string())),
            [namespace, ..] => Err(UriError::UnknownNamespace {
                namespace: (*namespace).to_string(),
                uri: uri.to_string(),
            }),
            [] => Err(UriError::UnknownShape(uri.to_string())),
        }
    }

    /// Document catalog URI for a collection.
    #[must_use]
    pub fn documents(collection_id: &str) -> Self {
        Self::Documents {
            collection_id: collection_id.to_string(),
        }
    }

    /// URI of one document.
    #[must_use]
    pub fn document(collection_id: &str, document_id: &str) -> Self {
        Self::Document {
            collection_id: collection_id.to_string(),
            document_id: document_id.to_string(),
        }
    }
}

impl fmt::Display for ResourceUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Collections => write!(f, "{SCHEME}knowledge/collections"),
            Self::Documents { collection_id } => {
                write!(f, "{SCHEME}knowledge/{collection_id}/documents")
            }
            Self::Document {
                collection_id,
                document_id,
            } => write!(f, "{SCHEME}knowledge/{collection_id}/document/{document_id}"),
            Self::SystemHealth => write!(f, "{SCHEME}system/health"),
            Self::SystemAnalytics => write!(f, "{SCHEME}system/analytics"),
        }
    }
}
