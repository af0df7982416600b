//! Knowledge-store seam and the retriever adapter wrapped around it

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};

/// A retrieval unit: chunk text plus string metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub content: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Document {
    /// Create a document without metadata
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            metadata: BTreeMap::new(),
        }
    }

    /// Attach a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Similarity-search capability backing retrieval
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// Return at most `k` documents most similar to `query`
    async fn similarity_search(&self, query: &str, k: usize) -> Result<Vec<Document>>;

    /// Store documents for later search
    async fn add_documents(&self, documents: Vec<Document>) -> Result<()>;
}

/// Query → documents adapter. Without a store it always answers with no documents.
#[derive(Clone)]
pub struct Retriever {
    store: Option<Arc<dyn KnowledgeStore>>,
    k: usize,
    timeout: Duration,
}

impl Retriever {
    pub const DEFAULT_K: usize = 3;
    pub const MAX_K: usize = 20;
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    /// Wrap a store; `k` is clamped to `1..=MAX_K`
    pub fn new(store: Arc<dyn KnowledgeStore>, k: usize) -> Self {
        Self {
            store: Some(store),
            k: k.clamp(1, Self::MAX_K),
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    /// A retriever that returns `[]` for every query
    pub fn fallback() -> Self {
        Self {
            store: None,
            k: Self::DEFAULT_K,
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    /// Build from a store that may have failed to open
    pub fn from_store<E: Display>(store: std::result::Result<Arc<dyn KnowledgeStore>, E>, k: usize) -> Self {
        match store {
            Ok(store) => Self::new(store, k),
            Err(e) => {
                tracing::warn!("Knowledge store unavailable, retrieval disabled: {}", e);
                Self::fallback()
            }
        }
    }

    /// Bound each search call
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Whether a real store backs this retriever
    pub fn is_available(&self) -> bool {
        self.store.is_some()
    }

    /// Top-k documents for a query
    pub async fn retrieve(&self, query: &str) -> Result<Vec<Document>> {
        let Some(store) = &self.store else {
            return Ok(vec![]);
        };
        match tokio::time::timeout(self.timeout, store.similarity_search(query, self.k)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Retrieval(format!(
                "search timed out after {:?}",
                self.timeout
            ))),
        }
    }
}
