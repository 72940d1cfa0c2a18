//! Vector Index
//!
//! Similarity-search seam over table descriptions. Embedding and ANN search
//! belong to an external service behind the `VectorIndex` trait; the bundled
//! `InMemoryVectorIndex` scores by deterministic token overlap so development
//! and tests need no external index.

use crate::error::Result;
use crate::metadata::TableMetadata;
use crate::text::{jaccard_similarity, token_set};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// One retrieved table with its description and origin score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub content: String,
    pub table_name: String,
    pub business_domain: String,
    pub raw_metadata: TableMetadata,
    pub score: f32,
}

/// Unit of indexing: the rendered description plus the metadata it was
/// rendered from.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub content: String,
    pub business_domain: String,
    pub metadata: TableMetadata,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn search(&self, datasource_id: &str, text: &str, k: usize) -> Result<Vec<SearchResult>>;
    async fn upsert(&self, datasource_id: &str, entries: Vec<IndexEntry>) -> Result<()>;
}

/// Lexical in-memory index, one bucket per datasource. Upserts replace by
/// table name so re-syncing a datasource never duplicates entries.
pub struct InMemoryVectorIndex {
    buckets: RwLock<HashMap<String, Vec<IndexEntry>>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self {
            buckets: RwLock::new(HashMap::new()),
        }
    }

    pub async fn table_count(&self, datasource_id: &str) -> usize {
        let buckets = self.buckets.read().await;
        buckets.get(datasource_id).map(|b| b.len()).unwrap_or(0)
    }
}

impl Default for InMemoryVectorIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn search(&self, datasource_id: &str, text: &str, k: usize) -> Result<Vec<SearchResult>> {
        let buckets = self.buckets.read().await;
        let entries = match buckets.get(datasource_id) {
            Some(entries) => entries,
            None => return Ok(Vec::new()),
        };

        let query_tokens = token_set(text);
        let mut results: Vec<SearchResult> = entries
            .iter()
            .map(|entry| SearchResult {
                content: entry.content.clone(),
                table_name: entry.metadata.name.clone(),
                business_domain: entry.business_domain.clone(),
                raw_metadata: entry.metadata.clone(),
                score: jaccard_similarity(&query_tokens, &token_set(&entry.content)),
            })
            .filter(|r| r.score > 0.0)
            .collect();

        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(k);
        Ok(results)
    }

    async fn upsert(&self, datasource_id: &str, entries: Vec<IndexEntry>) -> Result<()> {
        let mut buckets = self.buckets.write().await;
        let bucket = buckets.entry(datasource_id.to_string()).or_default();
        for entry in entries {
            bucket.retain(|e| e.metadata.name != entry.metadata.name);
            bucket.push(entry);
        }
        Ok(())
    }
}
