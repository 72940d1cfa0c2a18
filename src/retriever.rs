//! Metadata Retriever
//!
//! Three-strategy retrieval over the schema catalog: vector search over the
//! rendered descriptions, foreign-key relationship expansion around the hits,
//! and domain-keyword query expansion. The strategies merge into one ranked
//! list carrying exactly one entry per table. A strategy that fails is logged
//! and skipped; retrieval itself never errors, the worst case is an empty
//! list.

use crate::catalog::DatasourceCatalog;
use crate::config::EngineConfig;
use crate::intent::{Complexity, Intent};
use crate::text::{jaccard_similarity, token_set, tokenize};
use crate::vector::{SearchResult, VectorIndex};
use itertools::Itertools;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct SmartRetriever {
    vector_index: Arc<dyn VectorIndex>,
    config: Arc<EngineConfig>,
}

impl SmartRetriever {
    pub fn new(vector_index: Arc<dyn VectorIndex>, config: Arc<EngineConfig>) -> Self {
        Self {
            vector_index,
            config,
        }
    }

    pub async fn retrieve(
        &self,
        catalog: &DatasourceCatalog,
        question: &str,
        intent: &Intent,
        table_hint: Option<&str>,
        limit: usize,
    ) -> Vec<SearchResult> {
        let limit = limit.max(1);
        let mut combined: Vec<SearchResult> = Vec::new();

        // Strategy 1: vector search over descriptions
        let top_k = (limit / 2).max(1);
        match self
            .vector_index
            .search(&catalog.datasource_id, question, top_k)
            .await
        {
            Ok(hits) => combined.extend(hits),
            Err(e) => warn!("Vector search failed, continuing without it: {}", e),
        }

        // A resolved hint is force-included at the front so it both survives
        // the first-seen merge and seeds relationship expansion.
        if let Some(hint) = table_hint {
            match self.resolve_hint(catalog, hint) {
                Some(name) => {
                    if !combined.iter().any(|r| r.table_name == name) {
                        if let Some(result) = synthesize(catalog, &name, 1.0) {
                            combined.insert(0, result);
                        }
                    }
                }
                None => warn!("Table hint '{}' did not resolve to any catalog table", hint),
            }
        }

        let expand = intent.requires_relations || intent.complexity == Complexity::Complex;

        // Strategy 2: relationship expansion around the seeds
        if expand {
            let depth = if intent.complexity == Complexity::Complex { 2 } else { 1 };
            let seeds: Vec<String> = combined
                .iter()
                .map(|r| r.table_name.clone())
                .unique()
                .collect();
            let known: HashSet<String> = seeds.iter().cloned().collect();
            let score = self.config.relation_default_score * self.config.relation_discount;

            let mut added: HashSet<String> = HashSet::new();
            let mut expanded: Vec<SearchResult> = Vec::new();
            for seed in &seeds {
                let mut neighbors: Vec<String> =
                    catalog.graph.neighbors(seed, depth).into_iter().collect();
                neighbors.sort();
                for neighbor in neighbors {
                    if known.contains(&neighbor) || !added.insert(neighbor.clone()) {
                        continue;
                    }
                    if let Some(result) = synthesize(catalog, &neighbor, score) {
                        expanded.push(result);
                    }
                }
            }
            debug!("Relationship expansion added {} candidate tables", expanded.len());
            combined.extend(expanded);
        }

        // Strategy 3: keyword-expanded queries
        if expand {
            for query in self.expanded_queries(question, intent) {
                match self
                    .vector_index
                    .search(&catalog.datasource_id, &query, self.config.expansion_top_k)
                    .await
                {
                    Ok(hits) => combined.extend(hits),
                    Err(e) => warn!("Expanded query search failed: {}", e),
                }
            }
        }

        self.fuse(question, intent, combined, limit)
    }

    /// Append concept terms of each recognized domain to the question.
    fn expanded_queries(&self, question: &str, intent: &Intent) -> Vec<String> {
        let mut queries = Vec::new();
        for entity in &intent.entities {
            if queries.len() >= self.config.max_expanded_queries {
                break;
            }
            let entry = match self.config.vocabulary.domain(entity) {
                Some(entry) => entry,
                None => continue,
            };
            let extra: Vec<&str> = entry
                .concepts
                .iter()
                .take(self.config.expansion_terms_per_domain)
                .map(|s| s.as_str())
                .collect();
            if extra.is_empty() {
                continue;
            }
            queries.push(format!("{} {}", question, extra.join(" ")));
        }
        queries
    }

    /// Dedupe by table (first record wins), rescore every survivor with the
    /// fusion formula, sort descending, truncate.
    fn fuse(
        &self,
        question: &str,
        intent: &Intent,
        combined: Vec<SearchResult>,
        limit: usize,
    ) -> Vec<SearchResult> {
        let query_tokens = token_set(question);
        let question_lower = question.to_lowercase();

        let mut merged: Vec<SearchResult> = combined
            .into_iter()
            .unique_by(|r| r.table_name.clone())
            .collect();

        for result in &mut merged {
            result.score = self.fusion_score(result, &question_lower, &query_tokens, &intent.entities);
        }
        merged.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        merged.truncate(limit);
        merged
    }

    fn fusion_score(
        &self,
        result: &SearchResult,
        question_lower: &str,
        query_tokens: &HashSet<String>,
        entities: &[String],
    ) -> f32 {
        let w = &self.config.fusion;

        let origin = result.score.clamp(0.0, 1.0);

        let name_hit = question_lower.contains(&result.table_name.to_lowercase())
            || tokenize(&result.table_name)
                .iter()
                .any(|t| query_tokens.contains(t));
        let name_overlap = if name_hit { 1.0 } else { 0.0 };

        let mentioned = entities
            .iter()
            .filter(|e| result.content.contains(e.as_str()))
            .count() as f32;
        let entity_ratio = mentioned / entities.len().max(1) as f32;

        let text_similarity = jaccard_similarity(query_tokens, &token_set(&result.content));

        (w.origin * origin
            + w.name_overlap * name_overlap
            + w.entity_mention * entity_ratio
            + w.text_similarity * text_similarity)
            .clamp(0.0, 1.0)
    }

    /// Resolve a table hint: exact name first, then substring either way,
    /// then the best Jaro-Winkler match above the configured threshold.
    pub fn resolve_hint(&self, catalog: &DatasourceCatalog, hint: &str) -> Option<String> {
        let hint_lower = hint.trim().to_lowercase();
        if hint_lower.is_empty() {
            return None;
        }
        let names = catalog.table_names();

        if let Some(name) = names.iter().find(|n| n.to_lowercase() == hint_lower) {
            return Some(name.to_string());
        }
        if let Some(name) = names.iter().find(|n| {
            let lower = n.to_lowercase();
            lower.contains(&hint_lower) || hint_lower.contains(&lower)
        }) {
            return Some(name.to_string());
        }

        let mut best: Option<(f64, &str)> = None;
        for name in names.iter().copied() {
            let score = strsim::jaro_winkler(&hint_lower, &name.to_lowercase());
            if score >= self.config.hint_match_threshold
                && best.map_or(true, |(b, _)| score > b)
            {
                best = Some((score, name));
            }
        }
        best.map(|(_, name)| name.to_string())
    }
}

fn synthesize(catalog: &DatasourceCatalog, table: &str, score: f32) -> Option<SearchResult> {
    let metadata = catalog.table(table)?;
    let description = catalog.description(table)?;
    Some(SearchResult {
        content: description.text.clone(),
        table_name: table.to_string(),
        business_domain: description.business_domain.clone(),
        raw_metadata: metadata.clone(),
        score,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DomainVocabulary;
    use crate::descriptor::SchemaDescriptor;
    use crate::intent::IntentClassifier;
    use crate::metadata::{ColumnMetadata, TableMetadata};
    use crate::vector::InMemoryVectorIndex;

    fn test_catalog() -> DatasourceCatalog {
        let tables = vec![
            TableMetadata::new("vehicle_refuel")
                .with_comment("车辆加油记录")
                .with_columns(vec![
                    ColumnMetadata::new("id", "bigint").primary(),
                    ColumnMetadata::new("fuel_amount", "numeric").with_comment("加油金额"),
                ])
                .with_foreign_key("vehicle_id", "vehicle", "id")
                .with_foreign_key("driver_id", "driver", "id"),
            TableMetadata::new("vehicle")
                .with_comment("车辆台账")
                .with_columns(vec![ColumnMetadata::new("id", "bigint").primary()]),
            TableMetadata::new("driver")
                .with_comment("司机信息")
                .with_columns(vec![ColumnMetadata::new("id", "bigint").primary()]),
        ];
        let descriptor = SchemaDescriptor::new(DomainVocabulary::builtin());
        DatasourceCatalog::build("ds", tables, &descriptor)
    }

    fn retriever() -> SmartRetriever {
        SmartRetriever::new(
            Arc::new(InMemoryVectorIndex::new()),
            Arc::new(EngineConfig::default()),
        )
    }

    fn result_for(table: &str, content: &str, score: f32) -> SearchResult {
        SearchResult {
            content: content.to_string(),
            table_name: table.to_string(),
            business_domain: "通用".to_string(),
            raw_metadata: TableMetadata::new(table),
            score,
        }
    }

    #[test]
    fn test_fuse_keeps_one_entry_per_table() {
        let r = retriever();
        let intent = IntentClassifier::new(DomainVocabulary::builtin()).classify("车辆加油统计", None);
        let combined = vec![
            result_for("vehicle_refuel", "Business domain: 车辆管理 加油", 0.9),
            result_for("driver", "Business domain: 车辆管理", 0.3),
            result_for("vehicle_refuel", "duplicate from another strategy", 0.2),
        ];

        let fused = r.fuse("车辆加油统计", &intent, combined, 10);
        assert_eq!(fused.len(), 2);
        assert_eq!(fused[0].table_name, "vehicle_refuel");
        // first-seen record survives, not the duplicate
        assert!(fused[0].content.contains("车辆管理"));
    }

    #[test]
    fn test_fuse_scores_stay_in_unit_range() {
        let r = retriever();
        let intent = IntentClassifier::new(DomainVocabulary::builtin()).classify("车辆加油统计", None);
        let combined = vec![result_for("vehicle_refuel", "Business domain: 车辆管理 车辆加油统计", 5.0)];
        let fused = r.fuse("车辆加油统计", &intent, combined, 10);
        assert!(fused[0].score <= 1.0 && fused[0].score >= 0.0);
    }

    #[test]
    fn test_resolve_hint_exact_and_substring() {
        let r = retriever();
        let catalog = test_catalog();
        assert_eq!(r.resolve_hint(&catalog, "vehicle"), Some("vehicle".to_string()));
        assert_eq!(r.resolve_hint(&catalog, "refuel"), Some("vehicle_refuel".to_string()));
        assert_eq!(r.resolve_hint(&catalog, ""), None);
        assert_eq!(r.resolve_hint(&catalog, "orders"), None);
    }

    #[test]
    fn test_resolve_hint_fuzzy() {
        let r = retriever();
        let catalog = test_catalog();
        // one transposition away from "driver"
        assert_eq!(r.resolve_hint(&catalog, "drivre"), Some("driver".to_string()));
    }

    #[test]
    fn test_expanded_queries_are_bounded() {
        let r = retriever();
        let intent = IntentClassifier::new(DomainVocabulary::builtin())
            .classify("统计用户订单商品车辆金额", None);
        assert!(intent.entities.len() > 3);
        let queries = r.expanded_queries("统计用户订单商品车辆金额", &intent);
        assert_eq!(queries.len(), 3);
        assert!(queries[0].starts_with("统计用户订单商品车辆金额"));
    }

    #[tokio::test]
    async fn test_retrieve_expands_relations() {
        let config = Arc::new(EngineConfig::default());
        let index = Arc::new(InMemoryVectorIndex::new());
        let catalog = test_catalog();
        index
            .upsert("ds", catalog.index_entries())
            .await
            .unwrap();
        let r = SmartRetriever::new(index, config);
        let intent = IntentClassifier::new(DomainVocabulary::builtin()).classify("车辆加油统计", None);

        let results = r.retrieve(&catalog, "车辆加油统计", &intent, None, 10).await;
        let names: Vec<&str> = results.iter().map(|r| r.table_name.as_str()).collect();
        assert!(names.contains(&"vehicle_refuel"));
        assert!(names.contains(&"vehicle"));
        assert!(names.contains(&"driver"));
        assert_eq!(names[0], "vehicle_refuel");
    }
}
