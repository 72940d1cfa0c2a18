//! Schema Descriptor
//!
//! Turns raw table metadata into a dense text description suitable for
//! vector indexing and LLM prompting. Columns are sorted into semantic
//! buckets by rule; the rendered description is the single source of truth
//! for what the index and the generation prompt see.

use crate::config::DomainVocabulary;
use crate::metadata::TableMetadata;
use serde::{Deserialize, Serialize};

/// Columns grouped by role. A column lands in exactly one bucket.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FieldBuckets {
    pub primary_keys: Vec<String>,
    pub business_fields: Vec<String>,
    pub amount_fields: Vec<String>,
    pub time_fields: Vec<String>,
    pub status_fields: Vec<String>,
    pub reference_fields: Vec<String>,
    pub other_fields: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDescription {
    pub table_name: String,
    pub business_domain: String,
    /// The rendered description text upserted into the vector index.
    pub text: String,
    pub buckets: FieldBuckets,
    pub query_features: Vec<String>,
    pub usage_hints: Vec<String>,
}

pub struct SchemaDescriptor {
    vocabulary: DomainVocabulary,
}

const MAX_BUSINESS_FIELDS: usize = 8;
const MAX_REFERENCE_FIELDS: usize = 5;
const MAX_SELECT_COLUMNS: usize = 6;

impl SchemaDescriptor {
    pub fn new(vocabulary: DomainVocabulary) -> Self {
        Self { vocabulary }
    }

    pub fn describe(&self, table: &TableMetadata, related_tables: &[String]) -> TableDescription {
        let buckets = self.bucket_columns(table);
        let business_domain = self.infer_domain(table);
        let query_features = query_features(&buckets, related_tables);
        let usage_hints = usage_hints(table, &buckets);
        let text = render(table, &business_domain, &buckets, related_tables, &query_features, &usage_hints);

        TableDescription {
            table_name: table.name.clone(),
            business_domain,
            text,
            buckets,
            query_features,
            usage_hints,
        }
    }

    /// First matching rule wins: primary, time, amount, status, reference,
    /// business (non-trivial comment), other.
    fn bucket_columns(&self, table: &TableMetadata) -> FieldBuckets {
        let v = &self.vocabulary;
        let mut buckets = FieldBuckets::default();

        for col in &table.columns {
            let name = col.name.to_lowercase();
            let comment = col.comment.to_lowercase();

            if col.is_primary {
                buckets.primary_keys.push(col.name.clone());
            } else if contains_any(&name, &v.time_tokens) {
                buckets.time_fields.push(col.name.clone());
            } else if contains_any(&name, &v.amount_tokens) || contains_any(&comment, &v.amount_tokens) {
                buckets.amount_fields.push(col.name.clone());
            } else if contains_any(&name, &v.status_tokens) || contains_any(&comment, &v.status_tokens) {
                buckets.status_fields.push(col.name.clone());
            } else if col.is_unique
                || col.has_index
                || v.reference_suffixes.iter().any(|s| name.ends_with(s.as_str()))
            {
                buckets.reference_fields.push(col.name.clone());
            } else if col.comment.chars().count() > 3 {
                buckets.business_fields.push(col.name.clone());
            } else {
                buckets.other_fields.push(col.name.clone());
            }
        }

        buckets
    }

    /// Match table name and comment against the domain keyword table;
    /// concept terms are the fallback signal.
    fn infer_domain(&self, table: &TableMetadata) -> String {
        let haystack = format!("{} {}", table.name, table.comment).to_lowercase();
        for entry in &self.vocabulary.domains {
            if contains_any(&haystack, &entry.keywords) {
                return entry.name.clone();
            }
        }
        for entry in &self.vocabulary.domains {
            if contains_any(&haystack, &entry.concepts) {
                return entry.name.clone();
            }
        }
        "通用".to_string()
    }
}

fn contains_any(haystack: &str, tokens: &[String]) -> bool {
    tokens.iter().any(|t| haystack.contains(t.as_str()))
}

fn query_features(buckets: &FieldBuckets, related_tables: &[String]) -> Vec<String> {
    let mut features = Vec::new();
    if !buckets.time_fields.is_empty() {
        features.push("supports time-range filter".to_string());
    }
    if !buckets.amount_fields.is_empty() {
        features.push("supports aggregation".to_string());
    }
    if !buckets.status_fields.is_empty() {
        features.push("supports status filter".to_string());
    }
    if !related_tables.is_empty() {
        features.push("supports cross-table join".to_string());
    }
    features
}

fn usage_hints(table: &TableMetadata, buckets: &FieldBuckets) -> Vec<String> {
    let mut hints = Vec::new();

    let mut select_cols: Vec<&String> = buckets
        .primary_keys
        .iter()
        .chain(buckets.business_fields.iter())
        .chain(buckets.amount_fields.iter())
        .take(MAX_SELECT_COLUMNS)
        .collect();
    if select_cols.is_empty() {
        select_cols = table.columns.iter().take(3).map(|c| &c.name).collect();
    }
    if !select_cols.is_empty() {
        let cols: Vec<&str> = select_cols.iter().map(|s| s.as_str()).collect();
        hints.push(format!("SELECT {} FROM {}", cols.join(", "), table.name));
    }

    for field in &buckets.status_fields {
        hints.push(format!("WHERE {} = ?", field));
    }
    for field in &buckets.time_fields {
        hints.push(format!("WHERE {} BETWEEN ? AND ?", field));
    }

    hints
}

fn label_with_comment(table: &TableMetadata, field: &str) -> String {
    match table.column(field) {
        Some(col) if !col.comment.is_empty() => format!("{} ({})", field, col.comment),
        _ => field.to_string(),
    }
}

fn render(
    table: &TableMetadata,
    domain: &str,
    buckets: &FieldBuckets,
    related_tables: &[String],
    query_features: &[String],
    usage_hints: &[String],
) -> String {
    let mut parts = Vec::new();

    if table.comment.is_empty() {
        parts.push(format!("Table {}", table.name));
    } else {
        parts.push(format!("Table {}: {}", table.name, table.comment));
    }
    parts.push(format!("Business domain: {}", domain));

    if !buckets.primary_keys.is_empty() {
        parts.push(format!("Primary keys: {}", buckets.primary_keys.join(", ")));
    }
    if !buckets.business_fields.is_empty() {
        let listed: Vec<String> = buckets
            .business_fields
            .iter()
            .take(MAX_BUSINESS_FIELDS)
            .map(|f| label_with_comment(table, f))
            .collect();
        parts.push(format!("Business fields: {}", listed.join(", ")));
    }
    if !buckets.amount_fields.is_empty() {
        let listed: Vec<String> = buckets
            .amount_fields
            .iter()
            .map(|f| label_with_comment(table, f))
            .collect();
        parts.push(format!("Amount fields: {}", listed.join(", ")));
    }
    if !buckets.time_fields.is_empty() {
        parts.push(format!("Time fields: {}", buckets.time_fields.join(", ")));
    }
    if !buckets.status_fields.is_empty() {
        parts.push(format!("Status fields: {}", buckets.status_fields.join(", ")));
    }
    if !buckets.reference_fields.is_empty() {
        let listed: Vec<&str> = buckets
            .reference_fields
            .iter()
            .take(MAX_REFERENCE_FIELDS)
            .map(|s| s.as_str())
            .collect();
        parts.push(format!("Reference fields: {}", listed.join(", ")));
    }
    if !related_tables.is_empty() {
        parts.push(format!("Related tables: {}", related_tables.join(", ")));
    }
    if !query_features.is_empty() {
        parts.push(format!("Query features: {}", query_features.join("; ")));
    }
    if !usage_hints.is_empty() {
        parts.push(format!("Usage hints: {}", usage_hints.join("; ")));
    }

    parts.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::ColumnMetadata;

    fn refuel_table() -> TableMetadata {
        TableMetadata::new("vehicle_refuel")
            .with_comment("车辆加油记录")
            .with_columns(vec![
                ColumnMetadata::new("id", "bigint").primary(),
                ColumnMetadata::new("vehicle_id", "bigint").indexed(),
                ColumnMetadata::new("driver_id", "bigint"),
                ColumnMetadata::new("fuel_amount", "numeric").with_comment("加油金额"),
                ColumnMetadata::new("fuel_volume", "numeric").with_comment("加油量（升）"),
                ColumnMetadata::new("refuel_status", "varchar"),
                ColumnMetadata::new("created_at", "timestamp"),
                ColumnMetadata::new("remark", "varchar").with_comment("ok"),
            ])
            .with_foreign_key("vehicle_id", "vehicle", "id")
            .with_foreign_key("driver_id", "driver", "id")
    }

    #[test]
    fn test_bucket_precedence() {
        let descriptor = SchemaDescriptor::new(DomainVocabulary::builtin());
        let desc = descriptor.describe(&refuel_table(), &[]);
        let b = &desc.buckets;

        assert_eq!(b.primary_keys, vec!["id"]);
        assert_eq!(b.time_fields, vec!["created_at"]);
        assert_eq!(b.amount_fields, vec!["fuel_amount"]);
        assert_eq!(b.status_fields, vec!["refuel_status"]);
        assert_eq!(b.reference_fields, vec!["vehicle_id", "driver_id"]);
        // comment mentions 量 only, no amount token, and it is long enough
        assert_eq!(b.business_fields, vec!["fuel_volume"]);
        // comment too short to count as a business description
        assert_eq!(b.other_fields, vec!["remark"]);
    }

    #[test]
    fn test_primary_key_wins_over_time_token() {
        let descriptor = SchemaDescriptor::new(DomainVocabulary::builtin());
        let table = TableMetadata::new("events")
            .with_columns(vec![ColumnMetadata::new("created_time", "bigint").primary()]);
        let desc = descriptor.describe(&table, &[]);
        assert_eq!(desc.buckets.primary_keys, vec!["created_time"]);
        assert!(desc.buckets.time_fields.is_empty());
    }

    #[test]
    fn test_domain_inference_and_fallback() {
        let descriptor = SchemaDescriptor::new(DomainVocabulary::builtin());
        assert_eq!(descriptor.describe(&refuel_table(), &[]).business_domain, "车辆管理");

        let unknown = TableMetadata::new("misc_notes")
            .with_columns(vec![ColumnMetadata::new("id", "bigint").primary()]);
        assert_eq!(descriptor.describe(&unknown, &[]).business_domain, "通用");
    }

    #[test]
    fn test_description_text_sections() {
        let descriptor = SchemaDescriptor::new(DomainVocabulary::builtin());
        let related = vec!["vehicle".to_string(), "driver".to_string()];
        let desc = descriptor.describe(&refuel_table(), &related);

        assert!(desc.text.contains("Table vehicle_refuel: 车辆加油记录"));
        assert!(desc.text.contains("Business domain: 车辆管理"));
        assert!(desc.text.contains("Related tables: vehicle, driver"));
        assert!(desc.text.contains("supports aggregation"));
        assert!(desc.text.contains("supports cross-table join"));
        assert!(desc.usage_hints.iter().any(|h| h == "WHERE refuel_status = ?"));
        assert!(desc.usage_hints.iter().any(|h| h == "WHERE created_at BETWEEN ? AND ?"));
    }
}
