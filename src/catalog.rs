//! Datasource Catalog
//!
//! Immutable snapshot of one datasource's schema: table metadata, the
//! relationship graph and the rendered descriptions. Built once per sync;
//! concurrent sessions share it behind an `Arc` and never mutate it.

use crate::descriptor::{SchemaDescriptor, TableDescription};
use crate::graph::RelationshipGraph;
use crate::metadata::TableMetadata;
use crate::vector::IndexEntry;
use std::collections::HashMap;

pub struct DatasourceCatalog {
    pub datasource_id: String,
    pub tables: Vec<TableMetadata>,
    pub graph: RelationshipGraph,
    descriptions: HashMap<String, TableDescription>,
    by_name: HashMap<String, usize>,
}

impl DatasourceCatalog {
    pub fn build(datasource_id: &str, tables: Vec<TableMetadata>, descriptor: &SchemaDescriptor) -> Self {
        let graph = RelationshipGraph::build(&tables);
        let mut descriptions = HashMap::new();
        let mut by_name = HashMap::new();
        for (idx, table) in tables.iter().enumerate() {
            let related = graph.related(&table.name);
            descriptions.insert(table.name.clone(), descriptor.describe(table, &related));
            by_name.insert(table.name.clone(), idx);
        }
        Self {
            datasource_id: datasource_id.to_string(),
            tables,
            graph,
            descriptions,
            by_name,
        }
    }

    pub fn table(&self, name: &str) -> Option<&TableMetadata> {
        self.by_name.get(name).map(|&idx| &self.tables[idx])
    }

    pub fn description(&self, name: &str) -> Option<&TableDescription> {
        self.descriptions.get(name)
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// One vector-index entry per table, carrying the rendered description.
    pub fn index_entries(&self) -> Vec<IndexEntry> {
        self.tables
            .iter()
            .filter_map(|t| {
                self.descriptions.get(&t.name).map(|d| IndexEntry {
                    content: d.text.clone(),
                    business_domain: d.business_domain.clone(),
                    metadata: t.clone(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DomainVocabulary;
    use crate::metadata::ColumnMetadata;

    #[test]
    fn test_build_links_descriptions_to_graph() {
        let tables = vec![
            TableMetadata::new("vehicle_refuel")
                .with_columns(vec![ColumnMetadata::new("id", "bigint").primary()])
                .with_foreign_key("vehicle_id", "vehicle", "id"),
            TableMetadata::new("vehicle")
                .with_columns(vec![ColumnMetadata::new("id", "bigint").primary()]),
        ];
        let descriptor = SchemaDescriptor::new(DomainVocabulary::builtin());
        let catalog = DatasourceCatalog::build("ds", tables, &descriptor);

        assert_eq!(catalog.len(), 2);
        assert!(catalog.table("vehicle").is_some());
        assert!(catalog.table("missing").is_none());

        let desc = catalog.description("vehicle_refuel").unwrap();
        assert!(desc.text.contains("Related tables: vehicle"));
        assert_eq!(catalog.index_entries().len(), 2);
    }
}
