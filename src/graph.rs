//! Relationship Graph
//!
//! Foreign-key adjacency over a datasource's tables, built once per catalog
//! sync. `related` is kept symmetric so reverse lookups need no direction
//! bookkeeping.

use crate::metadata::TableMetadata;
use std::collections::{HashMap, HashSet, VecDeque};

#[derive(Debug, Clone, Default)]
pub struct TableRelations {
    /// Tables this table points at through its own foreign keys.
    pub references: HashSet<String>,
    /// Tables whose foreign keys point at this table.
    pub referenced_by: HashSet<String>,
    /// Union of the two, symmetric across the graph.
    pub related: HashSet<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RelationshipGraph {
    relations: HashMap<String, TableRelations>,
}

impl RelationshipGraph {
    pub fn build(tables: &[TableMetadata]) -> Self {
        let mut graph = Self::default();
        for table in tables {
            for fk in &table.foreign_keys {
                graph.add_edge(&table.name, &fk.referenced_table);
            }
        }
        graph
    }

    fn add_edge(&mut self, from: &str, to: &str) {
        {
            let entry = self.relations.entry(from.to_string()).or_default();
            entry.references.insert(to.to_string());
            entry.related.insert(to.to_string());
        }
        let entry = self.relations.entry(to.to_string()).or_default();
        entry.referenced_by.insert(from.to_string());
        entry.related.insert(from.to_string());
    }

    pub fn relations(&self, table: &str) -> Option<&TableRelations> {
        self.relations.get(table)
    }

    /// Directly related tables, sorted for deterministic downstream use.
    pub fn related(&self, table: &str) -> Vec<String> {
        let mut related: Vec<String> = self
            .relations
            .get(table)
            .map(|r| r.related.iter().cloned().collect())
            .unwrap_or_default();
        related.sort();
        related
    }

    /// Tables reachable within `depth` hops of `table`, excluding the seed
    /// itself. Unknown tables yield an empty set.
    pub fn neighbors(&self, table: &str, depth: usize) -> HashSet<String> {
        let mut reached = HashSet::new();
        if depth == 0 || !self.relations.contains_key(table) {
            return reached;
        }

        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(table.to_string());
        let mut queue: VecDeque<(String, usize)> = VecDeque::new();
        queue.push_back((table.to_string(), 0));

        while let Some((current, dist)) = queue.pop_front() {
            if dist == depth {
                continue;
            }
            if let Some(relations) = self.relations.get(&current) {
                for next in &relations.related {
                    if visited.insert(next.clone()) {
                        reached.insert(next.clone());
                        queue.push_back((next.clone(), dist + 1));
                    }
                }
            }
        }

        reached
    }

    pub fn len(&self) -> usize {
        self.relations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }
}
