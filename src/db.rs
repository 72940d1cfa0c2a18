//! PostgreSQL Datasource
//!
//! Live implementation of both datasource seams using sqlx: schema
//! introspection from the system catalogs and SQL execution through a
//! `row_to_json` wrapper so arbitrary SELECT output becomes row maps.
//! One instance serves one database; the `datasource_id` passed by callers
//! is their label for it, not a lookup key here.

use crate::datasource::{QueryResult, SchemaIntrospector, SqlEngine};
use crate::error::{EngineError, Result};
use crate::metadata::{ColumnMetadata, ForeignKeyRef, TableMetadata};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Column, Executor, Row, Statement};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::info;

pub struct PostgresDatasource {
    pool: PgPool,
    schema: String,
    sample_rows: i64,
}

#[derive(Default, Clone, Copy)]
struct KeyFlags {
    primary: bool,
    unique: bool,
}

impl PostgresDatasource {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(30))
            .connect(database_url)
            .await
            .map_err(|e| EngineError::Database(format!("Failed to connect: {}", e)))?;

        // Test the connection
        sqlx::query("SELECT 1")
            .execute(&pool)
            .await
            .map_err(|e| EngineError::Database(format!("Connection test failed: {}", e)))?;

        Ok(Self {
            pool,
            schema: "public".to_string(),
            sample_rows: 5,
        })
    }

    pub fn with_schema(mut self, schema: &str) -> Self {
        self.schema = schema.to_string();
        self
    }

    async fn load_table_comments(&self) -> Result<Vec<(String, String)>> {
        let rows = sqlx::query(
            r#"
            SELECT c.relname AS table_name, d.description AS table_comment
            FROM pg_catalog.pg_class c
            JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
            LEFT JOIN pg_catalog.pg_description d ON d.objoid = c.oid AND d.objsubid = 0
            WHERE c.relkind = 'r' AND n.nspname = $1
            ORDER BY c.relname
            "#,
        )
        .bind(&self.schema)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| EngineError::Database(format!("Failed to list tables: {}", e)))?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let name: String = row.try_get("table_name").unwrap_or_default();
                let comment: Option<String> = row.try_get("table_comment").unwrap_or_default();
                (name, comment.unwrap_or_default())
            })
            .collect())
    }

    async fn load_columns(&self) -> Result<HashMap<String, Vec<ColumnMetadata>>> {
        let rows = sqlx::query(
            r#"
            SELECT c.relname AS table_name,
                   a.attname AS column_name,
                   pg_catalog.format_type(a.atttypid, a.atttypmod) AS data_type,
                   d.description AS column_comment
            FROM pg_catalog.pg_attribute a
            JOIN pg_catalog.pg_class c ON c.oid = a.attrelid
            JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
            LEFT JOIN pg_catalog.pg_description d ON d.objoid = c.oid AND d.objsubid = a.attnum
            WHERE c.relkind = 'r' AND n.nspname = $1 AND a.attnum > 0 AND NOT a.attisdropped
            ORDER BY c.relname, a.attnum
            "#,
        )
        .bind(&self.schema)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| EngineError::Database(format!("Failed to load columns: {}", e)))?;

        let mut columns: HashMap<String, Vec<ColumnMetadata>> = HashMap::new();
        for row in rows {
            let table: String = row.try_get("table_name").unwrap_or_default();
            let comment: Option<String> = row.try_get("column_comment").unwrap_or_default();
            columns.entry(table).or_default().push(ColumnMetadata {
                name: row.try_get("column_name").unwrap_or_default(),
                data_type: row.try_get("data_type").unwrap_or_default(),
                comment: comment.unwrap_or_default(),
                is_primary: false,
                is_unique: false,
                has_index: false,
            });
        }
        Ok(columns)
    }

    /// Index membership per (table, column), with primary/unique flags folded
    /// across all indexes that cover the column.
    async fn load_key_flags(&self) -> Result<HashMap<(String, String), KeyFlags>> {
        let rows = sqlx::query(
            r#"
            SELECT t.relname AS table_name,
                   a.attname AS column_name,
                   ix.indisprimary AS is_primary,
                   ix.indisunique AS is_unique
            FROM pg_catalog.pg_index ix
            JOIN pg_catalog.pg_class t ON t.oid = ix.indrelid
            JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace
            JOIN pg_catalog.pg_attribute a ON a.attrelid = t.oid AND a.attnum = ANY(ix.indkey)
            WHERE n.nspname = $1
            "#,
        )
        .bind(&self.schema)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| EngineError::Database(format!("Failed to load index flags: {}", e)))?;

        let mut flags: HashMap<(String, String), KeyFlags> = HashMap::new();
        for row in rows {
            let table: String = row.try_get("table_name").unwrap_or_default();
            let column: String = row.try_get("column_name").unwrap_or_default();
            let is_primary: bool = row.try_get("is_primary").unwrap_or(false);
            let is_unique: bool = row.try_get("is_unique").unwrap_or(false);
            let entry = flags.entry((table, column)).or_default();
            entry.primary |= is_primary;
            entry.unique |= is_unique;
        }
        Ok(flags)
    }

    /// Foreign keys via pg_constraint so multi-column keys pair their source
    /// and target columns positionally.
    async fn load_foreign_keys(&self) -> Result<HashMap<String, Vec<ForeignKeyRef>>> {
        let rows = sqlx::query(
            r#"
            SELECT con.conname AS constraint_name,
                   t.relname AS table_name,
                   rt.relname AS referenced_table,
                   sa.attname AS column_name,
                   ra.attname AS referenced_column
            FROM pg_catalog.pg_constraint con
            JOIN pg_catalog.pg_class t ON t.oid = con.conrelid
            JOIN pg_catalog.pg_class rt ON rt.oid = con.confrelid
            JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace
            JOIN LATERAL unnest(con.conkey, con.confkey) WITH ORDINALITY AS k(attnum, fattnum, ord) ON true
            JOIN pg_catalog.pg_attribute sa ON sa.attrelid = con.conrelid AND sa.attnum = k.attnum
            JOIN pg_catalog.pg_attribute ra ON ra.attrelid = con.confrelid AND ra.attnum = k.fattnum
            WHERE con.contype = 'f' AND n.nspname = $1
            ORDER BY t.relname, con.conname, k.ord
            "#,
        )
        .bind(&self.schema)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| EngineError::Database(format!("Failed to load foreign keys: {}", e)))?;

        let mut grouped: HashMap<String, Vec<ForeignKeyRef>> = HashMap::new();
        // constraint names are only unique per table, so the grouping key
        // must include the table
        let mut last_key: Option<(String, String)> = None;
        for row in rows {
            let constraint: String = row.try_get("constraint_name").unwrap_or_default();
            let table: String = row.try_get("table_name").unwrap_or_default();
            let referenced_table: String = row.try_get("referenced_table").unwrap_or_default();
            let column: String = row.try_get("column_name").unwrap_or_default();
            let referenced_column: String = row.try_get("referenced_column").unwrap_or_default();

            let key = (table.clone(), constraint);
            let fks = grouped.entry(table).or_default();
            if last_key.as_ref() != Some(&key) {
                fks.push(ForeignKeyRef {
                    columns: Vec::new(),
                    referenced_table,
                    referenced_columns: Vec::new(),
                });
                last_key = Some(key);
            }
            if let Some(fk) = fks.last_mut() {
                fk.columns.push(column);
                fk.referenced_columns.push(referenced_column);
            }
        }
        Ok(grouped)
    }

    async fn load_sample_rows(&self, table: &str) -> Result<Vec<serde_json::Map<String, serde_json::Value>>> {
        let sql = format!(
            r#"SELECT COALESCE(json_agg(row_to_json(t)), '[]'::json)::text AS rows FROM (SELECT * FROM {}.{} LIMIT {}) t"#,
            quote_ident(&self.schema),
            quote_ident(table),
            self.sample_rows
        );
        let row = sqlx::query(&sql)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| EngineError::Database(format!("Failed to sample {}: {}", table, e)))?;
        let text: String = row
            .try_get("rows")
            .map_err(|e| EngineError::Database(format!("Failed to decode sample rows: {}", e)))?;
        parse_row_maps(&text)
    }
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn parse_row_maps(json_text: &str) -> Result<Vec<serde_json::Map<String, serde_json::Value>>> {
    let value: serde_json::Value = serde_json::from_str(json_text)?;
    Ok(value
        .as_array()
        .map(|arr| arr.iter().filter_map(|v| v.as_object().cloned()).collect())
        .unwrap_or_default())
}

/// Pair statement-metadata columns with the parsed row maps. The column list
/// is authoritative: row maps carry keys in alphabetical order and vanish
/// entirely for empty results.
fn assemble_result(columns: Vec<String>, json_text: &str) -> Result<QueryResult> {
    Ok(QueryResult::new(columns, parse_row_maps(json_text)?))
}

#[async_trait]
impl SchemaIntrospector for PostgresDatasource {
    async fn get_tables(&self, _datasource_id: &str) -> Result<Vec<TableMetadata>> {
        let comments = self.load_table_comments().await?;
        let mut columns = self.load_columns().await?;
        let key_flags = self.load_key_flags().await?;
        let mut foreign_keys = self.load_foreign_keys().await?;

        let mut tables = Vec::new();
        for (table_name, table_comment) in comments {
            let mut cols = columns.remove(&table_name).unwrap_or_default();
            let mut key_indexes = Vec::new();
            for col in &mut cols {
                if let Some(flags) = key_flags.get(&(table_name.clone(), col.name.clone())) {
                    col.has_index = true;
                    col.is_primary = flags.primary;
                    col.is_unique = flags.unique && !flags.primary;
                    if !flags.primary {
                        key_indexes.push(col.name.clone());
                    }
                }
            }

            let sample_rows = self.load_sample_rows(&table_name).await.unwrap_or_default();
            let fks = foreign_keys.remove(&table_name).unwrap_or_default();

            tables.push(TableMetadata {
                name: table_name,
                comment: table_comment,
                columns: cols,
                key_indexes,
                foreign_keys: fks,
                sample_rows,
            });
        }

        info!("Introspected {} tables from schema {}", tables.len(), self.schema);
        Ok(tables)
    }
}

#[async_trait]
impl SqlEngine for PostgresDatasource {
    async fn explain(&self, sql: &str) -> Result<()> {
        let statement = format!("EXPLAIN {}", sql.trim().trim_end_matches(';'));
        sqlx::query(&statement)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| EngineError::Validation(e.to_string()))?;
        Ok(())
    }

    async fn execute(&self, sql: &str) -> Result<QueryResult> {
        let started = Instant::now();
        let inner = sql.trim().trim_end_matches(';');

        // Column names come from the prepared statement, in SELECT order;
        // the JSON row maps sort their keys alphabetically and an empty
        // result has no keys at all.
        let statement = self
            .pool
            .prepare(inner)
            .await
            .map_err(|e| EngineError::Execution(e.to_string()))?;
        let columns: Vec<String> = statement
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();

        let wrapped = format!(
            "SELECT COALESCE(json_agg(row_to_json(q)), '[]'::json)::text AS rows FROM ({}) q",
            inner
        );
        let row = sqlx::query(&wrapped)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| EngineError::Execution(e.to_string()))?;
        let text: String = row
            .try_get("rows")
            .map_err(|e| EngineError::Execution(format!("Failed to decode result rows: {}", e)))?;

        let mut result = assemble_result(columns, &text)?;
        result.execution_time = started.elapsed().as_secs_f64();
        Ok(result)
    }
}
