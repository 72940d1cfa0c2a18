//! SQL Validation
//!
//! Static safety checks plus a database dry run. Generated statements must
//! parse as exactly one SELECT and must not contain any denylisted keyword;
//! only statements that pass the static checks are sent to the engine for an
//! EXPLAIN dry run.

use crate::datasource::SqlEngine;
use crate::error::{EngineError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlparser::ast::Statement;
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub issues: Vec<String>,
}

pub struct SqlValidator {
    engine: Arc<dyn SqlEngine>,
    denylist: Option<Regex>,
}

impl SqlValidator {
    pub fn new(engine: Arc<dyn SqlEngine>, forbidden: &[String]) -> Result<Self> {
        let denylist = if forbidden.is_empty() {
            None
        } else {
            let pattern = format!(
                r"(?i)\b({})\b",
                forbidden
                    .iter()
                    .map(|k| regex::escape(k))
                    .collect::<Vec<_>>()
                    .join("|")
            );
            let regex = Regex::new(&pattern).map_err(|e| {
                EngineError::Config(format!("invalid forbidden keyword list: {}", e))
            })?;
            Some(regex)
        };
        Ok(Self { engine, denylist })
    }

    pub async fn validate(&self, sql: &str) -> ValidationResult {
        let mut issues = Vec::new();

        if let Some(denylist) = &self.denylist {
            if let Some(m) = denylist.find(sql) {
                issues.push(format!(
                    "Statement contains forbidden keyword `{}`; only SELECT queries are allowed",
                    m.as_str()
                ));
            }
        }

        match Parser::parse_sql(&GenericDialect {}, sql) {
            Ok(statements) => {
                if statements.len() != 1 {
                    issues.push(format!(
                        "Expected exactly one statement, found {}",
                        statements.len()
                    ));
                } else if !matches!(statements[0], Statement::Query(_)) {
                    issues.push("Only SELECT statements are allowed".to_string());
                }
            }
            Err(e) => issues.push(format!("SQL parse error: {}", e)),
        }

        // A denylisted or malformed statement is never sent to the engine,
        // not even wrapped in EXPLAIN.
        if issues.is_empty() {
            if let Err(e) = self.engine.explain(sql).await {
                issues.push(e.to_string());
            }
        }

        ValidationResult {
            is_valid: issues.is_empty(),
            issues,
        }
    }
}
