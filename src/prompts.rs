//! Prompt Builders
//!
//! Assembled prompt text for SQL generation and chart selection. Prompts are
//! plain strings built from the retrieved table descriptions, so callers can
//! log exactly what the model saw.

use crate::vector::SearchResult;

/// Prompt for generating one SELECT statement. On a retry the rejected
/// statement and every validation issue seen so far are appended, so the
/// model corrects instead of repeating itself.
pub fn sql_generation_prompt(
    question: &str,
    tables: &[SearchResult],
    previous_sql: Option<&str>,
    issues: &[String],
) -> String {
    let mut parts: Vec<String> = Vec::new();

    parts.push(format!("USER QUESTION: {}", question));
    parts.push(String::new());
    parts.push("AVAILABLE TABLES:".to_string());
    for table in tables {
        parts.push(String::new());
        parts.push(table.content.clone());
    }

    parts.push(String::new());
    parts.push("RULES:".to_string());
    parts.push("1. Write exactly one SELECT statement for PostgreSQL.".to_string());
    parts.push("2. Never use DROP, DELETE, UPDATE, INSERT, ALTER, CREATE or TRUNCATE.".to_string());
    parts.push("3. Alias output columns with human-readable names.".to_string());
    parts.push("4. Cap aggregate queries at LIMIT 100 and listing queries at LIMIT 1000.".to_string());
    parts.push("5. Use only the tables and columns shown above.".to_string());
    parts.push("6. Return only the SQL statement, no markdown fences, no explanations.".to_string());

    if let Some(sql) = previous_sql {
        parts.push(String::new());
        parts.push("PREVIOUS ATTEMPT (rejected):".to_string());
        parts.push(sql.to_string());
        parts.push(String::new());
        parts.push("VALIDATION ISSUES SO FAR:".to_string());
        for (i, issue) in issues.iter().enumerate() {
            parts.push(format!("{}. {}", i + 1, issue));
        }
        parts.push(String::new());
        parts.push("Fix every issue above and regenerate the query.".to_string());
    }

    parts.join("\n")
}

/// Prompt asking the model to pick one presentation from a fixed menu.
pub fn chart_menu_prompt(question: &str, row_count: usize, columns: &[(String, bool)]) -> String {
    let mut parts: Vec<String> = Vec::new();

    parts.push("Decide how a SQL query result should be presented.".to_string());
    parts.push(String::new());
    parts.push(format!("USER QUESTION: {}", question));
    parts.push(format!("ROW COUNT: {}", row_count));
    parts.push("COLUMNS:".to_string());
    for (name, numeric) in columns {
        let kind = if *numeric { "numeric" } else { "text" };
        parts.push(format!("- {} ({})", name, kind));
    }

    parts.push(String::new());
    parts.push("MENU:".to_string());
    for token in [
        "chart:bar",
        "chart:line",
        "chart:pie",
        "chart:scatter",
        "chart:area",
        "table",
        "text",
    ] {
        parts.push(token.to_string());
    }
    parts.push(String::new());
    parts.push("Answer with exactly one menu token.".to_string());

    parts.join("\n")
}
