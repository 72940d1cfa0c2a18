//! Result Shape Classification
//!
//! Decides whether a query result is rendered as a chart, a table or plain
//! text. Cheap structural rules run first; the model is only consulted, with
//! a fixed menu of answers, when the result could actually carry a chart.
//! Classification never fails the analysis, the fallback is always a table.

use crate::datasource::QueryResult;
use crate::error::Result;
use crate::llm::LanguageModel;
use crate::prompts;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultShape {
    Chart,
    Table,
    Text,
}

impl ResultShape {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultShape::Chart => "chart",
            ResultShape::Table => "table",
            ResultShape::Text => "text",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartKind {
    Bar,
    Line,
    Pie,
    Scatter,
    Area,
}

impl ChartKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChartKind::Bar => "bar",
            ChartKind::Line => "line",
            ChartKind::Pie => "pie",
            ChartKind::Scatter => "scatter",
            ChartKind::Area => "area",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartSpec {
    pub kind: ChartKind,
    pub x_field: String,
    pub y_field: String,
    pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultClassification {
    pub shape: ResultShape,
    pub chart: Option<ChartSpec>,
}

fn table() -> ResultClassification {
    ResultClassification {
        shape: ResultShape::Table,
        chart: None,
    }
}

pub struct ResultClassifier {
    llm: Arc<dyn LanguageModel>,
    max_chart_rows: usize,
    sample_rows: usize,
}

impl ResultClassifier {
    pub fn new(llm: Arc<dyn LanguageModel>, max_chart_rows: usize, sample_rows: usize) -> Self {
        Self {
            llm,
            max_chart_rows,
            sample_rows,
        }
    }

    pub async fn classify(&self, question: &str, result: &QueryResult) -> ResultClassification {
        match self.classify_inner(question, result).await {
            Ok(classification) => classification,
            Err(e) => {
                warn!("Result classification failed, defaulting to table: {}", e);
                table()
            }
        }
    }

    async fn classify_inner(
        &self,
        question: &str,
        result: &QueryResult,
    ) -> Result<ResultClassification> {
        let columns = numeric_columns(result, self.sample_rows);
        let numeric_count = columns.iter().filter(|(_, numeric)| *numeric).count();

        // A chart needs at least one series, a bounded number of points and a
        // second column to serve as the axis.
        if numeric_count == 0
            || result.row_count < 2
            || result.row_count > self.max_chart_rows
            || result.columns.len() < 2
        {
            return Ok(table());
        }

        let prompt = prompts::chart_menu_prompt(question, result.row_count, &columns);
        let reply = self.llm.complete(&prompt).await?;
        Ok(from_menu_choice(&reply, question, &columns))
    }
}

fn from_menu_choice(
    reply: &str,
    question: &str,
    columns: &[(String, bool)],
) -> ResultClassification {
    let choice = reply
        .split_whitespace()
        .next()
        .unwrap_or("")
        .trim_matches(|c: char| !c.is_ascii_alphanumeric() && c != ':')
        .to_lowercase();

    let kind = match choice.as_str() {
        "chart:bar" => ChartKind::Bar,
        "chart:line" => ChartKind::Line,
        "chart:pie" => ChartKind::Pie,
        "chart:scatter" => ChartKind::Scatter,
        "chart:area" => ChartKind::Area,
        "table" => return table(),
        "text" => {
            return ResultClassification {
                shape: ResultShape::Text,
                chart: None,
            }
        }
        other => {
            warn!("Unrecognized classification reply '{}', defaulting to table", other);
            return table();
        }
    };

    match bind_axes(kind, question, columns) {
        Some(spec) => ResultClassification {
            shape: ResultShape::Chart,
            chart: Some(spec),
        },
        None => table(),
    }
}

/// Pick the chart axes: the first non-numeric column is the x axis and the
/// first numeric column the y axis. With nothing but numbers the chart falls
/// back to a bar over the first two columns in order.
fn bind_axes(kind: ChartKind, question: &str, columns: &[(String, bool)]) -> Option<ChartSpec> {
    match columns.iter().find(|(_, numeric)| !*numeric) {
        Some((x_field, _)) => {
            let (y_field, _) = columns.iter().find(|(_, numeric)| *numeric)?;
            Some(ChartSpec {
                kind,
                x_field: x_field.clone(),
                y_field: y_field.clone(),
                title: question.to_string(),
            })
        }
        None if columns.len() >= 2 => Some(ChartSpec {
            kind: ChartKind::Bar,
            x_field: columns[0].0.clone(),
            y_field: columns[1].0.clone(),
            title: question.to_string(),
        }),
        None => None,
    }
}

/// A column counts as numeric when the first sampled rows hold at least one
/// non-null value and every non-null value is a number or a string that
/// parses as one. Column order is preserved.
pub fn numeric_columns(result: &QueryResult, sample_rows: usize) -> Vec<(String, bool)> {
    result
        .columns
        .iter()
        .map(|column| {
            let values: Vec<&Value> = result
                .rows
                .iter()
                .take(sample_rows)
                .filter_map(|row| row.get(column))
                .filter(|v| !v.is_null())
                .collect();
            let numeric = !values.is_empty() && values.iter().all(|v| is_numeric_value(v));
            (column.clone(), numeric)
        })
        .collect()
}

fn is_numeric_value(value: &Value) -> bool {
    match value {
        Value::Number(_) => true,
        Value::String(s) => s.trim().parse::<f64>().is_ok(),
        _ => false,
    }
}
