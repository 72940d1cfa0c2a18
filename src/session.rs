//! Analysis Session State
//!
//! The mutable record of one analysis run: the state machine positions, the
//! artifacts every stage leaves behind and the final report handed back to
//! the caller. Stage events are the streaming view of the same run.

use crate::classifier::{ChartSpec, ResultShape};
use crate::datasource::QueryResult;
use crate::intent::Intent;
use crate::validator::ValidationResult;
use crate::vector::SearchResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Positions of the analysis state machine, in the order a successful run
/// passes through them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisState {
    IntentRecognized,
    MetadataRetrieval,
    SqlGeneration,
    SqlValidation,
    SqlExecution,
    ResultTypeDetermination,
    End,
}

impl AnalysisState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisState::IntentRecognized => "intent_recognized",
            AnalysisState::MetadataRetrieval => "metadata_retrieval",
            AnalysisState::SqlGeneration => "sql_generation",
            AnalysisState::SqlValidation => "sql_validation",
            AnalysisState::SqlExecution => "sql_execution",
            AnalysisState::ResultTypeDetermination => "result_type_determination",
            AnalysisState::End => "end",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Started,
    Completed,
    Failed,
    Skipped,
}

/// One progress notification on the streaming channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageEvent {
    pub stage: AnalysisState,
    pub status: StageStatus,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub question: String,
    pub datasource_id: String,
    /// Pins retrieval to one table resolved by name.
    #[serde(default)]
    pub table_hint: Option<String>,
}

impl AnalysisRequest {
    pub fn new(question: &str, datasource_id: &str) -> Self {
        Self {
            question: question.to_string(),
            datasource_id: datasource_id.to_string(),
            table_hint: None,
        }
    }

    pub fn with_table_hint(mut self, hint: &str) -> Self {
        self.table_hint = Some(hint.to_string());
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisSession {
    pub id: Uuid,
    pub user_query: String,
    pub datasource_id: String,
    pub table_hint: Option<String>,
    pub started_at: DateTime<Utc>,
    pub intent: Option<Intent>,
    pub retrieved_tables: Vec<SearchResult>,
    pub sql_query: Option<String>,
    pub validation_result: Option<ValidationResult>,
    pub query_result: Option<QueryResult>,
    pub result_type: Option<ResultShape>,
    pub chart_spec: Option<ChartSpec>,
    pub retry_count: u8,
    /// Validation issues accumulated across all generation attempts.
    pub issues: Vec<String>,
    pub error: Option<String>,
}

impl AnalysisSession {
    pub fn new(request: &AnalysisRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_query: request.question.clone(),
            datasource_id: request.datasource_id.clone(),
            table_hint: request.table_hint.clone(),
            started_at: Utc::now(),
            intent: None,
            retrieved_tables: Vec::new(),
            sql_query: None,
            validation_result: None,
            query_result: None,
            result_type: None,
            chart_spec: None,
            retry_count: 0,
            issues: Vec::new(),
            error: None,
        }
    }
}

/// The caller-facing summary of a finished run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub success: bool,
    pub result_type: ResultShape,
    pub data: Option<QueryResult>,
    pub chart: Option<ChartSpec>,
    pub error: Option<String>,
    pub sql_query: Option<String>,
    pub execution_time_ms: u64,
    pub row_count: usize,
    pub session_id: Uuid,
}
