//! End-to-end pipeline tests against scripted stubs: a static schema, a
//! scripted language model and a recording SQL engine. No database or
//! network involved.

use async_trait::async_trait;
use serde_json::json;
use smartquery::classifier::{ChartKind, ResultShape};
use smartquery::config::EngineConfig;
use smartquery::datasource::{QueryResult, SchemaIntrospector, SqlEngine};
use smartquery::engine::AnalysisEngine;
use smartquery::error::{EngineError, Result};
use smartquery::llm::LanguageModel;
use smartquery::metadata::{ColumnMetadata, TableMetadata};
use smartquery::session::{AnalysisRequest, AnalysisState, StageEvent, StageStatus};
use smartquery::vector::InMemoryVectorIndex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

const VALID_SQL: &str = "SELECT to_char(created_at, 'YYYY-MM') AS month, SUM(total_amount) AS total_amount FROM orders GROUP BY month ORDER BY month LIMIT 100";

const QUESTION: &str = "统计每月订单金额";

/// Orders/users schema with enough texture for description and retrieval.
fn order_schema() -> Vec<TableMetadata> {
    vec![
        TableMetadata::new("orders")
            .with_comment("订单表")
            .with_columns(vec![
                ColumnMetadata::new("id", "bigint").primary(),
                ColumnMetadata::new("user_id", "bigint").indexed(),
                ColumnMetadata::new("total_amount", "numeric").with_comment("订单金额"),
                ColumnMetadata::new("status", "text").with_comment("订单状态"),
                ColumnMetadata::new("created_at", "timestamptz"),
            ])
            .with_foreign_key("user_id", "users", "id"),
        TableMetadata::new("users")
            .with_comment("用户表")
            .with_columns(vec![
                ColumnMetadata::new("id", "bigint").primary(),
                ColumnMetadata::new("name", "text").with_comment("用户昵称"),
            ]),
    ]
}

struct StaticSchema {
    tables: Vec<TableMetadata>,
    calls: AtomicUsize,
}

impl StaticSchema {
    fn new(tables: Vec<TableMetadata>) -> Self {
        Self {
            tables,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl SchemaIntrospector for StaticSchema {
    async fn get_tables(&self, _datasource_id: &str) -> Result<Vec<TableMetadata>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.tables.clone())
    }
}

/// Replays canned completions in order; the last reply repeats forever.
struct ScriptedLlm {
    replies: Mutex<VecDeque<String>>,
    calls: AtomicUsize,
}

impl ScriptedLlm {
    fn new(replies: &[&str]) -> Self {
        Self {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl LanguageModel for ScriptedLlm {
    async fn complete(&self, _prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut replies = self.replies.lock().unwrap();
        if replies.len() > 1 {
            Ok(replies.pop_front().unwrap())
        } else {
            replies
                .front()
                .cloned()
                .ok_or_else(|| EngineError::Llm("script exhausted".to_string()))
        }
    }
}

struct RecordingEngine {
    explain_error: Option<String>,
    execute_error: Option<String>,
    result: QueryResult,
    explain_calls: AtomicUsize,
    execute_calls: AtomicUsize,
}

impl RecordingEngine {
    fn ok(result: QueryResult) -> Self {
        Self {
            explain_error: None,
            execute_error: None,
            result,
            explain_calls: AtomicUsize::new(0),
            execute_calls: AtomicUsize::new(0),
        }
    }

    fn explain_failing(message: &str) -> Self {
        Self {
            explain_error: Some(message.to_string()),
            ..Self::ok(QueryResult::empty())
        }
    }

    fn execute_failing(message: &str) -> Self {
        Self {
            execute_error: Some(message.to_string()),
            ..Self::ok(QueryResult::empty())
        }
    }
}

#[async_trait]
impl SqlEngine for RecordingEngine {
    async fn explain(&self, _sql: &str) -> Result<()> {
        self.explain_calls.fetch_add(1, Ordering::SeqCst);
        match &self.explain_error {
            Some(message) => Err(EngineError::Validation(message.clone())),
            None => Ok(()),
        }
    }

    async fn execute(&self, _sql: &str) -> Result<QueryResult> {
        self.execute_calls.fetch_add(1, Ordering::SeqCst);
        match &self.execute_error {
            Some(message) => Err(EngineError::Execution(message.clone())),
            None => Ok(self.result.clone()),
        }
    }
}

fn row(pairs: &[(&str, serde_json::Value)]) -> serde_json::Map<String, serde_json::Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn monthly_result() -> QueryResult {
    QueryResult::new(
        vec!["month".to_string(), "total_amount".to_string()],
        vec![
            row(&[("month", json!("2024-01")), ("total_amount", json!(1250.5))]),
            row(&[("month", json!("2024-02")), ("total_amount", json!(2310.0))]),
        ],
    )
}

fn engine_with(llm: Arc<ScriptedLlm>, sql: Arc<RecordingEngine>) -> AnalysisEngine {
    AnalysisEngine::new(
        EngineConfig::default(),
        Arc::new(StaticSchema::new(order_schema())),
        Arc::new(InMemoryVectorIndex::new()),
        llm,
        sql,
    )
    .unwrap()
}

#[tokio::test]
async fn test_unanalyzable_question_short_circuits() {
    let llm = Arc::new(ScriptedLlm::new(&[]));
    let sql = Arc::new(RecordingEngine::ok(monthly_result()));
    let engine = engine_with(llm.clone(), sql.clone());

    let report = engine
        .analyze(AnalysisRequest::new("hello there", "ds"))
        .await;

    assert!(!report.success);
    assert!(report.error.unwrap().contains("not analyzable"));
    assert_eq!(report.result_type, ResultShape::Text);
    assert_eq!(llm.calls.load(Ordering::SeqCst), 0);
    assert_eq!(sql.explain_calls.load(Ordering::SeqCst), 0);
    assert_eq!(sql.execute_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_empty_retrieval_degrades_to_schemaless_generation() {
    // valid intent, but the catalog only holds unrelated tables, so every
    // retrieval strategy comes back empty; generation must still run with
    // an empty schema block instead of ending the session
    let llm = Arc::new(ScriptedLlm::new(&[VALID_SQL, "table"]));
    let sql = Arc::new(RecordingEngine::ok(monthly_result()));
    let engine = engine_with(llm.clone(), sql.clone());

    let report = engine
        .analyze(AnalysisRequest::new("显示加油明细", "ds"))
        .await;

    assert!(report.success, "error: {:?}", report.error);
    // one generation call and one classification call
    assert_eq!(llm.calls.load(Ordering::SeqCst), 2);
    assert_eq!(sql.execute_calls.load(Ordering::SeqCst), 1);
    assert_eq!(report.sql_query.as_deref(), Some(VALID_SQL));
}

#[tokio::test]
async fn test_retry_budget_is_bounded() {
    let llm = Arc::new(ScriptedLlm::new(&[VALID_SQL]));
    let sql = Arc::new(RecordingEngine::explain_failing(
        "relation \"order\" does not exist",
    ));
    let engine = engine_with(llm.clone(), sql.clone());

    let report = engine.analyze(AnalysisRequest::new(QUESTION, "ds")).await;

    assert!(!report.success);
    // 1 initial generation + 3 retries, then the session gives up
    assert_eq!(llm.calls.load(Ordering::SeqCst), 4);
    assert_eq!(sql.explain_calls.load(Ordering::SeqCst), 4);
    assert_eq!(sql.execute_calls.load(Ordering::SeqCst), 0);
    assert_eq!(report.result_type, ResultShape::Text);
    let error = report.error.unwrap();
    assert!(error.contains("after 4 attempts"), "error: {}", error);
    assert!(error.contains("relation \"order\" does not exist"));
}

#[tokio::test]
async fn test_denylisted_sql_is_retried_and_never_reaches_engine() {
    let llm = Arc::new(ScriptedLlm::new(&["DROP TABLE orders", VALID_SQL, "table"]));
    let sql = Arc::new(RecordingEngine::ok(monthly_result()));
    let engine = engine_with(llm.clone(), sql.clone());

    let report = engine.analyze(AnalysisRequest::new(QUESTION, "ds")).await;

    assert!(report.success, "error: {:?}", report.error);
    // only the corrected statement was explained and executed
    assert_eq!(sql.explain_calls.load(Ordering::SeqCst), 1);
    assert_eq!(sql.execute_calls.load(Ordering::SeqCst), 1);
    // two generations plus one classification call
    assert_eq!(llm.calls.load(Ordering::SeqCst), 3);
    assert_eq!(report.sql_query.as_deref(), Some(VALID_SQL));
    assert_eq!(report.result_type, ResultShape::Table);
}

#[tokio::test]
async fn test_execution_failure_is_fatal() {
    let llm = Arc::new(ScriptedLlm::new(&[VALID_SQL]));
    let sql = Arc::new(RecordingEngine::execute_failing("division by zero"));
    let engine = engine_with(llm.clone(), sql.clone());

    let report = engine.analyze(AnalysisRequest::new(QUESTION, "ds")).await;

    assert!(!report.success);
    // execution errors are never retried
    assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
    assert_eq!(sql.execute_calls.load(Ordering::SeqCst), 1);
    assert!(report.error.unwrap().contains("division by zero"));
}

#[tokio::test]
async fn test_chart_classification_end_to_end() {
    let llm = Arc::new(ScriptedLlm::new(&[VALID_SQL, "chart:bar"]));
    let sql = Arc::new(RecordingEngine::ok(monthly_result()));
    let engine = engine_with(llm.clone(), sql.clone());

    let report = engine.analyze(AnalysisRequest::new(QUESTION, "ds")).await;

    assert!(report.success, "error: {:?}", report.error);
    assert_eq!(report.result_type, ResultShape::Chart);
    assert_eq!(report.row_count, 2);
    let chart = report.chart.unwrap();
    assert_eq!(chart.kind, ChartKind::Bar);
    assert_eq!(chart.x_field, "month");
    assert_eq!(chart.y_field, "total_amount");
    assert_eq!(chart.title, QUESTION);
}

#[tokio::test]
async fn test_fenced_sql_is_stripped() {
    let fenced = format!("```sql\n{}\n```", VALID_SQL);
    let llm = Arc::new(ScriptedLlm::new(&[&fenced, "table"]));
    let sql = Arc::new(RecordingEngine::ok(monthly_result()));
    let engine = engine_with(llm, sql);

    let report = engine.analyze(AnalysisRequest::new(QUESTION, "ds")).await;

    assert!(report.success, "error: {:?}", report.error);
    assert_eq!(report.sql_query.as_deref(), Some(VALID_SQL));
}

#[tokio::test]
async fn test_identical_runs_produce_identical_reports() {
    let mut outcomes = Vec::new();
    for _ in 0..2 {
        let llm = Arc::new(ScriptedLlm::new(&[VALID_SQL, "chart:bar"]));
        let sql = Arc::new(RecordingEngine::ok(monthly_result()));
        let engine = engine_with(llm, sql);
        let report = engine.analyze(AnalysisRequest::new(QUESTION, "ds")).await;
        outcomes.push((report.sql_query, report.result_type));
    }
    assert_eq!(outcomes[0], outcomes[1]);
}

#[tokio::test]
async fn test_catalog_is_cached_across_sessions() {
    // a single scripted reply repeats, so both sessions behave identically
    let llm = Arc::new(ScriptedLlm::new(&[VALID_SQL]));
    let sql = Arc::new(RecordingEngine::ok(monthly_result()));
    let introspector = Arc::new(StaticSchema::new(order_schema()));
    let engine = AnalysisEngine::new(
        EngineConfig::default(),
        introspector.clone(),
        Arc::new(InMemoryVectorIndex::new()),
        llm,
        sql,
    )
    .unwrap();

    engine.analyze(AnalysisRequest::new(QUESTION, "ds")).await;
    engine.analyze(AnalysisRequest::new(QUESTION, "ds")).await;

    assert_eq!(introspector.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_streaming_emits_stage_events_in_order() {
    let llm = Arc::new(ScriptedLlm::new(&[VALID_SQL, "chart:bar"]));
    let sql = Arc::new(RecordingEngine::ok(monthly_result()));
    let engine = engine_with(llm, sql);

    let (tx, mut rx) = mpsc::channel::<StageEvent>(64);
    let report = engine
        .analyze_streaming(AnalysisRequest::new(QUESTION, "ds"), tx)
        .await;
    assert!(report.success, "error: {:?}", report.error);

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }

    assert_eq!(events[0].stage, AnalysisState::IntentRecognized);
    assert_eq!(events[0].status, StageStatus::Started);

    let completed: Vec<AnalysisState> = events
        .iter()
        .filter(|e| e.status == StageStatus::Completed)
        .map(|e| e.stage)
        .collect();
    assert_eq!(
        completed,
        vec![
            AnalysisState::IntentRecognized,
            AnalysisState::MetadataRetrieval,
            AnalysisState::SqlGeneration,
            AnalysisState::SqlValidation,
            AnalysisState::SqlExecution,
            AnalysisState::ResultTypeDetermination,
        ]
    );
}

#[tokio::test]
async fn test_streaming_skip_event_when_retries_exhaust() {
    let llm = Arc::new(ScriptedLlm::new(&[VALID_SQL]));
    let sql = Arc::new(RecordingEngine::explain_failing("syntax error at or near"));
    let engine = engine_with(llm, sql);

    let (tx, mut rx) = mpsc::channel::<StageEvent>(64);
    let report = engine
        .analyze_streaming(AnalysisRequest::new(QUESTION, "ds"), tx)
        .await;
    assert!(!report.success);

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    assert!(events
        .iter()
        .any(|e| e.stage == AnalysisState::SqlExecution && e.status == StageStatus::Skipped));
}

#[tokio::test]
async fn test_dropped_receiver_halts_session() {
    let llm = Arc::new(ScriptedLlm::new(&[VALID_SQL, "chart:bar"]));
    let sql = Arc::new(RecordingEngine::ok(monthly_result()));
    let engine = engine_with(llm.clone(), sql.clone());

    let (tx, rx) = mpsc::channel::<StageEvent>(1);
    drop(rx);
    let report = engine
        .analyze_streaming(AnalysisRequest::new(QUESTION, "ds"), tx)
        .await;

    assert!(!report.success);
    assert!(report.error.unwrap().contains("disconnected"));
    assert_eq!(llm.calls.load(Ordering::SeqCst), 0);
    assert_eq!(sql.execute_calls.load(Ordering::SeqCst), 0);
}
