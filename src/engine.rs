//! Analysis Engine
//!
//! The orchestrator walking a question through intent recognition, metadata
//! retrieval, SQL generation, validation with bounded retry, execution and
//! result shaping. The state machine is an explicit enum driven by a
//! `loop`/`match`; `analyze` never returns an error, every failure lands in
//! the report's `error` field.

use crate::catalog::DatasourceCatalog;
use crate::classifier::{ResultClassifier, ResultShape};
use crate::config::EngineConfig;
use crate::datasource::{SchemaIntrospector, SqlEngine};
use crate::descriptor::SchemaDescriptor;
use crate::error::Result;
use crate::intent::IntentClassifier;
use crate::llm::{strip_code_fences, LanguageModel};
use crate::prompts;
use crate::retriever::SmartRetriever;
use crate::session::{
    AnalysisReport, AnalysisRequest, AnalysisSession, AnalysisState, StageEvent, StageStatus,
};
use crate::validator::SqlValidator;
use crate::vector::VectorIndex;
use dashmap::DashMap;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{info, warn};

pub struct AnalysisEngine {
    config: Arc<EngineConfig>,
    introspector: Arc<dyn SchemaIntrospector>,
    vector_index: Arc<dyn VectorIndex>,
    sql_engine: Arc<dyn SqlEngine>,
    llm: Arc<dyn LanguageModel>,
    intent_classifier: IntentClassifier,
    retriever: SmartRetriever,
    descriptor: SchemaDescriptor,
    validator: SqlValidator,
    classifier: ResultClassifier,
    catalogs: DashMap<String, Arc<DatasourceCatalog>>,
}

impl AnalysisEngine {
    pub fn new(
        config: EngineConfig,
        introspector: Arc<dyn SchemaIntrospector>,
        vector_index: Arc<dyn VectorIndex>,
        llm: Arc<dyn LanguageModel>,
        sql_engine: Arc<dyn SqlEngine>,
    ) -> Result<Self> {
        let config = Arc::new(config);
        let validator =
            SqlValidator::new(sql_engine.clone(), &config.vocabulary.forbidden_keywords)?;
        let classifier = ResultClassifier::new(
            llm.clone(),
            config.max_chart_rows,
            config.classify_sample_rows,
        );
        let retriever = SmartRetriever::new(vector_index.clone(), config.clone());
        let intent_classifier = IntentClassifier::new(config.vocabulary.clone());
        let descriptor = SchemaDescriptor::new(config.vocabulary.clone());

        Ok(Self {
            config,
            introspector,
            vector_index,
            sql_engine,
            llm,
            intent_classifier,
            retriever,
            descriptor,
            validator,
            classifier,
            catalogs: DashMap::new(),
        })
    }

    /// Introspect a datasource, describe and index every table, and cache the
    /// resulting catalog. Called explicitly after schema changes; `analyze`
    /// falls back to it on first contact with an unknown datasource id.
    pub async fn sync_datasource(&self, datasource_id: &str) -> Result<Arc<DatasourceCatalog>> {
        let tables = self.introspector.get_tables(datasource_id).await?;
        let catalog = Arc::new(DatasourceCatalog::build(
            datasource_id,
            tables,
            &self.descriptor,
        ));
        self.vector_index
            .upsert(datasource_id, catalog.index_entries())
            .await?;
        self.catalogs
            .insert(datasource_id.to_string(), catalog.clone());
        info!(
            "Synced datasource '{}' with {} tables",
            datasource_id,
            catalog.len()
        );
        Ok(catalog)
    }

    async fn catalog(&self, datasource_id: &str) -> Result<Arc<DatasourceCatalog>> {
        if let Some(catalog) = self.catalogs.get(datasource_id) {
            return Ok(catalog.clone());
        }
        self.sync_datasource(datasource_id).await
    }

    pub async fn analyze(&self, request: AnalysisRequest) -> AnalysisReport {
        self.run(request, None).await
    }

    /// Same pipeline, with one `StageEvent` per stage transition pushed onto
    /// the channel. A closed channel halts the session at the next
    /// between-stage checkpoint.
    pub async fn analyze_streaming(
        &self,
        request: AnalysisRequest,
        events: mpsc::Sender<StageEvent>,
    ) -> AnalysisReport {
        self.run(request, Some(&events)).await
    }

    async fn run(
        &self,
        request: AnalysisRequest,
        events: Option<&mpsc::Sender<StageEvent>>,
    ) -> AnalysisReport {
        let started = Instant::now();
        let mut session = AnalysisSession::new(&request);

        info!(
            "Starting analysis {} for question: {}",
            session.id, session.user_query
        );

        let catalog = match self.catalog(&request.datasource_id).await {
            Ok(catalog) => catalog,
            Err(e) => {
                session.error = Some(format!("Failed to load datasource schema: {}", e));
                return self.report(session, started);
            }
        };

        let mut state = AnalysisState::IntentRecognized;
        loop {
            // A dropped streaming receiver means nobody is waiting for the
            // answer; stop before the next stage spends model calls or
            // queries.
            if let Some(tx) = events {
                if tx.is_closed() && state != AnalysisState::End {
                    session.error = Some("client disconnected".to_string());
                    state = AnalysisState::End;
                }
            }

            state = match state {
                AnalysisState::IntentRecognized => {
                    self.recognize_intent(&catalog, &mut session, events).await
                }
                AnalysisState::MetadataRetrieval => {
                    self.retrieve_metadata(&catalog, &mut session, events).await
                }
                AnalysisState::SqlGeneration => self.generate_sql(&mut session, events).await,
                AnalysisState::SqlValidation => self.validate_sql(&mut session, events).await,
                AnalysisState::SqlExecution => self.execute_sql(&mut session, events).await,
                AnalysisState::ResultTypeDetermination => {
                    self.determine_result_type(&mut session, events).await
                }
                AnalysisState::End => break,
            };
        }

        self.report(session, started)
    }

    async fn recognize_intent(
        &self,
        catalog: &DatasourceCatalog,
        session: &mut AnalysisSession,
        events: Option<&mpsc::Sender<StageEvent>>,
    ) -> AnalysisState {
        self.emit(events, AnalysisState::IntentRecognized, StageStatus::Started, json!({}))
            .await;

        // A pinned table contributes its business domain as an extra entity.
        let pinned_domain = match session.table_hint.as_deref() {
            Some(hint) => self
                .retriever
                .resolve_hint(catalog, hint)
                .and_then(|name| catalog.description(&name).map(|d| d.business_domain.clone())),
            None => None,
        };

        let intent = self
            .intent_classifier
            .classify(&session.user_query, pinned_domain.as_deref());
        let valid = intent.valid;
        session.intent = Some(intent);

        if !valid {
            session.error = Some(
                "question is not analyzable; no recognizable business entity or analysis intent"
                    .to_string(),
            );
            self.emit(
                events,
                AnalysisState::IntentRecognized,
                StageStatus::Failed,
                json!({ "intent": &session.intent }),
            )
            .await;
            return AnalysisState::End;
        }

        self.emit(
            events,
            AnalysisState::IntentRecognized,
            StageStatus::Completed,
            json!({ "intent": &session.intent }),
        )
        .await;
        AnalysisState::MetadataRetrieval
    }

    async fn retrieve_metadata(
        &self,
        catalog: &DatasourceCatalog,
        session: &mut AnalysisSession,
        events: Option<&mpsc::Sender<StageEvent>>,
    ) -> AnalysisState {
        self.emit(events, AnalysisState::MetadataRetrieval, StageStatus::Started, json!({}))
            .await;

        let intent = match session.intent.clone() {
            Some(intent) => intent,
            None => {
                session.error = Some("internal state error: intent missing".to_string());
                return AnalysisState::End;
            }
        };

        let results = self
            .retriever
            .retrieve(
                catalog,
                &session.user_query,
                &intent,
                session.table_hint.as_deref(),
                self.config.retrieval_limit,
            )
            .await;

        let names: Vec<String> = results.iter().map(|r| r.table_name.clone()).collect();
        if names.is_empty() {
            // Degraded mode, not an error: generation still runs, with an
            // empty schema block in the prompt.
            warn!("No relevant tables found, continuing without schema context");
        } else {
            info!("Retrieved {} candidate tables: {:?}", results.len(), names);
        }
        session.retrieved_tables = results;
        self.emit(
            events,
            AnalysisState::MetadataRetrieval,
            StageStatus::Completed,
            json!({ "tables": names }),
        )
        .await;
        AnalysisState::SqlGeneration
    }

    async fn generate_sql(
        &self,
        session: &mut AnalysisSession,
        events: Option<&mpsc::Sender<StageEvent>>,
    ) -> AnalysisState {
        let attempt = session.retry_count as u32 + 1;
        let max_attempts = self.config.max_retries as u32 + 1;
        info!("SQL generation attempt {} of {}", attempt, max_attempts);
        self.emit(
            events,
            AnalysisState::SqlGeneration,
            StageStatus::Started,
            json!({ "attempt": attempt }),
        )
        .await;

        let prompt = prompts::sql_generation_prompt(
            &session.user_query,
            &session.retrieved_tables,
            session.sql_query.as_deref(),
            &session.issues,
        );

        match self.llm.complete(&prompt).await {
            Ok(text) => {
                let sql = strip_code_fences(&text);
                session.sql_query = Some(sql);
                self.emit(
                    events,
                    AnalysisState::SqlGeneration,
                    StageStatus::Completed,
                    json!({ "sql": &session.sql_query }),
                )
                .await;
                AnalysisState::SqlValidation
            }
            Err(e) => {
                session.error = Some(format!("SQL generation failed: {}", e));
                self.emit(
                    events,
                    AnalysisState::SqlGeneration,
                    StageStatus::Failed,
                    json!({ "error": &session.error }),
                )
                .await;
                AnalysisState::End
            }
        }
    }

    async fn validate_sql(
        &self,
        session: &mut AnalysisSession,
        events: Option<&mpsc::Sender<StageEvent>>,
    ) -> AnalysisState {
        self.emit(events, AnalysisState::SqlValidation, StageStatus::Started, json!({}))
            .await;

        let sql = match session.sql_query.clone() {
            Some(sql) => sql,
            None => {
                session.error = Some("internal state error: no SQL to validate".to_string());
                return AnalysisState::End;
            }
        };

        let result = self.validator.validate(&sql).await;
        let valid = result.is_valid;
        session.issues.extend(result.issues.iter().cloned());
        session.validation_result = Some(result);

        if valid {
            self.emit(
                events,
                AnalysisState::SqlValidation,
                StageStatus::Completed,
                json!({ "sql": &sql }),
            )
            .await;
            return AnalysisState::SqlExecution;
        }

        if session.retry_count < self.config.max_retries {
            session.retry_count += 1;
            warn!(
                "SQL rejected, retry {} of {}: {:?}",
                session.retry_count, self.config.max_retries, session.issues
            );
            self.emit(
                events,
                AnalysisState::SqlValidation,
                StageStatus::Failed,
                json!({ "issues": &session.issues, "will_retry": true }),
            )
            .await;
            return AnalysisState::SqlGeneration;
        }

        session.error = Some(format!(
            "SQL validation failed after {} attempts: {}",
            self.config.max_retries as u32 + 1,
            session.issues.join("; ")
        ));
        self.emit(
            events,
            AnalysisState::SqlValidation,
            StageStatus::Failed,
            json!({ "issues": &session.issues, "will_retry": false }),
        )
        .await;
        self.emit(events, AnalysisState::SqlExecution, StageStatus::Skipped, json!({}))
            .await;
        AnalysisState::End
    }

    async fn execute_sql(
        &self,
        session: &mut AnalysisSession,
        events: Option<&mpsc::Sender<StageEvent>>,
    ) -> AnalysisState {
        let sql = match session.sql_query.clone() {
            Some(sql) => sql,
            None => {
                session.error = Some("internal state error: no SQL to execute".to_string());
                return AnalysisState::End;
            }
        };
        self.emit(
            events,
            AnalysisState::SqlExecution,
            StageStatus::Started,
            json!({ "sql": &sql }),
        )
        .await;

        let started = Instant::now();
        match self.sql_engine.execute(&sql).await {
            Ok(mut result) => {
                // wall clock, not the engine's own estimate
                result.execution_time = started.elapsed().as_secs_f64();
                info!(
                    "Query returned {} rows in {:.3}s",
                    result.row_count, result.execution_time
                );
                self.emit(
                    events,
                    AnalysisState::SqlExecution,
                    StageStatus::Completed,
                    json!({ "row_count": result.row_count, "execution_time": result.execution_time }),
                )
                .await;
                session.query_result = Some(result);
                AnalysisState::ResultTypeDetermination
            }
            Err(e) => {
                session.error = Some(format!("Query execution failed: {}", e));
                self.emit(
                    events,
                    AnalysisState::SqlExecution,
                    StageStatus::Failed,
                    json!({ "error": &session.error }),
                )
                .await;
                AnalysisState::End
            }
        }
    }

    async fn determine_result_type(
        &self,
        session: &mut AnalysisSession,
        events: Option<&mpsc::Sender<StageEvent>>,
    ) -> AnalysisState {
        self.emit(
            events,
            AnalysisState::ResultTypeDetermination,
            StageStatus::Started,
            json!({}),
        )
        .await;

        let result = match &session.query_result {
            Some(result) => result,
            None => {
                session.error = Some("internal state error: no result to classify".to_string());
                return AnalysisState::End;
            }
        };

        let classification = self.classifier.classify(&session.user_query, result).await;
        session.result_type = Some(classification.shape);
        session.chart_spec = classification.chart;

        self.emit(
            events,
            AnalysisState::ResultTypeDetermination,
            StageStatus::Completed,
            json!({ "result_type": classification.shape.as_str(), "chart": &session.chart_spec }),
        )
        .await;
        AnalysisState::End
    }

    async fn emit(
        &self,
        events: Option<&mpsc::Sender<StageEvent>>,
        stage: AnalysisState,
        status: StageStatus,
        payload: serde_json::Value,
    ) {
        if let Some(tx) = events {
            // a closed channel is handled at the between-stage checkpoint
            let _ = tx
                .send(StageEvent {
                    stage,
                    status,
                    payload,
                })
                .await;
        }
    }

    fn report(&self, session: AnalysisSession, started: Instant) -> AnalysisReport {
        let success = session.error.is_none() && session.query_result.is_some();
        let result_type = session.result_type.unwrap_or(if success {
            ResultShape::Table
        } else {
            ResultShape::Text
        });
        let row_count = session.query_result.as_ref().map_or(0, |r| r.row_count);

        if success {
            info!(
                "✅ Analysis {} complete: {} rows presented as {}",
                session.id,
                row_count,
                result_type.as_str()
            );
        } else {
            warn!(
                "Analysis {} failed: {}",
                session.id,
                session.error.as_deref().unwrap_or("unknown error")
            );
        }

        AnalysisReport {
            success,
            result_type,
            data: session.query_result,
            chart: session.chart_spec,
            error: session.error,
            sql_query: session.sql_query,
            execution_time_ms: started.elapsed().as_millis() as u64,
            row_count,
            session_id: session.id,
        }
    }
}
