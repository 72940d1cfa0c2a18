use anyhow::Result;
use clap::{Parser, Subcommand};
use smartquery::config::EngineConfig;
use smartquery::db::PostgresDatasource;
use smartquery::engine::AnalysisEngine;
use smartquery::llm::LlmClient;
use smartquery::session::{AnalysisRequest, StageEvent};
use smartquery::vector::InMemoryVectorIndex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "smartquery")]
#[command(about = "Natural language SQL analysis over PostgreSQL")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Introspect a datasource and build its schema index
    Index {
        /// Datasource identifier
        #[arg(short, long, default_value = "default")]
        datasource: String,
    },
    /// Ask a natural language question against an indexed datasource
    Ask {
        /// Datasource identifier
        #[arg(short, long, default_value = "default")]
        datasource: String,

        /// Pin retrieval to one table by (approximate) name
        #[arg(short, long)]
        table: Option<String>,

        /// Print stage events while the analysis runs
        #[arg(long)]
        stream: bool,

        /// The question, in Chinese or English
        question: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let database_url = std::env::var("DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;
    let datasource = Arc::new(PostgresDatasource::connect(&database_url).await?);
    let llm = Arc::new(LlmClient::from_env()?);
    let vector_index = Arc::new(InMemoryVectorIndex::new());

    let engine = AnalysisEngine::new(
        EngineConfig::default(),
        datasource.clone(),
        vector_index,
        llm,
        datasource,
    )?;

    match cli.command {
        Command::Index { datasource: id } => {
            let catalog = engine.sync_datasource(&id).await?;
            println!("✅ Indexed {} tables from datasource '{}'", catalog.len(), id);
        }
        Command::Ask {
            datasource: id,
            table,
            stream,
            question,
        } => {
            let mut request = AnalysisRequest::new(&question, &id);
            if let Some(table) = table {
                request = request.with_table_hint(&table);
            }

            let report = if stream {
                let (tx, mut rx) = mpsc::channel::<StageEvent>(32);
                let printer = tokio::spawn(async move {
                    while let Some(event) = rx.recv().await {
                        println!("[{}] {:?}", event.stage.as_str(), event.status);
                    }
                });
                let report = engine.analyze_streaming(request, tx).await;
                let _ = printer.await;
                report
            } else {
                engine.analyze(request).await
            };

            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}
