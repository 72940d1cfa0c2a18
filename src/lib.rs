pub mod catalog;
pub mod classifier;
pub mod config;
pub mod datasource;
pub mod db;
pub mod descriptor;
pub mod engine;
pub mod error;
pub mod graph;
pub mod intent;
pub mod llm;
pub mod metadata;
pub mod prompts;
pub mod retriever;
pub mod session;
pub mod text;
pub mod validator;
pub mod vector;
