pub mod bootstrap;
pub mod config;
pub mod crag;
pub mod error;
pub mod indexer;
pub mod llm;
pub mod logger;
pub mod models;
pub mod rag;
pub mod server;
pub mod telemetry;
pub mod web_search;
