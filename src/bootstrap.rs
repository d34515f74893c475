//! Wiring from `Settings` to live components, shared by the binaries.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;

use crate::config::Settings;
use crate::crag::{CorrectiveRag, CragOptions};
use crate::llm::LlmClient;
use crate::logger::RunLogger;
use crate::rag::embeddings::EmbeddingGenerator;
use crate::rag::index_manager::{IndexManager, QdrantIndex};
use crate::rag::vector_store::VectorStore;
use crate::rag::RagEngine;
use crate::server::AppState;
use crate::web_search::DuckDuckGoSearch;

async fn connect_store(settings: &Settings) -> Result<(Arc<EmbeddingGenerator>, Arc<VectorStore>)> {
    let embeddings = Arc::new(EmbeddingGenerator::new(&settings.embedding, &settings.llm).await?);
    let vector_store =
        Arc::new(VectorStore::new(&settings.vector_store, embeddings.dimensions()).await?);
    Ok((embeddings, vector_store))
}

fn assemble(settings: &Settings, engine: Arc<RagEngine>) -> Result<CorrectiveRag> {
    tracing::info!("Using model {} at {}", settings.llm.model, settings.llm.base_url);
    let llm = Arc::new(LlmClient::new(&settings.llm)?);

    let mut crag = CorrectiveRag::new(llm, engine, CragOptions::from_settings(settings));
    if settings.web_search.enabled {
        crag = crag.with_web_search(Arc::new(DuckDuckGoSearch::new(&settings.web_search)?));
    } else {
        tracing::info!("Web search disabled; corrections fall back to fixed messages");
    }
    Ok(crag)
}

pub async fn build_pipeline(settings: &Settings) -> Result<CorrectiveRag> {
    let (embeddings, vector_store) = connect_store(settings).await?;
    assemble(settings, Arc::new(RagEngine::new(embeddings, vector_store)))
}

pub async fn build_app_state(settings: &Settings) -> Result<AppState> {
    let (embeddings, vector_store) = connect_store(settings).await?;
    let engine = Arc::new(RagEngine::new(Arc::clone(&embeddings), Arc::clone(&vector_store)));

    let index_manager = Arc::new(IndexManager::new(
        PathBuf::from(&settings.indexer.source_dir),
        &settings.indexer,
        Arc::new(QdrantIndex::new(embeddings, vector_store)),
    ));

    let run_log = match &settings.database.url {
        Some(url) => {
            let run_log = RunLogger::new(url).await?;
            run_log.init_schema().await?;
            tracing::info!("Run log enabled");
            Some(run_log)
        }
        None => {
            tracing::info!("No database configured, run log disabled");
            None
        }
    };

    Ok(AppState {
        crag: assemble(settings, Arc::clone(&engine))?,
        store: engine,
        index_manager: Some(index_manager),
        run_log,
        model_name: settings.llm.model.clone(),
    })
}
