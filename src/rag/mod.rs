pub mod embeddings;
pub mod index_manager;
#[cfg(test)]
pub(crate) mod mock;
pub mod vector_store;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::models::{Document, KnowledgeSource};
use self::embeddings::EmbeddingGenerator;
use self::vector_store::{ChunkRecord, VectorStore};

/// Read/write access to the document corpus.
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    async fn retrieve(&self, query: &str, top_k: u64) -> Result<Vec<Document>>;

    /// Embed and store loose texts. Returns how many were written.
    async fn add_texts(&self, texts: Vec<String>, source: KnowledgeSource) -> Result<usize>;

    /// Store one caller-identified document; re-adding an id replaces it.
    async fn add_document(&self, id: &str, text: &str, metadata: Map<String, Value>) -> Result<()>;
}

pub struct RagEngine {
    embeddings: Arc<EmbeddingGenerator>,
    vector_store: Arc<VectorStore>,
}

/// Content-addressed id so re-adding the same text overwrites it.
pub fn text_id(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(&hasher.finalize()[..8])
}

impl RagEngine {
    pub fn new(embeddings: Arc<EmbeddingGenerator>, vector_store: Arc<VectorStore>) -> Self {
        Self {
            embeddings,
            vector_store,
        }
    }
}

#[async_trait]
impl KnowledgeStore for RagEngine {
    async fn retrieve(&self, query: &str, top_k: u64) -> Result<Vec<Document>> {
        let query_embedding = self.embeddings.embed_query(query).await?;
        let docs = self.vector_store.search(query_embedding, top_k).await?;
        tracing::info!(documents = docs.len(), "Retrieved {} candidate documents", docs.len());
        Ok(docs)
    }

    async fn add_texts(&self, texts: Vec<String>, source: KnowledgeSource) -> Result<usize> {
        if texts.is_empty() {
            tracing::warn!("No new documents to add, skipping vector store update");
            return Ok(0);
        }

        let records: Vec<ChunkRecord> = texts
            .iter()
            .map(|text| {
                let id = format!("{}_{}", source.as_str(), text_id(text));
                ChunkRecord {
                    key: id.clone(),
                    text: text.clone(),
                    source,
                    file_id: id,
                    metadata: Map::new(),
                }
            })
            .collect();

        let embeddings = self.embeddings.embed_documents(texts).await?;
        let written = self.vector_store.upsert(records, embeddings).await?;
        tracing::info!(written, source = %source, "Added texts to vector store");
        Ok(written)
    }

    async fn add_document(&self, id: &str, text: &str, mut metadata: Map<String, Value>) -> Result<()> {
        // Only the file indexer may mark points for stale cleanup.
        metadata.remove("origin");
        let embedding = self.embeddings.embed_query(text).await?;
        let record = ChunkRecord {
            key: id.to_string(),
            text: text.to_string(),
            source: KnowledgeSource::Internal,
            file_id: id.to_string(),
            metadata,
        };
        self.vector_store.upsert(vec![record], vec![embedding]).await?;
        Ok(())
    }
}
