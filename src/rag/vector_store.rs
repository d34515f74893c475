use std::collections::HashMap;

use anyhow::Result;
use qdrant_client::qdrant::{
    value::Kind, Condition, CreateCollectionBuilder, DeleteCollectionBuilder,
    DeletePointsBuilder, Distance, Filter, PointId, PointStruct, ScrollPointsBuilder,
    SearchPointsBuilder, UpsertPointsBuilder, Value as QdrantValue, VectorParamsBuilder,
};
use qdrant_client::Qdrant;
use serde_json::{Map as JsonMap, Value as JsonValue};
use uuid::Uuid;

use crate::config::VectorStoreConfig;
use crate::models::{Document, KnowledgeSource};

/// `origin` payload value marking points written by the file indexer.
pub const INDEXER_ORIGIN: &str = "indexer";

/// One chunk ready to be written to the collection.
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    /// Stable key (`{file_id}_{chunk_index}`) the point id is derived from.
    pub key: String,
    pub text: String,
    pub source: KnowledgeSource,
    pub file_id: String,
    pub metadata: JsonMap<String, JsonValue>,
}

impl ChunkRecord {
    pub fn point_id(&self) -> String {
        point_id_for(&self.key)
    }
}

/// Qdrant only accepts UUID or integer ids; derive a UUIDv5 from the chunk key
/// so re-indexing a file overwrites its points.
pub fn point_id_for(key: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes()).to_string()
}

pub struct VectorStore {
    client: Qdrant,
    collection_name: String,
    dimensions: u64,
}

impl VectorStore {
    pub async fn new(config: &VectorStoreConfig, dimensions: u64) -> Result<Self> {
        tracing::info!("Building Qdrant client for URL: {}", config.url);
        let mut builder = Qdrant::from_url(&config.url);
        if let Some(ref key) = config.api_key {
            builder = builder.api_key(key.clone());
        }
        let client = builder
            .build()
            .map_err(|e| anyhow::anyhow!("Qdrant client build failed: {}", e))?;

        let store = Self {
            client,
            collection_name: config.collection.clone(),
            dimensions,
        };

        store.ensure_collection().await?;
        tracing::info!(collection = %store.collection_name, "Qdrant collection ready");

        Ok(store)
    }

    pub fn collection_name(&self) -> &str {
        &self.collection_name
    }

    async fn ensure_collection(&self) -> Result<()> {
        if !self.client.collection_exists(&self.collection_name).await? {
            tracing::info!(
                collection = %self.collection_name,
                dimensions = self.dimensions,
                "Creating Qdrant collection"
            );
            self.client
                .create_collection(
                    CreateCollectionBuilder::new(&self.collection_name)
                        .vectors_config(VectorParamsBuilder::new(self.dimensions, Distance::Cosine)),
                )
                .await?;
        }
        Ok(())
    }

    /// Drop every point by deleting and recreating the collection.
    pub async fn recreate(&self) -> Result<()> {
        if self.client.collection_exists(&self.collection_name).await? {
            self.client
                .delete_collection(DeleteCollectionBuilder::new(&self.collection_name))
                .await?;
        }
        self.ensure_collection().await
    }

    pub async fn upsert(&self, records: Vec<ChunkRecord>, embeddings: Vec<Vec<f32>>) -> Result<usize> {
        if records.len() != embeddings.len() {
            anyhow::bail!(
                "Got {} embeddings for {} records",
                embeddings.len(),
                records.len()
            );
        }
        if records.is_empty() {
            return Ok(0);
        }

        let points: Vec<PointStruct> = records
            .into_iter()
            .zip(embeddings)
            .map(|(record, embedding)| {
                let id = record.point_id();
                let mut payload = record.metadata;
                payload.insert("text".to_string(), JsonValue::String(record.text));
                payload.insert("source".to_string(), JsonValue::String(record.source.as_str().to_string()));
                payload.insert("file_id".to_string(), JsonValue::String(record.file_id));
                PointStruct::new(id, embedding, payload)
            })
            .collect();

        let count = points.len();
        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection_name, points).wait(true))
            .await?;

        Ok(count)
    }

    pub async fn search(&self, query_vector: Vec<f32>, limit: u64) -> Result<Vec<Document>> {
        let search_result = self
            .client
            .search_points(
                SearchPointsBuilder::new(&self.collection_name, query_vector, limit)
                    .with_payload(true),
            )
            .await?;

        let mut results = Vec::new();
        for point in search_result.result {
            let Some(text) = point.payload.get("text").and_then(|v| v.as_str()) else {
                continue;
            };
            let source = point
                .payload
                .get("source")
                .and_then(|v| v.as_str())
                .and_then(|s| KnowledgeSource::parse(s))
                .unwrap_or(KnowledgeSource::Internal);

            let mut metadata = JsonMap::new();
            for key in ["file_path", "page", "chunk_index", "title"] {
                if let Some(value) = point.payload.get(key).and_then(payload_to_json) {
                    metadata.insert(key.to_string(), value);
                }
            }

            results.push(
                Document::new(text.to_string(), source)
                    .with_score(point.score)
                    .with_metadata(JsonValue::Object(metadata)),
            );
        }

        Ok(results)
    }

    /// `file_id -> file_path` of every point the file indexer wrote.
    /// Points from uploads and web search have no `origin` and are skipped.
    pub async fn scroll_indexed_files(&self) -> Result<HashMap<String, String>> {
        let mut files = HashMap::new();
        let mut offset: Option<PointId> = None;

        loop {
            let mut builder = ScrollPointsBuilder::new(&self.collection_name)
                .filter(indexer_filter(Vec::new()))
                .limit(256)
                .with_payload(true)
                .with_vectors(false);

            if let Some(ref off) = offset {
                builder = builder.offset(off.clone());
            }

            let result = self.client.scroll(builder).await?;

            for point in &result.result {
                let id = point.payload.get("file_id").and_then(|v| v.as_str());
                let path = point.payload.get("file_path").and_then(|v| v.as_str());
                if let (Some(id), Some(path)) = (id, path) {
                    files.insert(id.to_string(), path.to_string());
                }
            }

            offset = result.next_page_offset;
            if offset.is_none() {
                break;
            }
        }

        Ok(files)
    }

    /// Delete indexer points of the given files. Non-indexer points sharing
    /// a `file_id` value are left alone.
    pub async fn delete_by_file_ids(&self, file_ids: Vec<String>) -> Result<()> {
        if file_ids.is_empty() {
            return Ok(());
        }

        self.client
            .delete_points(
                DeletePointsBuilder::new(&self.collection_name)
                    .points(indexer_filter(file_ids))
                    .wait(true),
            )
            .await?;

        Ok(())
    }
}

fn indexer_filter(file_ids: Vec<String>) -> Filter {
    let mut conditions = vec![Condition::matches("origin", INDEXER_ORIGIN.to_string())];
    if !file_ids.is_empty() {
        conditions.push(Condition::matches("file_id", file_ids));
    }
    Filter::must(conditions)
}

fn payload_to_json(value: &QdrantValue) -> Option<JsonValue> {
    match value.kind.as_ref()? {
        Kind::StringValue(s) => Some(JsonValue::String(s.clone())),
        Kind::IntegerValue(i) => Some(JsonValue::from(*i)),
        Kind::DoubleValue(d) => Some(JsonValue::from(*d)),
        Kind::BoolValue(b) => Some(JsonValue::Bool(*b)),
        _ => None,
    }
}
