//! In-memory `ChunkIndex` for indexing and server tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Map;
use tokio::sync::Semaphore;

use crate::models::KnowledgeSource;
use super::index_manager::ChunkIndex;
use super::vector_store::{ChunkRecord, INDEXER_ORIGIN};

/// Keeps points by key, like the collection does, and records every
/// upserted batch and deletion.
#[derive(Default)]
pub struct MemoryIndex {
    points: Mutex<BTreeMap<String, ChunkRecord>>,
    batches: Mutex<Vec<usize>>,
    deleted: Mutex<Vec<String>>,
    gate: Option<Semaphore>,
    panic_on_embed: bool,
}

impl MemoryIndex {
    /// Every `embed` call waits until `open_gate`.
    pub fn gated() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::default()
        }
    }

    pub fn panicking() -> Self {
        Self {
            panic_on_embed: true,
            ..Self::default()
        }
    }

    pub fn open_gate(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1);
        }
    }

    /// A point written through the upload API rather than the indexer.
    pub fn insert_upload(&self, id: &str, text: &str) {
        let record = ChunkRecord {
            key: id.to_string(),
            text: text.to_string(),
            source: KnowledgeSource::Internal,
            file_id: id.to_string(),
            metadata: Map::new(),
        };
        self.points.lock().unwrap().insert(record.key.clone(), record);
    }

    pub fn records(&self) -> Vec<ChunkRecord> {
        self.points.lock().unwrap().values().cloned().collect()
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batches.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn indexed_file_count(&self) -> usize {
        self.points
            .lock()
            .unwrap()
            .values()
            .filter(|r| is_indexer_point(r))
            .map(|r| r.file_id.clone())
            .collect::<HashSet<_>>()
            .len()
    }
}

fn is_indexer_point(record: &ChunkRecord) -> bool {
    record.metadata.get("origin").and_then(|v| v.as_str()) == Some(INDEXER_ORIGIN)
}

#[async_trait]
impl ChunkIndex for MemoryIndex {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await?;
        }
        if self.panic_on_embed {
            panic!("embedder exploded");
        }
        Ok(texts.iter().map(|t| vec![t.len() as f32]).collect())
    }

    async fn upsert(&self, records: Vec<ChunkRecord>, embeddings: Vec<Vec<f32>>) -> Result<usize> {
        anyhow::ensure!(records.len() == embeddings.len(), "embedding count mismatch");
        let count = records.len();
        self.batches.lock().unwrap().push(count);
        let mut points = self.points.lock().unwrap();
        for record in records {
            points.insert(record.key.clone(), record);
        }
        Ok(count)
    }

    async fn indexed_files(&self) -> Result<HashMap<String, String>> {
        let points = self.points.lock().unwrap();
        Ok(points
            .values()
            .filter(|r| is_indexer_point(r))
            .filter_map(|r| {
                let path = r.metadata.get("file_path")?.as_str()?;
                Some((r.file_id.clone(), path.to_string()))
            })
            .collect())
    }

    async fn delete_files(&self, file_ids: Vec<String>) -> Result<()> {
        let mut points = self.points.lock().unwrap();
        points.retain(|_, r| !(is_indexer_point(r) && file_ids.contains(&r.file_id)));
        self.deleted.lock().unwrap().extend(file_ids);
        Ok(())
    }
}
