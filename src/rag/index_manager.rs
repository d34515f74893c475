use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use sha2::{Sha256, Digest};
use tokio::sync::Mutex;

use crate::config::IndexerConfig;
use crate::indexer::chunker::{chunk_pages, TextSplitter};
use crate::indexer::extractor::extract_pages;
use crate::indexer::walker::{walk_directory, SupportedFormat};
use crate::models::KnowledgeSource;
use super::embeddings::EmbeddingGenerator;
use super::vector_store::{ChunkRecord, VectorStore, INDEXER_ORIGIN};

/// Where indexed chunks go: an embedder plus the collection behind it.
#[async_trait]
pub trait ChunkIndex: Send + Sync {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>>;

    async fn upsert(&self, records: Vec<ChunkRecord>, embeddings: Vec<Vec<f32>>) -> Result<usize>;

    /// `file_id -> file_path` of every point written by the indexer.
    async fn indexed_files(&self) -> Result<HashMap<String, String>>;

    async fn delete_files(&self, file_ids: Vec<String>) -> Result<()>;
}

/// Live `ChunkIndex` over the embedding model and Qdrant.
pub struct QdrantIndex {
    embeddings: Arc<EmbeddingGenerator>,
    vector_store: Arc<VectorStore>,
}

impl QdrantIndex {
    pub fn new(embeddings: Arc<EmbeddingGenerator>, vector_store: Arc<VectorStore>) -> Self {
        Self { embeddings, vector_store }
    }
}

#[async_trait]
impl ChunkIndex for QdrantIndex {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        self.embeddings.embed_documents(texts).await
    }

    async fn upsert(&self, records: Vec<ChunkRecord>, embeddings: Vec<Vec<f32>>) -> Result<usize> {
        self.vector_store.upsert(records, embeddings).await
    }

    async fn indexed_files(&self) -> Result<HashMap<String, String>> {
        self.vector_store.scroll_indexed_files().await
    }

    async fn delete_files(&self, file_ids: Vec<String>) -> Result<()> {
        self.vector_store.delete_by_file_ids(file_ids).await
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexStatus {
    pub is_indexing: bool,
    pub last_indexed_at: Option<DateTime<Utc>>,
    pub total_files: usize,
    pub total_chunks: usize,
    pub failed_files: Vec<String>,
    pub source_dir: String,
    pub last_error: Option<String>,
}

/// Outcome of one indexing pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexReport {
    pub files_indexed: usize,
    pub chunks: usize,
    pub failed_files: Vec<(String, String)>,
    pub stale_files_removed: usize,
}

pub struct IndexManager {
    status: Mutex<IndexStatus>,
    source_dir: PathBuf,
    index: Arc<dyn ChunkIndex>,
    splitter: TextSplitter,
    batch_size: usize,
}

/// Canonical path of a file and the id of its points: the first 8 bytes of
/// the SHA-256 of that path, so `./data/x.pdf` and `data/x.pdf` share one id.
pub fn file_key(path: &Path) -> Result<(PathBuf, String)> {
    let canonical = std::fs::canonicalize(path)?;
    let mut hasher = Sha256::new();
    hasher.update(canonical.to_string_lossy().as_bytes());
    let result = hasher.finalize();
    Ok((canonical, hex::encode(&result[..8])))
}

impl IndexManager {
    pub fn new(source_dir: PathBuf, config: &IndexerConfig, index: Arc<dyn ChunkIndex>) -> Self {
        Self {
            status: Mutex::new(IndexStatus {
                is_indexing: false,
                last_indexed_at: None,
                total_files: 0,
                total_chunks: 0,
                failed_files: Vec::new(),
                source_dir: source_dir.display().to_string(),
                last_error: None,
            }),
            source_dir,
            index,
            splitter: TextSplitter::new(
                config.chunk_size,
                config.chunk_overlap,
                config.separators.clone(),
            ),
            batch_size: config.batch_size.max(1),
        }
    }

    pub fn source_dir(&self) -> &Path {
        &self.source_dir
    }

    pub async fn get_status(&self) -> IndexStatus {
        self.status.lock().await.clone()
    }

    pub async fn is_indexing(&self) -> bool {
        self.status.lock().await.is_indexing
    }

    /// Index every supported file under the source directory, then drop
    /// points of files that have disappeared. Rejects concurrent runs.
    pub async fn run_index(&self) -> Result<IndexReport> {
        self.claim().await?;
        self.run_claimed().await
    }

    /// Claim the run under the status lock, then index on a spawned task.
    /// A second caller is rejected before anything is spawned.
    pub async fn start_background(self: &Arc<Self>) -> Result<()> {
        self.claim().await?;
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = manager.run_claimed().await {
                tracing::error!("Background indexing failed: {}", e);
            }
        });
        Ok(())
    }

    async fn claim(&self) -> Result<()> {
        let mut status = self.status.lock().await;
        if status.is_indexing {
            anyhow::bail!("Indexing already in progress");
        }
        status.is_indexing = true;
        status.last_error = None;
        status.failed_files.clear();
        Ok(())
    }

    async fn run_claimed(&self) -> Result<IndexReport> {
        // A panic inside a run must still reset `is_indexing`.
        let result = std::panic::AssertUnwindSafe(self.do_index())
            .catch_unwind()
            .await;

        let mut status = self.status.lock().await;
        status.is_indexing = false;

        match result {
            Ok(Ok(report)) => {
                status.last_indexed_at = Some(Utc::now());
                status.total_files = report.files_indexed;
                status.total_chunks = report.chunks;
                status.failed_files = report.failed_files.iter().map(|(f, _)| f.clone()).collect();
                Ok(report)
            }
            Ok(Err(e)) => {
                let error_msg = format!("Indexing error: {}", e);
                tracing::error!("{}", error_msg);
                status.last_error = Some(error_msg.clone());
                anyhow::bail!(error_msg)
            }
            Err(panic_info) => {
                let panic_msg = if let Some(s) = panic_info.downcast_ref::<&str>() {
                    format!("Indexing panicked: {}", s)
                } else if let Some(s) = panic_info.downcast_ref::<String>() {
                    format!("Indexing panicked: {}", s)
                } else {
                    "Indexing panicked with unknown error".to_string()
                };
                tracing::error!("{}", panic_msg);
                status.last_error = Some(panic_msg.clone());
                anyhow::bail!(panic_msg)
            }
        }
    }

    async fn do_index(&self) -> Result<IndexReport> {
        if !self.source_dir.exists() {
            anyhow::bail!("Source directory does not exist: {}", self.source_dir.display());
        }

        let files = walk_directory(&self.source_dir);
        tracing::info!("Indexing {} files from {}", files.len(), self.source_dir.display());

        let mut report = IndexReport::default();
        for (path, format) in &files {
            match self.index_file(path, *format).await {
                Ok(chunks) => {
                    report.files_indexed += 1;
                    report.chunks += chunks;
                }
                Err(e) => {
                    tracing::warn!("Failed to index {}: {}", path.display(), e);
                    report.failed_files.push((display_name(path), e.to_string()));
                }
            }
        }

        if self.source_dir.is_file() {
            tracing::debug!("Single-file run, skipping stale cleanup");
        } else {
            match self.remove_stale().await {
                Ok(removed) => report.stale_files_removed = removed,
                Err(e) => tracing::error!("Failed to clean up stale points: {}", e),
            }
        }

        tracing::info!(
            files = report.files_indexed,
            chunks = report.chunks,
            failed = report.failed_files.len(),
            stale = report.stale_files_removed,
            "Indexing complete"
        );
        Ok(report)
    }

    /// Extract, chunk and embed one file in batches of `batch_size`.
    /// Returns the number of chunks written.
    pub async fn index_file(&self, path: &Path, format: SupportedFormat) -> Result<usize> {
        let pages = extract_pages(path, format)?;
        let chunks = chunk_pages(&pages, &self.splitter);
        if chunks.is_empty() {
            tracing::debug!("No text extracted from {}", path.display());
            return Ok(0);
        }

        let (canonical, path_id) = file_key(path)?;
        let stored_path = canonical.to_string_lossy().to_string();
        let batch_count = chunks.len().div_ceil(self.batch_size);
        let mut written = 0;

        for (batch_no, batch) in chunks.chunks(self.batch_size).enumerate() {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let embeddings = self.index.embed(texts).await?;

            let records: Vec<ChunkRecord> = batch
                .iter()
                .map(|chunk| {
                    let mut metadata = serde_json::Map::new();
                    metadata.insert("origin".to_string(), INDEXER_ORIGIN.into());
                    metadata.insert("file_path".to_string(), stored_path.clone().into());
                    metadata.insert("chunk_index".to_string(), chunk.chunk_index.into());
                    if let Some(page) = chunk.page {
                        metadata.insert("page".to_string(), page.into());
                    }
                    ChunkRecord {
                        key: format!("{}_{}", path_id, chunk.chunk_index),
                        text: chunk.text.clone(),
                        source: KnowledgeSource::Internal,
                        file_id: path_id.clone(),
                        metadata,
                    }
                })
                .collect();

            written += self.index.upsert(records, embeddings).await?;
            tracing::info!(
                file = %display_name(path),
                "Embedded batch {}/{}",
                batch_no + 1,
                batch_count
            );
        }

        Ok(written)
    }

    /// Delete indexer points whose stored file is no longer on disk.
    /// Files outside the current walk are kept while they still exist.
    pub async fn remove_stale(&self) -> Result<usize> {
        let stored = self.index.indexed_files().await?;

        let stale = stale_file_ids(&stored, |path| path.exists());
        if stale.is_empty() {
            return Ok(0);
        }

        tracing::info!("Cleaning up points of {} removed files", stale.len());
        let removed = stale.len();
        self.index.delete_files(stale).await?;
        Ok(removed)
    }
}

fn stale_file_ids(stored: &HashMap<String, String>, exists: impl Fn(&Path) -> bool) -> Vec<String> {
    let mut stale: Vec<String> = stored
        .iter()
        .filter(|(_, path)| !exists(Path::new(path.as_str())))
        .map(|(id, _)| id.clone())
        .collect();
    stale.sort();
    stale
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::mock::MemoryIndex;

    fn small_chunks() -> IndexerConfig {
        IndexerConfig {
            chunk_size: 20,
            chunk_overlap: 0,
            batch_size: 2,
            ..IndexerConfig::default()
        }
    }

    fn manager(root: &Path, index: &Arc<MemoryIndex>) -> Arc<IndexManager> {
        let index: Arc<dyn ChunkIndex> = index.clone();
        Arc::new(IndexManager::new(root.to_path_buf(), &small_chunks(), index))
    }

    fn write_lines(path: &Path, count: usize) {
        let text: String = (0..count).map(|i| format!("line {} of text\n", i)).collect();
        std::fs::write(path, text).unwrap();
    }

    fn file_id(path: &Path) -> Result<String> {
        file_key(path).map(|(_, id)| id)
    }

    #[test]
    fn test_file_id_uses_canonical_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("data")).unwrap();
        std::fs::write(dir.path().join("data").join("report.txt"), "x").unwrap();
        std::fs::write(dir.path().join("data").join("other.txt"), "y").unwrap();

        let direct = file_id(&dir.path().join("data").join("report.txt")).unwrap();
        let dotted = file_id(&dir.path().join("data").join(".").join("report.txt")).unwrap();
        let roundabout = file_id(&dir.path().join("data").join("..").join("data").join("report.txt")).unwrap();
        assert_eq!(direct, dotted);
        assert_eq!(direct, roundabout);
        assert_ne!(direct, file_id(&dir.path().join("data").join("other.txt")).unwrap());
        assert_eq!(direct.len(), 16);

        assert!(file_id(&dir.path().join("missing.txt")).is_err());
    }

    #[test]
    fn test_stale_ids_follow_file_existence() {
        let stored: HashMap<String, String> = [
            ("kept".to_string(), "/srv/data/report.pdf".to_string()),
            ("gone".to_string(), "/srv/data/old.pdf".to_string()),
            ("elsewhere".to_string(), "/home/me/notes.txt".to_string()),
        ]
        .into_iter()
        .collect();

        let stale = stale_file_ids(&stored, |path| path != Path::new("/srv/data/old.pdf"));
        assert_eq!(stale, vec!["gone".to_string()]);
    }

    #[test]
    fn test_display_name() {
        assert_eq!(display_name(Path::new("/srv/data/report.pdf")), "report.pdf");
    }

    #[tokio::test]
    async fn test_batches_follow_batch_size() {
        let dir = tempfile::tempdir().unwrap();
        write_lines(&dir.path().join("notes.txt"), 5);
        let index = Arc::new(MemoryIndex::default());

        let report = manager(dir.path(), &index).run_index().await.unwrap();

        assert_eq!(report.files_indexed, 1);
        assert_eq!(report.chunks, 5);
        assert_eq!(index.batch_sizes(), vec![2, 2, 1]);
        for record in index.records() {
            assert_eq!(record.metadata["origin"], INDEXER_ORIGIN);
        }
    }

    #[tokio::test]
    async fn test_single_file_run_keeps_other_files() {
        let dir = tempfile::tempdir().unwrap();
        write_lines(&dir.path().join("a.txt"), 1);
        write_lines(&dir.path().join("b.txt"), 1);
        let index = Arc::new(MemoryIndex::default());

        manager(dir.path(), &index).run_index().await.unwrap();
        assert_eq!(index.indexed_file_count(), 2);

        let report = manager(&dir.path().join("b.txt"), &index).run_index().await.unwrap();
        assert_eq!(report.files_indexed, 1);
        assert_eq!(report.stale_files_removed, 0);
        assert!(index.deleted().is_empty());
        assert_eq!(index.indexed_file_count(), 2);
    }

    #[tokio::test]
    async fn test_same_file_through_other_path_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("data")).unwrap();
        write_lines(&dir.path().join("data").join("a.txt"), 3);
        let index = Arc::new(MemoryIndex::default());

        manager(&dir.path().join("data"), &index).run_index().await.unwrap();
        manager(&dir.path().join("data").join(".").join("a.txt"), &index)
            .run_index()
            .await
            .unwrap();

        assert_eq!(index.records().len(), 3);
        assert_eq!(index.indexed_file_count(), 1);
    }

    #[tokio::test]
    async fn test_removed_file_is_cleaned_up() {
        let dir = tempfile::tempdir().unwrap();
        write_lines(&dir.path().join("a.txt"), 1);
        write_lines(&dir.path().join("b.txt"), 1);
        let index = Arc::new(MemoryIndex::default());
        let manager = manager(dir.path(), &index);

        manager.run_index().await.unwrap();
        let gone = file_id(&dir.path().join("a.txt")).unwrap();
        std::fs::remove_file(dir.path().join("a.txt")).unwrap();

        let report = manager.run_index().await.unwrap();
        assert_eq!(report.stale_files_removed, 1);
        assert_eq!(index.deleted(), vec![gone]);
        assert_eq!(index.indexed_file_count(), 1);
    }

    #[tokio::test]
    async fn test_uploaded_points_survive_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        write_lines(&dir.path().join("a.txt"), 1);
        let index = Arc::new(MemoryIndex::default());
        index.insert_upload("0123456789abcdef", "an uploaded note");

        manager(dir.path(), &index).run_index().await.unwrap();

        assert!(index.deleted().is_empty());
        assert!(index.records().iter().any(|r| r.file_id == "0123456789abcdef"));
    }

    #[tokio::test]
    async fn test_concurrent_run_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_lines(&dir.path().join("a.txt"), 1);
        let index = Arc::new(MemoryIndex::gated());
        let manager = manager(dir.path(), &index);

        let first = tokio::spawn({
            let manager = Arc::clone(&manager);
            async move { manager.run_index().await }
        });
        while !manager.is_indexing().await {
            tokio::task::yield_now().await;
        }

        let err = manager.run_index().await.unwrap_err();
        assert!(err.to_string().contains("already in progress"));

        index.open_gate();
        assert_eq!(first.await.unwrap().unwrap().files_indexed, 1);
        assert!(!manager.is_indexing().await);
    }

    #[tokio::test]
    async fn test_start_background_claims_before_spawning() {
        let dir = tempfile::tempdir().unwrap();
        write_lines(&dir.path().join("a.txt"), 1);
        let index = Arc::new(MemoryIndex::gated());
        let manager = manager(dir.path(), &index);

        manager.start_background().await.unwrap();
        assert!(manager.is_indexing().await);
        assert!(manager.start_background().await.is_err());

        index.open_gate();
        while manager.is_indexing().await {
            tokio::task::yield_now().await;
        }
        assert_eq!(manager.get_status().await.total_files, 1);
    }

    #[tokio::test]
    async fn test_panic_resets_status() {
        let dir = tempfile::tempdir().unwrap();
        write_lines(&dir.path().join("a.txt"), 1);
        let index = Arc::new(MemoryIndex::panicking());
        let manager = manager(dir.path(), &index);

        let err = manager.run_index().await.unwrap_err();
        assert!(err.to_string().contains("panicked"));

        let status = manager.get_status().await;
        assert!(!status.is_indexing);
        assert!(status.last_error.unwrap().contains("embedder exploded"));
        assert!(manager.run_index().await.is_err());
    }
}
