use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};

use corrective_rag::config::Settings;
use corrective_rag::indexer::walker::walk_directory;
use corrective_rag::rag::embeddings::EmbeddingGenerator;
use corrective_rag::rag::index_manager::{IndexManager, QdrantIndex};
use corrective_rag::rag::vector_store::VectorStore;
use corrective_rag::telemetry;

#[derive(Parser, Debug)]
#[command(name = "rag-indexer")]
#[command(about = "Build the vector store the corrective RAG pipeline retrieves from")]
struct Args {
    /// Directory (or single file) to index; defaults to `indexer.source_dir`
    #[arg(short, long)]
    dir: Option<PathBuf>,

    /// Drop the collection before indexing
    #[arg(long)]
    rebuild: bool,

    /// Qdrant collection name
    #[arg(long)]
    collection: Option<String>,

    /// Maximum chunk size in characters
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Overlap between chunks in characters
    #[arg(long)]
    chunk_overlap: Option<usize>,

    /// Chunks embedded per request
    #[arg(long)]
    batch_size: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut settings = Settings::load()?;
    telemetry::init_logging(&settings.logging);

    if let Some(collection) = args.collection {
        settings.vector_store.collection = collection;
    }
    if let Some(size) = args.chunk_size {
        settings.indexer.chunk_size = size;
    }
    if let Some(overlap) = args.chunk_overlap {
        settings.indexer.chunk_overlap = overlap;
    }
    if let Some(batch) = args.batch_size {
        settings.indexer.batch_size = batch;
    }
    if settings.indexer.chunk_overlap >= settings.indexer.chunk_size {
        anyhow::bail!("--chunk-overlap must be smaller than --chunk-size");
    }

    let dir = args
        .dir
        .unwrap_or_else(|| PathBuf::from(&settings.indexer.source_dir));
    if !dir.exists() {
        anyhow::bail!("Directory does not exist: {}", dir.display());
    }

    println!("Initializing embedding model...");
    let embeddings = Arc::new(EmbeddingGenerator::new(&settings.embedding, &settings.llm).await?);

    println!("Connecting to Qdrant at {}...", settings.vector_store.url);
    let vector_store =
        Arc::new(VectorStore::new(&settings.vector_store, embeddings.dimensions()).await?);

    if args.rebuild {
        println!("Rebuilding collection {}...", vector_store.collection_name());
        vector_store.recreate().await?;
    }

    println!("Scanning: {}", dir.display());
    let files = walk_directory(&dir);
    println!("Found {} supported files", files.len());

    if files.is_empty() {
        println!("No supported files found. Exiting.");
        return Ok(());
    }

    let single_file = dir.is_file();
    let collection = vector_store.collection_name().to_string();
    let manager = IndexManager::new(
        dir,
        &settings.indexer,
        Arc::new(QdrantIndex::new(embeddings, vector_store)),
    );

    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );

    let mut success_count = 0usize;
    let mut total_chunks = 0usize;
    let mut failed_files: Vec<(PathBuf, String)> = Vec::new();

    for (path, format) in &files {
        pb.set_message(
            path.file_name()
                .unwrap_or_default()
                .to_string_lossy()
                .to_string(),
        );

        match manager.index_file(path, *format).await {
            Ok(chunks) => {
                success_count += 1;
                total_chunks += chunks;
            }
            Err(e) => {
                tracing::warn!("Failed to process {}: {}", path.display(), e);
                failed_files.push((path.clone(), e.to_string()));
            }
        }

        pb.inc(1);
    }

    pb.finish_with_message("done");

    // Points of files outside a single-file run are never stale.
    let removed = if args.rebuild || single_file {
        0
    } else {
        manager.remove_stale().await.unwrap_or_else(|e| {
            tracing::error!("Failed to clean up stale points: {}", e);
            0
        })
    };

    println!("\nIndexing complete!");
    println!("  Files processed: {}/{}", success_count, files.len());
    println!("  Files failed:    {}", failed_files.len());
    println!("  Total chunks:    {}", total_chunks);
    println!("  Stale removed:   {}", removed);
    println!("  Collection:      {}", collection);
    println!("  Qdrant URL:      {}", settings.vector_store.url);

    if !failed_files.is_empty() {
        println!("\nFailed files:");
        for (path, err) in &failed_files {
            println!("  {}: {}", path.display(), err);
        }
    }

    Ok(())
}
