use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use fastembed::{InitOptionsUserDefined, TextEmbedding, TokenizerFiles, UserDefinedEmbeddingModel};
use reqwest::Client;
use serde::Deserialize;
use tiktoken_rs::CoreBPE;

use crate::config::{EmbeddingConfig, EmbeddingProvider, LlmConfig};

enum Backend {
    Remote(RemoteEmbeddings),
    Local(TextEmbedding),
}

pub struct EmbeddingGenerator {
    backend: Backend,
    dimensions: u64,
}

impl EmbeddingGenerator {
    pub async fn new(config: &EmbeddingConfig, llm: &LlmConfig) -> Result<Self> {
        let backend = match config.provider {
            EmbeddingProvider::Openai => {
                tracing::info!(model = %config.model, "Using remote embedding model");
                Backend::Remote(RemoteEmbeddings::new(
                    config.resolved_base_url(llm),
                    config.resolved_api_key(llm).map(str::to_string),
                    &config.model,
                    config.max_batch_tokens,
                )?)
            }
            EmbeddingProvider::Local => Backend::Local(load_local_model(Path::new(&config.model_dir))?),
        };

        Ok(Self {
            backend,
            dimensions: config.dimensions,
        })
    }

    pub fn dimensions(&self) -> u64 {
        self.dimensions
    }

    pub async fn embed_documents(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        match &self.backend {
            Backend::Remote(remote) => remote.embed(texts).await,
            Backend::Local(model) => Ok(model.embed(texts, None)?),
        }
    }

    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_documents(vec![text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("Embedding backend returned no vector"))
    }
}

fn load_local_model(model_dir: &Path) -> Result<TextEmbedding> {
    tracing::info!("Initializing embedding model from {}", model_dir.display());

    if !model_dir.exists() {
        anyhow::bail!("Model directory not found: {}", model_dir.display());
    }

    let read = |name: &str| {
        std::fs::read(model_dir.join(name))
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", name, e))
    };

    let user_model = UserDefinedEmbeddingModel {
        onnx_file: read("model.onnx")?,
        tokenizer_files: TokenizerFiles {
            tokenizer_file: read("tokenizer.json")?,
            config_file: read("config.json")?,
            special_tokens_map_file: read("special_tokens_map.json")?,
            tokenizer_config_file: read("tokenizer_config.json")?,
        },
    };

    let model = TextEmbedding::try_new_from_user_defined(user_model, InitOptionsUserDefined::default())
        .map_err(|e| anyhow::anyhow!("Failed to initialize embedding model: {}", e))?;

    tracing::info!("Embedding model initialized successfully");
    Ok(model)
}

/// OpenAI-compatible `/embeddings` client.
struct RemoteEmbeddings {
    client: Client,
    url: String,
    api_key: Option<String>,
    model: String,
    max_batch_tokens: usize,
    tokenizer: CoreBPE,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

impl RemoteEmbeddings {
    fn new(base_url: &str, api_key: Option<String>, model: &str, max_batch_tokens: usize) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(120)).build()?;
        Ok(Self {
            client,
            url: format!("{}/embeddings", base_url.trim_end_matches('/')),
            api_key,
            model: model.to_string(),
            max_batch_tokens: max_batch_tokens.max(1),
            tokenizer: tiktoken_rs::cl100k_base()?,
        })
    }

    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let token_counts: Vec<usize> = texts
            .iter()
            .map(|t| self.tokenizer.encode_with_special_tokens(t).len())
            .collect();

        let mut vectors = Vec::with_capacity(texts.len());
        for range in token_batches(&token_counts, self.max_batch_tokens) {
            vectors.extend(self.request(&texts[range]).await?);
        }
        Ok(vectors)
    }

    async fn request(&self, input: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": input,
        });

        let mut req = self.client.post(&self.url).json(&body);
        if let Some(ref key) = self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await?;
            anyhow::bail!("Embedding request failed: {} - {}", status, error_text);
        }

        let mut parsed: EmbeddingResponse = response.json().await?;
        if parsed.data.len() != input.len() {
            anyhow::bail!(
                "Embedding response size mismatch: sent {}, received {}",
                input.len(),
                parsed.data.len()
            );
        }
        parsed.data.sort_by_key(|d| d.index);
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

/// Split consecutive inputs into ranges whose token sum stays within `max_tokens`.
/// An input larger than the budget gets a range of its own.
fn token_batches(token_counts: &[usize], max_tokens: usize) -> Vec<std::ops::Range<usize>> {
    let mut batches = Vec::new();
    let mut start = 0;
    let mut running = 0;

    for (i, &count) in token_counts.iter().enumerate() {
        if i > start && running + count > max_tokens {
            batches.push(start..i);
            start = i;
            running = 0;
        }
        running += count;
    }
    if start < token_counts.len() {
        batches.push(start..token_counts.len());
    }
    batches
}
