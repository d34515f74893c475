use anyhow::Result;
use serde::Deserialize;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Application configuration
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
    pub vector_store: VectorStoreConfig,
    pub retrieval: RetrievalConfig,
    pub web_search: WebSearchConfig,
    pub domain: DomainConfig,
    pub indexer: IndexerConfig,
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    #[default]
    Openai,
    Local,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProvider,
    /// Falls back to the LLM endpoint when unset.
    pub base_url: Option<String>,
    /// Falls back to the LLM key when unset.
    pub api_key: Option<String>,
    pub model: String,
    pub dimensions: u64,
    pub model_dir: String,
    pub max_batch_tokens: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VectorStoreConfig {
    pub url: String,
    pub api_key: Option<String>,
    pub collection: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: u64,
    /// How many of the retrieved passages the evaluator reads.
    pub evaluation_docs: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebSearchConfig {
    pub enabled: bool,
    pub endpoint: String,
    pub max_results: usize,
    pub region: String,
    pub timeout_secs: u64,
    /// Feed web results used for an answer back into the vector store.
    pub persist_results: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DomainConfig {
    pub description: String,
    pub topics: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    pub source_dir: String,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub batch_size: usize,
    pub separators: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            request_timeout_secs: 120,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: OPENAI_BASE_URL.to_string(),
            api_key: None,
            model: "gpt-4o".to_string(),
            temperature: 0.0,
            timeout_secs: 60,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::default(),
            base_url: None,
            api_key: None,
            model: "text-embedding-3-small".to_string(),
            dimensions: 1536,
            model_dir: "models/bge-small-en-v1.5".to_string(),
            max_batch_tokens: 250_000,
        }
    }
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:6334".to_string(),
            api_key: None,
            collection: "vector_store".to_string(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 4,
            evaluation_docs: 3,
        }
    }
}

impl Default for WebSearchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "https://html.duckduckgo.com/html/".to_string(),
            max_results: 5,
            region: "wt-wt".to_string(),
            timeout_secs: 15,
            persist_results: false,
        }
    }
}

impl Default for DomainConfig {
    fn default() -> Self {
        Self {
            description: "a corporate sustainability report or company content".to_string(),
            topics: [
                "company",
                "report",
                "ESG",
                "environment",
                "sustainability",
                "corporate governance",
                "Wistron",
            ]
            .iter()
            .map(|t| t.to_string())
            .collect(),
        }
    }
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            source_dir: "data".to_string(),
            chunk_size: 1000,
            chunk_overlap: 200,
            batch_size: 50,
            separators: ["\n\n", "\n", ".", "。", "！", "？"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl EmbeddingConfig {
    pub fn resolved_base_url<'a>(&'a self, llm: &'a LlmConfig) -> &'a str {
        self.base_url.as_deref().unwrap_or(&llm.base_url)
    }

    pub fn resolved_api_key<'a>(&'a self, llm: &'a LlmConfig) -> Option<&'a str> {
        self.api_key.as_deref().or(llm.api_key.as_deref())
    }
}

impl Settings {
    /// Defaults, then `config/default.toml` and `config/local.toml`, then
    /// `CRAG__*` environment variables.
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(
                config::Environment::with_prefix("CRAG")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("domain.topics")
                    .try_parsing(true),
            )
            .build()?;

        let mut settings: Settings = config.try_deserialize()?;
        settings.apply_env_fallbacks(|key| std::env::var(key).ok());
        settings.validate()?;
        Ok(settings)
    }

    /// Fill unset secrets and endpoints from the conventional variable names.
    fn apply_env_fallbacks(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.llm.api_key.is_none() {
            self.llm.api_key = lookup("OPENAI_API_KEY");
        }
        if let Some(base_url) = lookup("OPENAI_BASE_URL") {
            if self.llm.base_url == OPENAI_BASE_URL {
                self.llm.base_url = base_url;
            }
        }
        if let Some(url) = lookup("QDRANT_URL") {
            if self.vector_store.url == VectorStoreConfig::default().url {
                self.vector_store.url = url;
            }
        }
        if self.vector_store.api_key.is_none() {
            self.vector_store.api_key = lookup("QDRANT_API_KEY");
        }
        if self.database.url.is_none() {
            self.database.url = lookup("DATABASE_URL");
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.indexer.chunk_size == 0 {
            anyhow::bail!("indexer.chunk_size must be greater than zero");
        }
        if self.indexer.chunk_overlap >= self.indexer.chunk_size {
            anyhow::bail!(
                "indexer.chunk_overlap ({}) must be smaller than indexer.chunk_size ({})",
                self.indexer.chunk_overlap,
                self.indexer.chunk_size
            );
        }
        if self.indexer.batch_size == 0 {
            anyhow::bail!("indexer.batch_size must be greater than zero");
        }
        if self.retrieval.top_k == 0 {
            anyhow::bail!("retrieval.top_k must be greater than zero");
        }
        if self.retrieval.evaluation_docs == 0 {
            anyhow::bail!("retrieval.evaluation_docs must be greater than zero");
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_match_pipeline_constants() {
        let settings = Settings::default();
        assert_eq!(settings.llm.model, "gpt-4o");
        assert_eq!(settings.llm.temperature, 0.0);
        assert_eq!(settings.retrieval.top_k, 4);
        assert_eq!(settings.retrieval.evaluation_docs, 3);
        assert_eq!(settings.web_search.max_results, 5);
        assert_eq!(settings.indexer.chunk_size, 1000);
        assert_eq!(settings.indexer.chunk_overlap, 200);
        assert_eq!(settings.indexer.batch_size, 50);
        assert_eq!(settings.indexer.separators.len(), 6);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_overlap_must_be_smaller_than_chunk() {
        let mut settings = Settings::default();
        settings.indexer.chunk_overlap = 1000;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_zero_batch_rejected() {
        let mut settings = Settings::default();
        settings.indexer.batch_size = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_env_fallbacks_fill_unset_values() {
        let vars: HashMap<&str, &str> = [
            ("OPENAI_API_KEY", "sk-test"),
            ("QDRANT_URL", "http://qdrant:6334"),
            ("DATABASE_URL", "postgres://localhost/crag"),
        ]
        .into_iter()
        .collect();

        let mut settings = Settings::default();
        settings.apply_env_fallbacks(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(settings.llm.api_key.as_deref(), Some("sk-test"));
        assert_eq!(settings.vector_store.url, "http://qdrant:6334");
        assert_eq!(settings.database.url.as_deref(), Some("postgres://localhost/crag"));
    }

    #[test]
    fn test_explicit_key_wins_over_env() {
        let mut settings = Settings::default();
        settings.llm.api_key = Some("from-config".to_string());
        settings.apply_env_fallbacks(|_| Some("from-env".to_string()));
        assert_eq!(settings.llm.api_key.as_deref(), Some("from-config"));
    }

    #[test]
    fn test_embedding_falls_back_to_llm_endpoint() {
        let mut settings = Settings::default();
        settings.llm.api_key = Some("sk-llm".to_string());
        assert_eq!(
            settings.embedding.resolved_base_url(&settings.llm),
            OPENAI_BASE_URL
        );
        assert_eq!(settings.embedding.resolved_api_key(&settings.llm), Some("sk-llm"));

        settings.embedding.api_key = Some("sk-embed".to_string());
        assert_eq!(settings.embedding.resolved_api_key(&settings.llm), Some("sk-embed"));
    }
}
