use std::sync::Arc;

use tracing::{debug, info, warn};

use super::knowledge::{combine_knowledge, refine_internal_knowledge, ExternalKnowledge};
use super::prompts::{self, EXTERNAL_NOT_FOUND, NOTHING_FOUND};
use super::types::{Confidence, CragOutcome, QueryDomain, RetrievalVerdict};
use crate::config::{DomainConfig, Settings};
use crate::error::{CragError, CragResult};
use crate::llm::ChatModel;
use crate::models::{Document, KnowledgeSource};
use crate::rag::KnowledgeStore;
use crate::web_search::WebSearch;

#[derive(Debug, Clone)]
pub struct CragOptions {
    pub top_k: u64,
    pub evaluation_docs: usize,
    pub max_web_results: usize,
    pub persist_web_results: bool,
    pub domain: DomainConfig,
}

impl CragOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            top_k: settings.retrieval.top_k,
            evaluation_docs: settings.retrieval.evaluation_docs,
            max_web_results: settings.web_search.max_results,
            persist_web_results: settings.web_search.persist_results,
            domain: settings.domain.clone(),
        }
    }
}

impl Default for CragOptions {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

/// The context an answer will be generated from.
struct Selected {
    document: Document,
    source_count: usize,
}

pub struct CorrectiveRag {
    llm: Arc<dyn ChatModel>,
    store: Arc<dyn KnowledgeStore>,
    web: Option<Arc<dyn WebSearch>>,
    options: CragOptions,
}

impl CorrectiveRag {
    pub fn new(
        llm: Arc<dyn ChatModel>,
        store: Arc<dyn KnowledgeStore>,
        options: CragOptions,
    ) -> Self {
        Self {
            llm,
            store,
            web: None,
            options,
        }
    }

    pub fn with_web_search(mut self, web: Arc<dyn WebSearch>) -> Self {
        self.web = Some(web);
        self
    }

    pub fn llm(&self) -> Arc<dyn ChatModel> {
        self.llm.clone()
    }

    pub async fn detect_domain(&self, query: &str) -> CragResult<QueryDomain> {
        let prompt = prompts::domain_prompt(&self.options.domain, query);
        let reply = self
            .llm
            .complete(&prompt)
            .await
            .map_err(|e| CragError::llm("domain classification", e))?;

        let domain = QueryDomain::from_reply(&reply);
        debug!("Domain reply {:?} -> {}", reply, domain.as_str());
        Ok(domain)
    }

    pub async fn retrieve_documents(&self, query: &str) -> CragResult<Vec<Document>> {
        self.store
            .retrieve(query, self.options.top_k)
            .await
            .map_err(CragError::Retrieval)
    }

    pub async fn evaluate_retrieval_quality(
        &self,
        query: &str,
        docs: &[Document],
    ) -> CragResult<RetrievalVerdict> {
        if docs.is_empty() {
            return Ok(RetrievalVerdict::Incorrect);
        }

        let joined = docs
            .iter()
            .take(self.options.evaluation_docs)
            .map(|d| d.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        let reply = self
            .llm
            .complete(&prompts::evaluation_prompt(query, &joined))
            .await
            .map_err(|e| CragError::llm("retrieval evaluation", e))?;

        Ok(RetrievalVerdict::from_reply(&reply))
    }

    /// Failed searches are logged and reported as no results.
    pub async fn search_external_knowledge(&self, query: &str) -> Option<ExternalKnowledge> {
        let web = self.web.as_ref()?;

        match web.search(query, self.options.max_web_results).await {
            Ok(results) => {
                info!(results = results.len(), "Web search returned {} results", results.len());
                ExternalKnowledge::from_results(results)
            }
            Err(e) => {
                warn!("Web search failed: {}", e);
                None
            }
        }
    }

    pub async fn generate_answer(&self, query: &str, context: &Document) -> CragResult<String> {
        let reply = self
            .llm
            .complete(&prompts::answer_prompt(query, &context.content))
            .await
            .map_err(|e| CragError::llm("answer generation", e))?;

        Ok(reply.trim().to_string())
    }

    pub async fn run(&self, query: &str) -> CragResult<CragOutcome> {
        let query = query.trim();
        if query.is_empty() {
            return Err(CragError::EmptyQuery);
        }

        let domain = self.detect_domain(query).await?;
        info!(domain = domain.as_str(), "Query domain: {}", domain.as_str());

        match domain {
            QueryDomain::External => self.run_external(query).await,
            QueryDomain::Internal => self.run_internal(query).await,
        }
    }

    async fn run_external(&self, query: &str) -> CragResult<CragOutcome> {
        let Some(external) = self.search_external_knowledge(query).await else {
            return Ok(fallback(query, QueryDomain::External, None, 0, EXTERNAL_NOT_FOUND));
        };

        self.persist(&external).await;
        let selected = Selected {
            source_count: external.results.len(),
            document: external.document,
        };
        self.answer(query, QueryDomain::External, None, 0, selected)
            .await
    }

    async fn run_internal(&self, query: &str) -> CragResult<CragOutcome> {
        let docs = self.retrieve_documents(query).await?;
        let verdict = self.evaluate_retrieval_quality(query, &docs).await?;
        info!(
            verdict = verdict.label(),
            documents = docs.len(),
            "Retrieval verdict: {}",
            verdict
        );

        let selected = match &verdict {
            RetrievalVerdict::Correct => Selected {
                document: refine_internal_knowledge(&docs),
                source_count: docs.len(),
            },
            RetrievalVerdict::Ambiguous => {
                let internal = refine_internal_knowledge(&docs);
                match self.search_external_knowledge(query).await {
                    Some(external) => {
                        self.persist(&external).await;
                        Selected {
                            document: combine_knowledge(&internal, &external.document),
                            source_count: docs.len() + external.results.len(),
                        }
                    }
                    None => Selected {
                        document: internal,
                        source_count: docs.len(),
                    },
                }
            }
            RetrievalVerdict::Incorrect => match self.search_external_knowledge(query).await {
                Some(external) => {
                    self.persist(&external).await;
                    Selected {
                        source_count: external.results.len(),
                        document: external.document,
                    }
                }
                None => {
                    return Ok(fallback(
                        query,
                        QueryDomain::Internal,
                        Some(RetrievalVerdict::Incorrect),
                        docs.len(),
                        NOTHING_FOUND,
                    ));
                }
            },
            RetrievalVerdict::Unknown(raw) => {
                warn!("Unrecognized evaluation reply {:?}, using internal knowledge", raw);
                Selected {
                    document: refine_internal_knowledge(&docs),
                    source_count: docs.len(),
                }
            }
        };

        let retrieved = docs.len();
        self.answer(query, QueryDomain::Internal, Some(verdict), retrieved, selected)
            .await
    }

    async fn answer(
        &self,
        query: &str,
        domain: QueryDomain,
        verdict: Option<RetrievalVerdict>,
        retrieved: usize,
        selected: Selected,
    ) -> CragResult<CragOutcome> {
        let answer = self.generate_answer(query, &selected.document).await?;

        Ok(CragOutcome {
            query: query.to_string(),
            domain,
            verdict,
            knowledge_source: Some(selected.document.source),
            retrieved,
            source_count: selected.source_count,
            confidence: Confidence::from_source_count(selected.source_count),
            context: Some(selected.document.content),
            answer,
        })
    }

    async fn persist(&self, external: &ExternalKnowledge) {
        if !self.options.persist_web_results {
            return;
        }
        match self
            .store
            .add_texts(external.lines(), KnowledgeSource::External)
            .await
        {
            Ok(count) => info!("Stored {} web results in the vector store", count),
            Err(e) => warn!("Failed to store web results: {}", e),
        }
    }
}

fn fallback(
    query: &str,
    domain: QueryDomain,
    verdict: Option<RetrievalVerdict>,
    retrieved: usize,
    message: &str,
) -> CragOutcome {
    CragOutcome {
        query: query.to_string(),
        domain,
        verdict,
        knowledge_source: None,
        retrieved,
        source_count: 0,
        confidence: Confidence::Low,
        context: None,
        answer: message.to_string(),
    }
}
