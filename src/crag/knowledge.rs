use crate::models::{Document, KnowledgeSource};
use crate::web_search::WebResult;

/// Web results folded into a single context document.
#[derive(Debug, Clone)]
pub struct ExternalKnowledge {
    pub document: Document,
    pub results: Vec<WebResult>,
}

impl ExternalKnowledge {
    /// `None` when there is nothing to build a context from.
    pub fn from_results(results: Vec<WebResult>) -> Option<Self> {
        if results.is_empty() {
            return None;
        }
        let content = results
            .iter()
            .map(WebResult::to_line)
            .collect::<Vec<_>>()
            .join("\n");
        Some(Self {
            document: Document::new(content, KnowledgeSource::External),
            results,
        })
    }

    pub fn lines(&self) -> Vec<String> {
        self.results.iter().map(WebResult::to_line).collect()
    }
}

pub fn refine_internal_knowledge(docs: &[Document]) -> Document {
    let content = docs
        .iter()
        .map(|d| d.content.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    Document::new(content, KnowledgeSource::Internal)
}

pub fn combine_knowledge(internal: &Document, external: &Document) -> Document {
    Document::new(
        format!("{}\n\n{}", internal.content, external.content),
        KnowledgeSource::Hybrid,
    )
}
