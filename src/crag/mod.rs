//! Corrective RAG
//!
//! Classifies a query as in-corpus or not, grades what the vector index
//! returns, and corrects weak retrieval with web search before generating
//! the answer.

mod knowledge;
mod pipeline;
mod prompts;
mod types;

#[cfg(test)]
pub(crate) mod mock;

pub use knowledge::{combine_knowledge, refine_internal_knowledge, ExternalKnowledge};
pub use pipeline::{CorrectiveRag, CragOptions};
pub use prompts::{EXTERNAL_NOT_FOUND, NOTHING_FOUND, NO_RELEVANT_INFO};
pub use types::{Confidence, CragOutcome, QueryDomain, RetrievalVerdict};
