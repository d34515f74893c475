use thiserror::Error;

/// Failures that abort a corrective RAG run.
///
/// Web search failures never surface here; the pipeline degrades to the
/// internal context or a fixed fallback message.
#[derive(Debug, Error)]
pub enum CragError {
    #[error("query must not be empty")]
    EmptyQuery,

    #[error("language model call failed during {stage}: {source}")]
    Llm {
        stage: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("document retrieval failed: {0}")]
    Retrieval(#[source] anyhow::Error),
}

impl CragError {
    pub fn llm(stage: &'static str, source: anyhow::Error) -> Self {
        Self::Llm { stage, source }
    }
}

pub type CragResult<T> = std::result::Result<T, CragError>;
