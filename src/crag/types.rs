use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::models::KnowledgeSource;

/// Whether a query is about the internal corpus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryDomain {
    Internal,
    External,
}

impl QueryDomain {
    /// Anything that does not say "external" is treated as internal.
    pub fn from_reply(reply: &str) -> Self {
        if reply.trim().to_lowercase().contains("external") {
            Self::External
        } else {
            Self::Internal
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Internal => "internal",
            Self::External => "external",
        }
    }
}

/// The evaluator's judgement of retrieved passages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalVerdict {
    /// The passages fully and clearly answer the query.
    Correct,
    /// Partially relevant or insufficient.
    Ambiguous,
    /// Unrelated or misleading.
    Incorrect,
    /// The evaluator's reply named no label, or more than one.
    Unknown(String),
}

static VERDICT_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(correct|ambiguous|incorrect)\b").unwrap());

impl RetrievalVerdict {
    pub fn from_reply(reply: &str) -> Self {
        let mut found: Option<Self> = None;

        for cap in VERDICT_LABEL.captures_iter(reply) {
            let label = match cap[1].to_lowercase().as_str() {
                "correct" => Self::Correct,
                "ambiguous" => Self::Ambiguous,
                _ => Self::Incorrect,
            };
            match &found {
                None => found = Some(label),
                Some(existing) if *existing == label => {}
                Some(_) => return Self::Unknown(reply.trim().to_string()),
            }
        }

        found.unwrap_or_else(|| Self::Unknown(reply.trim().to_string()))
    }

    pub fn label(&self) -> &str {
        match self {
            Self::Correct => "Correct",
            Self::Ambiguous => "Ambiguous",
            Self::Incorrect => "Incorrect",
            Self::Unknown(_) => "Unknown",
        }
    }
}

impl std::fmt::Display for RetrievalVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown(raw) => write!(f, "Unknown({})", raw),
            other => f.write_str(other.label()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Low,
}

impl Confidence {
    /// Two or more supporting sources count as high confidence.
    pub fn from_source_count(count: usize) -> Self {
        if count >= 2 {
            Self::High
        } else {
            Self::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Low => "low",
        }
    }
}

/// Everything a run decided, plus the final answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CragOutcome {
    pub query: String,
    pub domain: QueryDomain,
    /// Absent for external queries, which skip retrieval.
    pub verdict: Option<RetrievalVerdict>,
    /// Absent when nothing usable was found and a fixed message was returned.
    pub knowledge_source: Option<KnowledgeSource>,
    pub retrieved: usize,
    pub source_count: usize,
    pub confidence: Confidence,
    pub context: Option<String>,
    pub answer: String,
}
