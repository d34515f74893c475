//! In-memory doubles for pipeline and server tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::llm::ChatModel;
use crate::models::{Document, KnowledgeSource};
use crate::rag::KnowledgeStore;
use crate::web_search::{WebResult, WebSearch};

/// Replies in order and records every prompt it was given.
#[derive(Default)]
pub struct ScriptedModel {
    replies: Mutex<VecDeque<Result<String, String>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn new(replies: &[&str]) -> Self {
        Self {
            replies: Mutex::new(replies.iter().map(|r| Ok(r.to_string())).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn then_fail(self, message: &str) -> Self {
        self.replies.lock().unwrap().push_back(Err(message.to_string()));
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn complete(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        match self.replies.lock().unwrap().pop_front() {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(message)) => Err(anyhow::anyhow!(message)),
            None => Err(anyhow::anyhow!("no scripted reply left")),
        }
    }
}

#[derive(Default)]
pub struct MemoryStore {
    docs: Vec<Document>,
    fail: bool,
    retrievals: AtomicUsize,
    added: Mutex<Vec<(Vec<String>, KnowledgeSource)>>,
    documents: Mutex<Vec<(String, String, Map<String, Value>)>>,
}

impl MemoryStore {
    pub fn with_texts(texts: &[&str]) -> Self {
        Self {
            docs: texts
                .iter()
                .map(|t| Document::new(*t, KnowledgeSource::Internal))
                .collect(),
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn retrievals(&self) -> usize {
        self.retrievals.load(Ordering::SeqCst)
    }

    pub fn added(&self) -> Vec<(Vec<String>, KnowledgeSource)> {
        self.added.lock().unwrap().clone()
    }

    pub fn documents(&self) -> Vec<(String, String, Map<String, Value>)> {
        self.documents.lock().unwrap().clone()
    }
}

#[async_trait]
impl KnowledgeStore for MemoryStore {
    async fn retrieve(&self, _query: &str, top_k: u64) -> Result<Vec<Document>> {
        self.retrievals.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("vector store unreachable");
        }
        Ok(self.docs.iter().take(top_k as usize).cloned().collect())
    }

    async fn add_texts(&self, texts: Vec<String>, source: KnowledgeSource) -> Result<usize> {
        let count = texts.len();
        self.added.lock().unwrap().push((texts, source));
        Ok(count)
    }

    async fn add_document(&self, id: &str, text: &str, metadata: Map<String, Value>) -> Result<()> {
        if self.fail {
            anyhow::bail!("vector store unreachable");
        }
        self.documents
            .lock()
            .unwrap()
            .push((id.to_string(), text.to_string(), metadata));
        Ok(())
    }
}

#[derive(Default)]
pub struct StaticSearch {
    results: Vec<WebResult>,
    fail: bool,
    calls: AtomicUsize,
}

impl StaticSearch {
    pub fn with_results(pairs: &[(&str, &str)]) -> Self {
        Self {
            results: pairs
                .iter()
                .map(|(title, body)| WebResult {
                    title: title.to_string(),
                    url: None,
                    body: body.to_string(),
                })
                .collect(),
            ..Self::default()
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WebSearch for StaticSearch {
    async fn search(&self, _query: &str, max_results: usize) -> Result<Vec<WebResult>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("rate limited");
        }
        Ok(self.results.iter().take(max_results).cloned().collect())
    }
}
