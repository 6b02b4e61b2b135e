pub mod llm;

pub use llm::QueryLLM;

use anyhow::{Context, Result};
use index::{Indexer, Passage};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Number the retrieved passages into one prompt context.
pub fn build_context(passages: &[Passage]) -> String {
    passages
        .iter()
        .enumerate()
        .map(|(i, p)| format!("相关内容 {}：\n{}", i + 1, p.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub answer: String,
    pub sources: Vec<Source>,
    pub latency_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Source {
    pub text: String,
    pub distance: f32,
    pub similarity: f32,
}

impl From<Passage> for Source {
    fn from(passage: Passage) -> Self {
        Self {
            similarity: passage.similarity(),
            text: passage.text,
            distance: passage.distance,
        }
    }
}

/// Retrieve passages for a question and stream an answer grounded on them.
pub struct QueryEngine {
    indexer: Arc<Indexer>,
    llm: QueryLLM,
    top_k: usize,
}

impl QueryEngine {
    pub fn new(indexer: Arc<Indexer>, llm: QueryLLM, top_k: usize) -> Self {
        Self { indexer, llm, top_k }
    }

    pub async fn ask(&self, question: &str) -> Result<Answer> {
        let start = Instant::now();

        let passages = self
            .indexer
            .retrieve(question, self.top_k)
            .await
            .context("Failed to retrieve passages")?;
        let context = build_context(&passages);

        let answer = self.llm.stream_answer(&context, question).await?;

        let latency_ms = start.elapsed().as_millis() as u64;
        info!(passages = passages.len(), latency_ms, "Question answered");

        Ok(Answer {
            answer,
            sources: passages.into_iter().map(Source::from).collect(),
            latency_ms,
        })
    }
}
