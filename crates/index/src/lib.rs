pub mod embeddings;
pub mod qdrant_index;

pub use embeddings::{Embedder, EmbeddingClient};
pub use qdrant_index::{Passage, QdrantStore, VectorStore};

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info};

/// Text embedded once to learn the model's vector dimension.
const PROBE_TEXT: &str = "测试文本";

/// Embeds chunks and questions on a bounded worker pool and talks to the vector store.
pub struct Indexer {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    workers: Arc<Semaphore>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct IndexReport {
    pub chunks: usize,
    pub embedded: usize,
    pub inserted: usize,
    pub dimension: usize,
}

impl Indexer {
    pub fn new(embedder: Arc<dyn Embedder>, store: Arc<dyn VectorStore>, workers: Arc<Semaphore>) -> Self {
        Self {
            embedder,
            store,
            workers,
        }
    }

    /// Replace the collection's contents with the given chunks.
    ///
    /// Chunks whose embedding fails are logged and left out.
    pub async fn rebuild(&self, chunks: Vec<ingest::Chunk>) -> Result<IndexReport> {
        let dimension = self
            .embed(PROBE_TEXT)
            .await
            .context("Failed to probe embedding dimension")?
            .len();
        self.store.recreate_collection(dimension).await?;

        let total = chunks.len();
        let mut tasks = JoinSet::new();
        for (position, chunk) in chunks.into_iter().enumerate() {
            let permit = self.workers.clone().acquire_owned().await?;
            let embedder = self.embedder.clone();
            tasks.spawn(async move {
                let vector = embedder.embed(&chunk.text).await;
                drop(permit);
                (position, chunk, vector)
            });
        }

        let mut embedded = Vec::with_capacity(total);
        while let Some(joined) = tasks.join_next().await {
            let (position, chunk, vector) = joined.context("Embedding task panicked")?;
            match vector {
                Ok(vector) => embedded.push((position, chunk, vector)),
                Err(e) => error!(chunk_id = %chunk.chunk_id, error = %e, "Failed to embed chunk"),
            }
        }
        embedded.sort_by_key(|(position, _, _)| *position);

        let items: Vec<_> = embedded
            .into_iter()
            .map(|(_, chunk, vector)| (chunk, vector))
            .collect();
        let embedded_count = items.len();
        let inserted = self.store.insert(items).await?;

        info!(chunks = total, embedded = embedded_count, inserted, "Collection rebuilt");
        Ok(IndexReport {
            chunks: total,
            embedded: embedded_count,
            inserted,
            dimension,
        })
    }

    /// Embed the question and fetch the `limit` closest passages.
    pub async fn retrieve(&self, question: &str, limit: usize) -> Result<Vec<Passage>> {
        let vector = self.embed(question).await.context("Failed to embed question")?;

        let _permit = self.workers.acquire().await?;
        self.store.search(vector, limit).await
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let _permit = self.workers.acquire().await?;
        self.embedder.embed(text).await
    }
}
