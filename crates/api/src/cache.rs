use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use index::Embedder;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Embedder wrapper that remembers vectors by the SHA-256 of their text.
pub struct CachedEmbedder {
    inner: Arc<dyn Embedder>,
    embeddings: DashMap<String, Vec<f32>>,
    max_entries: usize,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn Embedder>, max_entries: usize) -> Self {
        Self {
            inner,
            embeddings: DashMap::new(),
            max_entries,
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
        }
    }

    fn set_embedding(&self, key: String, embedding: Vec<f32>) {
        if self.max_entries == 0 {
            return;
        }
        if self.embeddings.len() >= self.max_entries {
            // Simple eviction: clear 25% when full
            let to_remove: Vec<_> = self
                .embeddings
                .iter()
                .take((self.max_entries / 4).max(1))
                .map(|r| r.key().clone())
                .collect();
            for key in to_remove {
                self.embeddings.remove(&key);
            }
        }
        self.embeddings.insert(key, embedding);
    }

    fn hash_text(text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            embeddings_cached: self.embeddings.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl Embedder for CachedEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let key = Self::hash_text(text);
        if let Some(hit) = self.embeddings.get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(hit.value().clone());
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let embedding = self.inner.embed(text).await?;
        self.set_embedding(key, embedding.clone());
        Ok(embedding)
    }
}

#[derive(Debug, serde::Serialize)]
pub struct CacheStats {
    pub embeddings_cached: usize,
    pub hits: usize,
    pub misses: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct CountingEmbedder {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if text.is_empty() {
                anyhow::bail!("empty text");
            }
            Ok(vec![text.chars().count() as f32])
        }
    }

    #[tokio::test]
    async fn test_repeated_text_hits_cache() {
        let inner = Arc::new(CountingEmbedder::default());
        let cache = CachedEmbedder::new(inner.clone(), 100);

        assert_eq!(cache.embed("关键帧").await.unwrap(), vec![3.0]);
        assert_eq!(cache.embed("关键帧").await.unwrap(), vec![3.0]);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);

        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.embeddings_cached), (1, 1, 1));
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let inner = Arc::new(CountingEmbedder::default());
        let cache = CachedEmbedder::new(inner.clone(), 100);

        assert!(cache.embed("").await.is_err());
        assert!(cache.embed("").await.is_err());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.stats().embeddings_cached, 0);
    }

    #[tokio::test]
    async fn test_evicts_a_quarter_when_full() {
        let cache = CachedEmbedder::new(Arc::new(CountingEmbedder::default()), 8);
        for i in 0..8 {
            cache.embed(&format!("text {}", i)).await.unwrap();
        }
        assert_eq!(cache.stats().embeddings_cached, 8);

        cache.embed("one more").await.unwrap();
        assert_eq!(cache.stats().embeddings_cached, 7);
    }
}
