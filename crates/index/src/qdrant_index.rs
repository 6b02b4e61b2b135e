use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use ingest::Chunk;

/// A retrieved passage and its cosine distance to the query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    pub text: String,
    pub distance: f32,
}

impl Passage {
    pub fn similarity(&self) -> f32 {
        1.0 - self.distance
    }
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Drop any existing collection and create an empty one for `dimension`-sized vectors.
    async fn recreate_collection(&self, dimension: usize) -> Result<()>;

    /// Store chunk vectors, returning how many were inserted.
    async fn insert(&self, items: Vec<(Chunk, Vec<f32>)>) -> Result<usize>;

    /// Nearest passages to `vector`, closest first.
    async fn search(&self, vector: Vec<f32>, limit: usize) -> Result<Vec<Passage>>;
}

pub struct QdrantStore {
    base_url: String,
    client: reqwest::Client,
    collection_name: String,
}

#[derive(Serialize)]
struct CreateCollection {
    vectors: VectorParams,
}

#[derive(Serialize)]
struct VectorParams {
    size: usize,
    distance: String,
}

#[derive(Serialize)]
struct UpsertPoints {
    points: Vec<Point>,
}

#[derive(Serialize)]
struct Point {
    id: String,
    vector: Vec<f32>,
    payload: ChunkPayload,
}

#[derive(Serialize, Deserialize)]
struct ChunkPayload {
    text: String,
    #[serde(default)]
    chunk_id: String,
    #[serde(default)]
    doc_id: String,
    #[serde(default)]
    source: String,
}

#[derive(Serialize)]
struct SearchRequest {
    vector: Vec<f32>,
    limit: usize,
    with_payload: bool,
}

#[derive(Deserialize)]
struct SearchResponse {
    result: Vec<ScoredPoint>,
}

#[derive(Deserialize)]
struct ScoredPoint {
    score: f32,
    payload: Option<ChunkPayload>,
}

impl QdrantStore {
    pub fn new(base_url: String, collection_name: String) -> Self {
        Self {
            base_url,
            client: reqwest::Client::new(),
            collection_name,
        }
    }

    fn collection_url(&self) -> String {
        format!("{}/collections/{}", self.base_url, self.collection_name)
    }

    fn point(chunk: Chunk, vector: Vec<f32>) -> Point {
        Point {
            id: uuid::Uuid::new_v4().to_string(),
            vector,
            payload: ChunkPayload {
                text: chunk.text,
                chunk_id: chunk.chunk_id,
                doc_id: chunk.doc_id,
                source: chunk.source,
            },
        }
    }

    /// Qdrant reports cosine similarity; passages carry the distance.
    fn passages(response: SearchResponse) -> Vec<Passage> {
        response
            .result
            .into_iter()
            .filter_map(|point| {
                let payload = point.payload?;
                Some(Passage {
                    text: payload.text,
                    distance: 1.0 - point.score,
                })
            })
            .collect()
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn recreate_collection(&self, dimension: usize) -> Result<()> {
        let url = self.collection_url();

        let response = self.client.delete(&url).send().await?;
        if response.status().is_success() {
            info!(collection = %self.collection_name, "Dropped existing collection");
        }

        let create_req = CreateCollection {
            vectors: VectorParams {
                size: dimension,
                distance: "Cosine".to_string(),
            },
        };

        let response = self.client.put(&url).json(&create_req).send().await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            anyhow::bail!("Failed to create collection: {}", error_text);
        }

        info!(collection = %self.collection_name, dimension, "Collection created");
        Ok(())
    }

    async fn insert(&self, items: Vec<(Chunk, Vec<f32>)>) -> Result<usize> {
        if items.is_empty() {
            return Ok(0);
        }

        let points: Vec<Point> = items
            .into_iter()
            .map(|(chunk, vector)| Self::point(chunk, vector))
            .collect();
        let count = points.len();

        let url = format!("{}/points?wait=true", self.collection_url());
        let response = self
            .client
            .put(&url)
            .json(&UpsertPoints { points })
            .send()
            .await
            .context("Failed to send upsert request to Qdrant")?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            anyhow::bail!("Failed to upsert points: {}", error_text);
        }

        Ok(count)
    }

    async fn search(&self, vector: Vec<f32>, limit: usize) -> Result<Vec<Passage>> {
        let url = format!("{}/points/search", self.collection_url());

        let body = SearchRequest {
            vector,
            limit,
            with_payload: true,
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .context("Failed to send search request to Qdrant")?;

        if !response.status().is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            anyhow::bail!("Qdrant search failed: {}", error_text);
        }

        let result: SearchResponse = response
            .json()
            .await
            .context("Failed to parse Qdrant response")?;

        Ok(Self::passages(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_response_becomes_passages() {
        let raw = r#"{
            "result": [
                {"id": "a", "score": 0.92, "payload": {"text": "关键帧", "chunk_id": "c1"}},
                {"id": "b", "score": 0.40, "payload": null},
                {"id": "c", "score": 0.75, "payload": {"text": "补间"}}
            ],
            "status": "ok",
            "time": 0.001
        }"#;
        let response: SearchResponse = serde_json::from_str(raw).unwrap();
        let passages = QdrantStore::passages(response);

        assert_eq!(passages.len(), 2);
        assert_eq!(passages[0].text, "关键帧");
        assert!((passages[0].distance - 0.08).abs() < 1e-6);
        assert!((passages[1].similarity() - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_point_payload_carries_chunk_metadata() {
        let chunk = Chunk::new("doc".into(), "正文".into(), "wz.md".into(), (0, 1), false);
        let point = QdrantStore::point(chunk.clone(), vec![0.1, 0.2]);
        let json = serde_json::to_value(&point).unwrap();

        assert_eq!(json["payload"]["text"], "正文");
        assert_eq!(json["payload"]["chunk_id"], chunk.chunk_id);
        assert!(uuid::Uuid::parse_str(json["id"].as_str().unwrap()).is_ok());
    }
}
