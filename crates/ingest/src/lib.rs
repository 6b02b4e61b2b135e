pub mod chunk;
pub mod chunker;
pub mod markup;
pub mod reader;

pub use chunk::Chunk;
pub use chunker::{Chunker, ChunkerConfig, TextSpan};
pub use markup::{Segment, split_markup};
pub use reader::FileReader;

use anyhow::Result;
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::info;

/// Generate a stable document ID from file path
pub fn generate_doc_id(path: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.as_bytes());
    let result = hasher.finalize();
    hex::encode(&result[..16])
}

/// Main ingestion pipeline
pub async fn ingest_file(file_path: &Path, config: &ChunkerConfig) -> Result<Vec<Chunk>> {
    let content = FileReader::read_file(file_path).await?;
    let path_str = file_path.to_string_lossy().to_string();
    let doc_id = generate_doc_id(&path_str);

    let chunker = Chunker::new(config.clone());
    let chunks = chunker.chunk_text(&doc_id, &content, &path_str);

    info!(
        source = %path_str,
        chunks = chunks.len(),
        atomic = chunks.iter().filter(|c| c.atomic).count(),
        largest = chunks.iter().map(Chunk::char_len).max().unwrap_or(0),
        "Document chunked"
    );
    Ok(chunks)
}

/// Ingest entire directory
pub async fn ingest_directory(dir_path: &Path, config: &ChunkerConfig) -> Result<Vec<Chunk>> {
    let files = FileReader::read_directory(dir_path).await?;
    let chunker = Chunker::new(config.clone());

    let mut all_chunks = Vec::new();

    for (path, content) in files {
        let doc_id = generate_doc_id(&path);
        let chunks = chunker.chunk_text(&doc_id, &content, &path);
        all_chunks.extend(chunks);
    }

    Ok(all_chunks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ingest_file_tags_chunks_with_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wz.md");
        std::fs::write(&path, "### 1.1 概述\n如图1.1\n![](images/a.png)\n正文").unwrap();

        let chunks = ingest_file(&path, &ChunkerConfig::default()).await.unwrap();
        let doc_id = generate_doc_id(&path.to_string_lossy());

        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| c.doc_id == doc_id));
        assert!(chunks[1].atomic);
    }
}
