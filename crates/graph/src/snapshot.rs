use anyhow::{Context, Result};
use std::future::Future;
use std::path::Path;
use tokio::fs;
use tracing::info;

use crate::GraphModel;

/// Load the graph snapshot at `path`, or derive the graph and write it there.
pub async fn load_or_derive<F, Fut>(path: &Path, derive: F) -> Result<GraphModel>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<GraphModel>>,
{
    if fs::try_exists(path).await.unwrap_or(false) {
        let graph = load(path).await?;
        info!(path = ?path, entities = graph.len(), "Loaded graph snapshot");
        return Ok(graph);
    }

    let graph = derive().await?;
    save(path, &graph).await?;
    info!(path = ?path, entities = graph.len(), relations = graph.relations().len(), "Wrote graph snapshot");
    Ok(graph)
}

pub async fn load(path: &Path) -> Result<GraphModel> {
    let raw = fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read graph snapshot: {:?}", path))?;
    serde_json::from_str(&raw).with_context(|| format!("Invalid graph snapshot: {:?}", path))
}

pub async fn save(path: &Path, graph: &GraphModel) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create directory: {:?}", parent))?;
    }
    let json = serde_json::to_string_pretty(graph).context("Failed to serialize graph")?;
    fs::write(path, json)
        .await
        .with_context(|| format!("Failed to write graph snapshot: {:?}", path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use extract::{Entity, ExtractionResult, Relation};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn course() -> GraphModel {
        let mut graph = GraphModel::new();
        graph.merge(ExtractionResult {
            entities: vec![
                Entity::new("course_动画", "动画", "课程"),
                Entity::new("part_基础", "基础", "部分"),
            ],
            relations: vec![Relation::new("course_动画", "part_基础", "包含")],
        });
        graph
    }

    #[tokio::test]
    async fn test_derives_once_then_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data/kg_data.json");
        let counter = AtomicUsize::new(0);
        let derivations = &counter;

        let derive = move || async move {
            derivations.fetch_add(1, Ordering::SeqCst);
            anyhow::Ok(course())
        };
        let first = load_or_derive(&path, derive).await.unwrap();
        let second = load_or_derive(&path, derive).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("\"from\": \"course_动画\""));
    }

    #[tokio::test]
    async fn test_derive_failure_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kg_data.json");

        let result = load_or_derive(&path, || async { Err(anyhow::anyhow!("index.md missing")) }).await;

        assert!(result.is_err());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kg_data.json");
        std::fs::write(&path, "{not json").unwrap();

        assert!(load_or_derive(&path, || async { anyhow::Ok(course()) }).await.is_err());
    }
}
