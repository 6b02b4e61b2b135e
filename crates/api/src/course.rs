use anyhow::{Context, Result};
use graph::{CourseOutline, GraphModel, build_course_graph, snapshot};
use tokio::fs;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::config::PathsConfig;

/// The course outline graph and the textbook it was derived from.
#[derive(Debug)]
pub struct CourseData {
    pub graph: GraphModel,
    /// Textbook body; absent when only the snapshot could be read.
    pub content: Option<String>,
}

/// Loads the course graph on first use and keeps it for the process lifetime.
pub struct CourseSource {
    paths: PathsConfig,
    loaded: OnceCell<CourseData>,
}

impl CourseSource {
    pub fn new(paths: PathsConfig) -> Self {
        Self {
            paths,
            loaded: OnceCell::new(),
        }
    }

    pub async fn get(&self) -> Result<&CourseData> {
        self.loaded.get_or_try_init(|| load(&self.paths)).await
    }

    /// Load at startup. A failure is logged and retried on the next request.
    pub async fn preload(&self) -> bool {
        match self.get().await {
            Ok(course) => {
                info!(entities = course.graph.len(), "Course graph loaded");
                true
            }
            Err(e) => {
                warn!(error = %format!("{:#}", e), "Course graph unavailable at startup");
                false
            }
        }
    }
}

async fn load(paths: &PathsConfig) -> Result<CourseData> {
    let content = match fs::read_to_string(&paths.course_content).await {
        Ok(content) => Some(content),
        Err(e) => {
            warn!(path = ?paths.course_content, error = %e, "Course content unavailable");
            None
        }
    };

    let body = content.as_deref();
    let derive = move || async move {
        let body = body
            .with_context(|| format!("Failed to read course content: {:?}", paths.course_content))?;
        let index = fs::read_to_string(&paths.course_index)
            .await
            .with_context(|| format!("Failed to read course index: {:?}", paths.course_index))?;
        let outline = CourseOutline::parse(&index, &paths.course_title);
        anyhow::Ok(build_course_graph(&outline, body))
    };
    let graph = snapshot::load_or_derive(&paths.snapshot, derive).await?;

    Ok(CourseData { graph, content })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn paths(dir: &Path) -> PathsConfig {
        PathsConfig {
            documents: dir.to_path_buf(),
            snapshot: dir.join("kg_data.json"),
            course_index: dir.join("index.md"),
            course_content: dir.join("wz.md"),
            course_title: "动画".to_string(),
        }
    }

    #[tokio::test]
    async fn test_derives_course_graph_and_writes_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.md"), "# 基础\n## 第1章\n### 1.1 起源\n").unwrap();
        std::fs::write(dir.path().join("wz.md"), "### 1.1 起源\n#### 视觉暂留\n正文\n").unwrap();

        let source = CourseSource::new(paths(dir.path()));
        let data = source.get().await.unwrap();

        assert_eq!(data.graph.len(), 5);
        assert!(data.content.is_some());
        assert!(dir.path().join("kg_data.json").exists());
    }

    #[tokio::test]
    async fn test_snapshot_alone_is_enough_for_the_graph() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("kg_data.json"),
            r#"{"entities": [{"id": "course_动画", "label": "动画", "type": "课程"}], "relations": []}"#,
        )
        .unwrap();

        let source = CourseSource::new(paths(dir.path()));
        let data = source.get().await.unwrap();

        assert_eq!(data.graph.len(), 1);
        assert!(data.content.is_none());
    }

    #[tokio::test]
    async fn test_missing_sources_are_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let source = CourseSource::new(paths(dir.path()));
        assert!(source.get().await.is_err());
    }

    #[tokio::test]
    async fn test_preload_failure_is_retried_later() {
        let dir = tempfile::tempdir().unwrap();
        let source = CourseSource::new(paths(dir.path()));
        assert!(!source.preload().await);

        std::fs::write(dir.path().join("index.md"), "# 基础\n").unwrap();
        std::fs::write(dir.path().join("wz.md"), "").unwrap();

        assert!(source.preload().await);
        assert_eq!(source.get().await.unwrap().graph.len(), 2);
    }
}
