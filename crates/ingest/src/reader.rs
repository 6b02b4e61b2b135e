use anyhow::{Context, Result};
use std::path::Path;
use tokio::fs;
use walkdir::WalkDir;

pub struct FileReader;

impl FileReader {
    fn is_supported(path: &Path) -> bool {
        matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("md") | Some("txt")
        )
    }

    pub async fn read_file(path: &Path) -> Result<String> {
        if !Self::is_supported(path) {
            let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
            anyhow::bail!("Unsupported file format: {:?} ({})", path, extension);
        }

        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read file: {:?}", path))?;
        Ok(content)
    }

    /// Read every supported file below `dir`, sorted by path.
    pub async fn read_directory(dir: &Path) -> Result<Vec<(String, String)>> {
        let mut paths = Vec::new();
        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = entry.with_context(|| format!("Failed to walk directory: {:?}", dir))?;
            if entry.file_type().is_file() && Self::is_supported(entry.path()) {
                paths.push(entry.into_path());
            }
        }

        let mut files = Vec::with_capacity(paths.len());
        for path in paths {
            let content = Self::read_file(&path).await?;
            files.push((path.to_string_lossy().to_string(), content));
        }

        Ok(files)
    }
}
