//! Filesystem reference store
//!
//! Serves the read-only reference repository from a local directory tree
//! following the stable path layout. Reads go through tokio's fs so
//! stages never block the runtime.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use medflow_core::{MedflowError, MedflowResult, ReferenceStore};

/// Reference store backed by a directory tree
#[derive(Clone)]
pub struct FsReferenceStore {
    root: PathBuf,
}

impl FsReferenceStore {
    /// Open a store rooted at `root`. The directory must exist; contents
    /// are read lazily.
    pub fn new(root: impl Into<PathBuf>) -> MedflowResult<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(MedflowError::config(format!(
                "reference store root {} is not a directory",
                root.display()
            )));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> MedflowResult<PathBuf> {
        // The store is addressed by relative keys only.
        if path.contains("..") || path.starts_with('/') {
            return Err(MedflowError::validation(format!(
                "invalid reference path: {}",
                path
            )));
        }
        Ok(self.root.join(path))
    }
}

#[async_trait]
impl ReferenceStore for FsReferenceStore {
    async fn file_exists(&self, path: &str) -> MedflowResult<bool> {
        let full = self.resolve(path)?;
        Ok(tokio::fs::try_exists(&full).await.unwrap_or(false))
    }

    async fn get_file_content(&self, path: &str) -> MedflowResult<Bytes> {
        let full = self.resolve(path)?;
        debug!(path = %full.display(), "reference store read");
        match tokio::fs::read(&full).await {
            Ok(bytes) => Ok(Bytes::from(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(MedflowError::not_found(
                format!("reference record '{}' does not exist", path),
            )),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_files_by_name(&self, dir: &str, prefix: &str) -> MedflowResult<Vec<String>> {
        let full = self.resolve(dir)?;
        let mut names = Vec::new();

        let mut entries = match tokio::fs::read_dir(&full).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with(prefix) {
                names.push(name);
            }
        }

        names.sort();
        Ok(names)
    }
}
