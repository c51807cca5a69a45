//! In-memory reference store for tests

use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use serde_json::Value;

use medflow_core::{MedflowError, MedflowResult, ReferenceStore};

/// Reference store backed by an in-memory map of path -> bytes
#[derive(Default)]
pub struct MockReferenceStore {
    files: RwLock<BTreeMap<String, Bytes>>,
}

impl MockReferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: impl Into<String>, content: impl Into<Bytes>) {
        self.files.write().insert(path.into(), content.into());
    }

    /// Insert a JSON value serialized as the record body
    pub fn insert_json(&self, path: impl Into<String>, value: &Value) {
        self.insert(path, serde_json::to_vec(value).expect("serializable value"));
    }

    pub fn len(&self) -> usize {
        self.files.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.read().is_empty()
    }
}

#[async_trait]
impl ReferenceStore for MockReferenceStore {
    async fn file_exists(&self, path: &str) -> MedflowResult<bool> {
        Ok(self.files.read().contains_key(path))
    }

    async fn get_file_content(&self, path: &str) -> MedflowResult<Bytes> {
        self.files.read().get(path).cloned().ok_or_else(|| {
            MedflowError::not_found(format!("reference record '{}' does not exist", path))
        })
    }

    async fn list_files_by_name(&self, dir: &str, prefix: &str) -> MedflowResult<Vec<String>> {
        let dir_prefix = format!("{}/", dir);
        Ok(self
            .files
            .read()
            .keys()
            .filter_map(|path| path.strip_prefix(&dir_prefix))
            .filter(|name| name.starts_with(prefix) && !name.contains('/'))
            .map(|name| name.to_string())
            .collect())
    }
}
