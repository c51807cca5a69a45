//! Explicit service registry
//!
//! Constructed once at process start and handed to every stage through its
//! context. No process-wide singletons: anything a stage talks to is here.

use std::sync::Arc;

use crate::error::{MedflowError, MedflowResult};
use crate::model::ModelBackends;
use crate::store::{ReferenceStore, VectorSearch};

/// Well-known service names used in agent requirements
pub const SERVICE_MODEL: &str = "model";
pub const SERVICE_REFERENCE_STORE: &str = "reference-store";
pub const SERVICE_VECTOR_SEARCH: &str = "vector-search";

/// Shared services available to stages
#[derive(Clone, Default)]
pub struct ServiceRegistry {
    backends: Option<Arc<dyn ModelBackends>>,
    store: Option<Arc<dyn ReferenceStore>>,
    vector: Option<Arc<dyn VectorSearch>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_backends(mut self, backends: Arc<dyn ModelBackends>) -> Self {
        self.backends = Some(backends);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn ReferenceStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_vector_search(mut self, vector: Arc<dyn VectorSearch>) -> Self {
        self.vector = Some(vector);
        self
    }

    /// Whether a named service is registered
    pub fn has(&self, name: &str) -> bool {
        match name {
            SERVICE_MODEL => self.backends.is_some(),
            SERVICE_REFERENCE_STORE => self.store.is_some(),
            SERVICE_VECTOR_SEARCH => self.vector.is_some(),
            _ => false,
        }
    }

    /// Names of all registered services
    pub fn names(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.backends.is_some() {
            names.push(SERVICE_MODEL);
        }
        if self.store.is_some() {
            names.push(SERVICE_REFERENCE_STORE);
        }
        if self.vector.is_some() {
            names.push(SERVICE_VECTOR_SEARCH);
        }
        names
    }

    pub fn backends(&self) -> MedflowResult<&Arc<dyn ModelBackends>> {
        self.backends
            .as_ref()
            .ok_or_else(|| MedflowError::config("model service not registered"))
    }

    pub fn store(&self) -> MedflowResult<&Arc<dyn ReferenceStore>> {
        self.store
            .as_ref()
            .ok_or_else(|| MedflowError::config("reference-store service not registered"))
    }

    pub fn vector_search(&self) -> MedflowResult<&Arc<dyn VectorSearch>> {
        self.vector
            .as_ref()
            .ok_or_else(|| MedflowError::config("vector-search service not registered"))
    }
}
