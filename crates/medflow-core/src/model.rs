//! Remote-model abstractions
//!
//! `ModelClient` is one concrete endpoint; `ModelBackends` is the routing
//! surface stages actually call, implemented by the backend health manager
//! which picks an endpoint per stage and tracks failures.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::MedflowResult;
use crate::schema::OutputSchema;

/// Request for a schema-conforming structured response
#[derive(Debug, Clone)]
pub struct StructuredRequest {
    pub prompt: String,

    pub schema: OutputSchema,

    /// Model/deployment name; the backend manager may override with the
    /// stage's assigned deployment
    pub model: String,

    pub temperature: f32,
}

impl StructuredRequest {
    pub fn new(prompt: impl Into<String>, schema: OutputSchema) -> Self {
        Self {
            prompt: prompt.into(),
            schema,
            model: String::new(),
            temperature: 0.1,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

/// Request for a free-text response
#[derive(Debug, Clone)]
pub struct TextRequest {
    pub prompt: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<usize>,
}

impl TextRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            model: String::new(),
            temperature: 0.7,
            max_tokens: None,
        }
    }
}

/// A single remote-model endpoint
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Produce a value conforming to the request schema
    async fn generate_structured(&self, request: &StructuredRequest) -> MedflowResult<Value>;

    /// Produce free text
    async fn generate_text(&self, request: &TextRequest) -> MedflowResult<String>;
}

/// Identifier of an endpoint in the backend pool
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum EndpointId {
    A,
    B,
}

impl std::fmt::Display for EndpointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::A => write!(f, "A"),
            Self::B => write!(f, "B"),
        }
    }
}

/// The endpoint currently assigned to a stage
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendAssignment {
    pub endpoint: EndpointId,
    pub deployment: String,
    pub endpoint_url: String,
}

/// Stage-aware model routing with failure tracking
///
/// Implementations route each call to the stage's assigned endpoint,
/// record successes and failures, and fail over when the failure window
/// threshold is exceeded.
#[async_trait]
pub trait ModelBackends: Send + Sync {
    /// The endpoint a stage would use right now
    fn assigned_backend(&self, stage: &str) -> BackendAssignment;

    async fn generate_structured(
        &self,
        stage: &str,
        request: &StructuredRequest,
    ) -> MedflowResult<Value>;

    async fn generate_text(&self, stage: &str, request: &TextRequest) -> MedflowResult<String>;
}
