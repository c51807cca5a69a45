//! Backend health manager
//!
//! Fronts the pool of remote-model endpoints. Each stage has a static
//! primary endpoint and deployment; failures are counted in a sliding
//! window and a stage flips to its fallback endpoint while the window is
//! over threshold. A success on the stage's primary clears the window.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use medflow_core::stage;
use medflow_core::{
    BackendAssignment, EndpointId, MedflowError, MedflowResult, ModelBackends, ModelClient,
    StructuredRequest, TextRequest,
};

use crate::http::HttpModelClient;

/// Failures tolerated inside the window before failing over
const FAILURE_THRESHOLD: usize = 3;

/// Sliding failure window
const FAILURE_WINDOW: Duration = Duration::from_secs(300);

/// One endpoint's connection settings
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub url: String,
    pub api_key: String,
}

/// Environment-driven backend configuration
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub primary: EndpointConfig,
    pub secondary: Option<EndpointConfig>,
    pub api_version: Option<String>,
}

impl BackendConfig {
    /// Read `MODEL_ENDPOINT`/`MODEL_API_KEY` (required) and
    /// `MODEL_ENDPOINT_2`/`MODEL_API_KEY_2`/`MODEL_API_VERSION` (optional)
    pub fn from_env() -> MedflowResult<Self> {
        let url = std::env::var("MODEL_ENDPOINT")
            .map_err(|_| MedflowError::config("MODEL_ENDPOINT is not set"))?;
        let api_key = std::env::var("MODEL_API_KEY")
            .map_err(|_| MedflowError::config("MODEL_API_KEY is not set"))?;

        let secondary = match (
            std::env::var("MODEL_ENDPOINT_2").ok(),
            std::env::var("MODEL_API_KEY_2").ok(),
        ) {
            (Some(url), Some(api_key)) if !url.is_empty() && !api_key.is_empty() => {
                Some(EndpointConfig { url, api_key })
            }
            _ => None,
        };

        Ok(Self {
            primary: EndpointConfig { url, api_key },
            secondary,
            api_version: std::env::var("MODEL_API_VERSION").ok(),
        })
    }
}

/// Static routing entry for a stage
struct StageRoute {
    endpoint: EndpointId,
    deployment: &'static str,
}

fn static_route(stage_name: &str) -> StageRoute {
    match stage_name {
        stage::PROCEDURE_CODES => StageRoute {
            endpoint: EndpointId::A,
            deployment: "gpt-4.1",
        },
        stage::DIAGNOSIS_CODES => StageRoute {
            endpoint: EndpointId::B,
            deployment: "gpt-4.1-mini",
        },
        stage::COMPLIANCE => StageRoute {
            endpoint: EndpointId::A,
            deployment: "gpt-4.1-mini",
        },
        stage::COVERAGE_POLICY => StageRoute {
            endpoint: EndpointId::B,
            deployment: "gpt-4.1-mini",
        },
        stage::MODIFIERS => StageRoute {
            endpoint: EndpointId::A,
            deployment: "gpt-4.1",
        },
        stage::VALUE_UNITS => StageRoute {
            endpoint: EndpointId::B,
            deployment: "gpt-4.1-mini",
        },
        _ => StageRoute {
            endpoint: EndpointId::A,
            deployment: "gpt-4.1-mini",
        },
    }
}

/// Per-stage health snapshot
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageHealth {
    pub stage: String,
    pub failures_in_window: usize,
    pub on_fallback: bool,
    pub endpoint: EndpointId,
}

/// Stage-to-endpoint router with sliding-window failure tracking
pub struct BackendHealthManager {
    primary: Arc<dyn ModelClient>,
    secondary: Option<Arc<dyn ModelClient>>,
    primary_url: String,
    secondary_url: Option<String>,
    failures: DashMap<String, Vec<Instant>>,
    failure_threshold: usize,
    failure_window: Duration,
}

impl BackendHealthManager {
    /// Build HTTP clients from configuration. Fails iff the primary
    /// endpoint lacks either URL or key; a missing secondary is tolerated
    /// (no failover available).
    pub fn from_config(config: BackendConfig) -> MedflowResult<Self> {
        let mut primary = HttpModelClient::new(&config.primary.url, &config.primary.api_key)?;
        if let Some(version) = &config.api_version {
            primary = primary.with_api_version(version.clone());
        }

        let secondary = match &config.secondary {
            Some(endpoint) => {
                let mut client = HttpModelClient::new(&endpoint.url, &endpoint.api_key)?;
                if let Some(version) = &config.api_version {
                    client = client.with_api_version(version.clone());
                }
                Some(Arc::new(client) as Arc<dyn ModelClient>)
            }
            None => {
                info!("no secondary model endpoint configured; failover unavailable");
                None
            }
        };

        Ok(Self {
            primary: Arc::new(primary),
            secondary,
            primary_url: config.primary.url,
            secondary_url: config.secondary.map(|e| e.url),
            failures: DashMap::new(),
            failure_threshold: FAILURE_THRESHOLD,
            failure_window: FAILURE_WINDOW,
        })
    }

    /// Construct with explicit clients; used by tests and offline runs
    pub fn with_clients(
        primary: Arc<dyn ModelClient>,
        secondary: Option<Arc<dyn ModelClient>>,
    ) -> Self {
        Self {
            primary,
            secondary_url: secondary.as_ref().map(|_| "mock://secondary".to_string()),
            secondary,
            primary_url: "mock://primary".to_string(),
            failures: DashMap::new(),
            failure_threshold: FAILURE_THRESHOLD,
            failure_window: FAILURE_WINDOW,
        }
    }

    /// Override the failure window, for tests that exercise decay
    pub fn with_failure_window(mut self, window: Duration) -> Self {
        self.failure_window = window;
        self
    }

    fn endpoint_url(&self, endpoint: EndpointId) -> String {
        match endpoint {
            EndpointId::A => self.primary_url.clone(),
            EndpointId::B => self
                .secondary_url
                .clone()
                .unwrap_or_else(|| self.primary_url.clone()),
        }
    }

    fn client(&self, endpoint: EndpointId) -> Arc<dyn ModelClient> {
        match endpoint {
            EndpointId::A => Arc::clone(&self.primary),
            EndpointId::B => self
                .secondary
                .as_ref()
                .map(Arc::clone)
                .unwrap_or_else(|| Arc::clone(&self.primary)),
        }
    }

    fn other(endpoint: EndpointId) -> EndpointId {
        match endpoint {
            EndpointId::A => EndpointId::B,
            EndpointId::B => EndpointId::A,
        }
    }

    /// Failures within the current window, pruning expired entries
    fn window_failures(&self, stage_name: &str) -> usize {
        let now = Instant::now();
        match self.failures.get_mut(stage_name) {
            Some(mut entry) => {
                entry.retain(|t| now.duration_since(*t) < self.failure_window);
                entry.len()
            }
            None => 0,
        }
    }

    fn is_over_threshold(&self, stage_name: &str) -> bool {
        self.window_failures(stage_name) >= self.failure_threshold
    }

    /// Record a stage success. A success on the stage's primary endpoint
    /// resets its failure window.
    pub fn record_success(&self, stage_name: &str, endpoint: EndpointId) {
        if endpoint == static_route(stage_name).endpoint {
            self.failures.remove(stage_name);
        }
    }

    /// Record a stage failure into the sliding window
    pub fn record_failure(&self, stage_name: &str, error: &MedflowError) {
        warn!(stage = stage_name, error = %error, "backend failure recorded");
        self.failures
            .entry(stage_name.to_string())
            .or_default()
            .push(Instant::now());
    }

    /// Current assignment for every canonical stage
    pub fn assignment_status(&self) -> HashMap<String, BackendAssignment> {
        stage::ALL_STAGES
            .iter()
            .map(|s| (s.to_string(), self.assigned_backend(s)))
            .collect()
    }

    /// Per-stage failure counts and fallback status
    pub fn health_summary(&self) -> Vec<StageHealth> {
        stage::ALL_STAGES
            .iter()
            .map(|s| {
                let assignment = self.assigned_backend(s);
                let route = static_route(s);
                StageHealth {
                    stage: s.to_string(),
                    failures_in_window: self.window_failures(s),
                    on_fallback: assignment.endpoint != route.endpoint,
                    endpoint: assignment.endpoint,
                }
            })
            .collect()
    }

    pub fn reset_all_failures(&self) {
        self.failures.clear();
    }

    fn failure_is_transport(error: &MedflowError) -> bool {
        matches!(
            error,
            MedflowError::ExternalApi(_) | MedflowError::Timeout(_) | MedflowError::Io(_)
        )
    }

    fn resolve(&self, stage_name: &str, request_model: &str) -> (BackendAssignment, Arc<dyn ModelClient>, String) {
        let assignment = self.assigned_backend(stage_name);
        let client = self.client(assignment.endpoint);
        let model = if request_model.is_empty() {
            assignment.deployment.clone()
        } else {
            request_model.to_string()
        };
        (assignment, client, model)
    }
}

#[async_trait]
impl ModelBackends for BackendHealthManager {
    fn assigned_backend(&self, stage_name: &str) -> BackendAssignment {
        let route = static_route(stage_name);

        // A stage routed to B without a configured secondary stays on A.
        let mut endpoint = route.endpoint;
        if endpoint == EndpointId::B && self.secondary.is_none() {
            endpoint = EndpointId::A;
        }

        if self.is_over_threshold(stage_name) && self.secondary.is_some() {
            endpoint = Self::other(endpoint);
        }

        BackendAssignment {
            endpoint,
            deployment: route.deployment.to_string(),
            endpoint_url: self.endpoint_url(endpoint),
        }
    }

    async fn generate_structured(
        &self,
        stage_name: &str,
        request: &StructuredRequest,
    ) -> MedflowResult<Value> {
        let (assignment, client, model) = self.resolve(stage_name, &request.model);
        let mut request = request.clone();
        request.model = model;

        match client.generate_structured(&request).await {
            Ok(value) => {
                self.record_success(stage_name, assignment.endpoint);
                Ok(value)
            }
            Err(err) => {
                if Self::failure_is_transport(&err) {
                    self.record_failure(stage_name, &err);
                }
                Err(err)
            }
        }
    }

    async fn generate_text(
        &self,
        stage_name: &str,
        request: &TextRequest,
    ) -> MedflowResult<String> {
        let (assignment, client, model) = self.resolve(stage_name, &request.model);
        let mut request = request.clone();
        request.model = model;

        match client.generate_text(&request).await {
            Ok(text) => {
                self.record_success(stage_name, assignment.endpoint);
                Ok(text)
            }
            Err(err) => {
                if Self::failure_is_transport(&err) {
                    self.record_failure(stage_name, &err);
                }
                Err(err)
            }
        }
    }
}
