//! Orchestrator configuration

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use medflow_core::{ErrorKind, MedflowError, MedflowResult, ProcessingError};

/// Predicate deciding whether a failed attempt is retried.
/// Programmatic only; not part of the serialized configuration.
pub type RetryCondition = Arc<dyn Fn(&ProcessingError) -> bool + Send + Sync>;

/// Default retry eligibility: transient transport problems and timeouts
pub fn default_retry_condition() -> RetryCondition {
    Arc::new(|error: &ProcessingError| {
        matches!(error.kind, ErrorKind::ExternalApi | ErrorKind::Timeout)
    })
}

/// What the orchestrator does when a stage fails
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorPolicy {
    /// Skip the failed stage's dependents, keep independents running
    #[default]
    Continue,
    /// Abort the run and cancel in-flight stages
    FailFast,
}

/// Retry policy applied to non-critical stage failures
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

fn default_max_retries() -> u32 {
    1
}

fn default_backoff_ms() -> u64 {
    500
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

/// Orchestrator settings, deserializable from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorConfig {
    /// Concurrency ceiling for stage execution
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    /// Deadline for stages registered without their own timeout
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,

    #[serde(default)]
    pub retry_policy: RetryPolicy,

    #[serde(default)]
    pub error_policy: ErrorPolicy,
}

fn default_max_concurrent_jobs() -> usize {
    2
}

fn default_timeout_ms() -> u64 {
    60_000
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: default_max_concurrent_jobs(),
            default_timeout_ms: default_timeout_ms(),
            retry_policy: RetryPolicy::default(),
            error_policy: ErrorPolicy::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Load configuration from a YAML file
    pub async fn from_file(path: &str) -> MedflowResult<Self> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            MedflowError::config(format!("failed to read config file {}: {}", path, e))
        })?;
        serde_yaml::from_str(&content)
            .map_err(|e| MedflowError::config(format!("failed to parse config YAML: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medflow_core::Severity;

    #[test]
    fn test_defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.max_concurrent_jobs, 2);
        assert_eq!(config.default_timeout_ms, 60_000);
        assert_eq!(config.retry_policy.max_retries, 1);
        assert_eq!(config.error_policy, ErrorPolicy::Continue);
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
maxConcurrentJobs: 4
defaultTimeoutMs: 30000
retryPolicy:
  maxRetries: 2
  backoffMs: 100
errorPolicy: fail-fast
"#;
        let config: OrchestratorConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.max_concurrent_jobs, 4);
        assert_eq!(config.default_timeout_ms, 30_000);
        assert_eq!(config.retry_policy.max_retries, 2);
        assert_eq!(config.retry_policy.backoff_ms, 100);
        assert_eq!(config.error_policy, ErrorPolicy::FailFast);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: OrchestratorConfig = serde_yaml::from_str("maxConcurrentJobs: 8").unwrap();
        assert_eq!(config.max_concurrent_jobs, 8);
        assert_eq!(config.default_timeout_ms, 60_000);
        assert_eq!(config.error_policy, ErrorPolicy::Continue);
    }

    #[test]
    fn test_default_retry_condition() {
        let condition = default_retry_condition();

        let timeout = ProcessingError::new("x", "deadline", Severity::Medium)
            .with_kind(ErrorKind::Timeout);
        assert!(condition(&timeout));

        let transport = ProcessingError::new("x", "rate limited", Severity::Medium)
            .with_kind(ErrorKind::ExternalApi);
        assert!(condition(&transport));

        let validation = ProcessingError::new("x", "bad shape", Severity::Critical)
            .with_kind(ErrorKind::Validation);
        assert!(!condition(&validation));
    }
}
