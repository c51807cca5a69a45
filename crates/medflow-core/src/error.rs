//! Error types shared across the medflow workspace
//!
//! Two layers: `MedflowError` is the `Result` error used by fallible
//! operations, while `ProcessingError` is the serializable record that
//! accumulates in workflow state and survives the run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result alias used throughout the workspace
pub type MedflowResult<T> = Result<T, MedflowError>;

/// Error type for all medflow operations
#[derive(Error, Debug)]
pub enum MedflowError {
    /// Input or response failed validation
    #[error("Validation error: {0}")]
    Validation(String),

    /// A remote service (model endpoint, search index) failed
    #[error("External API error: {0}")]
    ExternalApi(String),

    /// An operation exceeded its deadline
    #[error("Timeout: {0}")]
    Timeout(String),

    /// A referenced record or resource does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Two records or assignments are mutually exclusive
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Configuration is missing or malformed
    #[error("Configuration error: {0}")]
    Config(String),

    /// The stage was cancelled before completing
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// IO failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Anything else
    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl MedflowError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn external_api(msg: impl Into<String>) -> Self {
        Self::ExternalApi(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::Cancelled(msg.into())
    }

    pub fn unknown(msg: impl Into<String>) -> Self {
        Self::Unknown(msg.into())
    }

    /// Error kind tag used in logs and processing-error records
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::ExternalApi(_) => ErrorKind::ExternalApi,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Config(_) => ErrorKind::Unknown,
            Self::Cancelled(_) => ErrorKind::Unknown,
            Self::Io(_) => ErrorKind::ExternalApi,
            Self::Serialization(_) => ErrorKind::Validation,
            Self::Unknown(_) => ErrorKind::Unknown,
        }
    }

    /// Default severity classification for the orchestrator's retry and
    /// abort decisions. Callers may override when they know better.
    pub fn severity(&self) -> Severity {
        match self {
            Self::Validation(_) => Severity::Critical,
            Self::ExternalApi(_) => Severity::Medium,
            Self::Timeout(_) => Severity::Medium,
            Self::NotFound(_) => Severity::Medium,
            Self::Conflict(_) => Severity::Medium,
            Self::Config(_) => Severity::Critical,
            Self::Cancelled(_) => Severity::High,
            Self::Io(_) => Severity::Medium,
            Self::Serialization(_) => Severity::Critical,
            Self::Unknown(_) => Severity::Critical,
        }
    }
}

/// Error kinds recorded on processing-error records
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    Validation,
    ExternalApi,
    Timeout,
    NotFound,
    Conflict,
    Unknown,
}

/// Severity of a recorded error
///
/// `Low` is cosmetic, `Medium` is recoverable within the stage, `High`
/// fails the stage but the pipeline may continue, `Critical` fails the
/// stage and aborts under fail-fast (or skips dependents under continue).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// Severity scale for compliance violations and line-item flags
///
/// Distinct from `Severity`: violations are findings on the claim, not
/// failures of the pipeline. An `Error` violation can be downgraded to
/// `Info` when a permitted bypass modifier resolves it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ViolationSeverity {
    Info,
    Warning,
    Error,
}

/// Serializable error record accumulated in workflow state
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingError {
    /// Machine-readable code (e.g. "HCPCS_NOT_FOUND")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    /// Human-readable message
    pub message: String,

    pub severity: Severity,

    pub kind: ErrorKind,

    pub timestamp: DateTime<Utc>,

    /// Component that recorded the error (agent or orchestrator)
    pub source: String,

    /// Arbitrary context for debugging
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub context: serde_json::Value,
}

impl ProcessingError {
    pub fn new(source: impl Into<String>, message: impl Into<String>, severity: Severity) -> Self {
        Self {
            code: None,
            message: message.into(),
            severity,
            kind: ErrorKind::Unknown,
            timestamp: Utc::now(),
            source: source.into(),
            context: serde_json::Value::Null,
        }
    }

    pub fn from_error(source: impl Into<String>, err: &MedflowError) -> Self {
        Self {
            code: None,
            message: err.to_string(),
            severity: err.severity(),
            kind: err.kind(),
            timestamp: Utc::now(),
            source: source.into(),
            context: serde_json::Value::Null,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_kind(mut self, kind: ErrorKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = context;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::Critical);
    }

    #[test]
    fn test_error_severity_classification() {
        assert_eq!(
            MedflowError::external_api("rate limited").severity(),
            Severity::Medium
        );
        assert_eq!(
            MedflowError::validation("schema mismatch").severity(),
            Severity::Critical
        );
        assert_eq!(MedflowError::timeout("deadline").severity(), Severity::Medium);
    }

    #[test]
    fn test_processing_error_from_error() {
        let err = MedflowError::not_found("no such record");
        let record = ProcessingError::from_error("compliance", &err);
        assert_eq!(record.kind, ErrorKind::NotFound);
        assert_eq!(record.severity, Severity::Medium);
        assert_eq!(record.source, "compliance");
    }

    #[test]
    fn test_processing_error_serialization() {
        let record = ProcessingError::new("value-units", "missing RVU record", Severity::Low)
            .with_code("HCPCS_NOT_FOUND")
            .with_kind(ErrorKind::NotFound);

        let json = serde_json::to_string(&record).unwrap();
        let parsed: ProcessingError = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.code.as_deref(), Some("HCPCS_NOT_FOUND"));
        assert_eq!(parsed.severity, Severity::Low);
    }
}
