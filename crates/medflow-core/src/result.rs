//! Agent result envelope and structured payloads

use serde::{Deserialize, Serialize};

use crate::compliance::ComplianceResult;
use crate::diagnosis::DiagnosisCode;
use crate::error::{ErrorKind, ProcessingError, Severity};
use crate::evidence::Evidence;
use crate::modifier::{LineItem, ModifierSuggestion};
use crate::procedure::ProcedureCode;
use crate::rvu::RvuResult;

/// A procedure-pair conflict resolved by a phase-one modifier.
/// Carried on the modifier payload so the state merge can downgrade the
/// original violation; agents never mutate state directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PtpResolution {
    pub column1: String,
    pub column2: String,
    pub modifier: String,
}

/// Well-known structured payloads an agent can return.
///
/// Each variant maps onto one workflow-state field during the merge;
/// `Other` is the extensibility catch-all and merges into nothing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AgentData {
    Procedures(Vec<ProcedureCode>),
    Diagnoses(Vec<DiagnosisCode>),
    Compliance(ComplianceResult),
    Coverage(serde_json::Value),
    Rvu(RvuResult),
    FinalModifiers {
        modifiers: Vec<ModifierSuggestion>,
        line_items: Vec<LineItem>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        resolved_conflicts: Vec<PtpResolution>,
    },
    Empty,
    Other(serde_json::Value),
}

/// Execution metadata stamped by the agent envelope
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultMetadata {
    pub execution_time_ms: u64,
    pub version: String,
    pub agent_name: String,
}

/// Standardized result of one stage execution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentResult {
    pub success: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence: Vec<Evidence>,

    pub data: AgentData,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ProcessingError>,

    #[serde(default)]
    pub metadata: ResultMetadata,
}

impl AgentResult {
    pub fn success(data: AgentData) -> Self {
        Self {
            success: true,
            evidence: Vec::new(),
            data,
            errors: Vec::new(),
            metadata: ResultMetadata::default(),
        }
    }

    pub fn failure(error: ProcessingError) -> Self {
        Self {
            success: false,
            evidence: Vec::new(),
            data: AgentData::Empty,
            errors: vec![error],
            metadata: ResultMetadata::default(),
        }
    }

    /// A failed result for a stage that exceeded its deadline
    pub fn timed_out(agent: &str, timeout_ms: u64) -> Self {
        Self::failure(
            ProcessingError::new(
                agent,
                format!("stage exceeded its {} ms deadline", timeout_ms),
                Severity::Medium,
            )
            .with_kind(ErrorKind::Timeout),
        )
    }

    pub fn with_evidence(mut self, evidence: Evidence) -> Self {
        self.evidence.push(evidence);
        self
    }

    pub fn with_error(mut self, error: ProcessingError) -> Self {
        self.errors.push(error);
        self
    }

    /// Highest severity among recorded errors, `Low` when there are none
    pub fn max_severity(&self) -> Severity {
        self.errors
            .iter()
            .map(|e| e.severity)
            .max()
            .unwrap_or(Severity::Low)
    }

    /// Whether the result carries no evidence and no structured payload
    pub fn is_empty(&self) -> bool {
        self.evidence.is_empty() && matches!(self.data, AgentData::Empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_severity() {
        let mut result = AgentResult::success(AgentData::Empty);
        assert_eq!(result.max_severity(), Severity::Low);

        result.errors.push(ProcessingError::new("x", "m", Severity::Medium));
        result.errors.push(ProcessingError::new("x", "c", Severity::Critical));
        assert_eq!(result.max_severity(), Severity::Critical);
    }

    #[test]
    fn test_timed_out_result() {
        let result = AgentResult::timed_out("compliance", 30_000);
        assert!(!result.success);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].kind, ErrorKind::Timeout);
        assert_eq!(result.errors[0].severity, Severity::Medium);
    }

    #[test]
    fn test_empty_detection() {
        assert!(AgentResult::success(AgentData::Empty).is_empty());
        assert!(!AgentResult::success(AgentData::Procedures(vec![])).is_empty());
    }

    #[test]
    fn test_data_serialization_tags() {
        let data = AgentData::Procedures(vec![]);
        let json = serde_json::to_value(&data).unwrap();
        assert_eq!(json["kind"], "procedures");
    }
}
