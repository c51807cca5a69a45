//! Diagnosis codes establishing medical necessity

use serde::{Deserialize, Serialize};

use crate::evidence::Evidence;

/// A diagnosis code linked to the procedure it supports
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosisCode {
    /// Full diagnosis code string (e.g. "K43.0")
    pub code: String,

    pub description: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence: Vec<Evidence>,

    /// Procedure code this diagnosis establishes necessity for.
    /// A string reference rather than an owning pointer; the state owns
    /// all records in flat lists keyed by code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supports_procedure: Option<String>,
}

impl DiagnosisCode {
    pub fn new(code: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            description: description.into(),
            evidence: Vec::new(),
            supports_procedure: None,
        }
    }

    pub fn supporting(mut self, procedure_code: impl Into<String>) -> Self {
        self.supports_procedure = Some(procedure_code.into());
        self
    }

    pub fn with_evidence(mut self, evidence: Evidence) -> Self {
        self.evidence.push(evidence);
        self
    }

    /// First three characters of the code, the family prefix
    pub fn family_prefix(&self) -> &str {
        let end = self.code.len().min(3);
        &self.code[..end]
    }
}
