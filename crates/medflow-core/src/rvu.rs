//! Value-unit calculation results

use serde::{Deserialize, Serialize};

/// Per-procedure value-unit breakdown
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RvuLine {
    pub code: String,

    /// Geographically adjusted work component
    pub work: f64,

    /// Geographically adjusted practice-expense component
    pub practice_expense: f64,

    /// Geographically adjusted malpractice component
    pub malpractice: f64,

    /// Sum of the adjusted components, after modifier adjustments
    pub total: f64,

    /// Total multiplied by the conversion factor
    pub payment: f64,

    /// Flags raised during calculation (e.g. "HIGH_RVU_VALUE",
    /// "HCPCS_NOT_FOUND", "MANUAL_REVIEW")
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<String>,
}

/// Structured output of the value-unit stage
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RvuResult {
    pub contractor: String,

    pub locality_state: String,

    pub conversion_factor: f64,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub lines: Vec<RvuLine>,
}

impl RvuResult {
    pub fn total(&self) -> f64 {
        self.lines.iter().map(|l| l.total).sum()
    }

    pub fn total_payment(&self) -> f64 {
        self.lines.iter().map(|l| l.payment).sum()
    }

    pub fn line(&self, code: &str) -> Option<&RvuLine> {
        self.lines.iter().find(|l| l.code == code)
    }
}
