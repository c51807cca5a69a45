//! Compliance validation results

use serde::{Deserialize, Serialize};

use crate::error::ViolationSeverity;
use crate::procedure::Mai;

/// Modifier-indicator on a procedure-pair edit row
///
/// `0` forbids any bypass, `1` permits the full bypass family, `2` permits
/// only the distinct-service subset.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ModifierIndicator {
    #[serde(rename = "0")]
    NotAllowed,
    #[serde(rename = "1")]
    Allowed,
    #[serde(rename = "2")]
    DistinctOnly,
}

impl ModifierIndicator {
    /// Bypass modifiers this indicator accepts
    pub fn allowed_bypass_modifiers(&self) -> &'static [&'static str] {
        match self {
            Self::NotAllowed => &[],
            Self::Allowed => &["59", "XE", "XP", "XS", "XU", "25", "57"],
            Self::DistinctOnly => &["59", "XE", "XP", "XS", "XU"],
        }
    }

    pub fn permits(&self, modifier: &str) -> bool {
        self.allowed_bypass_modifiers().contains(&modifier)
    }
}

/// A procedure-pair (PTP) edit violation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PtpViolation {
    /// Column-1 (comprehensive) code
    pub column1: String,

    /// Column-2 (component) code
    pub column2: String,

    pub modifier_indicator: ModifierIndicator,

    pub severity: ViolationSeverity,

    pub message: String,
}

/// A unit-limit (MUE) violation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MueViolation {
    pub code: String,
    pub units: u32,
    pub limit: u32,
    pub adjudication: Mai,
    pub severity: ViolationSeverity,
    pub message: String,
}

/// A global-period advisory
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalPeriodViolation {
    pub code: String,
    pub global_period: String,
    pub severity: ViolationSeverity,
    pub message: String,
}

/// A value-unit plausibility warning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RvuViolation {
    pub code: String,
    pub severity: ViolationSeverity,
    pub message: String,
}

/// Overall compliance verdict
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ComplianceStatus {
    Pass,
    Fail,
}

/// Processing metadata attached to a compliance run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ptp_rule_set_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mue_rule_set_version: Option<String>,
    pub duration_ms: u64,
}

/// Structured output of the compliance stage
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceResult {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ptp_violations: Vec<PtpViolation>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mue_violations: Vec<MueViolation>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub global_period_violations: Vec<GlobalPeriodViolation>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rvu_violations: Vec<RvuViolation>,

    #[serde(default)]
    pub metadata: ComplianceMetadata,
}

impl ComplianceResult {
    pub fn total_violations(&self) -> usize {
        self.ptp_violations.len()
            + self.mue_violations.len()
            + self.global_period_violations.len()
            + self.rvu_violations.len()
    }

    /// `Pass` iff no violations were recorded
    pub fn status(&self) -> ComplianceStatus {
        if self.total_violations() == 0 {
            ComplianceStatus::Pass
        } else {
            ComplianceStatus::Fail
        }
    }

    /// Count of violations currently at error severity
    pub fn error_count(&self) -> usize {
        self.ptp_violations
            .iter()
            .filter(|v| v.severity == ViolationSeverity::Error)
            .count()
            + self
                .mue_violations
                .iter()
                .filter(|v| v.severity == ViolationSeverity::Error)
                .count()
    }

    /// Find a PTP violation for an ordered code pair
    pub fn ptp_violation_mut(&mut self, column1: &str, column2: &str) -> Option<&mut PtpViolation> {
        self.ptp_violations
            .iter_mut()
            .find(|v| v.column1 == column1 && v.column2 == column2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modifier_indicator_sets() {
        assert!(ModifierIndicator::Allowed.permits("25"));
        assert!(ModifierIndicator::Allowed.permits("59"));
        assert!(!ModifierIndicator::DistinctOnly.permits("25"));
        assert!(ModifierIndicator::DistinctOnly.permits("XU"));
        assert!(!ModifierIndicator::NotAllowed.permits("59"));
    }

    #[test]
    fn test_status_pass_iff_zero_violations() {
        let mut result = ComplianceResult::default();
        assert_eq!(result.status(), ComplianceStatus::Pass);

        result.mue_violations.push(MueViolation {
            code: "11102".to_string(),
            units: 5,
            limit: 2,
            adjudication: Mai::AbsoluteDate,
            severity: ViolationSeverity::Error,
            message: "units exceed limit".to_string(),
        });
        assert_eq!(result.status(), ComplianceStatus::Fail);
        assert_eq!(result.total_violations(), 1);
    }

    #[test]
    fn test_indicator_serialization() {
        assert_eq!(
            serde_json::to_string(&ModifierIndicator::DistinctOnly).unwrap(),
            "\"2\""
        );
        let parsed: ModifierIndicator = serde_json::from_str("\"0\"").unwrap();
        assert_eq!(parsed, ModifierIndicator::NotAllowed);
    }
}
