//! Procedure codes and their reference-store enrichment

use serde::{Deserialize, Serialize};

use crate::diagnosis::DiagnosisCode;

/// Unit-limit adjudication indicator
///
/// Controls how an overage against the unit limit is handled: `1` permits a
/// documented split onto separate lines, `2` is an absolute per-date limit,
/// `3` auto-denies the overage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Mai {
    #[serde(rename = "1")]
    DocumentedSplit,
    #[serde(rename = "2")]
    AbsoluteDate,
    #[serde(rename = "3")]
    AutoDeny,
}

impl Mai {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::DocumentedSplit),
            2 => Some(Self::AbsoluteDate),
            3 => Some(Self::AutoDeny),
            _ => None,
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            Self::DocumentedSplit => 1,
            Self::AbsoluteDate => 2,
            Self::AutoDeny => 3,
        }
    }
}

/// Reference metadata carried on an enriched procedure code
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcedureInsight {
    /// Official long description from the reference store
    #[serde(skip_serializing_if = "Option::is_none")]
    pub official_description: Option<String>,

    /// Plain-language description, when the store has one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub common_description: Option<String>,

    /// Free-form policy notes from the reference record
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub policy: serde_json::Value,
}

/// A billable procedure code with units, evidence hooks, and enrichment
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcedureCode {
    /// Five-digit code
    pub code: String,

    pub description: String,

    pub units: u32,

    /// True for the primary procedure, false for add-on codes
    #[serde(default = "default_true")]
    pub primary: bool,

    /// Per-date unit limit, when the reference store defines one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_limit: Option<u32>,

    /// Adjudication indicator for the unit limit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_limit_adjudication: Option<Mai>,

    /// Global-period indicator ("000", "010", "090", or special markers)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub global_period: Option<String>,

    /// Modifiers the reference store permits on this code
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_modifiers: Option<Vec<String>>,

    /// Diagnosis-code families that establish necessity for this code
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_diagnosis_families: Option<Vec<String>>,

    /// Diagnosis-code hints from the selection step, later replaced by the
    /// concrete linked diagnoses once diagnosis selection has run
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diagnosis_hints: Vec<String>,

    /// Concrete diagnoses linked to this procedure after selection
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub linked_diagnoses: Vec<DiagnosisCode>,

    /// Modifiers already present on the incoming claim line
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub applied_modifiers: Vec<String>,

    /// Position of the code in the code hierarchy, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hierarchy_path: Option<Vec<String>>,

    /// Reference-store metadata block
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insight: Option<ProcedureInsight>,
}

fn default_true() -> bool {
    true
}

impl ProcedureCode {
    pub fn new(code: impl Into<String>, description: impl Into<String>, units: u32) -> Self {
        Self {
            code: code.into(),
            description: description.into(),
            units,
            primary: true,
            unit_limit: None,
            unit_limit_adjudication: None,
            global_period: None,
            allowed_modifiers: None,
            allowed_diagnosis_families: None,
            diagnosis_hints: Vec::new(),
            linked_diagnoses: Vec::new(),
            applied_modifiers: Vec::new(),
            hierarchy_path: None,
            insight: None,
        }
    }

    pub fn with_unit_limit(mut self, limit: u32, adjudication: Mai) -> Self {
        self.unit_limit = Some(limit);
        self.unit_limit_adjudication = Some(adjudication);
        self
    }

    pub fn with_global_period(mut self, period: impl Into<String>) -> Self {
        self.global_period = Some(period.into());
        self
    }

    /// Whether units exceed the configured unit limit
    pub fn exceeds_unit_limit(&self) -> bool {
        matches!(self.unit_limit, Some(limit) if self.units > limit)
    }

    /// Whether `modifier` is permitted on this code. A missing allowed-list
    /// means the store had no restriction, which permits nothing here; the
    /// pre-vetted table is checked separately by the modifier engine.
    pub fn permits_modifier(&self, modifier: &str) -> bool {
        self.allowed_modifiers
            .as_ref()
            .map(|list| list.iter().any(|m| m == modifier))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mai_serialization() {
        let json = serde_json::to_string(&Mai::AbsoluteDate).unwrap();
        assert_eq!(json, "\"2\"");
        let parsed: Mai = serde_json::from_str("\"3\"").unwrap();
        assert_eq!(parsed, Mai::AutoDeny);
    }

    #[test]
    fn test_exceeds_unit_limit() {
        let p = ProcedureCode::new("49616", "Hernia repair", 3).with_unit_limit(1, Mai::DocumentedSplit);
        assert!(p.exceeds_unit_limit());

        let within = ProcedureCode::new("49616", "Hernia repair", 1).with_unit_limit(1, Mai::AutoDeny);
        assert!(!within.exceeds_unit_limit());

        let unset = ProcedureCode::new("49616", "Hernia repair", 5);
        assert!(!unset.exceeds_unit_limit());
    }

    #[test]
    fn test_permits_modifier() {
        let mut p = ProcedureCode::new("44950", "Appendectomy", 1);
        assert!(!p.permits_modifier("59"));
        p.allowed_modifiers = Some(vec!["59".to_string(), "XS".to_string()]);
        assert!(p.permits_modifier("59"));
        assert!(!p.permits_modifier("25"));
    }
}
