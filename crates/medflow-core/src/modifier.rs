//! Modifier suggestions and procedure line items

use serde::{Deserialize, Serialize};

use crate::error::ViolationSeverity;
use crate::evidence::Evidence;

/// What a modifier changes on the claim line
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ModifierClassification {
    Pricing,
    Payment,
    Location,
    Informational,
}

/// Which policy edit a modifier suggestion addresses
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum EditKind {
    ProcedurePair,
    UnitLimit,
    #[default]
    None,
}

/// A modifier decision for one procedure line
///
/// The code is nullable: a record may assert "no modifier applies here"
/// with a rationale, which is an explicit decision rather than an omission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModifierSuggestion {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    #[serde(default)]
    pub description: String,

    pub rationale: String,

    pub classification: ModifierClassification,

    /// Documentation the payer expects to see when this modifier is billed
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub documentation_required: String,

    /// Fee adjustment description (e.g. "150% of allowable")
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub fee_adjustment: String,

    #[serde(default)]
    pub edit_kind: EditKind,

    /// For procedure-pair edits, the column-2 code the modifier bypasses;
    /// for unit-limit edits, the procedure code itself
    #[serde(skip_serializing_if = "Option::is_none")]
    pub applies_to: Option<String>,

    /// Procedure this suggestion is attached to (string reference into
    /// the state's procedure list)
    pub procedure_code: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence: Vec<Evidence>,
}

impl ModifierSuggestion {
    pub fn new(
        code: Option<String>,
        procedure_code: impl Into<String>,
        rationale: impl Into<String>,
        classification: ModifierClassification,
    ) -> Self {
        Self {
            code,
            description: String::new(),
            rationale: rationale.into(),
            classification,
            documentation_required: String::new(),
            fee_adjustment: String::new(),
            edit_kind: EditKind::None,
            applies_to: None,
            procedure_code: procedure_code.into(),
            evidence: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_edit(mut self, kind: EditKind, applies_to: impl Into<String>) -> Self {
        self.edit_kind = kind;
        self.applies_to = Some(applies_to.into());
        self
    }

    pub fn with_evidence(mut self, evidence: Evidence) -> Self {
        self.evidence.push(evidence);
        self
    }

    /// A null-code suggestion is an explicit "no action" decision
    pub fn is_no_action(&self) -> bool {
        self.code.is_none()
    }
}

/// Flag attached to a line item by compliance processing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceFlag {
    pub original_units: u32,
    pub truncated_units: u32,
    pub severity: ViolationSeverity,
    pub reason: String,
}

/// A single claim line: one procedure, its units, and its modifiers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    /// Stable id of the form "<code>-line-<n>"
    pub line_id: String,

    pub procedure_code: String,

    pub units: u32,

    /// Policy modifiers assigned in phase one
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub phase_one: Vec<ModifierSuggestion>,

    /// Ancillary modifiers assigned in phase two
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub phase_two: Vec<ModifierSuggestion>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub compliance_flag: Option<ComplianceFlag>,
}

impl LineItem {
    pub fn new(procedure_code: impl Into<String>, ordinal: u32, units: u32) -> Self {
        let procedure_code = procedure_code.into();
        Self {
            line_id: format!("{}-line-{}", procedure_code, ordinal),
            procedure_code,
            units,
            phase_one: Vec::new(),
            phase_two: Vec::new(),
            compliance_flag: None,
        }
    }

    pub fn with_flag(mut self, flag: ComplianceFlag) -> Self {
        self.compliance_flag = Some(flag);
        self
    }

    /// All assigned modifiers across both phases, in phase order
    pub fn all_modifiers(&self) -> impl Iterator<Item = &ModifierSuggestion> {
        self.phase_one.iter().chain(self.phase_two.iter())
    }

    /// Non-null modifier codes across both phases
    pub fn modifier_codes(&self) -> Vec<&str> {
        self.all_modifiers()
            .filter_map(|m| m.code.as_deref())
            .collect()
    }
}
