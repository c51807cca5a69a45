//! Workflow state: the single source of truth for a case
//!
//! The state is owned by one orchestrator per case and mutated only through
//! the merge protocol. Stages read a snapshot and return results; merges
//! run one at a time in completion order.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::case::{CaseMeta, CaseNotes, CaseStatus, Demographics};
use crate::compliance::ComplianceResult;
use crate::diagnosis::DiagnosisCode;
use crate::error::{ProcessingError, Severity, ViolationSeverity};
use crate::evidence::Evidence;
use crate::modifier::{LineItem, ModifierSuggestion};
use crate::procedure::ProcedureCode;
use crate::result::{AgentData, AgentResult, PtpResolution};
use crate::rvu::RvuResult;

/// Outcome recorded on a history entry
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HistoryStatus {
    Success,
    Failure,
    Warning,
    Skipped,
}

/// Append-only record of one pipeline action
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub agent: String,
    pub timestamp: DateTime<Utc>,
    pub action: String,
    pub status: HistoryStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub details: String,
}

/// A referential-integrity problem found by `validate_references`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceError {
    pub record: String,
    pub message: String,
}

/// The aggregate workflow state for one case
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowState {
    pub case_meta: CaseMeta,

    #[serde(default)]
    pub demographics: Demographics,

    pub notes: CaseNotes,

    /// Candidates surfaced during retrieval, before final selection
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub candidate_procedures: Vec<ProcedureCode>,

    /// The final selected procedure list
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub procedures: Vec<ProcedureCode>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diagnoses: Vec<DiagnosisCode>,

    /// Modifier suggestions accumulated before final assembly
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub modifier_suggestions: Vec<ModifierSuggestion>,

    /// Every agent result keyed by step name
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub agent_results: HashMap<String, AgentResult>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub compliance: Option<ComplianceResult>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub coverage: Option<serde_json::Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rvu: Option<RvuResult>,

    /// Final flat list of non-null modifiers
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub final_modifiers: Vec<ModifierSuggestion>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub line_items: Vec<LineItem>,

    /// Ordered line-item ids forming the claim
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub claim_sequence: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub completed_steps: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ProcessingError>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<HistoryEntry>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence: Vec<Evidence>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    pub version: u64,
}

impl WorkflowState {
    /// Construct the state at case ingestion, with empty structured lists
    pub fn new(case_meta: CaseMeta, demographics: Demographics, notes: CaseNotes) -> Self {
        let now = Utc::now();
        Self {
            case_meta,
            demographics,
            notes,
            candidate_procedures: Vec::new(),
            procedures: Vec::new(),
            diagnoses: Vec::new(),
            modifier_suggestions: Vec::new(),
            agent_results: HashMap::new(),
            compliance: None,
            coverage: None,
            rvu: None,
            final_modifiers: Vec::new(),
            line_items: Vec::new(),
            claim_sequence: Vec::new(),
            current_step: None,
            completed_steps: Vec::new(),
            errors: Vec::new(),
            history: Vec::new(),
            evidence: Vec::new(),
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    /// Advance `updated_at` monotonically and bump the version
    fn touch(&mut self) {
        let now = Utc::now();
        if now > self.updated_at {
            self.updated_at = now;
        }
        self.version += 1;
    }

    fn push_history(&mut self, agent: &str, action: &str, status: HistoryStatus, details: String) {
        self.history.push(HistoryEntry {
            agent: agent.to_string(),
            timestamp: Utc::now(),
            action: action.to_string(),
            status,
            details,
        });
    }

    /// Merge a successful stage result.
    ///
    /// Appends evidence, records one history entry, overwrites the
    /// state field matching the payload variant, marks the step completed,
    /// and advances the timestamps. An empty result only appends history.
    pub fn merge_result(&mut self, step: &str, result: AgentResult) {
        self.evidence.extend(result.evidence.iter().cloned());
        self.errors.extend(result.errors.iter().cloned());

        let status = if result.errors.is_empty() {
            HistoryStatus::Success
        } else {
            HistoryStatus::Warning
        };
        let details = summarize_data(&result.data);
        self.push_history(step, "merge", status, details);

        match &result.data {
            AgentData::Procedures(procedures) => {
                self.procedures = procedures.clone();
            }
            AgentData::Diagnoses(diagnoses) => {
                self.diagnoses = diagnoses.clone();
                self.link_diagnoses();
            }
            AgentData::Compliance(compliance) => {
                self.compliance = Some(compliance.clone());
            }
            AgentData::Coverage(value) => {
                self.coverage = Some(value.clone());
            }
            AgentData::Rvu(rvu) => {
                self.rvu = Some(rvu.clone());
            }
            AgentData::FinalModifiers {
                modifiers,
                line_items,
                resolved_conflicts,
            } => {
                self.final_modifiers = modifiers.clone();
                self.line_items = line_items.clone();
                self.claim_sequence = line_items.iter().map(|l| l.line_id.clone()).collect();
                for resolution in resolved_conflicts {
                    self.resolve_ptp_conflict(resolution);
                }
            }
            AgentData::Empty | AgentData::Other(_) => {}
        }

        if !self.completed_steps.iter().any(|s| s == step) {
            self.completed_steps.push(step.to_string());
        }
        self.agent_results.insert(step.to_string(), result);
        self.touch();
    }

    /// Record a failed stage: errors accumulate and a failure history
    /// entry is written, but no structured field changes.
    pub fn record_failure(&mut self, step: &str, result: &AgentResult) {
        self.errors.extend(result.errors.iter().cloned());
        let details = result
            .errors
            .iter()
            .map(|e| e.message.as_str())
            .collect::<Vec<_>>()
            .join("; ");
        self.push_history(step, "execute", HistoryStatus::Failure, details);
        self.agent_results.insert(step.to_string(), result.clone());
        if result.max_severity() >= Severity::Critical {
            self.case_meta.status = CaseStatus::Error;
        }
        self.touch();
    }

    /// Record a stage skipped because a dependency failed
    pub fn record_skipped(&mut self, step: &str, reason: &str) {
        self.push_history(step, "schedule", HistoryStatus::Skipped, reason.to_string());
        self.touch();
    }

    /// Link each diagnosis into its procedure's linked-diagnoses list
    fn link_diagnoses(&mut self) {
        for dx in &self.diagnoses {
            let Some(target) = dx.supports_procedure.as_deref() else {
                continue;
            };
            if let Some(procedure) = self.procedures.iter_mut().find(|p| p.code == target) {
                if !procedure.linked_diagnoses.iter().any(|d| d.code == dx.code) {
                    procedure.linked_diagnoses.push(dx.clone());
                }
            }
        }
    }

    /// Downgrade a procedure-pair violation resolved by a bypass modifier:
    /// severity drops to info and the message is prefixed with the
    /// resolving modifier.
    fn resolve_ptp_conflict(&mut self, resolution: &PtpResolution) {
        let Some(compliance) = self.compliance.as_mut() else {
            return;
        };
        if let Some(violation) =
            compliance.ptp_violation_mut(&resolution.column1, &resolution.column2)
        {
            if violation.severity == ViolationSeverity::Error {
                violation.severity = ViolationSeverity::Info;
                violation.message = format!(
                    "PTP conflict resolved with modifier {}: {}",
                    resolution.modifier, violation.message
                );
            }
        }
    }

    /// Whether a step has already completed successfully
    pub fn is_completed(&self, step: &str) -> bool {
        self.completed_steps.iter().any(|s| s == step)
    }

    /// Highest severity among accumulated errors
    pub fn max_error_severity(&self) -> Option<Severity> {
        self.errors.iter().map(|e| e.severity).max()
    }

    /// Check the cross-record invariants: every diagnosis and every final
    /// modifier must reference a procedure present in the final list.
    pub fn validate_references(&self) -> Vec<ReferenceError> {
        let mut errors = Vec::new();

        for dx in &self.diagnoses {
            if let Some(target) = dx.supports_procedure.as_deref() {
                if !self.procedures.iter().any(|p| p.code == target) {
                    errors.push(ReferenceError {
                        record: format!("diagnosis {}", dx.code),
                        message: format!("linked procedure '{}' not in procedure list", target),
                    });
                }
            }
        }

        for modifier in &self.final_modifiers {
            if !self
                .procedures
                .iter()
                .any(|p| p.code == modifier.procedure_code)
            {
                errors.push(ReferenceError {
                    record: format!(
                        "modifier {}",
                        modifier.code.as_deref().unwrap_or("(none)")
                    ),
                    message: format!(
                        "linked procedure '{}' not in procedure list",
                        modifier.procedure_code
                    ),
                });
            }
        }

        errors
    }
}

fn summarize_data(data: &AgentData) -> String {
    match data {
        AgentData::Procedures(p) => format!("{} procedures", p.len()),
        AgentData::Diagnoses(d) => format!("{} diagnoses", d.len()),
        AgentData::Compliance(c) => format!("{} violations", c.total_violations()),
        AgentData::Coverage(_) => "coverage result".to_string(),
        AgentData::Rvu(r) => format!("{} rvu lines", r.lines.len()),
        AgentData::FinalModifiers {
            modifiers,
            line_items,
            ..
        } => format!("{} modifiers on {} lines", modifiers.len(), line_items.len()),
        AgentData::Empty => "empty".to_string(),
        AgentData::Other(_) => "opaque payload".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compliance::{ModifierIndicator, PtpViolation};
    use crate::modifier::ModifierClassification;
    use chrono::NaiveDate;

    fn test_state() -> WorkflowState {
        WorkflowState::new(
            CaseMeta::new(
                "case-1",
                "pat-1",
                "prov-1",
                NaiveDate::from_ymd_opt(2024, 3, 15).unwrap(),
            ),
            Demographics::default(),
            CaseNotes::new("note text"),
        )
    }

    #[test]
    fn test_merge_updates_timestamps_monotonically() {
        let mut state = test_state();
        let before = state.updated_at;
        state.merge_result("procedure-codes", AgentResult::success(AgentData::Empty));
        assert!(state.updated_at >= before);
        assert_eq!(state.version, 1);
    }

    #[test]
    fn test_merge_empty_result_only_appends_history() {
        let mut state = test_state();
        state.merge_result("compliance", AgentResult::success(AgentData::Empty));

        assert_eq!(state.history.len(), 1);
        assert!(state.procedures.is_empty());
        assert!(state.compliance.is_none());
        assert!(state.is_completed("compliance"));
    }

    #[test]
    fn test_merge_overwrites_procedure_list() {
        let mut state = test_state();
        let result = AgentResult::success(AgentData::Procedures(vec![ProcedureCode::new(
            "49616",
            "Hernia repair",
            1,
        )]));
        state.merge_result("procedure-codes", result);

        assert_eq!(state.procedures.len(), 1);
        assert_eq!(state.procedures[0].code, "49616");
        assert_eq!(state.completed_steps, vec!["procedure-codes"]);
    }

    #[test]
    fn test_diagnosis_merge_links_into_procedures() {
        let mut state = test_state();
        state.merge_result(
            "procedure-codes",
            AgentResult::success(AgentData::Procedures(vec![ProcedureCode::new(
                "49616",
                "Hernia repair",
                1,
            )])),
        );
        state.merge_result(
            "diagnosis-codes",
            AgentResult::success(AgentData::Diagnoses(vec![DiagnosisCode::new(
                "K43.0",
                "Incisional hernia",
            )
            .supporting("49616")])),
        );

        assert_eq!(state.procedures[0].linked_diagnoses.len(), 1);
        assert_eq!(state.procedures[0].linked_diagnoses[0].code, "K43.0");
        assert!(state.validate_references().is_empty());
    }

    #[test]
    fn test_dangling_diagnosis_reference_detected() {
        let mut state = test_state();
        state.diagnoses.push(DiagnosisCode::new("K43.0", "hernia").supporting("99999"));
        let errors = state.validate_references();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("99999"));
    }

    #[test]
    fn test_ptp_resolution_downgrades_violation() {
        let mut state = test_state();
        let mut compliance = ComplianceResult::default();
        compliance.ptp_violations.push(PtpViolation {
            column1: "49505".to_string(),
            column2: "49568".to_string(),
            modifier_indicator: ModifierIndicator::Allowed,
            severity: ViolationSeverity::Error,
            message: "codes cannot be billed together".to_string(),
        });
        state.merge_result(
            "compliance",
            AgentResult::success(AgentData::Compliance(compliance)),
        );

        state.merge_result(
            "modifiers",
            AgentResult::success(AgentData::FinalModifiers {
                modifiers: vec![ModifierSuggestion::new(
                    Some("59".to_string()),
                    "49568",
                    "distinct service",
                    ModifierClassification::Payment,
                )],
                line_items: vec![LineItem::new("49568", 1, 1)],
                resolved_conflicts: vec![PtpResolution {
                    column1: "49505".to_string(),
                    column2: "49568".to_string(),
                    modifier: "59".to_string(),
                }],
            }),
        );

        let violation = &state.compliance.as_ref().unwrap().ptp_violations[0];
        assert_eq!(violation.severity, ViolationSeverity::Info);
        assert!(violation
            .message
            .starts_with("PTP conflict resolved with modifier 59:"));
        assert_eq!(state.claim_sequence, vec!["49568-line-1"]);
    }

    #[test]
    fn test_failure_records_history_and_errors() {
        let mut state = test_state();
        let result = AgentResult::failure(ProcessingError::new(
            "procedure-codes",
            "model returned no selections",
            Severity::Medium,
        ));
        state.record_failure("procedure-codes", &result);

        assert_eq!(state.history.len(), 1);
        assert_eq!(state.history[0].status, HistoryStatus::Failure);
        assert_eq!(state.errors.len(), 1);
        assert!(!state.is_completed("procedure-codes"));
        assert_eq!(state.case_meta.status, CaseStatus::Pending);
    }

    #[test]
    fn test_critical_failure_sets_error_status() {
        let mut state = test_state();
        let result = AgentResult::failure(ProcessingError::new(
            "procedure-codes",
            "schema mismatch",
            Severity::Critical,
        ));
        state.record_failure("procedure-codes", &result);
        assert_eq!(state.case_meta.status, CaseStatus::Error);
    }

    #[test]
    fn test_one_history_entry_per_completed_stage() {
        let mut state = test_state();
        for step in ["procedure-codes", "diagnosis-codes", "compliance"] {
            state.merge_result(step, AgentResult::success(AgentData::Empty));
        }
        for step in ["procedure-codes", "diagnosis-codes", "compliance"] {
            let count = state.history.iter().filter(|h| h.agent == step).count();
            assert_eq!(count, 1, "expected exactly one history entry for {}", step);
        }
    }
}
