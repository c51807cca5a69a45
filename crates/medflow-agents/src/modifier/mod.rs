//! Modifier agent — the two-phase assignment engine
//!
//! Phase one places compliance modifiers: procedure-pair bypasses and
//! unit-limit decisions, including the documented-split path for MAI-1
//! overages. Phase two places ancillary modifiers. Model-returned
//! evidence is validated against the note text, and the combined per-line
//! modifier lists go through a final conflict/duplicate check.

pub mod evidence_match;
pub mod sets;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use medflow_core::stage;
use medflow_core::{
    Agent, AgentContext, AgentData, AgentResult, ComplianceFlag, ComplianceResult, EditKind,
    ErrorKind, Evidence, EvidenceContent, LineItem, LogLevel, Mai, MedflowError, MedflowResult,
    ModifierSuggestion, OutputSchema, ProcedureCode, ProcessingError, PtpResolution, Severity,
    StructuredRequest, ViolationSeverity, SERVICE_MODEL,
};

use crate::util::{call_structured, parse_response};
use evidence_match::NoteMatcher;
use sets::{allowed_for, conflicts, is_phase_one, vetted};

#[derive(Debug, Deserialize)]
struct PhaseOneResponse {
    assignments: Vec<PhaseOneAssignment>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PhaseOneAssignment {
    line_id: String,
    modifier: Option<String>,
    rationale: String,
    #[serde(default)]
    applies_to: Option<String>,
    #[serde(default)]
    edit_type: EditKind,
    #[serde(default)]
    evidence: Vec<String>,
    #[serde(default)]
    documentation_supports_bypass: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct PhaseTwoResponse {
    assignments: Vec<PhaseTwoAssignment>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PhaseTwoAssignment {
    line_id: String,
    #[serde(default)]
    modifiers: Vec<PhaseTwoModifier>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PhaseTwoModifier {
    modifier: String,
    rationale: String,
    #[serde(default)]
    evidence: Vec<String>,
}

fn phase_one_schema() -> OutputSchema {
    OutputSchema::from_json_schema(json!({
        "type": "object",
        "properties": {
            "assignments": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "lineId": {"type": "string"},
                        "modifier": {"type": "string", "nullable": true},
                        "rationale": {"type": "string"},
                        "appliesTo": {"type": "string", "nullable": true},
                        "editType": {"type": "string"},
                        "evidence": {"type": "array", "items": {"type": "string"}},
                        "documentationSupportsBypass": {"type": "boolean", "nullable": true}
                    },
                    "required": ["lineId", "modifier", "rationale", "editType"]
                }
            }
        },
        "required": ["assignments"]
    }))
    .with_description("Phase-one policy modifier decisions, one per line item")
}

fn phase_two_schema() -> OutputSchema {
    OutputSchema::from_json_schema(json!({
        "type": "object",
        "properties": {
            "assignments": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "lineId": {"type": "string"},
                        "modifiers": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "modifier": {"type": "string"},
                                    "rationale": {"type": "string"},
                                    "evidence": {"type": "array", "items": {"type": "string"}}
                                },
                                "required": ["modifier", "rationale"]
                            }
                        }
                    },
                    "required": ["lineId", "modifiers"]
                }
            }
        },
        "required": ["assignments"]
    }))
    .with_description("Phase-two ancillary modifier decisions per line item")
}

/// The modifier-assignment stage producer
#[derive(Default)]
pub struct ModifierAgent;

impl ModifierAgent {
    pub fn new() -> Self {
        Self
    }

    /// Line-item construction per procedure:
    /// - within limit (or limit unset): one line with full units;
    /// - over limit with MAI 2/3: one line truncated to the limit with a
    ///   compliance flag;
    /// - over limit with MAI 1: one line with full units, deferred to the
    ///   phase-one split decision.
    fn build_line_items(procedures: &[ProcedureCode]) -> Vec<LineItem> {
        let mut lines = Vec::new();
        for procedure in procedures {
            let line = match (procedure.unit_limit, procedure.unit_limit_adjudication) {
                (Some(limit), Some(adjudication)) if procedure.units > limit => {
                    match adjudication {
                        Mai::AbsoluteDate | Mai::AutoDeny => {
                            let severity = if adjudication == Mai::AutoDeny {
                                ViolationSeverity::Error
                            } else {
                                ViolationSeverity::Warning
                            };
                            LineItem::new(&procedure.code, 1, limit).with_flag(ComplianceFlag {
                                original_units: procedure.units,
                                truncated_units: limit,
                                severity,
                                reason: format!(
                                    "units truncated from {} to the {} limit (MAI {})",
                                    procedure.units,
                                    limit,
                                    adjudication.as_u8()
                                ),
                            })
                        }
                        Mai::DocumentedSplit => LineItem::new(&procedure.code, 1, procedure.units),
                    }
                }
                _ => LineItem::new(&procedure.code, 1, procedure.units),
            };
            lines.push(line);
        }
        lines
    }

    fn find_procedure<'a>(
        procedures: &'a [ProcedureCode],
        code: &str,
    ) -> Option<&'a ProcedureCode> {
        procedures.iter().find(|p| p.code == code)
    }

    /// Whether a line is an undecided MAI-1 overage
    fn is_mai1_overage(line: &LineItem, procedures: &[ProcedureCode]) -> bool {
        Self::find_procedure(procedures, &line.procedure_code)
            .map(|p| {
                p.unit_limit_adjudication == Some(Mai::DocumentedSplit)
                    && matches!(p.unit_limit, Some(limit) if line.units > limit)
            })
            .unwrap_or(false)
    }

    fn phase_one_prompt(
        lines: &[LineItem],
        procedures: &[ProcedureCode],
        compliance: &ComplianceResult,
    ) -> String {
        let mut out = String::from(
            "Assign phase-one compliance modifiers. For every line item return a \
            decision: a modifier from the line's allowed set or null, a rationale \
            (mandatory even for null, e.g. \"no modifier needed because indicator = 0/9\"), \
            appliesTo (the column-2 code for procedure-pair conflicts, the procedure code \
            for unit-limit cases), editType (procedure-pair, unit-limit, or none), verbatim \
            evidence, and for documented-split candidates a documentationSupportsBypass \
            boolean.\n\nLINE ITEMS:\n",
        );

        for line in lines {
            let procedure = Self::find_procedure(procedures, &line.procedure_code);
            let allowed = allowed_for(
                procedure.and_then(|p| p.allowed_modifiers.as_deref()),
                true,
            );
            out.push_str(&format!(
                "- {} | code {} | units {} | allowed phase-1 modifiers: [{}]\n",
                line.line_id,
                line.procedure_code,
                line.units,
                allowed.join(", ")
            ));

            for violation in compliance
                .ptp_violations
                .iter()
                .filter(|v| v.column1 == line.procedure_code || v.column2 == line.procedure_code)
            {
                out.push_str(&format!(
                    "    procedure-pair conflict: column1 {} column2 {} (indicator {:?})\n",
                    violation.column1, violation.column2, violation.modifier_indicator
                ));
            }
            if let Some(p) = procedure {
                if let (Some(limit), Some(adjudication)) =
                    (p.unit_limit, p.unit_limit_adjudication)
                {
                    if line.units > limit {
                        out.push_str(&format!(
                            "    unit-limit overage: {} units against limit {} (MAI {})\n",
                            line.units,
                            limit,
                            adjudication.as_u8()
                        ));
                    }
                }
            }
        }
        out
    }

    fn phase_two_prompt(lines: &[LineItem], procedures: &[ProcedureCode]) -> String {
        let mut out = String::from(
            "Assign phase-two ancillary modifiers. For every line item return zero or \
            more modifiers from the line's allowed set, each with a rationale and \
            optional verbatim evidence.\n\nLINE ITEMS:\n",
        );
        for line in lines {
            let procedure = Self::find_procedure(procedures, &line.procedure_code);
            let allowed = allowed_for(
                procedure.and_then(|p| p.allowed_modifiers.as_deref()),
                false,
            );
            out.push_str(&format!(
                "- {} | code {} | units {} | allowed phase-2 modifiers: [{}]\n",
                line.line_id,
                line.procedure_code,
                line.units,
                allowed.join(", ")
            ));
        }
        out
    }

    fn build_suggestion(
        code: &str,
        procedure_code: &str,
        rationale: &str,
        quotes: Vec<String>,
    ) -> Option<ModifierSuggestion> {
        let entry = vetted(code)?;
        let mut suggestion = ModifierSuggestion::new(
            Some(code.to_string()),
            procedure_code,
            rationale,
            entry.classification,
        )
        .with_description(entry.description);
        suggestion.documentation_required = entry.documentation_required.to_string();
        suggestion.fee_adjustment = entry.fee_adjustment.to_string();
        if !quotes.is_empty() {
            suggestion
                .evidence
                .push(Evidence::new(stage::MODIFIERS, rationale, 0.8).with_quotes(quotes));
        }
        Some(suggestion)
    }

    /// Apply the phase-one decisions to the line items
    #[allow(clippy::too_many_arguments)]
    fn apply_phase_one(
        ctx: &AgentContext,
        lines: &mut Vec<LineItem>,
        procedures: &[ProcedureCode],
        compliance: &ComplianceResult,
        assignments: Vec<PhaseOneAssignment>,
        resolved: &mut Vec<PtpResolution>,
        evidence: &mut Vec<Evidence>,
        errors: &mut Vec<ProcessingError>,
    ) {
        for assignment in assignments {
            let Some(index) = lines.iter().position(|l| l.line_id == assignment.line_id) else {
                errors.push(
                    ProcessingError::new(
                        stage::MODIFIERS,
                        format!("phase-1 decision for unknown line '{}'", assignment.line_id),
                        Severity::Medium,
                    )
                    .with_kind(ErrorKind::Validation),
                );
                continue;
            };
            let procedure_code = lines[index].procedure_code.clone();
            let procedure = Self::find_procedure(procedures, &procedure_code);

            // Validate a proposed modifier against the allowed set before
            // anything else; an unvetted code is never attached.
            let mut modifier = assignment.modifier.clone();
            if let Some(code) = &modifier {
                let allowed =
                    allowed_for(procedure.and_then(|p| p.allowed_modifiers.as_deref()), true);
                if !allowed.contains(&code.as_str()) {
                    errors.push(
                        ProcessingError::new(
                            stage::MODIFIERS,
                            format!(
                                "phase-1 proposed '{}' outside the allowed set for {}",
                                code, assignment.line_id
                            ),
                            Severity::Medium,
                        )
                        .with_kind(ErrorKind::Validation),
                    );
                    modifier = None;
                }
            }

            // MAI-1 overage: split or truncate per the documentation call
            if Self::is_mai1_overage(&lines[index], procedures) {
                let limit = procedure.and_then(|p| p.unit_limit).unwrap_or(1);
                let original_units = lines[index].units;

                if assignment.documentation_supports_bypass == Some(true) && modifier.is_some() {
                    let code = modifier.clone().expect("checked is_some");
                    let mut split = Vec::with_capacity(original_units as usize);
                    for ordinal in 1..=original_units {
                        let mut line = LineItem::new(&procedure_code, ordinal, 1);
                        line.compliance_flag = Some(ComplianceFlag {
                            original_units,
                            truncated_units: 1,
                            severity: ViolationSeverity::Info,
                            reason: "split approved".to_string(),
                        });
                        if let Some(suggestion) = Self::build_suggestion(
                            &code,
                            &procedure_code,
                            &assignment.rationale,
                            assignment.evidence.clone(),
                        ) {
                            line.phase_one.push(
                                suggestion
                                    .with_edit(EditKind::UnitLimit, procedure_code.clone()),
                            );
                        }
                        split.push(line);
                    }
                    lines.splice(index..=index, split);
                } else {
                    let line = &mut lines[index];
                    line.units = limit;
                    line.compliance_flag = Some(ComplianceFlag {
                        original_units,
                        truncated_units: limit,
                        severity: ViolationSeverity::Error,
                        reason: "split denied".to_string(),
                    });
                }
                continue;
            }

            match modifier {
                Some(code) => {
                    let Some(suggestion) = Self::build_suggestion(
                        &code,
                        &procedure_code,
                        &assignment.rationale,
                        assignment.evidence.clone(),
                    ) else {
                        continue;
                    };
                    let suggestion = match assignment.edit_type {
                        EditKind::None => suggestion,
                        kind => suggestion.with_edit(
                            kind,
                            assignment
                                .applies_to
                                .clone()
                                .unwrap_or_else(|| procedure_code.clone()),
                        ),
                    };

                    if assignment.edit_type == EditKind::ProcedurePair {
                        Self::resolve_pair_conflict(
                            ctx,
                            compliance,
                            &suggestion,
                            &code,
                            resolved,
                            evidence,
                            errors,
                        );
                    }

                    lines[index].phase_one.push(suggestion);
                }
                None => {
                    // Explicit no-action decision; the rationale is kept
                    // on the line for the audit trail.
                    lines[index].phase_one.push(ModifierSuggestion::new(
                        None,
                        &procedure_code,
                        &assignment.rationale,
                        medflow_core::ModifierClassification::Informational,
                    ));
                }
            }
        }
    }

    /// Match a procedure-pair decision against the recorded violations
    /// and emit the resolution the merge will apply.
    fn resolve_pair_conflict(
        ctx: &AgentContext,
        compliance: &ComplianceResult,
        suggestion: &ModifierSuggestion,
        code: &str,
        resolved: &mut Vec<PtpResolution>,
        evidence: &mut Vec<Evidence>,
        errors: &mut Vec<ProcessingError>,
    ) {
        let target = suggestion
            .applies_to
            .as_deref()
            .unwrap_or(suggestion.procedure_code.as_str());

        let Some(violation) = compliance
            .ptp_violations
            .iter()
            .find(|v| v.column2 == target && v.severity == ViolationSeverity::Error)
        else {
            // A procedure-pair decision that resolves nothing is kept,
            // but surfaced for review.
            warn!(
                modifier = code,
                applies_to = target,
                "procedure-pair decision matches no recorded conflict"
            );
            errors.push(
                ProcessingError::new(
                    stage::MODIFIERS,
                    format!(
                        "modifier {} targets pair with {} but no conflict is recorded",
                        code, target
                    ),
                    Severity::Low,
                )
                .with_kind(ErrorKind::Conflict),
            );
            return;
        };

        if violation.modifier_indicator.permits(code) {
            resolved.push(PtpResolution {
                column1: violation.column1.clone(),
                column2: violation.column2.clone(),
                modifier: code.to_string(),
            });
            evidence.push(
                Evidence::new(
                    stage::MODIFIERS,
                    format!(
                        "modifier {} bypasses the {}/{} pair edit",
                        code, violation.column1, violation.column2
                    ),
                    0.9,
                )
                .with_content(EvidenceContent::PtpConflictResolved {
                    column1: violation.column1.clone(),
                    column2: violation.column2.clone(),
                    modifier: code.to_string(),
                }),
            );
        } else {
            ctx.logger.log(
                LogLevel::Warn,
                stage::MODIFIERS,
                &format!(
                    "modifier {} is not a permitted bypass for the {}/{} pair",
                    code, violation.column1, violation.column2
                ),
            );
            errors.push(
                ProcessingError::new(
                    stage::MODIFIERS,
                    format!(
                        "modifier {} is not permitted by indicator {:?} on {}/{}",
                        code,
                        violation.modifier_indicator,
                        violation.column1,
                        violation.column2
                    ),
                    Severity::Medium,
                )
                .with_kind(ErrorKind::Conflict),
            );
        }
    }

    fn apply_phase_two(
        lines: &mut [LineItem],
        procedures: &[ProcedureCode],
        assignments: Vec<PhaseTwoAssignment>,
        errors: &mut Vec<ProcessingError>,
    ) {
        for assignment in assignments {
            let Some(line) = lines.iter_mut().find(|l| l.line_id == assignment.line_id) else {
                errors.push(
                    ProcessingError::new(
                        stage::MODIFIERS,
                        format!("phase-2 decision for unknown line '{}'", assignment.line_id),
                        Severity::Medium,
                    )
                    .with_kind(ErrorKind::Validation),
                );
                continue;
            };
            let procedure = Self::find_procedure(procedures, &line.procedure_code);
            let allowed =
                allowed_for(procedure.and_then(|p| p.allowed_modifiers.as_deref()), false);

            for proposed in assignment.modifiers {
                if !allowed.contains(&proposed.modifier.as_str()) || is_phase_one(&proposed.modifier)
                {
                    errors.push(
                        ProcessingError::new(
                            stage::MODIFIERS,
                            format!(
                                "phase-2 proposed '{}' outside the allowed set for {}",
                                proposed.modifier, line.line_id
                            ),
                            Severity::Medium,
                        )
                        .with_kind(ErrorKind::Validation),
                    );
                    continue;
                }
                if let Some(suggestion) = Self::build_suggestion(
                    &proposed.modifier,
                    &line.procedure_code.clone(),
                    &proposed.rationale,
                    proposed.evidence,
                ) {
                    line.phase_two.push(suggestion);
                }
            }
        }
    }

    /// Validate every evidence quote against the note text, dropping
    /// quotes the matcher rejects.
    fn validate_evidence(
        ctx: &AgentContext,
        lines: &mut [LineItem],
        errors: &mut Vec<ProcessingError>,
    ) {
        let matcher = NoteMatcher::new(&ctx.state.notes.full_text());
        let mut rejected = 0usize;

        for line in lines.iter_mut() {
            for suggestion in line
                .phase_one
                .iter_mut()
                .chain(line.phase_two.iter_mut())
            {
                for evidence in suggestion.evidence.iter_mut() {
                    evidence.quotes.retain(|quote| {
                        if matcher.matches(quote) {
                            true
                        } else {
                            rejected += 1;
                            false
                        }
                    });
                }
                suggestion.evidence.retain(|e| !e.quotes.is_empty());
            }
        }

        if rejected > 0 {
            ctx.logger.log(
                LogLevel::Warn,
                stage::MODIFIERS,
                &format!("rejected {} evidence snippets not found in the notes", rejected),
            );
            errors.push(
                ProcessingError::new(
                    stage::MODIFIERS,
                    format!("{} evidence snippets were not found in the notes", rejected),
                    Severity::Low,
                )
                .with_kind(ErrorKind::Validation),
            );
        }
    }

    /// Final validation of each line's combined modifier list: duplicate
    /// and conflicting codes are removed with graded errors; every
    /// surviving suggestion must carry its description and rationale.
    fn final_validation(lines: &mut [LineItem], errors: &mut Vec<ProcessingError>) {
        for line in lines.iter_mut() {
            let line_id = line.line_id.clone();
            let mut seen: Vec<String> = Vec::new();

            let mut check = |suggestion: &ModifierSuggestion| -> bool {
                match suggestion.code.as_deref() {
                    Some(code) => {
                        if seen.iter().any(|s| s == code) {
                            errors.push(
                                ProcessingError::new(
                                    stage::MODIFIERS,
                                    format!("duplicate modifier {} on {}", code, line_id),
                                    Severity::Medium,
                                )
                                .with_kind(ErrorKind::Conflict),
                            );
                            return false;
                        }
                        if let Some(existing) =
                            seen.iter().find(|s| conflicts(s, code)).cloned()
                        {
                            errors.push(
                                ProcessingError::new(
                                    stage::MODIFIERS,
                                    format!(
                                        "conflicting modifiers {} and {} on {}",
                                        existing, code, line_id
                                    ),
                                    Severity::High,
                                )
                                .with_kind(ErrorKind::Conflict),
                            );
                            return false;
                        }
                        if suggestion.description.is_empty()
                            || suggestion.rationale.trim().is_empty()
                        {
                            errors.push(
                                ProcessingError::new(
                                    stage::MODIFIERS,
                                    format!(
                                        "modifier {} on {} lacks description or rationale",
                                        code, line_id
                                    ),
                                    Severity::Medium,
                                )
                                .with_kind(ErrorKind::Validation),
                            );
                            return false;
                        }
                        seen.push(code.to_string());
                        true
                    }
                    None => {
                        if suggestion.rationale.trim().is_empty() {
                            errors.push(
                                ProcessingError::new(
                                    stage::MODIFIERS,
                                    format!("null modifier on {} lacks a rationale", line_id),
                                    Severity::Medium,
                                )
                                .with_kind(ErrorKind::Validation),
                            );
                            return false;
                        }
                        true
                    }
                }
            };

            line.phase_one = std::mem::take(&mut line.phase_one)
                .into_iter()
                .filter(|s| check(s))
                .collect();
            line.phase_two = std::mem::take(&mut line.phase_two)
                .into_iter()
                .filter(|s| check(s))
                .collect();
        }
    }
}

#[async_trait]
impl Agent for ModifierAgent {
    fn name(&self) -> &str {
        stage::MODIFIERS
    }

    fn description(&self) -> &str {
        "Assigns compliance and ancillary modifiers per claim line"
    }

    fn required_services(&self) -> &[&str] {
        &[SERVICE_MODEL]
    }

    async fn execute(&self, ctx: &AgentContext) -> MedflowResult<AgentResult> {
        let procedures = &ctx.state.procedures;
        if procedures.is_empty() {
            return Err(MedflowError::validation(
                "modifier assignment requires a non-empty procedure list",
            ));
        }
        let compliance = ctx.state.compliance.clone().unwrap_or_default();

        let mut lines = Self::build_line_items(procedures);
        let mut resolved = Vec::new();
        let mut evidence = Vec::new();
        let mut errors = Vec::new();

        // Phase 1: policy modifiers, batched across all line items
        let request = StructuredRequest::new(
            Self::phase_one_prompt(&lines, procedures, &compliance),
            phase_one_schema(),
        )
        .with_temperature(0.1);
        let value = call_structured(ctx, stage::MODIFIERS, "phase-one", request).await?;
        let phase_one: PhaseOneResponse = parse_response(stage::MODIFIERS, "phase-one", value)?;
        Self::apply_phase_one(
            ctx,
            &mut lines,
            procedures,
            &compliance,
            phase_one.assignments,
            &mut resolved,
            &mut evidence,
            &mut errors,
        );

        // Phase 2: ancillary modifiers over the post-split line list
        let request = StructuredRequest::new(
            Self::phase_two_prompt(&lines, procedures),
            phase_two_schema(),
        )
        .with_temperature(0.1);
        let value = call_structured(ctx, stage::MODIFIERS, "phase-two", request).await?;
        let phase_two: PhaseTwoResponse = parse_response(stage::MODIFIERS, "phase-two", value)?;
        Self::apply_phase_two(&mut lines, procedures, phase_two.assignments, &mut errors);

        Self::validate_evidence(ctx, &mut lines, &mut errors);
        Self::final_validation(&mut lines, &mut errors);

        // Final flat list of non-null modifiers for state-manager
        // consumption
        let modifiers: Vec<ModifierSuggestion> = lines
            .iter()
            .flat_map(|line| line.all_modifiers())
            .filter(|s| s.code.is_some())
            .cloned()
            .collect();

        evidence.push(
            Evidence::new(
                stage::MODIFIERS,
                format!(
                    "{} modifiers assigned across {} claim lines",
                    modifiers.len(),
                    lines.len()
                ),
                1.0,
            )
            .with_content(EvidenceContent::FinalModifiers {
                modifiers: modifiers.clone(),
                line_items: lines.clone(),
            }),
        );

        let mut result = AgentResult::success(AgentData::FinalModifiers {
            modifiers,
            line_items: lines,
            resolved_conflicts: resolved,
        });
        result.evidence = evidence;
        result.errors = errors;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medflow_core::{
        CaseMeta, CaseNotes, CancelSignal, Demographics, ModifierIndicator, PtpViolation,
        ServiceRegistry, WorkflowLogger, WorkflowState,
    };
    use chrono::NaiveDate;
    use std::sync::Arc;

    fn ctx_with_state(state: WorkflowState) -> AgentContext {
        AgentContext::new(
            Arc::new(state),
            ServiceRegistry::new(),
            WorkflowLogger::new("case-1"),
            CancelSignal::never(),
        )
    }

    fn base_state(procedures: Vec<ProcedureCode>) -> WorkflowState {
        let mut state = WorkflowState::new(
            CaseMeta::new(
                "case-1",
                "pat-1",
                "prov-1",
                NaiveDate::from_ymd_opt(2024, 3, 15).unwrap(),
            ),
            Demographics::default(),
            CaseNotes::new("Bilateral repair documented. Distinct lesion at a separate site."),
        );
        state.procedures = procedures;
        state
    }

    #[test]
    fn test_line_items_within_limit() {
        let procedures = vec![ProcedureCode::new("49616", "Hernia repair", 1)
            .with_unit_limit(1, Mai::AbsoluteDate)];
        let lines = ModifierAgent::build_line_items(&procedures);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].line_id, "49616-line-1");
        assert_eq!(lines[0].units, 1);
        assert!(lines[0].compliance_flag.is_none());
    }

    #[test]
    fn test_line_items_truncate_mai_2_and_3() {
        let procedures = vec![
            ProcedureCode::new("11102", "Biopsy", 5).with_unit_limit(2, Mai::AbsoluteDate),
            ProcedureCode::new("11104", "Punch biopsy", 4).with_unit_limit(2, Mai::AutoDeny),
        ];
        let lines = ModifierAgent::build_line_items(&procedures);

        assert_eq!(lines[0].units, 2);
        let flag = lines[0].compliance_flag.as_ref().unwrap();
        assert_eq!(flag.severity, ViolationSeverity::Warning);
        assert_eq!(flag.original_units, 5);

        assert_eq!(lines[1].units, 2);
        let flag = lines[1].compliance_flag.as_ref().unwrap();
        assert_eq!(flag.severity, ViolationSeverity::Error);
    }

    #[test]
    fn test_line_items_mai_1_keeps_full_units() {
        let procedures = vec![ProcedureCode::new("64483", "Injection", 3)
            .with_unit_limit(1, Mai::DocumentedSplit)];
        let lines = ModifierAgent::build_line_items(&procedures);
        assert_eq!(lines[0].units, 3);
        assert!(lines[0].compliance_flag.is_none());
        assert!(ModifierAgent::is_mai1_overage(&lines[0], &procedures));
    }

    #[test]
    fn test_mai1_split_approved() {
        let procedures = vec![ProcedureCode::new("64483", "Injection", 3)
            .with_unit_limit(1, Mai::DocumentedSplit)];
        let state = base_state(procedures.clone());
        let ctx = ctx_with_state(state);

        let mut lines = ModifierAgent::build_line_items(&procedures);
        let compliance = ComplianceResult::default();
        let mut resolved = Vec::new();
        let mut evidence = Vec::new();
        let mut errors = Vec::new();

        ModifierAgent::apply_phase_one(
            &ctx,
            &mut lines,
            &procedures,
            &compliance,
            vec![PhaseOneAssignment {
                line_id: "64483-line-1".to_string(),
                modifier: Some("59".to_string()),
                rationale: "separate levels documented".to_string(),
                applies_to: Some("64483".to_string()),
                edit_type: EditKind::UnitLimit,
                evidence: vec![],
                documentation_supports_bypass: Some(true),
            }],
            &mut resolved,
            &mut evidence,
            &mut errors,
        );

        assert_eq!(lines.len(), 3);
        for (i, line) in lines.iter().enumerate() {
            assert_eq!(line.line_id, format!("64483-line-{}", i + 1));
            assert_eq!(line.units, 1);
            assert_eq!(line.modifier_codes(), vec!["59"]);
            let flag = line.compliance_flag.as_ref().unwrap();
            assert_eq!(flag.severity, ViolationSeverity::Info);
            assert_eq!(flag.reason, "split approved");
        }
    }

    #[test]
    fn test_mai1_split_denied() {
        let procedures = vec![ProcedureCode::new("64483", "Injection", 3)
            .with_unit_limit(1, Mai::DocumentedSplit)];
        let state = base_state(procedures.clone());
        let ctx = ctx_with_state(state);

        let mut lines = ModifierAgent::build_line_items(&procedures);
        let compliance = ComplianceResult::default();
        let mut resolved = Vec::new();
        let mut evidence = Vec::new();
        let mut errors = Vec::new();

        ModifierAgent::apply_phase_one(
            &ctx,
            &mut lines,
            &procedures,
            &compliance,
            vec![PhaseOneAssignment {
                line_id: "64483-line-1".to_string(),
                modifier: Some("59".to_string()),
                rationale: "documentation does not support".to_string(),
                applies_to: Some("64483".to_string()),
                edit_type: EditKind::UnitLimit,
                evidence: vec![],
                documentation_supports_bypass: Some(false),
            }],
            &mut resolved,
            &mut evidence,
            &mut errors,
        );

        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].units, 1);
        assert!(lines[0].phase_one.is_empty());
        let flag = lines[0].compliance_flag.as_ref().unwrap();
        assert_eq!(flag.severity, ViolationSeverity::Error);
        assert_eq!(flag.reason, "split denied");
    }

    #[test]
    fn test_ptp_resolution_recorded() {
        let procedures = vec![
            ProcedureCode::new("49505", "Inguinal hernia repair", 1),
            ProcedureCode::new("49568", "Mesh implantation", 1),
        ];
        let state = base_state(procedures.clone());
        let ctx = ctx_with_state(state);

        let mut compliance = ComplianceResult::default();
        compliance.ptp_violations.push(PtpViolation {
            column1: "49505".to_string(),
            column2: "49568".to_string(),
            modifier_indicator: ModifierIndicator::Allowed,
            severity: ViolationSeverity::Error,
            message: "cannot be billed together".to_string(),
        });

        let mut lines = ModifierAgent::build_line_items(&procedures);
        let mut resolved = Vec::new();
        let mut evidence = Vec::new();
        let mut errors = Vec::new();

        ModifierAgent::apply_phase_one(
            &ctx,
            &mut lines,
            &procedures,
            &compliance,
            vec![PhaseOneAssignment {
                line_id: "49568-line-1".to_string(),
                modifier: Some("59".to_string()),
                rationale: "distinct procedural service at separate site".to_string(),
                applies_to: Some("49568".to_string()),
                edit_type: EditKind::ProcedurePair,
                evidence: vec![],
                documentation_supports_bypass: None,
            }],
            &mut resolved,
            &mut evidence,
            &mut errors,
        );

        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].modifier, "59");
        assert_eq!(resolved[0].column1, "49505");
        assert!(evidence.iter().any(|e| matches!(
            e.content,
            Some(EvidenceContent::PtpConflictResolved { .. })
        )));
        assert_eq!(lines[1].modifier_codes(), vec!["59"]);
    }

    #[test]
    fn test_ptp_decision_without_conflict_flagged() {
        let procedures = vec![ProcedureCode::new("49505", "Inguinal hernia repair", 1)];
        let state = base_state(procedures.clone());
        let ctx = ctx_with_state(state);

        let compliance = ComplianceResult::default();
        let mut lines = ModifierAgent::build_line_items(&procedures);
        let mut resolved = Vec::new();
        let mut evidence = Vec::new();
        let mut errors = Vec::new();

        ModifierAgent::apply_phase_one(
            &ctx,
            &mut lines,
            &procedures,
            &compliance,
            vec![PhaseOneAssignment {
                line_id: "49505-line-1".to_string(),
                modifier: Some("59".to_string()),
                rationale: "distinct service".to_string(),
                applies_to: Some("49505".to_string()),
                edit_type: EditKind::ProcedurePair,
                evidence: vec![],
                documentation_supports_bypass: None,
            }],
            &mut resolved,
            &mut evidence,
            &mut errors,
        );

        assert!(resolved.is_empty());
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].severity, Severity::Low);
    }

    #[test]
    fn test_null_modifier_accepted_with_rationale() {
        let procedures = vec![ProcedureCode::new("49616", "Hernia repair", 1)];
        let state = base_state(procedures.clone());
        let ctx = ctx_with_state(state);

        let compliance = ComplianceResult::default();
        let mut lines = ModifierAgent::build_line_items(&procedures);
        let mut resolved = Vec::new();
        let mut evidence = Vec::new();
        let mut errors = Vec::new();

        ModifierAgent::apply_phase_one(
            &ctx,
            &mut lines,
            &procedures,
            &compliance,
            vec![PhaseOneAssignment {
                line_id: "49616-line-1".to_string(),
                modifier: None,
                rationale: "no modifier needed because indicator = 9".to_string(),
                applies_to: None,
                edit_type: EditKind::None,
                evidence: vec![],
                documentation_supports_bypass: None,
            }],
            &mut resolved,
            &mut evidence,
            &mut errors,
        );

        assert!(errors.is_empty());
        assert_eq!(lines[0].phase_one.len(), 1);
        assert!(lines[0].phase_one[0].is_no_action());
    }

    #[test]
    fn test_final_validation_rejects_duplicates_and_conflicts() {
        let mut line = LineItem::new("49616", 1, 1);
        line.phase_one.push(
            ModifierAgent::build_suggestion("59", "49616", "distinct", vec![]).unwrap(),
        );
        line.phase_two.push(
            ModifierAgent::build_suggestion("59", "49616", "again", vec![]).unwrap(),
        );
        line.phase_two.push(
            ModifierAgent::build_suggestion("XE", "49616", "separate encounter", vec![]).unwrap(),
        );
        let mut lines = vec![line];
        let mut errors = Vec::new();

        ModifierAgent::final_validation(&mut lines, &mut errors);

        // The duplicate 59 and the conflicting XE are both removed
        assert_eq!(lines[0].modifier_codes(), vec!["59"]);
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().any(|e| e.severity == Severity::High));
    }

    #[test]
    fn test_evidence_validation_drops_unmatched_quotes() {
        let procedures = vec![ProcedureCode::new("49616", "Hernia repair", 1)];
        let state = base_state(procedures.clone());
        let ctx = ctx_with_state(state);

        let mut line = LineItem::new("49616", 1, 1);
        line.phase_one.push(
            ModifierAgent::build_suggestion(
                "59",
                "49616",
                "distinct lesion",
                vec![
                    "distinct lesion at a separate site".to_string(),
                    "total knee arthroplasty".to_string(),
                ],
            )
            .unwrap(),
        );
        let mut lines = vec![line];
        let mut errors = Vec::new();

        ModifierAgent::validate_evidence(&ctx, &mut lines, &mut errors);

        let suggestion = &lines[0].phase_one[0];
        assert_eq!(suggestion.evidence.len(), 1);
        assert_eq!(suggestion.evidence[0].quotes.len(), 1);
        assert!(suggestion.evidence[0].quotes[0].contains("separate site"));
        assert_eq!(errors.len(), 1);
    }
}
