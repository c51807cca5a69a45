//! Diagnosis-code agent
//!
//! Given the final procedure codes and their diagnosis-code hints, select
//! concrete diagnosis codes establishing medical necessity and link each
//! to exactly one procedure.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use medflow_core::stage;
use medflow_core::{
    Agent, AgentContext, AgentData, AgentResult, DiagnosisCode, ErrorKind, Evidence, LogLevel,
    MedflowError, MedflowResult, OutputSchema, paths, ProcedureCode, ProcessingError, Severity,
    StructuredRequest, SERVICE_MODEL, SERVICE_REFERENCE_STORE,
};
use medflow_store::DiagnosisRecord;

use crate::util::{call_structured, parse_response};

/// Prefix length used for candidate retrieval
const PREFIX_LEN: usize = 3;

/// Fallback table used when the reference store has no records for a
/// prefix. Keeps selection deterministic in degraded environments.
const MOCK_DIAGNOSES: &[(&str, &str)] = &[
    ("K40.90", "Unilateral inguinal hernia without obstruction or gangrene"),
    ("K42.9", "Umbilical hernia without obstruction or gangrene"),
    ("K43.0", "Incisional hernia with obstruction, without gangrene"),
    ("K43.2", "Incisional hernia without obstruction or gangrene"),
    ("K43.9", "Ventral hernia without obstruction or gangrene"),
    ("K44.9", "Diaphragmatic hernia without obstruction or gangrene"),
    ("K35.80", "Unspecified acute appendicitis"),
    ("K80.20", "Calculus of gallbladder without cholecystitis"),
    ("R10.9", "Unspecified abdominal pain"),
];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DiagnosisSelectionResponse {
    selected_diagnoses: Vec<ProcedureDiagnoses>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProcedureDiagnoses {
    cpt_code: String,
    selected_icd_codes: Vec<SelectedIcd>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SelectedIcd {
    code: String,
    description: String,
    rationale: String,
    #[serde(default)]
    evidence: Vec<String>,
    confidence: ConfidenceLabel,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
enum ConfidenceLabel {
    High,
    Medium,
    Low,
}

impl ConfidenceLabel {
    fn value(self) -> f64 {
        match self {
            Self::High => 0.9,
            Self::Medium => 0.7,
            Self::Low => 0.5,
        }
    }
}

fn selection_schema() -> OutputSchema {
    OutputSchema::from_json_schema(json!({
        "type": "object",
        "properties": {
            "selectedDiagnoses": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "cptCode": {"type": "string"},
                        "selectedIcdCodes": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "code": {"type": "string"},
                                    "description": {"type": "string"},
                                    "rationale": {"type": "string"},
                                    "evidence": {"type": "array", "items": {"type": "string"}},
                                    "confidence": {"type": "string"}
                                },
                                "required": ["code", "description", "rationale", "confidence"]
                            }
                        }
                    },
                    "required": ["cptCode", "selectedIcdCodes"]
                }
            }
        },
        "required": ["selectedDiagnoses"]
    }))
    .with_description("Diagnosis selection linking each code to one procedure")
}

/// The diagnosis-code stage producer
pub struct DiagnosisCodeAgent {
    /// Fallback prefixes when a procedure carries no hints at all
    default_prefixes: Vec<String>,
}

impl Default for DiagnosisCodeAgent {
    fn default() -> Self {
        Self {
            default_prefixes: ["K40", "K41", "K42", "K43", "K44", "K45", "K46", "R10"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl DiagnosisCodeAgent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the fallback prefix list
    pub fn with_default_prefixes(mut self, prefixes: Vec<String>) -> Self {
        self.default_prefixes = prefixes;
        self
    }

    /// Prefixes for one procedure: hints first, then applicable families,
    /// then the configured fallback. All truncated and deduplicated.
    fn prefixes_for(&self, procedure: &ProcedureCode) -> Vec<String> {
        let source: Vec<String> = if !procedure.diagnosis_hints.is_empty() {
            procedure.diagnosis_hints.clone()
        } else if let Some(families) = procedure
            .allowed_diagnosis_families
            .as_ref()
            .filter(|f| !f.is_empty())
        {
            families.clone()
        } else {
            self.default_prefixes.clone()
        };

        let mut prefixes: Vec<String> = source
            .iter()
            .map(|code| code.chars().take(PREFIX_LEN).collect::<String>())
            .filter(|p| !p.is_empty())
            .collect();
        prefixes.sort();
        prefixes.dedup();
        prefixes
    }

    /// Candidates for one prefix from the store, falling back to the mock
    /// table when the store has nothing for it.
    async fn candidates_for_prefix(
        ctx: &AgentContext,
        prefix: &str,
    ) -> MedflowResult<Vec<(String, String)>> {
        let store = ctx.services.store()?;
        let names = store.list_files_by_name(paths::DIAGNOSIS_DIR, prefix).await?;

        let mut candidates = Vec::new();
        for name in names {
            let code = name.trim_end_matches(".json").to_string();
            let path = format!("{}/{}", paths::DIAGNOSIS_DIR, name);
            match store.get_file_content(&path).await {
                Ok(bytes) => match DiagnosisRecord::parse(&path, &bytes) {
                    Ok(record) => candidates.push((record.code, record.description)),
                    Err(err) => {
                        warn!(path = %path, error = %err, "skipping malformed diagnosis record");
                    }
                },
                Err(err) => {
                    warn!(code = %code, error = %err, "skipping unreadable diagnosis record");
                }
            }
        }

        if candidates.is_empty() {
            ctx.logger.log(
                LogLevel::Info,
                stage::DIAGNOSIS_CODES,
                &format!("no store records for prefix {}, using fallback table", prefix),
            );
            candidates = MOCK_DIAGNOSES
                .iter()
                .filter(|(code, _)| code.starts_with(prefix))
                .map(|(code, description)| (code.to_string(), description.to_string()))
                .collect();
        }

        Ok(candidates)
    }
}

#[async_trait]
impl Agent for DiagnosisCodeAgent {
    fn name(&self) -> &str {
        stage::DIAGNOSIS_CODES
    }

    fn description(&self) -> &str {
        "Selects diagnosis codes establishing medical necessity per procedure"
    }

    fn required_services(&self) -> &[&str] {
        &[SERVICE_MODEL, SERVICE_REFERENCE_STORE]
    }

    async fn execute(&self, ctx: &AgentContext) -> MedflowResult<AgentResult> {
        let procedures = &ctx.state.procedures;
        if procedures.is_empty() {
            return Err(MedflowError::validation(
                "diagnosis selection requires a non-empty procedure list",
            ));
        }

        // Candidate retrieval: per-procedure prefixes, unioned per
        // procedure, intersected with the applicable-family filter.
        let mut bundle = String::new();
        for procedure in procedures {
            ctx.check_cancelled()?;

            let mut candidates: BTreeMap<String, String> = BTreeMap::new();
            for prefix in self.prefixes_for(procedure) {
                for (code, description) in Self::candidates_for_prefix(ctx, &prefix).await? {
                    candidates.insert(code, description);
                }
            }

            if let Some(families) = procedure
                .allowed_diagnosis_families
                .as_ref()
                .filter(|f| !f.is_empty())
            {
                candidates.retain(|code, _| families.iter().any(|f| code.starts_with(f.as_str())));
            }

            bundle.push_str(&format!(
                "Procedure {} ({}):\n",
                procedure.code, procedure.description
            ));
            for (code, description) in &candidates {
                bundle.push_str(&format!("  - {} {}\n", code, description));
            }
        }

        let prompt = format!(
            "Select the diagnosis codes that establish medical necessity for each \
            procedure below, choosing only from that procedure's candidates. Link every \
            selected code to exactly one procedure and grade confidence as high, medium, \
            or low.\n\nNOTE:\n{}\n\nCANDIDATES:\n{}",
            ctx.state.notes.full_text(),
            bundle
        );
        let request = StructuredRequest::new(prompt, selection_schema());
        let value = call_structured(ctx, stage::DIAGNOSIS_CODES, "diagnosis-selection", request).await?;
        let selection: DiagnosisSelectionResponse =
            parse_response(stage::DIAGNOSIS_CODES, "diagnosis-selection", value)?;

        let mut errors = Vec::new();
        let mut diagnoses = Vec::new();
        for per_procedure in selection.selected_diagnoses {
            if !procedures.iter().any(|p| p.code == per_procedure.cpt_code) {
                errors.push(
                    ProcessingError::new(
                        stage::DIAGNOSIS_CODES,
                        format!(
                            "selection referenced unknown procedure {}",
                            per_procedure.cpt_code
                        ),
                        Severity::Medium,
                    )
                    .with_kind(ErrorKind::Validation),
                );
                continue;
            }

            for icd in per_procedure.selected_icd_codes {
                let evidence = Evidence::new(
                    stage::DIAGNOSIS_CODES,
                    &icd.rationale,
                    icd.confidence.value(),
                )
                .with_quotes(icd.evidence);

                diagnoses.push(
                    DiagnosisCode::new(&icd.code, &icd.description)
                        .supporting(&per_procedure.cpt_code)
                        .with_evidence(evidence),
                );
            }
        }

        let mut result = AgentResult::success(AgentData::Diagnoses(diagnoses));
        result.errors = errors;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefixes_prefer_hints() {
        let agent = DiagnosisCodeAgent::new();
        let mut procedure = ProcedureCode::new("49616", "Hernia repair", 1);
        procedure.diagnosis_hints = vec!["K43.0".to_string(), "K43.2".to_string()];
        procedure.allowed_diagnosis_families = Some(vec!["K40".to_string()]);

        assert_eq!(agent.prefixes_for(&procedure), vec!["K43"]);
    }

    #[test]
    fn test_prefixes_fall_back_to_families() {
        let agent = DiagnosisCodeAgent::new();
        let mut procedure = ProcedureCode::new("49505", "Inguinal hernia repair", 1);
        procedure.allowed_diagnosis_families = Some(vec!["K40".to_string(), "K41".to_string()]);

        assert_eq!(agent.prefixes_for(&procedure), vec!["K40", "K41"]);
    }

    #[test]
    fn test_prefixes_fall_back_to_configured_defaults() {
        let agent =
            DiagnosisCodeAgent::new().with_default_prefixes(vec!["M54".to_string()]);
        let procedure = ProcedureCode::new("49505", "Inguinal hernia repair", 1);
        assert_eq!(agent.prefixes_for(&procedure), vec!["M54"]);
    }

    #[test]
    fn test_confidence_mapping() {
        assert_eq!(ConfidenceLabel::High.value(), 0.9);
        assert_eq!(ConfidenceLabel::Medium.value(), 0.7);
        assert_eq!(ConfidenceLabel::Low.value(), 0.5);
    }

    #[test]
    fn test_mock_table_prefix_filter() {
        let matches: Vec<_> = MOCK_DIAGNOSES
            .iter()
            .filter(|(code, _)| code.starts_with("K43"))
            .collect();
        assert_eq!(matches.len(), 3);
    }
}
