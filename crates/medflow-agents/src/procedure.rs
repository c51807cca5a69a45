//! Procedure-code agent
//!
//! From the full note text: extract structured procedure descriptions,
//! retrieve candidate codes through vector search, have the model make the
//! final selection, then enrich each selected code from the reference
//! store.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use medflow_core::stage;
use medflow_core::{
    Agent, AgentContext, AgentData, AgentResult, ErrorKind, Evidence, LogLevel, MedflowError,
    MedflowResult, OutputSchema, paths, ProcedureCode, ProcessingError, SearchHit, Severity,
    StructuredRequest, SERVICE_MODEL, SERVICE_REFERENCE_STORE, SERVICE_VECTOR_SEARCH,
};
use medflow_store::ProcedureRecord;

use crate::codes::nearest_unlisted_neighbors;
use crate::util::{call_structured, parse_response};

/// Candidates retrieved per extracted procedure
const CANDIDATES_PER_PROCEDURE: usize = 10;

const EXTRACTION_TEMPERATURE: f32 = 0.1;

/// Boolean-or-"unknown" flag in the extraction response
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TriState {
    Flag(bool),
    Text(String),
}

impl Default for TriState {
    fn default() -> Self {
        Self::Text("unknown".to_string())
    }
}

impl TriState {
    pub fn is_true(&self) -> bool {
        matches!(self, Self::Flag(true))
    }

    pub fn label(&self) -> &str {
        match self {
            Self::Flag(true) => "yes",
            Self::Flag(false) => "no",
            Self::Text(_) => "unknown",
        }
    }
}

#[derive(Debug, Deserialize)]
struct ExtractionResponse {
    procedures: Vec<ExtractedProcedure>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExtractedProcedure {
    id: String,
    #[serde(default)]
    approach: Option<String>,
    #[serde(default)]
    anatomy: Vec<String>,
    #[serde(default)]
    laterality: Option<String>,
    #[serde(default)]
    recurrence: TriState,
    #[serde(default)]
    incarceration: TriState,
    #[serde(default)]
    obstruction: TriState,
    #[serde(default)]
    gangrene: TriState,
    #[serde(default)]
    mesh_placed: TriState,
    #[serde(default)]
    defect_size: Option<String>,
    #[serde(default)]
    concurrent_procedures: Vec<String>,
    #[serde(default)]
    assistant_role: Option<String>,
    #[serde(default)]
    evidence: Vec<String>,
    #[serde(default = "default_units")]
    units: u32,
}

fn default_units() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
struct SelectionResponse {
    selections: Vec<SelectedProcedure>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SelectedProcedure {
    code: String,
    element_name: String,
    #[serde(default = "default_units")]
    units: u32,
    #[serde(default)]
    evidence: Vec<String>,
    #[serde(default)]
    linked_diagnoses: Vec<String>,
    rationale: String,
    #[serde(default)]
    #[allow(dead_code)]
    modifier_explanation: Option<String>,
}

fn extraction_schema() -> OutputSchema {
    OutputSchema::from_json_schema(json!({
        "type": "object",
        "properties": {
            "procedures": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "id": {"type": "string"},
                        "approach": {"type": "string", "nullable": true},
                        "anatomy": {"type": "array", "items": {"type": "string"}},
                        "laterality": {"type": "string", "nullable": true},
                        "defectSize": {"type": "string", "nullable": true},
                        "concurrentProcedures": {"type": "array", "items": {"type": "string"}},
                        "assistantRole": {"type": "string", "nullable": true},
                        "evidence": {"type": "array", "items": {"type": "string"}},
                        "units": {"type": "integer"}
                    },
                    "required": ["id", "evidence", "units"]
                }
            }
        },
        "required": ["procedures"]
    }))
    .with_description("Structured procedures extracted from the clinical note")
}

fn selection_schema() -> OutputSchema {
    OutputSchema::from_json_schema(json!({
        "type": "object",
        "properties": {
            "selections": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "code": {"type": "string"},
                        "elementName": {"type": "string"},
                        "units": {"type": "integer"},
                        "evidence": {"type": "array", "items": {"type": "string"}},
                        "linkedDiagnoses": {"type": "array", "items": {"type": "string"}},
                        "rationale": {"type": "string"},
                        "modifierExplanation": {"type": "string", "nullable": true}
                    },
                    "required": ["code", "elementName", "units", "rationale"]
                }
            }
        },
        "required": ["selections"]
    }))
    .with_description("Final procedure-code selection")
}

/// The procedure-code stage producer
#[derive(Default)]
pub struct ProcedureCodeAgent;

impl ProcedureCodeAgent {
    pub fn new() -> Self {
        Self
    }

    fn extraction_prompt(note_text: &str) -> String {
        format!(
            "Extract the billable surgical procedures from the clinical note below. \
            For each procedure report id (P1, P2, ...), approach (open, laparoscopic, \
            robotic, or null), anatomy, laterality (left, right, bilateral, or null), \
            whether recurrence, incarceration, obstruction, gangrene, and mesh placement \
            are documented (true, false, or \"unknown\"), defect size if stated, \
            concurrent procedures, assistant role, verbatim evidence snippets, and units.\n\n\
            NOTE:\n{}",
            note_text
        )
    }

    fn candidate_query(extracted: &ExtractedProcedure) -> String {
        let mut parts: Vec<String> = Vec::new();
        if let Some(approach) = &extracted.approach {
            parts.push(approach.clone());
        }
        parts.extend(extracted.anatomy.iter().cloned());
        if let Some(laterality) = &extracted.laterality {
            parts.push(laterality.clone());
        }
        if extracted.recurrence.is_true() {
            parts.push("recurrent".to_string());
        }
        if extracted.incarceration.is_true() {
            parts.push("incarcerated".to_string());
        }
        if extracted.obstruction.is_true() {
            parts.push("obstruction".to_string());
        }
        if extracted.gangrene.is_true() {
            parts.push("gangrene".to_string());
        }
        if extracted.mesh_placed.is_true() {
            parts.push("mesh".to_string());
        }
        if let Some(size) = &extracted.defect_size {
            parts.push(size.clone());
        }
        parts.extend(extracted.evidence.iter().cloned());
        parts.join(" ")
    }

    fn render_candidates(extracted: &ExtractedProcedure, hits: &[SearchHit]) -> String {
        let mut out = format!(
            "Procedure {} (approach: {}, laterality: {}, recurrence: {}, \
            incarceration: {}, obstruction: {}, gangrene: {}, mesh: {}, units: {}):\n",
            extracted.id,
            extracted.approach.as_deref().unwrap_or("unknown"),
            extracted.laterality.as_deref().unwrap_or("unknown"),
            extracted.recurrence.label(),
            extracted.incarceration.label(),
            extracted.obstruction.label(),
            extracted.gangrene.label(),
            extracted.mesh_placed.label(),
            extracted.units,
        );
        for hit in hits {
            let (below, above) = nearest_unlisted_neighbors(&hit.parent_id);
            out.push_str(&format!(
                "  - {} {} | {} | unlisted neighbours: {} / {}\n",
                hit.parent_id,
                hit.code_title,
                hit.chunk,
                below.unwrap_or("none"),
                above.unwrap_or("none"),
            ));
        }
        out
    }

    /// Fetch the reference record for one selected code. Misses are
    /// non-fatal: the code keeps its default metadata.
    async fn enrich(
        ctx: &AgentContext,
        procedure: &mut ProcedureCode,
        errors: &mut Vec<ProcessingError>,
    ) -> MedflowResult<()> {
        let store = ctx.services.store()?;
        let path = paths::procedure(&procedure.code);

        match store.get_file_content(&path).await {
            Ok(bytes) => match ProcedureRecord::parse(&path, &bytes) {
                Ok(record) => record.apply_to(procedure),
                Err(err) => {
                    errors.push(
                        ProcessingError::new(
                            stage::PROCEDURE_CODES,
                            format!("unusable reference record for {}: {}", procedure.code, err),
                            Severity::Medium,
                        )
                        .with_kind(ErrorKind::Validation),
                    );
                }
            },
            Err(MedflowError::NotFound(_)) => {
                ctx.logger.log(
                    LogLevel::Info,
                    stage::PROCEDURE_CODES,
                    &format!("no reference record for {}, keeping defaults", procedure.code),
                );
                errors.push(
                    ProcessingError::new(
                        stage::PROCEDURE_CODES,
                        format!("reference record missing for {}", procedure.code),
                        Severity::Medium,
                    )
                    .with_kind(ErrorKind::NotFound),
                );
            }
            Err(err) => return Err(err),
        }
        Ok(())
    }
}

#[async_trait]
impl Agent for ProcedureCodeAgent {
    fn name(&self) -> &str {
        stage::PROCEDURE_CODES
    }

    fn description(&self) -> &str {
        "Extracts, selects, and enriches procedure codes from the case notes"
    }

    fn required_services(&self) -> &[&str] {
        &[SERVICE_MODEL, SERVICE_REFERENCE_STORE, SERVICE_VECTOR_SEARCH]
    }

    async fn execute(&self, ctx: &AgentContext) -> MedflowResult<AgentResult> {
        let note_text = ctx.state.notes.full_text();
        if note_text.trim().is_empty() {
            return Ok(AgentResult::failure(ProcessingError::new(
                stage::PROCEDURE_CODES,
                "case has no note text to extract from",
                Severity::Medium,
            )));
        }

        // 1. Structured extraction at low temperature
        let request = StructuredRequest::new(Self::extraction_prompt(&note_text), extraction_schema())
            .with_temperature(EXTRACTION_TEMPERATURE);
        let value = call_structured(ctx, stage::PROCEDURE_CODES, "extraction", request).await?;
        let extraction: ExtractionResponse =
            parse_response(stage::PROCEDURE_CODES, "extraction", value)?;

        if extraction.procedures.is_empty() {
            return Ok(AgentResult::failure(ProcessingError::new(
                stage::PROCEDURE_CODES,
                "extraction found no procedures in the notes",
                Severity::Medium,
            )));
        }

        // 2. Candidate retrieval per extracted procedure
        let vector = ctx.services.vector_search()?;
        let mut candidate_sections = Vec::new();
        for extracted in &extraction.procedures {
            ctx.check_cancelled()?;
            let query = Self::candidate_query(extracted);
            let hits = vector.search(&query, CANDIDATES_PER_PROCEDURE).await?;
            debug!(
                procedure = %extracted.id,
                candidates = hits.len(),
                "candidate retrieval"
            );
            candidate_sections.push(Self::render_candidates(extracted, &hits));
        }

        // 3. Final selection over the enriched candidate set
        let selection_prompt = format!(
            "Select the final procedure codes for this case from the candidates below. \
            Return one selection per distinct billable procedure with code, elementName, \
            units, verbatim evidence, linkedDiagnoses (diagnosis-code hints), and rationale.\n\n{}",
            candidate_sections.join("\n")
        );
        let request = StructuredRequest::new(selection_prompt, selection_schema())
            .with_temperature(EXTRACTION_TEMPERATURE);
        let value = call_structured(ctx, stage::PROCEDURE_CODES, "selection", request).await?;
        let selection: SelectionResponse =
            parse_response(stage::PROCEDURE_CODES, "selection", value)?;

        if selection.selections.is_empty() {
            return Ok(AgentResult::failure(ProcessingError::new(
                stage::PROCEDURE_CODES,
                "model selected no procedure codes",
                Severity::Medium,
            )));
        }

        // 4. Reference enrichment, non-fatal per code
        let mut errors = Vec::new();
        let mut evidence = Vec::new();
        let mut procedures = Vec::new();
        for (index, selected) in selection.selections.into_iter().enumerate() {
            let mut procedure =
                ProcedureCode::new(&selected.code, &selected.element_name, selected.units);
            procedure.primary = index == 0;
            procedure.diagnosis_hints = selected.linked_diagnoses;

            Self::enrich(ctx, &mut procedure, &mut errors).await?;

            evidence.push(
                Evidence::new(stage::PROCEDURE_CODES, &selected.rationale, 0.8)
                    .with_quotes(selected.evidence),
            );
            procedures.push(procedure);
        }

        let mut result = AgentResult::success(AgentData::Procedures(procedures));
        result.evidence = evidence;
        result.errors = errors;
        Ok(result)
    }
}
