//! Typed reference-store records
//!
//! Each record type mirrors one file family in the reference repository
//! and knows how to parse itself from raw bytes.

use bytes::Bytes;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use medflow_core::{
    Mai, MedflowError, MedflowResult, ModifierIndicator, ProcedureCode, ProcedureInsight,
};

fn parse_json<T: serde::de::DeserializeOwned>(path: &str, bytes: &Bytes) -> MedflowResult<T> {
    serde_json::from_slice(bytes).map_err(|e| {
        MedflowError::validation(format!("malformed reference record '{}': {}", path, e))
    })
}

/// Procedure-code record under `procedures/<code>.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcedureRecord {
    pub code: String,

    pub description: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub common_description: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub global_period: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub mue_limit: Option<u32>,

    /// Adjudication indicator as stored: 1, 2, or 3
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mue_adjudication: Option<u8>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_modifiers: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_diagnosis_families: Vec<String>,

    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub policy: serde_json::Value,
}

impl ProcedureRecord {
    pub fn parse(path: &str, bytes: &Bytes) -> MedflowResult<Self> {
        parse_json(path, bytes)
    }

    /// Enrich a procedure code with this record's reference data
    pub fn apply_to(&self, procedure: &mut ProcedureCode) {
        procedure.description = self.description.clone();
        procedure.global_period = self.global_period.clone();
        procedure.unit_limit = self.mue_limit;
        procedure.unit_limit_adjudication = self.mue_adjudication.and_then(Mai::from_u8);
        if !self.allowed_modifiers.is_empty() {
            procedure.allowed_modifiers = Some(self.allowed_modifiers.clone());
        }
        if !self.allowed_diagnosis_families.is_empty() {
            procedure.allowed_diagnosis_families = Some(self.allowed_diagnosis_families.clone());
        }
        procedure.insight = Some(ProcedureInsight {
            official_description: Some(self.description.clone()),
            common_description: self.common_description.clone(),
            policy: self.policy.clone(),
        });
    }
}

/// Diagnosis-code record under `diagnoses/<code>.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosisRecord {
    pub code: String,
    pub description: String,
}

impl DiagnosisRecord {
    pub fn parse(path: &str, bytes: &Bytes) -> MedflowResult<Self> {
        parse_json(path, bytes)
    }
}

/// One row of a procedure-pair edit table under `ptp/<column1>.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PtpEditRow {
    pub column1: String,

    pub column2: String,

    pub effective: NaiveDate,

    /// Open-ended when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deletion: Option<NaiveDate>,

    pub modifier_indicator: ModifierIndicator,
}

impl PtpEditRow {
    /// Whether the edit is active on the given date of service
    pub fn active_on(&self, date_of_service: NaiveDate) -> bool {
        if date_of_service < self.effective {
            return false;
        }
        match self.deletion {
            Some(deletion) => date_of_service <= deletion,
            None => true,
        }
    }
}

/// The edit table for one column-1 code
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PtpEditFile {
    #[serde(default)]
    pub edits: Vec<PtpEditRow>,
}

impl PtpEditFile {
    pub fn parse(path: &str, bytes: &Bytes) -> MedflowResult<Self> {
        parse_json(path, bytes)
    }

    /// Active edits against a specific column-2 code
    pub fn active_against<'a>(
        &'a self,
        column2: &'a str,
        date_of_service: NaiveDate,
    ) -> impl Iterator<Item = &'a PtpEditRow> {
        self.edits
            .iter()
            .filter(move |row| row.column2 == column2 && row.active_on(date_of_service))
    }
}

/// One state's entry in the locality crosswalk
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalityEntry {
    pub contractor: String,
    pub locality: String,
}

/// State-to-contractor crosswalk at `locality/crosswalk.json`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocalityCrosswalk {
    #[serde(default)]
    pub states: HashMap<String, LocalityEntry>,
}

impl LocalityCrosswalk {
    pub fn parse(path: &str, bytes: &Bytes) -> MedflowResult<Self> {
        parse_json(path, bytes)
    }

    pub fn lookup(&self, state: &str) -> Option<&LocalityEntry> {
        self.states.get(state)
    }
}

/// Geographic adjustment factors under `gpci/<contractor>.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GpciRecord {
    pub work: f64,
    pub practice_expense: f64,
    pub malpractice: f64,
}

impl GpciRecord {
    pub fn parse(path: &str, bytes: &Bytes) -> MedflowResult<Self> {
        parse_json(path, bytes)
    }
}

/// Base value units under `rvu/<code>.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RvuRecord {
    pub work: f64,
    pub practice_expense: f64,
    pub malpractice: f64,
}

impl RvuRecord {
    pub fn parse(path: &str, bytes: &Bytes) -> MedflowResult<Self> {
        parse_json(path, bytes)
    }
}

/// Coverage-policy record under `coverage/<code>.json`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverageRecord {
    /// Diagnosis-code prefixes this procedure is covered for
    #[serde(default)]
    pub covered_diagnosis_prefixes: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_id: Option<String>,
}

impl CoverageRecord {
    pub fn parse(path: &str, bytes: &Bytes) -> MedflowResult<Self> {
        parse_json(path, bytes)
    }

    pub fn covers(&self, diagnosis_code: &str) -> bool {
        self.covered_diagnosis_prefixes
            .iter()
            .any(|prefix| diagnosis_code.starts_with(prefix.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_procedure_record_enrichment() {
        let bytes = Bytes::from(
            serde_json::to_vec(&json!({
                "code": "49616",
                "description": "Repair of incisional hernia, recurrent, incarcerated",
                "globalPeriod": "090",
                "mueLimit": 1,
                "mueAdjudication": 2,
                "allowedModifiers": ["22", "59"],
                "allowedDiagnosisFamilies": ["K43"]
            }))
            .unwrap(),
        );

        let record = ProcedureRecord::parse("procedures/49616.json", &bytes).unwrap();
        let mut procedure = ProcedureCode::new("49616", "placeholder", 1);
        record.apply_to(&mut procedure);

        assert_eq!(procedure.global_period.as_deref(), Some("090"));
        assert_eq!(procedure.unit_limit, Some(1));
        assert_eq!(procedure.unit_limit_adjudication, Some(Mai::AbsoluteDate));
        assert!(procedure.permits_modifier("59"));
        assert!(procedure.insight.is_some());
    }

    #[test]
    fn test_ptp_active_window() {
        let row = PtpEditRow {
            column1: "49505".to_string(),
            column2: "49568".to_string(),
            effective: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
            deletion: Some(NaiveDate::from_ymd_opt(2024, 12, 31).unwrap()),
            modifier_indicator: ModifierIndicator::Allowed,
        };

        assert!(row.active_on(NaiveDate::from_ymd_opt(2024, 3, 15).unwrap()));
        assert!(row.active_on(NaiveDate::from_ymd_opt(2024, 12, 31).unwrap()));
        assert!(!row.active_on(NaiveDate::from_ymd_opt(2019, 12, 31).unwrap()));
        assert!(!row.active_on(NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()));

        let open_ended = PtpEditRow {
            deletion: None,
            ..row
        };
        assert!(open_ended.active_on(NaiveDate::from_ymd_opt(2030, 6, 1).unwrap()));
    }

    #[test]
    fn test_malformed_record_is_validation_error() {
        let bytes = Bytes::from_static(b"not json");
        let err = ProcedureRecord::parse("procedures/x.json", &bytes).unwrap_err();
        assert!(matches!(err, MedflowError::Validation(_)));
    }

    #[test]
    fn test_coverage_prefix_match() {
        let record = CoverageRecord {
            covered_diagnosis_prefixes: vec!["K43".to_string(), "K40".to_string()],
            policy_id: Some("L12345".to_string()),
        };
        assert!(record.covers("K43.0"));
        assert!(record.covers("K40.90"));
        assert!(!record.covers("M54.5"));
    }
}
