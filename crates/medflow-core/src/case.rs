//! Case metadata, demographics, and clinical notes

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Claim position in the billing sequence
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ClaimKind {
    #[default]
    Primary,
    Secondary,
    Tertiary,
}

/// Processing status of a case
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CaseStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Error,
}

/// Identifying metadata for a case
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseMeta {
    pub case_id: String,

    pub patient_id: String,

    pub provider_id: String,

    /// Date of service, used for edit-table effective windows
    pub date_of_service: NaiveDate,

    /// Two-digit place-of-service code (e.g. "21" inpatient hospital)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub place_of_service: Option<String>,

    #[serde(default)]
    pub claim_kind: ClaimKind,

    #[serde(default)]
    pub status: CaseStatus,

    pub created_at: DateTime<Utc>,
}

impl CaseMeta {
    pub fn new(
        case_id: impl Into<String>,
        patient_id: impl Into<String>,
        provider_id: impl Into<String>,
        date_of_service: NaiveDate,
    ) -> Self {
        Self {
            case_id: case_id.into(),
            patient_id: patient_id.into(),
            provider_id: provider_id.into(),
            date_of_service,
            place_of_service: None,
            claim_kind: ClaimKind::Primary,
            status: CaseStatus::Pending,
            created_at: Utc::now(),
        }
    }

    pub fn with_place_of_service(mut self, pos: impl Into<String>) -> Self {
        self.place_of_service = Some(pos.into());
        self
    }
}

/// Patient, provider, facility, geographic, and coverage fields.
/// Everything optional; sources vary widely in completeness.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Demographics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patient_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_of_birth: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mrn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_npi: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_specialty: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub facility_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub facility_npi: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zip: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub payer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub member_id: Option<String>,
}

/// Kind of a clinical note
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NoteKind {
    Operative,
    Admission,
    Discharge,
    Pathology,
    Progress,
    Bedside,
}

impl NoteKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Operative => "operative",
            Self::Admission => "admission",
            Self::Discharge => "discharge",
            Self::Pathology => "pathology",
            Self::Progress => "progress",
            Self::Bedside => "bedside",
        }
    }
}

/// A supplementary note attached to the case
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdditionalNote {
    pub kind: NoteKind,
    pub text: String,
}

/// The primary note plus any additional notes, in order
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseNotes {
    pub primary_text: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional: Vec<AdditionalNote>,
}

impl CaseNotes {
    pub fn new(primary_text: impl Into<String>) -> Self {
        Self {
            primary_text: primary_text.into(),
            additional: Vec::new(),
        }
    }

    pub fn with_note(mut self, kind: NoteKind, text: impl Into<String>) -> Self {
        self.additional.push(AdditionalNote {
            kind,
            text: text.into(),
        });
        self
    }

    /// Concatenated text of the primary note and all additional notes,
    /// each additional note prefixed with its kind header.
    pub fn full_text(&self) -> String {
        let mut out = self.primary_text.clone();
        for note in &self.additional {
            out.push_str("\n\n[");
            out.push_str(note.kind.as_str());
            out.push_str(" note]\n");
            out.push_str(&note.text);
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.primary_text.trim().is_empty() && self.additional.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_text_includes_additional_notes() {
        let notes = CaseNotes::new("Primary operative findings.")
            .with_note(NoteKind::Pathology, "Specimen consistent with hernia sac.");

        let text = notes.full_text();
        assert!(text.contains("Primary operative findings."));
        assert!(text.contains("[pathology note]"));
        assert!(text.contains("hernia sac"));
    }

    #[test]
    fn test_case_meta_roundtrip() {
        let meta = CaseMeta::new(
            "case-1",
            "pat-1",
            "prov-1",
            NaiveDate::from_ymd_opt(2024, 3, 15).unwrap(),
        )
        .with_place_of_service("22");

        let json = serde_json::to_string(&meta).unwrap();
        let parsed: CaseMeta = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.place_of_service.as_deref(), Some("22"));
        assert_eq!(parsed.claim_kind, ClaimKind::Primary);
        assert_eq!(parsed.status, CaseStatus::Pending);
    }
}
