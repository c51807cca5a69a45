//! Evidence records threading agent assertions back to the notes

use serde::{Deserialize, Serialize};

use crate::case::NoteKind;
use crate::compliance::ComplianceResult;
use crate::modifier::{LineItem, ModifierSuggestion};
use crate::rvu::RvuResult;

/// Typed payload attached to an evidence record
///
/// Well-known variants are typed; `Other` is the catch-all for
/// extensibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EvidenceContent {
    Compliance(ComplianceResult),
    Rvu(RvuResult),
    FinalModifiers {
        modifiers: Vec<ModifierSuggestion>,
        line_items: Vec<LineItem>,
    },
    PtpConflictResolved {
        column1: String,
        column2: String,
        modifier: String,
    },
    Other(serde_json::Value),
}

/// A verbatim quotation from the notes plus the assertion it supports
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Evidence {
    /// One or more verbatim quotes from the notes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub quotes: Vec<String>,

    pub rationale: String,

    /// Agent that produced the evidence
    pub source_agent: String,

    /// Note the quotes were taken from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_note: Option<NoteKind>,

    /// Confidence in [0, 1]; clamped at construction
    pub confidence: f64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<EvidenceContent>,
}

impl Evidence {
    pub fn new(source_agent: impl Into<String>, rationale: impl Into<String>, confidence: f64) -> Self {
        Self {
            quotes: Vec::new(),
            rationale: rationale.into(),
            source_agent: source_agent.into(),
            source_note: None,
            confidence: confidence.clamp(0.0, 1.0),
            content: None,
        }
    }

    pub fn with_quote(mut self, quote: impl Into<String>) -> Self {
        self.quotes.push(quote.into());
        self
    }

    pub fn with_quotes(mut self, quotes: impl IntoIterator<Item = String>) -> Self {
        self.quotes.extend(quotes);
        self
    }

    pub fn with_source_note(mut self, kind: NoteKind) -> Self {
        self.source_note = Some(kind);
        self
    }

    pub fn with_content(mut self, content: EvidenceContent) -> Self {
        self.content = Some(content);
        self
    }

    /// Structural well-formedness: a rationale is always required, and
    /// every quote must be non-empty.
    pub fn is_well_formed(&self) -> bool {
        !self.rationale.trim().is_empty()
            && self.quotes.iter().all(|q| !q.trim().is_empty())
            && (0.0..=1.0).contains(&self.confidence)
    }
}
