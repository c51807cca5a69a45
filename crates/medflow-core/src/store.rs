//! Reference-store and vector-search abstractions
//!
//! The reference store is a content-addressed byte store with a stable
//! path layout; implementations live in `medflow-store`.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::MedflowResult;

/// Read-only repository of code metadata, edit tables, and adjustment
/// factors, addressed by stable keys
#[async_trait]
pub trait ReferenceStore: Send + Sync {
    async fn file_exists(&self, path: &str) -> MedflowResult<bool>;

    async fn get_file_content(&self, path: &str) -> MedflowResult<Bytes>;

    /// Enumerate records in `dir` whose basename starts with `prefix`
    async fn list_files_by_name(&self, dir: &str, prefix: &str) -> MedflowResult<Vec<String>>;
}

/// Stable path layout of the reference repository
pub mod paths {
    /// Directory of procedure-code records keyed by five-digit code
    pub const PROCEDURE_DIR: &str = "procedures";

    /// Directory of diagnosis-code records keyed by the full code string
    pub const DIAGNOSIS_DIR: &str = "diagnoses";

    /// Directory of procedure-pair edit tables keyed by column-1 code
    pub const PTP_DIR: &str = "ptp";

    /// Directory of base value-unit records keyed by five-digit code
    pub const RVU_DIR: &str = "rvu";

    /// Directory of geographic adjustment factors keyed by contractor id
    pub const GPCI_DIR: &str = "gpci";

    /// Directory of coverage-policy records keyed by procedure code
    pub const COVERAGE_DIR: &str = "coverage";

    /// State-to-contractor locality crosswalk
    pub const LOCALITY_CROSSWALK: &str = "locality/crosswalk.json";

    pub fn procedure(code: &str) -> String {
        format!("{}/{}.json", PROCEDURE_DIR, code)
    }

    pub fn diagnosis(code: &str) -> String {
        format!("{}/{}.json", DIAGNOSIS_DIR, code)
    }

    pub fn ptp(column1: &str) -> String {
        format!("{}/{}.json", PTP_DIR, column1)
    }

    pub fn rvu(code: &str) -> String {
        format!("{}/{}.json", RVU_DIR, code)
    }

    pub fn gpci(contractor: &str) -> String {
        format!("{}/{}.json", GPCI_DIR, contractor)
    }

    pub fn coverage(code: &str) -> String {
        format!("{}/{}.json", COVERAGE_DIR, code)
    }
}

/// One vector-search hit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    /// The code the chunk belongs to
    pub parent_id: String,

    /// Official title of the code
    pub code_title: String,

    /// Matched text chunk
    pub chunk: String,

    pub search_score: f64,

    pub reranker_score: f64,
}

/// Semantic retrieval over the code corpus
#[async_trait]
pub trait VectorSearch: Send + Sync {
    async fn search(&self, query: &str, top_k: usize) -> MedflowResult<Vec<SearchHit>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_layout() {
        assert_eq!(paths::procedure("49616"), "procedures/49616.json");
        assert_eq!(paths::diagnosis("K43.0"), "diagnoses/K43.0.json");
        assert_eq!(paths::ptp("49505"), "ptp/49505.json");
        assert_eq!(paths::gpci("10212"), "gpci/10212.json");
    }
}
