//! Canonical stage names
//!
//! Stage names key the DAG, the agent-result map, and backend routing.
//! Defined once here and referenced everywhere.

pub const PROCEDURE_CODES: &str = "procedure-codes";
pub const DIAGNOSIS_CODES: &str = "diagnosis-codes";
pub const COMPLIANCE: &str = "compliance";
pub const COVERAGE_POLICY: &str = "coverage-policy";
pub const MODIFIERS: &str = "modifiers";
pub const VALUE_UNITS: &str = "value-units";

/// All canonical stages in registration order
pub const ALL_STAGES: &[&str] = &[
    PROCEDURE_CODES,
    DIAGNOSIS_CODES,
    COMPLIANCE,
    COVERAGE_POLICY,
    MODIFIERS,
    VALUE_UNITS,
];
