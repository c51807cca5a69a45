// Medflow Agents - The six stage producers of the coding pipeline
//
// Each agent implements the `Agent` contract from medflow-core: procedure
// extraction and selection, diagnosis linkage, compliance validation,
// coverage cross-referencing, two-phase modifier assignment, and value-unit
// calculation.

pub mod codes;
pub mod compliance;
pub mod coverage;
pub mod diagnosis;
pub mod modifier;
pub mod procedure;
pub mod rvu;

mod util;

pub use compliance::{ComplianceAgent, ServiceSetting};
pub use coverage::CoveragePolicyAgent;
pub use diagnosis::DiagnosisCodeAgent;
pub use modifier::evidence_match::NoteMatcher;
pub use modifier::ModifierAgent;
pub use procedure::ProcedureCodeAgent;
pub use rvu::ValueUnitAgent;
