// Medflow Core - Foundation types and traits for the coding pipeline
//
// This crate defines the workflow state, the standardized agent contract,
// and the service abstractions the rest of the workspace implements.

pub mod agent;
pub mod case;
pub mod compliance;
pub mod context;
pub mod diagnosis;
pub mod error;
pub mod evidence;
pub mod logger;
pub mod model;
pub mod modifier;
pub mod procedure;
pub mod result;
pub mod rvu;
pub mod schema;
pub mod services;
pub mod stage;
pub mod state;
pub mod store;

// Re-export core types
pub use agent::{run_agent, Agent};
pub use case::{
    AdditionalNote, CaseMeta, CaseNotes, CaseStatus, ClaimKind, Demographics, NoteKind,
};
pub use compliance::{
    ComplianceMetadata, ComplianceResult, ComplianceStatus, GlobalPeriodViolation,
    ModifierIndicator, MueViolation, PtpViolation, RvuViolation,
};
pub use context::{cancel_pair, AgentContext, CancelHandle, CancelSignal};
pub use diagnosis::DiagnosisCode;
pub use error::{
    ErrorKind, MedflowError, MedflowResult, ProcessingError, Severity, ViolationSeverity,
};
pub use evidence::{Evidence, EvidenceContent};
pub use logger::{LogEvent, LogLevel, WorkflowLogger};
pub use model::{
    BackendAssignment, EndpointId, ModelBackends, ModelClient, StructuredRequest, TextRequest,
};
pub use modifier::{
    ComplianceFlag, EditKind, LineItem, ModifierClassification, ModifierSuggestion,
};
pub use procedure::{Mai, ProcedureCode, ProcedureInsight};
pub use result::{AgentData, AgentResult, PtpResolution, ResultMetadata};
pub use rvu::{RvuLine, RvuResult};
pub use schema::OutputSchema;
pub use services::{
    ServiceRegistry, SERVICE_MODEL, SERVICE_REFERENCE_STORE, SERVICE_VECTOR_SEARCH,
};
pub use state::{HistoryEntry, HistoryStatus, ReferenceError, WorkflowState};
pub use store::{paths, ReferenceStore, SearchHit, VectorSearch};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
