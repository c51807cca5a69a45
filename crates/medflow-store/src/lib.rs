// Medflow Store - Reference data store backends and vector search
//
// Implements the `ReferenceStore` and `VectorSearch` abstractions from
// medflow-core, plus the typed records for each file family in the
// reference repository.

pub mod fs;
pub mod mock;
pub mod records;
pub mod vector;

pub use fs::FsReferenceStore;
pub use mock::MockReferenceStore;
pub use records::{
    CoverageRecord, DiagnosisRecord, GpciRecord, LocalityCrosswalk, LocalityEntry, ProcedureRecord,
    PtpEditFile, PtpEditRow, RvuRecord,
};
pub use vector::{IndexedCode, MockVectorSearch};
