//! Standard pipeline wiring
//!
//! Registers the six canonical stages with their dependency edges:
//! procedure selection feeds diagnosis linkage, which feeds compliance
//! and coverage; modifier assignment follows compliance; value units run
//! last against the final modifier list.

use std::sync::Arc;
use std::time::Duration;

use medflow_core::stage;
use medflow_core::{MedflowResult, ServiceRegistry};

use medflow_agents::{
    ComplianceAgent, CoveragePolicyAgent, DiagnosisCodeAgent, ModifierAgent, ProcedureCodeAgent,
    ValueUnitAgent,
};

use crate::orchestrator::{StageRegistration, WorkflowOrchestrator};

/// Per-stage deadline in the standard wiring
const STAGE_TIMEOUT: Duration = Duration::from_secs(90);

/// Build an orchestrator wired with the six canonical stages
pub fn standard_pipeline(services: ServiceRegistry) -> MedflowResult<WorkflowOrchestrator> {
    let mut orchestrator = WorkflowOrchestrator::new(services);

    orchestrator.register(
        StageRegistration::new(stage::PROCEDURE_CODES, Arc::new(ProcedureCodeAgent::new()))
            .with_priority(10)
            .with_timeout(STAGE_TIMEOUT),
    )?;

    orchestrator.register(
        StageRegistration::new(stage::DIAGNOSIS_CODES, Arc::new(DiagnosisCodeAgent::new()))
            .with_deps([stage::PROCEDURE_CODES])
            .with_priority(8)
            .with_timeout(STAGE_TIMEOUT),
    )?;

    orchestrator.register(
        StageRegistration::new(stage::COMPLIANCE, Arc::new(ComplianceAgent::new()))
            .with_deps([stage::DIAGNOSIS_CODES])
            .with_priority(6)
            .with_timeout(STAGE_TIMEOUT),
    )?;

    orchestrator.register(
        StageRegistration::new(stage::COVERAGE_POLICY, Arc::new(CoveragePolicyAgent::new()))
            .with_deps([stage::DIAGNOSIS_CODES])
            .with_priority(5)
            .with_timeout(STAGE_TIMEOUT)
            .optional(),
    )?;

    orchestrator.register(
        StageRegistration::new(stage::MODIFIERS, Arc::new(ModifierAgent::new()))
            .with_deps([stage::COMPLIANCE])
            .with_priority(4)
            .with_timeout(STAGE_TIMEOUT),
    )?;

    orchestrator.register(
        StageRegistration::new(stage::VALUE_UNITS, Arc::new(ValueUnitAgent::new()))
            .with_deps([stage::MODIFIERS])
            .with_priority(2)
            .with_timeout(STAGE_TIMEOUT),
    )?;

    Ok(orchestrator)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_pipeline_registers_all_stages() {
        let orchestrator = standard_pipeline(ServiceRegistry::new()).unwrap();
        let steps = orchestrator.registered_steps();
        for expected in stage::ALL_STAGES {
            assert!(steps.contains(expected), "missing stage {}", expected);
        }
    }
}
