//! Coverage-policy agent
//!
//! Cross-references diagnosis-procedure combinations against the coverage
//! index in the reference store. Structural contract only: the result is
//! an opaque blob merged into state.

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use medflow_core::stage;
use medflow_core::{
    Agent, AgentContext, AgentData, AgentResult, MedflowResult, paths, SERVICE_REFERENCE_STORE,
};
use medflow_store::CoverageRecord;

/// The coverage-policy stage producer
#[derive(Default)]
pub struct CoveragePolicyAgent;

impl CoveragePolicyAgent {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Agent for CoveragePolicyAgent {
    fn name(&self) -> &str {
        stage::COVERAGE_POLICY
    }

    fn description(&self) -> &str {
        "Cross-references diagnosis-procedure combinations against coverage policy"
    }

    fn required_services(&self) -> &[&str] {
        &[SERVICE_REFERENCE_STORE]
    }

    async fn execute(&self, ctx: &AgentContext) -> MedflowResult<AgentResult> {
        let store = ctx.services.store()?;
        let mut combinations = Vec::new();

        for procedure in &ctx.state.procedures {
            ctx.check_cancelled()?;

            let path = paths::coverage(&procedure.code);
            let record = if store.file_exists(&path).await? {
                let bytes = store.get_file_content(&path).await?;
                Some(CoverageRecord::parse(&path, &bytes)?)
            } else {
                debug!(code = %procedure.code, "no coverage record");
                None
            };

            for diagnosis in ctx
                .state
                .diagnoses
                .iter()
                .filter(|d| d.supports_procedure.as_deref() == Some(procedure.code.as_str()))
            {
                let entry = match &record {
                    Some(record) => json!({
                        "procedure": procedure.code,
                        "diagnosis": diagnosis.code,
                        "covered": record.covers(&diagnosis.code),
                        "policyId": record.policy_id,
                    }),
                    None => json!({
                        "procedure": procedure.code,
                        "diagnosis": diagnosis.code,
                        "covered": serde_json::Value::Null,
                        "policyId": serde_json::Value::Null,
                    }),
                };
                combinations.push(entry);
            }
        }

        Ok(AgentResult::success(AgentData::Coverage(json!({
            "combinations": combinations,
        }))))
    }
}
