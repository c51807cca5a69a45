//! The standardized agent contract
//!
//! Every stage implements `Agent`; the orchestrator runs agents through
//! the `run_agent` envelope, which enforces the common contract around
//! the agent's own logic.

use std::time::Instant;

use async_trait::async_trait;

use crate::context::AgentContext;
use crate::error::{MedflowResult, ProcessingError, Severity};
use crate::result::AgentResult;

/// A pipeline stage producer
///
/// Agents must be reentrant with respect to different cases and must not
/// retain case state across invocations.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Stable stage name, used as the DAG key and backend-routing key
    fn name(&self) -> &str;

    /// Human description
    fn description(&self) -> &str;

    /// Services this agent requires; checked before execution
    fn required_services(&self) -> &[&str] {
        &[]
    }

    /// The agent's internal logic. Failures may be returned either as an
    /// `Err` (normalized to a critical result by the envelope) or as an
    /// unsuccessful `AgentResult` carrying graded errors.
    async fn execute(&self, ctx: &AgentContext) -> MedflowResult<AgentResult>;
}

/// Run an agent through the standard envelope:
/// 1. verify every required service is present (critical failure otherwise);
/// 2. invoke the agent;
/// 3. normalize an `Err` into a critical failure result;
/// 4. post-validate the result shape;
/// 5. stamp execution metadata.
pub async fn run_agent(agent: &dyn Agent, ctx: &AgentContext) -> AgentResult {
    let start = Instant::now();
    let name = agent.name().to_string();

    for service in agent.required_services() {
        if !ctx.services.has(service) {
            let mut result = AgentResult::failure(ProcessingError::new(
                &name,
                format!("required service '{}' is not available", service),
                Severity::Critical,
            ));
            stamp(&mut result, &name, start);
            return result;
        }
    }

    let mut result = match agent.execute(ctx).await {
        Ok(result) => result,
        Err(err) => AgentResult::failure(
            ProcessingError::from_error(&name, &err).with_context(serde_json::json!({
                "correlationId": ctx.correlation_id,
            })),
        ),
    };

    validate_result(&name, &mut result);
    stamp(&mut result, &name, start);
    result
}

/// Post-validation of the result shape. Malformed evidence is dropped with
/// a low-severity error rather than failing the stage.
fn validate_result(agent: &str, result: &mut AgentResult) {
    let mut dropped = 0usize;
    result.evidence.retain(|e| {
        if e.is_well_formed() {
            true
        } else {
            dropped += 1;
            false
        }
    });
    if dropped > 0 {
        result.errors.push(ProcessingError::new(
            agent,
            format!("dropped {} malformed evidence records", dropped),
            Severity::Low,
        ));
    }
}

fn stamp(result: &mut AgentResult, agent: &str, start: Instant) {
    result.metadata.execution_time_ms = start.elapsed().as_millis() as u64;
    result.metadata.agent_name = agent.to_string();
    if result.metadata.version.is_empty() {
        result.metadata.version = env!("CARGO_PKG_VERSION").to_string();
    }
}
