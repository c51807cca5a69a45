//! Shared helpers for stage agents

use std::time::Instant;

use serde_json::Value;

use medflow_core::{AgentContext, MedflowError, MedflowResult, StructuredRequest};

/// Issue a structured model call through the stage's assigned backend,
/// with API-call correlation logging and prompt-level cancellation.
pub(crate) async fn call_structured(
    ctx: &AgentContext,
    stage: &str,
    operation: &str,
    request: StructuredRequest,
) -> MedflowResult<Value> {
    ctx.check_cancelled()?;

    let backends = ctx.services.backends()?;
    let summary = format!("{} chars prompt", request.prompt.len());
    let correlation_id = ctx.logger.api_call(stage, operation, &summary);
    let start = Instant::now();

    let result = tokio::select! {
        result = backends.generate_structured(stage, &request) => result,
        _ = ctx.cancel.cancelled() => Err(MedflowError::cancelled(format!(
            "{} cancelled during {}",
            stage, operation
        ))),
    };

    let duration_ms = start.elapsed().as_millis() as u64;
    match &result {
        Ok(_) => ctx.logger.api_response(&correlation_id, duration_ms, None),
        Err(err) => ctx
            .logger
            .api_response(&correlation_id, duration_ms, Some(&err.to_string())),
    }

    result
}

/// Parse a schema-validated model value into a typed response.
/// A parse failure here is a model schema mismatch, which is critical.
pub(crate) fn parse_response<T: serde::de::DeserializeOwned>(
    stage: &str,
    operation: &str,
    value: Value,
) -> MedflowResult<T> {
    serde_json::from_value(value).map_err(|e| {
        MedflowError::validation(format!(
            "{} response for {} does not match the declared shape: {}",
            stage, operation, e
        ))
    })
}
