//! In-memory model client for tests and offline runs
//!
//! Responses are keyed by a substring of the prompt, so agents whose calls
//! interleave under parallel scheduling still receive the right payloads.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use medflow_core::{MedflowError, MedflowResult, ModelClient, StructuredRequest, TextRequest};

/// Canned-response model client
#[derive(Default)]
pub struct MockModelClient {
    responders: Vec<(String, Value)>,
    text_response: Option<String>,
    fail_remaining: Mutex<usize>,
    calls: Mutex<Vec<String>>,
}

impl MockModelClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Respond with `value` to any structured request whose prompt
    /// contains `marker`. First match wins.
    pub fn on(mut self, marker: impl Into<String>, value: Value) -> Self {
        self.responders.push((marker.into(), value));
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text_response = Some(text.into());
        self
    }

    /// Fail the next `n` calls with a transport error before serving
    /// canned responses. Used to drive failover tests.
    pub fn fail_times(self, n: usize) -> Self {
        *self.fail_remaining.lock() = n;
        self
    }

    /// Prompts observed so far
    pub fn recorded_prompts(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn check_failure(&self) -> MedflowResult<()> {
        let mut remaining = self.fail_remaining.lock();
        if *remaining > 0 {
            *remaining -= 1;
            return Err(MedflowError::external_api("injected transport failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl ModelClient for MockModelClient {
    async fn generate_structured(&self, request: &StructuredRequest) -> MedflowResult<Value> {
        self.calls.lock().push(request.prompt.clone());
        self.check_failure()?;

        let value = self
            .responders
            .iter()
            .find(|(marker, _)| request.prompt.contains(marker.as_str()))
            .map(|(_, value)| value.clone())
            .ok_or_else(|| {
                MedflowError::external_api(format!(
                    "no canned response matches prompt: {}",
                    request.prompt.chars().take(80).collect::<String>()
                ))
            })?;

        request.schema.validate(&value)?;
        Ok(value)
    }

    async fn generate_text(&self, request: &TextRequest) -> MedflowResult<String> {
        self.calls.lock().push(request.prompt.clone());
        self.check_failure()?;
        Ok(self
            .text_response
            .clone()
            .unwrap_or_else(|| "mock response".to_string()))
    }
}
