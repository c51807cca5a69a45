//! HTTP model client for OpenAI-compatible chat endpoints

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use medflow_core::{MedflowError, MedflowResult, ModelClient, StructuredRequest, TextRequest};

const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Client for a single chat-completions endpoint
pub struct HttpModelClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    api_version: Option<String>,
}

impl HttpModelClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> MedflowResult<Self> {
        let base_url = base_url.into();
        let api_key = api_key.into();
        if base_url.is_empty() {
            return Err(MedflowError::config("model endpoint URL is empty"));
        }
        if api_key.is_empty() {
            return Err(MedflowError::config("model endpoint API key is empty"));
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(|e| MedflowError::config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            api_version: None,
        })
    }

    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = Some(version.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn completions_url(&self) -> String {
        match &self.api_version {
            Some(version) => format!(
                "{}/chat/completions?api-version={}",
                self.base_url, version
            ),
            None => format!("{}/chat/completions", self.base_url),
        }
    }

    async fn post_chat(&self, body: Value) -> MedflowResult<String> {
        let response = self
            .http
            .post(self.completions_url())
            .header("api-key", &self.api_key)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    MedflowError::timeout(format!("model request timed out: {}", e))
                } else {
                    MedflowError::external_api(format!("model request failed: {}", e))
                }
            })?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(MedflowError::external_api("model endpoint rate limited"));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(MedflowError::external_api(format!(
                "model endpoint returned {}: {}",
                status, text
            )));
        }

        let completion: ChatCompletion = response
            .json()
            .await
            .map_err(|e| MedflowError::external_api(format!("malformed completion body: {}", e)))?;

        completion
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| MedflowError::external_api("completion contained no choices"))
    }
}

#[derive(Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

#[async_trait]
impl ModelClient for HttpModelClient {
    async fn generate_structured(&self, request: &StructuredRequest) -> MedflowResult<Value> {
        debug!(model = %request.model, "structured model call");

        let body = json!({
            "model": request.model,
            "temperature": request.temperature,
            "response_format": {"type": "json_object"},
            "messages": [
                {"role": "system", "content": request.schema.to_system_instructions()},
                {"role": "user", "content": request.prompt},
            ],
        });

        let content = self.post_chat(body).await?;
        let value: Value = serde_json::from_str(content.trim()).map_err(|e| {
            MedflowError::validation(format!("model response is not valid JSON: {}", e))
        })?;

        request.schema.validate(&value)?;
        Ok(value)
    }

    async fn generate_text(&self, request: &TextRequest) -> MedflowResult<String> {
        debug!(model = %request.model, "text model call");

        let mut body = json!({
            "model": request.model,
            "temperature": request.temperature,
            "messages": [
                {"role": "user", "content": request.prompt},
            ],
        });
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }

        self.post_chat(body).await
    }
}
