//! Deterministic offline provider
//!
//! Echoes a compact description of the request back as the answer, so runs
//! can be exercised end to end without network access.

use super::{GenerateRequest, LLMProvider, LLMResponse, Result};
use crate::context::trim;
use async_trait::async_trait;
use serde_json::Value;

pub struct MockProvider {
    name: String,
    model: String,
}

impl MockProvider {
    pub fn new(name: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl LLMProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, request: GenerateRequest) -> Result<LLMResponse> {
        let model = [request.model.as_str(), self.model.as_str(), "mock-small"]
            .into_iter()
            .find(|m| !m.is_empty())
            .unwrap_or("mock-small")
            .to_string();

        let mut parts = vec![
            format!("agent={}", request.agent_name),
            format!("model={}", model),
        ];
        if !request.input.is_empty() {
            parts.push(format!("input={:?}", request.input));
        }
        if !request.system_prompt.is_empty() {
            parts.push(format!(
                "system_prompt={:?}",
                trim(&request.system_prompt, 90)
            ));
        }
        if !request.available_skills.is_empty() {
            parts.push(format!("skills={}", request.available_skills.join(",")));
        }
        if !request.startup_results.is_empty() {
            parts.push(format!("startup_calls={}", request.startup_results.len()));
        }
        if !request.tools.is_empty() {
            parts.push(format!("tools={}", request.tools.len()));
        }

        let mut response = LLMResponse::text(format!("[mock-provider] {}", parts.join(" | ")));
        response.provider = self.name.clone();
        response.model = model;
        response
            .meta
            .insert("provider_type".into(), Value::String("mock".into()));
        Ok(response)
    }
}
