use crate::error::{EngineError, Result};
use async_trait::async_trait;

/// Text-completion seam. The engine only ever needs prompt-in, text-out;
/// model choice, temperature and transport stay behind this trait.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Client for any OpenAI-compatible chat-completions endpoint.
#[derive(Clone)]
pub struct LlmClient {
    api_key: String,
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl LlmClient {
    pub fn new(api_key: String, model: String, base_url: String) -> Self {
        Self {
            api_key,
            base_url,
            model,
            client: reqwest::Client::new(),
        }
    }

    /// Build from `OPENAI_API_KEY`, optional `OPENAI_BASE_URL` and
    /// `SMARTQUERY_MODEL`.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| EngineError::Config("OPENAI_API_KEY is not set".to_string()))?;
        let base_url = std::env::var("OPENAI_BASE_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        let model = std::env::var("SMARTQUERY_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
        Ok(Self::new(api_key, model, base_url))
    }
}

#[async_trait]
impl LanguageModel for LlmClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": "You are a careful SQL analyst. Follow the instructions exactly and return only what is asked for."},
                {"role": "user", "content": prompt}
            ],
            "temperature": 0.1,
            "max_tokens": 1024,
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError::Llm(format!("LLM API call failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(EngineError::Llm(format!("LLM API error ({}): {}", status, error_text)));
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| EngineError::Llm(format!("Failed to parse LLM response: {}", e)))?;

        // Some gateways return 200 with an error object in the body
        if let Some(error) = response_json.get("error") {
            return Err(EngineError::Llm(format!("LLM API error: {}", error)));
        }

        let content = response_json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| EngineError::Llm("No content in LLM response".to_string()))?;

        if content.is_empty() {
            return Err(EngineError::Llm("Empty content in LLM response".to_string()));
        }

        Ok(content.to_string())
    }
}

/// Strip markdown code fences from a model reply. Handles ```sql / ```json
/// openers and bare fences; text without fences passes through untouched.
pub fn strip_code_fences(text: &str) -> String {
    text.trim()
        .trim_start_matches("```sql")
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
        .to_string()
}
