use super::{GenerationBackend, GenerationRequest, LLMError, ModelDescriptor};
use crate::config::GeminiConfig;
use async_trait::async_trait;
use sdk::types::Role;
use serde_json::json;

/// Gemini `generateContent` backend
pub struct GeminiBackend {
    config: GeminiConfig,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl GeminiBackend {
    /// Build a backend reading the key from `config.api_key_env`
    pub fn new(config: GeminiConfig) -> Self {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty());
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: GeminiConfig, api_key: Option<String>) -> Self {
        Self {
            config,
            api_key,
            client: reqwest::Client::new(),
        }
    }

    fn build_payload(model: &ModelDescriptor, request: &GenerationRequest) -> serde_json::Value {
        let mut contents: Vec<serde_json::Value> = request
            .history
            .iter()
            .filter(|m| !m.content.trim().is_empty())
            .map(|m| {
                json!({
                    "role": if m.role == Role::Model { "model" } else { "user" },
                    "parts": [{"text": m.content}]
                })
            })
            .collect();

        contents.push(json!({
            "role": "user",
            "parts": [{"text": request.contents}]
        }));

        let mut payload = serde_json::Map::new();
        payload.insert("contents".to_string(), json!(contents));
        payload.insert(
            "generationConfig".to_string(),
            json!({ "maxOutputTokens": model.max_output_tokens }),
        );

        if let Some(sys) = &request.system_instruction {
            payload.insert(
                "systemInstruction".to_string(),
                json!({ "parts": [{"text": sys}] }),
            );
        }

        serde_json::Value::Object(payload)
    }
}

#[async_trait]
impl GenerationBackend for GeminiBackend {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn check_health(&self) -> bool {
        self.api_key.is_some()
    }

    async fn generate(
        &self,
        model: &ModelDescriptor,
        request: &GenerationRequest,
    ) -> super::Result<String> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            LLMError::AuthenticationFailed(format!("{} is not set", self.config.api_key_env))
        })?;

        let url = format!(
            "{}/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            model.name
        );

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("x-goog-api-key", api_key)
            .json(&Self::build_payload(model, request))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LLMError::Timeout
                } else {
                    LLMError::NetworkError(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();

            return Err(match status.as_u16() {
                400 | 404 => LLMError::InvalidRequest(text),
                429 => LLMError::RateLimitExceeded,
                401 | 403 => LLMError::AuthenticationFailed(text),
                _ => LLMError::ProviderUnavailable(format!(
                    "Gemini API error ({}): {}",
                    status, text
                )),
            });
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LLMError::ParseError(e.to_string()))?;

        let candidate = data
            .get("candidates")
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
            .ok_or_else(|| LLMError::ParseError("No candidates in response".to_string()))?;

        // A candidate without parts (e.g. blocked by safety) yields empty text;
        // the invoker substitutes its fallback reply.
        let full_text = candidate
            .get("content")
            .and_then(|c| c.get("parts"))
            .and_then(|p| p.as_array())
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|part| part.get("text").and_then(|t| t.as_str()))
                    .collect::<String>()
            })
            .unwrap_or_default();

        Ok(full_text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::CostTier;
    use sdk::types::ChatMessage;

    #[test]
    fn test_payload_places_history_before_new_turn() {
        let model = ModelDescriptor::new("gemini-2.5-flash", 1, CostTier::Low);
        let request = GenerationRequest::new("and tomorrow?")
            .with_system("persona")
            .with_history(vec![
                ChatMessage::user("weather today?"),
                ChatMessage::model("sunny"),
                ChatMessage::user("   "),
            ]);

        let payload = GeminiBackend::build_payload(&model, &request);
        let contents = payload["contents"].as_array().unwrap();

        assert_eq!(contents.len(), 3);
        assert_eq!(contents[0]["role"], "user");
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(contents[2]["parts"][0]["text"], "and tomorrow?");
        assert_eq!(payload["systemInstruction"]["parts"][0]["text"], "persona");
        assert_eq!(payload["generationConfig"]["maxOutputTokens"], 65_536);
    }

    #[tokio::test]
    async fn test_missing_key_is_auth_failure() {
        let backend = GeminiBackend::with_api_key(GeminiConfig::default(), None);
        assert!(!backend.check_health().await);

        let model = ModelDescriptor::new("gemini-2.5-flash", 1, CostTier::Low);
        let err = backend
            .generate(&model, &GenerationRequest::new("hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, LLMError::AuthenticationFailed(_)));
    }
}
