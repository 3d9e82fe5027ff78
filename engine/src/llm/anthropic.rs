//! Anthropic messages API provider

use async_trait::async_trait;
use serde_json::json;

use super::{Completion, CompletionRequest, LLMError, LLMProvider, Result};
use crate::config::AnthropicConfig;

const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    config: AnthropicConfig,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(config: AnthropicConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn api_key(&self) -> Result<String> {
        std::env::var(&self.config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                LLMError::AuthenticationFailed(format!("{} is not set", self.config.api_key_env))
            })
    }
}

#[async_trait]
impl LLMProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    fn is_local(&self) -> bool {
        false
    }

    async fn check_health(&self) -> bool {
        self.api_key().is_ok()
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        let api_key = self.api_key()?;
        let url = format!("{}/messages", self.config.base_url.trim_end_matches('/'));

        let mut payload = json!({
            "model": self.config.model,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "messages": [{ "role": "user", "content": request.prompt }],
        });
        if let Some(system) = &request.system_prompt {
            payload["system"] = json!(system);
        }

        let response = self
            .client
            .post(&url)
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();

            return Err(match status.as_u16() {
                401 | 403 => LLMError::AuthenticationFailed(text),
                429 => LLMError::RateLimitExceeded,
                500..=599 => LLMError::ProviderUnavailable(text),
                _ => LLMError::InvalidRequest(text),
            });
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LLMError::ParseError(e.to_string()))?;

        let blocks = data
            .get("content")
            .and_then(|c| c.as_array())
            .ok_or_else(|| LLMError::ParseError("No content array in response".to_string()))?;

        let content: String = blocks
            .iter()
            .filter_map(|block| block.get("text").and_then(|t| t.as_str()))
            .collect();

        let usage = |field: &str| {
            data.pointer(&format!("/usage/{}", field))
                .and_then(|t| t.as_u64())
                .unwrap_or(0)
        };

        Ok(Completion {
            content,
            tokens_used: usage("input_tokens") + usage("output_tokens"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_key_is_auth_failure() {
        let provider = AnthropicProvider::new(AnthropicConfig {
            api_key_env: "PRAXIS_TEST_ANTHROPIC_KEY_NEVER_SET".to_string(),
            ..AnthropicConfig::default()
        });

        assert!(!provider.check_health().await);
        assert_eq!(provider.name(), "anthropic");

        let request = CompletionRequest {
            prompt: "hi".into(),
            system_prompt: None,
            max_tokens: 8,
            temperature: 0.0,
        };
        let err = provider.complete(&request).await.unwrap_err();
        assert!(matches!(err, LLMError::AuthenticationFailed(_)));
    }
}
