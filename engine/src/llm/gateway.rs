//! Generation gateway
//!
//! Wraps a primary provider and an optional fallback behind the
//! [`Generator`] trait. Each attempt is bounded by the configured timeout.
//! When every provider fails the response carries `success = false` and
//! the last error, and callers take their deterministic fallback path.
//!
//! Only raw token counts are tracked; pricing is left to whoever reads
//! the stats.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::anthropic::AnthropicProvider;
use super::ollama::OllamaProvider;
use super::openai::OpenAIProvider;
use super::{
    CompletionRequest, GenerationRequest, GenerationResponse, Generator, LLMError, LLMProvider,
};
use crate::config::LLMConfig;

/// Counters for one provider
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderUsage {
    pub requests: u64,
    pub failures: u64,
    pub tokens: u64,
    pub total_latency_ms: u64,
}

/// Aggregated usage across providers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageStats {
    pub total_requests: u64,
    pub failed_requests: u64,
    pub total_tokens: u64,
    /// Tokens since the last [`LLMGateway::reset_session`]
    pub session_tokens: u64,
    pub avg_latency_ms: f64,
    pub by_provider: BTreeMap<String, ProviderUsage>,
}

impl UsageStats {
    fn record(&mut self, provider: &str, tokens: u64, latency_ms: u64, failed: bool) {
        let entry = self.by_provider.entry(provider.to_string()).or_default();
        entry.requests += 1;
        entry.tokens += tokens;
        entry.total_latency_ms += latency_ms;
        if failed {
            entry.failures += 1;
        }

        self.total_tokens += tokens;
        self.session_tokens += tokens;

        let total_latency: u64 = self.by_provider.values().map(|p| p.total_latency_ms).sum();
        let attempts: u64 = self.by_provider.values().map(|p| p.requests).sum();
        self.avg_latency_ms = if attempts > 0 {
            total_latency as f64 / attempts as f64
        } else {
            0.0
        };
    }
}

pub struct LLMGateway {
    primary: Box<dyn LLMProvider>,
    fallback: Option<Box<dyn LLMProvider>>,
    timeout: Duration,
    max_tokens: u32,
    temperature: f32,
    usage: Mutex<UsageStats>,
}

/// Build the named provider from config
pub fn build_provider(name: &str, config: &LLMConfig) -> Option<Box<dyn LLMProvider>> {
    match name {
        "ollama" => Some(Box::new(OllamaProvider::new(
            config.ollama.base_url.clone(),
            config.ollama.model.clone(),
        ))),
        "openai" => Some(Box::new(OpenAIProvider::new(config.openai.clone()))),
        "anthropic" => Some(Box::new(AnthropicProvider::new(config.anthropic.clone()))),
        _ => None,
    }
}

impl LLMGateway {
    pub fn new(
        primary: Box<dyn LLMProvider>,
        fallback: Option<Box<dyn LLMProvider>>,
        config: &LLMConfig,
    ) -> Self {
        Self {
            primary,
            fallback,
            timeout: Duration::from_secs(config.timeout_secs),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            usage: Mutex::new(UsageStats::default()),
        }
    }

    /// Gateway for the providers named in `config`
    pub fn from_config(config: &LLMConfig) -> Result<Self, sdk::errors::EngineError> {
        let primary = build_provider(&config.provider, config).ok_or_else(|| {
            sdk::errors::EngineError::Config(format!("Unknown provider '{}'", config.provider))
        })?;
        let fallback = config
            .fallback_provider
            .as_deref()
            .filter(|name| *name != config.provider)
            .and_then(|name| build_provider(name, config));

        Ok(Self::new(primary, fallback, config))
    }

    /// Zero the session token counter
    pub async fn reset_session(&self) {
        self.usage.lock().await.session_tokens = 0;
    }

    /// Health of each configured provider, primary first
    pub async fn health(&self) -> Vec<(String, bool)> {
        let mut health = vec![(
            self.primary.name().to_string(),
            self.primary.check_health().await,
        )];
        if let Some(fallback) = &self.fallback {
            health.push((fallback.name().to_string(), fallback.check_health().await));
        }
        health
    }

    async fn attempt(
        &self,
        provider: &dyn LLMProvider,
        request: &CompletionRequest,
    ) -> Result<GenerationResponse, LLMError> {
        let start = Instant::now();
        let outcome = match tokio::time::timeout(self.timeout, provider.complete(request)).await {
            Ok(result) => result,
            Err(_) => Err(LLMError::Timeout),
        };
        let latency_ms = start.elapsed().as_millis() as u64;

        let mut usage = self.usage.lock().await;
        match outcome {
            Ok(completion) => {
                usage.record(provider.name(), completion.tokens_used, latency_ms, false);
                Ok(GenerationResponse {
                    content: completion.content,
                    success: true,
                    error: None,
                    provider: provider.name().to_string(),
                    model: provider.model().to_string(),
                    tokens_used: completion.tokens_used,
                    latency_ms,
                })
            }
            Err(e) => {
                usage.record(provider.name(), 0, latency_ms, true);
                Err(e)
            }
        }
    }
}

#[async_trait]
impl Generator for LLMGateway {
    async fn generate(&self, request: GenerationRequest) -> GenerationResponse {
        let resolved = CompletionRequest {
            prompt: request.prompt,
            system_prompt: request.system_prompt,
            max_tokens: request.max_tokens.unwrap_or(self.max_tokens),
            temperature: request.temperature.unwrap_or(self.temperature),
        };

        let providers = std::iter::once(self.primary.as_ref()).chain(self.fallback.as_deref());

        let mut last_error = String::from("no provider configured");
        for provider in providers {
            match self.attempt(provider, &resolved).await {
                Ok(response) => {
                    self.usage.lock().await.total_requests += 1;
                    debug!(
                        provider = %response.provider,
                        tokens = response.tokens_used,
                        latency_ms = response.latency_ms,
                        "Generation succeeded"
                    );
                    return response;
                }
                Err(e) => {
                    warn!(provider = provider.name(), "Generation failed: {}", e);
                    last_error = format!("{}: {}", provider.name(), e);
                }
            }
        }

        {
            let mut usage = self.usage.lock().await;
            usage.total_requests += 1;
            usage.failed_requests += 1;
        }
        GenerationResponse::failed(last_error)
    }

    async fn usage(&self) -> UsageStats {
        self.usage.lock().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Completion;

    struct Scripted {
        name: &'static str,
        reply: Option<&'static str>,
        delay: Duration,
    }

    #[async_trait]
    impl LLMProvider for Scripted {
        fn name(&self) -> &str {
            self.name
        }

        fn model(&self) -> &str {
            "test-model"
        }

        fn is_local(&self) -> bool {
            true
        }

        async fn check_health(&self) -> bool {
            self.reply.is_some()
        }

        async fn complete(&self, _request: &CompletionRequest) -> crate::llm::Result<Completion> {
            tokio::time::sleep(self.delay).await;
            match self.reply {
                Some(text) => Ok(Completion {
                    content: text.to_string(),
                    tokens_used: 7,
                }),
                None => Err(LLMError::ProviderUnavailable("down".to_string())),
            }
        }
    }

    fn scripted(name: &'static str, reply: Option<&'static str>) -> Box<dyn LLMProvider> {
        Box::new(Scripted {
            name,
            reply,
            delay: Duration::ZERO,
        })
    }

    #[tokio::test]
    async fn test_primary_success() {
        let gateway = LLMGateway::new(scripted("a", Some("hello")), None, &LLMConfig::default());
        let response = gateway.generate(GenerationRequest::new("hi")).await;

        assert!(response.success);
        assert_eq!(response.content, "hello");
        assert_eq!(response.provider, "a");

        let usage = gateway.usage().await;
        assert_eq!(usage.total_requests, 1);
        assert_eq!(usage.total_tokens, 7);
        assert_eq!(usage.session_tokens, 7);
    }

    #[tokio::test]
    async fn test_falls_back_to_secondary() {
        let gateway = LLMGateway::new(
            scripted("a", None),
            Some(scripted("b", Some("from b"))),
            &LLMConfig::default(),
        );
        let response = gateway.generate(GenerationRequest::new("hi")).await;

        assert!(response.success);
        assert_eq!(response.provider, "b");

        let usage = gateway.usage().await;
        assert_eq!(usage.by_provider["a"].failures, 1);
        assert_eq!(usage.by_provider["b"].requests, 1);
        assert_eq!(usage.failed_requests, 0);
    }

    #[tokio::test]
    async fn test_all_fail_returns_failed_response() {
        let gateway = LLMGateway::new(
            scripted("a", None),
            Some(scripted("b", None)),
            &LLMConfig::default(),
        );
        let response = gateway.generate(GenerationRequest::new("hi")).await;

        assert!(!response.success);
        assert!(response.error.unwrap().starts_with("b:"));
        assert_eq!(gateway.usage().await.failed_requests, 1);
    }

    #[tokio::test]
    async fn test_timeout_is_a_failure() {
        let config = LLMConfig {
            timeout_secs: 1,
            ..LLMConfig::default()
        };
        let slow = Box::new(Scripted {
            name: "slow",
            reply: Some("late"),
            delay: Duration::from_secs(5),
        });
        let gateway = LLMGateway::new(slow, None, &config);

        let response = gateway.generate(GenerationRequest::new("hi")).await;
        assert!(!response.success);
        assert!(response.error.unwrap().contains("Timeout"));
    }

    #[tokio::test]
    async fn test_reset_session() {
        let gateway = LLMGateway::new(scripted("a", Some("x")), None, &LLMConfig::default());
        gateway.generate(GenerationRequest::new("hi")).await;
        gateway.reset_session().await;

        let usage = gateway.usage().await;
        assert_eq!(usage.session_tokens, 0);
        assert_eq!(usage.total_tokens, 7);
    }

    #[test]
    fn test_from_config_rejects_unknown() {
        let config = LLMConfig {
            provider: "nope".to_string(),
            ..LLMConfig::default()
        };
        assert!(LLMGateway::from_config(&config).is_err());
    }

    #[test]
    fn test_from_config_builds_anthropic() {
        let config = LLMConfig {
            provider: "anthropic".to_string(),
            fallback_provider: Some("ollama".to_string()),
            ..LLMConfig::default()
        };
        let gateway = LLMGateway::from_config(&config).unwrap();

        assert_eq!(gateway.primary.name(), "anthropic");
        assert_eq!(gateway.primary.model(), config.anthropic.model);
        assert_eq!(gateway.fallback.as_ref().map(|f| f.name()), Some("ollama"));
    }

    #[tokio::test]
    async fn test_health_lists_providers() {
        let gateway = LLMGateway::new(
            scripted("a", Some("x")),
            Some(scripted("b", None)),
            &LLMConfig::default(),
        );
        let health = gateway.health().await;
        assert_eq!(
            health,
            vec![("a".to_string(), true), ("b".to_string(), false)]
        );
    }
}
