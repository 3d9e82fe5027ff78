//! Text generation layer
//!
//! Two levels of abstraction live here:
//!
//! - [`LLMProvider`]: one concrete HTTP backend (Ollama, OpenAI-compatible,
//!   Anthropic).
//!   Providers return typed errors.
//! - [`Generator`]: what the orchestrator and decision strategy call. A
//!   generator never fails; transport problems come back as a response with
//!   `success = false` and an error string, and the caller falls back.
//!
//! [`gateway::LLMGateway`] adapts a primary and optional fallback provider
//! into a `Generator` with timeouts and token accounting.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod anthropic;
pub mod gateway;
pub mod ollama;
pub mod openai;

pub use gateway::{LLMGateway, ProviderUsage, UsageStats};

/// Result type for provider operations
pub type Result<T> = std::result::Result<T, LLMError>;

/// Errors that can occur during provider calls
#[derive(Debug, thiserror::Error)]
pub enum LLMError {
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Timeout")]
    Timeout,

    #[error("Parse error: {0}")]
    ParseError(String),
}

impl From<reqwest::Error> for LLMError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            LLMError::Timeout
        } else if e.is_connect() {
            LLMError::ProviderUnavailable(e.to_string())
        } else if e.is_decode() {
            LLMError::ParseError(e.to_string())
        } else {
            LLMError::NetworkError(e.to_string())
        }
    }
}

/// Fully resolved request handed to a provider
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub prompt: String,
    pub system_prompt: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Raw provider output
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub content: String,
    pub tokens_used: u64,
}

/// Common interface for all providers
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Provider name used in logs and usage stats
    fn name(&self) -> &str;

    fn model(&self) -> &str;

    /// Whether the provider runs on this machine
    fn is_local(&self) -> bool;

    /// Cheap reachability check
    async fn check_health(&self) -> bool;

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion>;
}

/// Request accepted by a [`Generator`]; unset options use configured defaults
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub system_prompt: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    pub fn with_system(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// Outcome of a generation call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationResponse {
    pub content: String,
    pub success: bool,
    pub error: Option<String>,
    pub provider: String,
    pub model: String,
    pub tokens_used: u64,
    pub latency_ms: u64,
}

impl GenerationResponse {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            success: true,
            ..Self::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

/// Generation capability used by planning, decisions and recovery
#[async_trait]
pub trait Generator: Send + Sync {
    /// Generate text; failures are reported in the response, never raised
    async fn generate(&self, request: GenerationRequest) -> GenerationResponse;

    /// Accumulated token and latency counters
    async fn usage(&self) -> UsageStats {
        UsageStats::default()
    }
}

/// Slice from the first `open` to the last `close`, inclusive
///
/// Models often wrap JSON in prose or code fences; this keeps only the
/// outermost structure so it can be decoded strictly.
pub fn extract_json(content: &str, open: char, close: char) -> Option<&str> {
    let start = content.find(open)?;
    let end = content.rfind(close)?;
    (end > start).then(|| &content[start..=end])
}
