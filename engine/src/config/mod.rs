//! Configuration management
//!
//! This module handles loading, validation, and management of the Praxis
//! configuration. Configuration is stored in TOML format at
//! ~/.praxis/config.toml and is created with defaults on first run.
//!
//! # Configuration Sections
//!
//! - **core**: Data directory, workspace, log level
//! - **llm**: Primary and fallback generation providers, timeout, sampling
//! - **memory**: Tier ceilings, retention and embedding settings
//! - **orchestrator**: Action timeout and planning context size
//! - **strategy**: Success-probability priors for the heuristic fallback
//! - **security**: Capability switches for built-in actions
//!
//! Every section and field has a default, so a partial file is valid.
//!
//! # Examples
//!
//! ```no_run
//! use praxis_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_or_create()?;
//! println!("Provider: {}", config.llm.provider);
//! # Ok(())
//! # }
//! ```

use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub core: CoreConfig,

    #[serde(default)]
    pub llm: LLMConfig,

    #[serde(default)]
    pub memory: MemoryConfig,

    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    #[serde(default)]
    pub strategy: StrategyConfig,

    #[serde(default)]
    pub security: SecurityConfig,
}

/// Core engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Data directory holding the database (supports ~ expansion)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Directory file actions are confined to (supports ~ expansion)
    #[serde(default = "default_workspace")]
    pub workspace: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Generation provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMConfig {
    /// Primary provider (ollama, openai, anthropic)
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Provider tried when the primary fails
    #[serde(default)]
    pub fallback_provider: Option<String>,

    /// Per-request timeout in seconds
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default)]
    pub ollama: OllamaConfig,

    #[serde(default)]
    pub openai: OpenAIConfig,

    #[serde(default)]
    pub anthropic: AnthropicConfig,
}

/// Ollama provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    #[serde(default = "default_ollama_base_url")]
    pub base_url: String,

    #[serde(default = "default_ollama_model")]
    pub model: String,
}

/// OpenAI-compatible provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIConfig {
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,

    #[serde(default = "default_openai_model")]
    pub model: String,

    /// Name of the environment variable holding the API key
    #[serde(default = "default_openai_api_key_env")]
    pub api_key_env: String,
}

/// Anthropic messages API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicConfig {
    #[serde(default = "default_anthropic_base_url")]
    pub base_url: String,

    #[serde(default = "default_anthropic_model")]
    pub model: String,

    /// Name of the environment variable holding the API key
    #[serde(default = "default_anthropic_api_key_env")]
    pub api_key_env: String,
}

/// Memory configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Short-term tier ceiling; older items are evicted past it
    #[serde(default = "default_max_short_term")]
    pub max_short_term_memories: usize,

    /// Short-term memories older than this are purged at startup
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Embedding backend (hashing, ollama)
    #[serde(default = "default_embedding")]
    pub embedding: String,

    /// Vector width for the hashing embedder
    #[serde(default = "default_embedding_dim")]
    pub embedding_dim: usize,

    /// Model used by the ollama embedder
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
}

/// Orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Per-action timeout in seconds
    #[serde(default = "default_action_timeout")]
    pub action_timeout_secs: u64,

    /// Number of memory entries used to ground plans and decisions
    #[serde(default = "default_context_limit")]
    pub context_limit: usize,
}

/// Decision strategy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Prior success probability per action name
    #[serde(default = "default_action_priors")]
    pub action_priors: BTreeMap<String, f64>,

    /// Prior used for actions missing from `action_priors`
    #[serde(default = "default_unknown_prior")]
    pub default_prior: f64,
}

/// Capability switches for built-in actions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    #[serde(default = "default_true")]
    pub allow_file_operations: bool,

    #[serde(default = "default_true")]
    pub allow_network_access: bool,

    #[serde(default)]
    pub allow_code_execution: bool,

    /// Extra paths file actions may never touch
    #[serde(default)]
    pub restricted_paths: Vec<PathBuf>,
}

// Default value functions
fn default_data_dir() -> PathBuf {
    PathBuf::from("~/.praxis")
}

fn default_workspace() -> PathBuf {
    PathBuf::from("~/.praxis/workspace")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_provider() -> String {
    "ollama".to_string()
}

fn default_llm_timeout() -> u64 {
    60
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_temperature() -> f32 {
    0.7
}

fn default_ollama_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_ollama_model() -> String {
    "llama3.1:8b".to_string()
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_openai_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_openai_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_anthropic_base_url() -> String {
    "https://api.anthropic.com/v1".to_string()
}

fn default_anthropic_model() -> String {
    "claude-3-5-sonnet-latest".to_string()
}

fn default_anthropic_api_key_env() -> String {
    "ANTHROPIC_API_KEY".to_string()
}

fn default_max_short_term() -> usize {
    100
}

fn default_retention_days() -> u32 {
    30
}

fn default_embedding() -> String {
    "hashing".to_string()
}

fn default_embedding_dim() -> usize {
    384
}

fn default_embedding_model() -> String {
    "nomic-embed-text".to_string()
}

fn default_action_timeout() -> u64 {
    60
}

fn default_context_limit() -> usize {
    3
}

fn default_unknown_prior() -> f64 {
    0.5
}

fn default_action_priors() -> BTreeMap<String, f64> {
    [
        ("search_web", 0.8),
        ("read_file", 0.9),
        ("write_file", 0.7),
        ("list_directory", 0.95),
        ("fetch_url", 0.75),
        ("execute_python", 0.6),
        ("execute_command", 0.4),
    ]
    .into_iter()
    .map(|(name, p)| (name.to_string(), p))
    .collect()
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            workspace: default_workspace(),
            log_level: default_log_level(),
        }
    }
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            fallback_provider: None,
            timeout_secs: default_llm_timeout(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            ollama: OllamaConfig::default(),
            openai: OpenAIConfig::default(),
            anthropic: AnthropicConfig::default(),
        }
    }
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: default_ollama_base_url(),
            model: default_ollama_model(),
        }
    }
}

impl Default for OpenAIConfig {
    fn default() -> Self {
        Self {
            base_url: default_openai_base_url(),
            model: default_openai_model(),
            api_key_env: default_openai_api_key_env(),
        }
    }
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            base_url: default_anthropic_base_url(),
            model: default_anthropic_model(),
            api_key_env: default_anthropic_api_key_env(),
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_short_term_memories: default_max_short_term(),
            retention_days: default_retention_days(),
            embedding: default_embedding(),
            embedding_dim: default_embedding_dim(),
            embedding_model: default_embedding_model(),
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            action_timeout_secs: default_action_timeout(),
            context_limit: default_context_limit(),
        }
    }
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            action_priors: default_action_priors(),
            default_prior: default_unknown_prior(),
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            allow_file_operations: true,
            allow_network_access: true,
            allow_code_execution: false,
            restricted_paths: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from the default location (~/.praxis/config.toml)
    ///
    /// If the file doesn't exist a default configuration is written there.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if
    /// validation fails.
    pub fn load_or_create() -> Result<Self, EngineError> {
        let config_path = Self::default_config_path()?;
        Self::load_or_create_at(&config_path)
    }

    /// Like [`Config::load_or_create`] but for an explicit path
    pub fn load_or_create_at(path: &Path) -> Result<Self, EngineError> {
        if !path.exists() {
            Self::write_default(path)?;
        }
        Self::load_from_path(path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, EngineError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Failed to read config file: {}", e)))?;

        let mut config: Config = toml::from_str(&contents)
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate_and_process()?;

        Ok(config)
    }

    /// Write the default configuration to `path` with `~` left unexpanded
    pub fn write_default(path: &Path) -> Result<(), EngineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                EngineError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let toml_string = toml::to_string_pretty(&Self::default())
            .map_err(|e| EngineError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| EngineError::Config(format!("Failed to write config file: {}", e)))
    }

    /// Default configuration file path (~/.praxis/config.toml)
    pub fn default_config_path() -> Result<PathBuf, EngineError> {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(".praxis").join("config.toml"))
    }

    /// Path of the SQLite database inside the data directory
    pub fn database_path(&self) -> PathBuf {
        self.core.data_dir.join("praxis.db")
    }

    /// Validate ranges and names, expand paths and create directories
    pub fn validate_and_process(&mut self) -> Result<(), EngineError> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        let valid_providers = ["ollama", "openai", "anthropic"];
        let providers =
            std::iter::once(&self.llm.provider).chain(self.llm.fallback_provider.iter());
        for provider in providers {
            if !valid_providers.contains(&provider.as_str()) {
                return Err(EngineError::Config(format!(
                    "Invalid provider '{}'. Must be one of: {}",
                    provider,
                    valid_providers.join(", ")
                )));
            }
        }

        if self.llm.timeout_secs == 0 || self.orchestrator.action_timeout_secs == 0 {
            return Err(EngineError::Config(
                "timeouts must be at least 1 second".to_string(),
            ));
        }

        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(EngineError::Config(
                "temperature must be between 0.0 and 2.0".to_string(),
            ));
        }

        if self.memory.max_short_term_memories == 0 {
            return Err(EngineError::Config(
                "max_short_term_memories must be positive".to_string(),
            ));
        }

        let valid_embedders = ["hashing", "ollama"];
        if !valid_embedders.contains(&self.memory.embedding.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid embedding backend '{}'. Must be one of: {}",
                self.memory.embedding,
                valid_embedders.join(", ")
            )));
        }
        if self.memory.embedding_dim == 0 {
            return Err(EngineError::Config(
                "embedding_dim must be positive".to_string(),
            ));
        }

        let priors = self
            .strategy
            .action_priors
            .iter()
            .map(|(name, p)| (name.as_str(), *p))
            .chain(std::iter::once(("default_prior", self.strategy.default_prior)));
        for (name, p) in priors {
            if !(0.0..=1.0).contains(&p) {
                return Err(EngineError::Config(format!(
                    "prior for '{}' must be between 0.0 and 1.0",
                    name
                )));
            }
        }

        self.core.data_dir = expand_path(&self.core.data_dir)?;
        if !self.core.data_dir.exists() {
            fs::create_dir_all(&self.core.data_dir).map_err(|e| {
                EngineError::Config(format!("Failed to create data directory: {}", e))
            })?;
        }

        self.core.workspace = expand_path(&self.core.workspace)?;
        self.core.workspace = canonicalize_or_create(&self.core.workspace)?;
        if !self.core.workspace.is_dir() {
            return Err(EngineError::Config(format!(
                "Workspace path is not a directory: {:?}",
                self.core.workspace
            )));
        }

        self.security.restricted_paths = self
            .security
            .restricted_paths
            .iter()
            .map(|p| expand_path(p))
            .collect::<Result<_, _>>()?;

        Ok(())
    }
}

/// Expand ~ in path to user's home directory
pub(crate) fn expand_path(path: &Path) -> Result<PathBuf, EngineError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| EngineError::Config("Invalid UTF-8 in path".to_string()))?;

    if let Some(rest) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(rest))
    } else if path_str == "~" {
        dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))
    } else {
        Ok(path.to_path_buf())
    }
}

fn canonicalize_or_create(path: &Path) -> Result<PathBuf, EngineError> {
    if !path.exists() {
        fs::create_dir_all(path).map_err(|e| {
            EngineError::Config(format!("Failed to create directory {:?}: {}", path, e))
        })?;
    }

    path.canonicalize()
        .map_err(|e| EngineError::PathCanonicalization(path.to_path_buf(), e.to_string()))
}
