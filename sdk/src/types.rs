//! Action input/output types

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Parameters passed to an action, as decoded from a plan step
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionParams(pub Map<String, Value>);

impl ActionParams {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Add a parameter
    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.0.insert(key.into(), value);
        self
    }

    /// Get a required string parameter
    pub fn str(&self, key: &str) -> Result<&str, ToolError> {
        self.0
            .get(key)
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::MissingParameter(key.to_string()))
    }

    /// Get an optional string parameter
    pub fn str_opt(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.as_str())
    }

    /// Get an optional unsigned parameter, accepting numeric strings
    pub fn u64_opt(&self, key: &str) -> Option<u64> {
        match self.0.get(key)? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Get an optional bool parameter, accepting "true"/"false" strings
    pub fn bool_opt(&self, key: &str) -> Option<bool> {
        match self.0.get(key)? {
            Value::Bool(b) => Some(*b),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Get an optional list of strings
    pub fn str_list(&self, key: &str) -> Result<Vec<String>, ToolError> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| {
                    v.as_str()
                        .map(String::from)
                        .ok_or_else(|| ToolError::InvalidParameter(key.to_string()))
                })
                .collect(),
            Some(_) => Err(ToolError::InvalidParameter(key.to_string())),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Map<String, Value>> for ActionParams {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Outcome of a single action invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    #[serde(default)]
    pub result: Value,
    #[serde(default)]
    pub error: Option<String>,
    /// Wall-clock seconds spent in the action
    #[serde(default)]
    pub execution_time: f64,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl ActionResult {
    /// Create a successful result
    pub fn ok(result: Value) -> Self {
        Self {
            success: true,
            result,
            error: None,
            execution_time: 0.0,
            metadata: Map::new(),
        }
    }

    /// Create a failed result
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            result: Value::Null,
            error: Some(error.into()),
            execution_time: 0.0,
            metadata: Map::new(),
        }
    }

    pub fn with_execution_time(mut self, seconds: f64) -> Self {
        self.execution_time = seconds;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Error text, or a generic message when the action left none
    pub fn error_text(&self) -> &str {
        self.error.as_deref().unwrap_or("unknown error")
    }
}

/// Description of a registered action, shown to the planner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionSpec {
    pub name: String,
    pub description: String,
    pub parameters: Vec<String>,
}

/// Action input validation errors
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Missing parameter: {0}")]
    MissingParameter(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

impl From<ToolError> for crate::errors::EngineError {
    fn from(e: ToolError) -> Self {
        crate::errors::EngineError::Validation(e.to_string())
    }
}
