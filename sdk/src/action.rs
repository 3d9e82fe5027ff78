//! Action trait
//!
//! An action is a single typed capability the agent can invoke by name,
//! such as reading a file or searching the web. The engine keeps actions in
//! a registry keyed by [`Action::name`] and resolves plan steps against it.

use async_trait::async_trait;

use crate::errors::EngineError;
use crate::types::{ActionParams, ActionSpec};

#[async_trait]
pub trait Action: Send + Sync {
    /// Unique name used by plans to refer to this action
    fn name(&self) -> &str;

    /// One-line description shown to the planner
    fn description(&self) -> &str;

    /// Parameter names the action understands
    fn parameters(&self) -> &[&'static str];

    /// Run the action
    ///
    /// On success returns the JSON payload that is merged into the task
    /// context. Failures are reported as errors and converted into a failed
    /// `ActionResult` by the registry.
    async fn execute(&self, params: &ActionParams) -> Result<serde_json::Value, EngineError>;

    /// Planner-facing description of this action
    fn spec(&self) -> ActionSpec {
        ActionSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters().iter().map(|p| p.to_string()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    struct Echo;

    #[async_trait]
    impl Action for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echo the text parameter"
        }

        fn parameters(&self) -> &[&'static str] {
            &["text"]
        }

        async fn execute(&self, params: &ActionParams) -> Result<Value, EngineError> {
            let text = params
                .str("text")
                .map_err(|e| EngineError::ActionFailed(e.to_string()))?;
            Ok(json!({ "text": text }))
        }
    }

    #[test]
    fn test_spec_from_action() {
        let spec = Echo.spec();
        assert_eq!(spec.name, "echo");
        assert_eq!(spec.parameters, vec!["text".to_string()]);
    }

    #[tokio::test]
    async fn test_execute_missing_param() {
        let err = Echo.execute(&ActionParams::new()).await.unwrap_err();
        assert!(err.to_string().contains("text"));
    }
}
