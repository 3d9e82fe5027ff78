use proptest::prelude::*;
use sdk::errors::{EngineError, PraxisErrorExt};
use sdk::{ActionParams, ActionResult, ToolError};
use serde_json::json;

proptest! {
    #[test]
    fn test_error_user_hint_completeness(raw in "\\PC*") {
        let detail = format!("<{}>", raw);
        let errs = vec![
            EngineError::Config(detail.clone()),
            EngineError::Database(detail.clone()),
            EngineError::Transport(detail.clone()),
            EngineError::Parse(detail.clone()),
            EngineError::Validation(detail.clone()),
            EngineError::Embedding(detail.clone()),
            EngineError::TaskNotFound(detail.clone()),
            EngineError::ActionFailed(detail.clone()),
            EngineError::ActionNotFound(detail.clone()),
            EngineError::DuplicateAction(detail.clone()),
            EngineError::PermissionDenied(detail.clone()),
            EngineError::PathDenied(std::path::PathBuf::from(&detail)),
            EngineError::PathOutsideWorkspace(std::path::PathBuf::from(&detail)),
        ];

        for err in errs {
            let hint = err.user_hint();
            prop_assert!(!hint.is_empty());
            // hints are static text, never the raw detail
            prop_assert!(!hint.contains(detail.as_str()));
        }
    }

    #[test]
    fn test_fallback_classes_are_recoverable(detail in ".*") {
        prop_assert!(EngineError::Transport(detail.clone()).is_recoverable());
        prop_assert!(EngineError::Parse(detail.clone()).is_recoverable());
        prop_assert!(EngineError::Validation(detail.clone()).is_recoverable());
        prop_assert!(!EngineError::Config(detail).is_recoverable());
    }

    #[test]
    fn test_numeric_params_accept_strings(n in any::<u64>()) {
        let params = ActionParams::new()
            .with("as_number", json!(n))
            .with("as_string", json!(n.to_string()));

        prop_assert_eq!(params.u64_opt("as_number"), Some(n));
        prop_assert_eq!(params.u64_opt("as_string"), Some(n));
    }

    #[test]
    fn test_failed_result_keeps_error_text(error in ".+") {
        let result = ActionResult::failed(error.clone());
        prop_assert!(!result.success);
        prop_assert_eq!(result.error_text(), error.as_str());
    }

    #[test]
    fn test_tool_errors_become_validation(key in "[a-z_]{1,16}") {
        let missing: EngineError = ToolError::MissingParameter(key.clone()).into();
        prop_assert!(matches!(missing, EngineError::Validation(ref msg) if msg.contains(key.as_str())));
        prop_assert!(missing.is_recoverable());
    }
}
