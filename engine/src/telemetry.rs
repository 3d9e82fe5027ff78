//! Structured logging setup
//!
//! `RUST_LOG` wins over the configured level. Debug builds log pretty
//! output to the terminal; release builds emit JSON lines with the current
//! span, so every line from a task carries its `task_id`.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter directive for `level` applied to the engine and its dependencies
pub fn filter_directive(level: &str) -> String {
    format!("{level},praxis_engine={level},sqlx=warn,hyper=warn")
}

/// Install the global subscriber. Later calls are no-ops.
pub fn init_telemetry_with_level(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(log_level)));

    #[cfg(debug_assertions)]
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().pretty().with_target(false).with_writer(std::io::stderr))
            .try_init()
            .ok();
    }

    #[cfg(not(debug_assertions))]
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_writer(std::io::stderr),
            )
            .try_init()
            .ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_directive_parses() {
        let directive = filter_directive("debug");
        assert!(directive.starts_with("debug,praxis_engine=debug"));
        assert!(EnvFilter::try_new(directive).is_ok());
    }
}
