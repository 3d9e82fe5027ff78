// Praxis autonomous task agent
// Main entry point for the praxis binary

use clap::Parser;
use praxis_engine::cli::{Cli, Command, ConfigAction, MemoryAction};
use praxis_engine::config::Config;
use praxis_engine::handlers::{
    handle_actions, handle_config_path, handle_config_show, handle_history, handle_memory_context,
    handle_memory_search, handle_replay, handle_run, handle_start, handle_status, OutputFormat,
};
use praxis_engine::telemetry::init_telemetry_with_level;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => Config::default_config_path()?,
    };
    let mut config = Config::load_or_create_at(&config_path)?;

    if let Some(level) = &cli.log {
        config.core.log_level = level.clone();
    }
    init_telemetry_with_level(&config.core.log_level);

    tracing::debug!(
        "Praxis v{} ({} - {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_COMMIT_HASH"),
        env!("BUILD_TIMESTAMP")
    );

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    match cli.command {
        Command::Run { goal, context } => {
            tracing::info!("Executing goal: {}", goal);
            handle_run(goal, context, &config, format).await
        }
        Command::Start => handle_start(&config, format).await,
        Command::Status => handle_status(&config, format).await,
        Command::Memory { action } => match action {
            MemoryAction::Search { query, tier, limit } => {
                handle_memory_search(query, tier, limit, &config, format).await
            }
            MemoryAction::Context { goal, limit } => {
                handle_memory_context(goal, limit, &config, format).await
            }
        },
        Command::History { limit } => handle_history(limit, &config, format).await,
        Command::Replay { task_id } => handle_replay(task_id, &config, format).await,
        Command::Actions => handle_actions(&config, format),
        Command::Config { action } => match action {
            ConfigAction::Show => handle_config_show(&config, format),
            ConfigAction::Path => handle_config_path(&config_path, format),
        },
    }
}
