//! Command-line interface
//!
//! Defined with clap's derive API. Global flags apply to every command.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Praxis autonomous task agent
///
/// Plans a goal into steps over a fixed set of actions, picks and runs each
/// step, and learns from past episodes through a tiered memory store.
#[derive(Parser, Debug)]
#[command(name = "praxis")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Execute a goal and wait for the result
    Run {
        /// The goal to achieve
        goal: String,

        /// Extra context as a JSON object
        #[arg(long, value_name = "JSON")]
        context: Option<String>,
    },

    /// Run the agent, reading one goal per line from stdin
    Start,

    /// Show memory statistics and provider health
    Status,

    /// Query the memory store
    Memory {
        #[command(subcommand)]
        action: MemoryAction,
    },

    /// Show recent task episodes
    History {
        /// Number of episodes to show
        #[arg(short, long, default_value = "10")]
        limit: i64,
    },

    /// Show every step recorded for one episode
    Replay {
        /// Task ID
        task_id: String,
    },

    /// List registered actions
    Actions,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum MemoryAction {
    /// Semantic search across memories
    Search {
        query: String,

        /// Restrict to one tier (short_term, long_term, episodic)
        #[arg(long, value_name = "TIER")]
        tier: Option<String>,

        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Show what would be recalled for a goal
    Context {
        goal: String,

        #[arg(short, long, default_value = "5")]
        limit: usize,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show the effective configuration
    Show,

    /// Print the configuration file path
    Path,
}
