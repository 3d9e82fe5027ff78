//! Praxis Engine Library
//!
//! Core of the praxis task agent, shared by the binary and the
//! integration tests.

/// Built-in actions and the action registry
pub mod actions;

/// Command-line interface
pub mod cli;

/// Configuration management
pub mod config;

/// Agent lifecycle and component wiring
pub mod daemon;

/// SQLite persistence
pub mod db;

/// Task lifecycle event bus
pub mod events;

/// Command handlers
pub mod handlers;

/// Text generation providers
pub mod llm;

/// Tiered memory store
pub mod memory;

/// Task orchestration
pub mod orchestrator;

/// Candidate scoring and selection
pub mod strategy;

/// Structured logging
pub mod telemetry;
