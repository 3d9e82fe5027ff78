//! Praxis SDK
//!
//! Shared traits and types used by the engine and by anything that
//! contributes actions to it.

/// Action trait
pub mod action;

/// Error types and handling
pub mod errors;

/// Action input/output types
pub mod types;

// Re-export commonly used types
pub use action::Action;
pub use errors::{EngineError, PraxisErrorExt};
pub use types::{ActionParams, ActionResult, ActionSpec, ToolError};
