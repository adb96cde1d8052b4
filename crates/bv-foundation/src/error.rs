//! Error types for the workspace.
//!
//! This module provides the foundation error type that can be extended
//! by domain-specific error types in other crates.

use thiserror::Error;

/// Foundation error type.
///
/// Covers the faults the foundation utilities themselves produce; the
/// validator crate wraps this in its own error type for domain faults.
#[derive(Error, Debug)]
pub enum FoundationError {
    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias using FoundationError
pub type Result<T> = std::result::Result<T, FoundationError>;
