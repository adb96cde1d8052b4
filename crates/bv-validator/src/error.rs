//! Validation error types.
//!
//! This module provides the unified error type for the validator crate,
//! extending FoundationError with domain-specific validation errors.
//!
//! These are engine-internal faults; the ingress variants are converted by
//! the pipeline into single-error responses and never escape `validate`.

use bv_foundation::FoundationError;
use thiserror::Error;

/// Errors that can occur during bundle validation operations.
#[derive(Error, Debug)]
pub enum ValidatorError {
    /// JSON syntax error with location
    #[error("JSON syntax error: {message} at line {line}, column {column}")]
    JsonSyntax {
        message: String,
        line: usize,
        column: usize,
        /// Byte offset into the input, derived from line and column.
        offset: usize,
    },

    /// The decoded document is not a FHIR Bundle
    #[error("document is not a Bundle: found resourceType {found:?}")]
    NotABundle { found: Option<String> },

    /// The decoded document nests deeper than the configured limit
    #[error("nesting depth {actual} exceeds limit {max}")]
    DepthExceeded { max: usize, actual: usize },

    /// The rule set failed ingress validation
    #[error("invalid rule set: {reason}")]
    InvalidRuleSet {
        reason: String,
        rule_id: Option<String>,
    },

    /// Foundation error (covers serialization, etc.)
    #[error(transparent)]
    Foundation(#[from] FoundationError),
}

impl From<serde_json::Error> for ValidatorError {
    fn from(err: serde_json::Error) -> Self {
        ValidatorError::Foundation(FoundationError::Serialization(err))
    }
}

/// Result type for validator operations
pub type Result<T> = std::result::Result<T, ValidatorError>;
