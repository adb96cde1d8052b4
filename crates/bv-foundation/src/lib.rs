//! Foundation crate providing common utilities and types shared across the workspace.
//!
//! This crate provides foundational functionality including:
//! - Error handling (`error` module)
//! - JSON helpers (`json` module)
//! - RFC 6901 JSON Pointer utilities (`pointer` module)

pub mod error;
pub mod json;
pub mod pointer;

// Re-export commonly used types
pub use error::{FoundationError, Result};
