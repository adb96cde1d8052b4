//! Prose-free FHIR bundle validation.
//!
//! This crate validates a JSON-encoded FHIR Bundle against a schema
//! catalog and a declarative rule set, and emits a deterministic list of
//! structured errors:
//!
//! - Structural validation of FHIR primitives and containers (id, code,
//!   uri/url/canonical, Reference, Extension, value[x] exclusivity,
//!   cardinality, enum bindings)
//! - Declarative rule evaluation (required, fixed-value, allowed-values,
//!   regex, reference, array-length, custom expressions, question-answer)
//! - Path navigation from FHIR dotted paths to RFC 6901 JSON Pointers over
//!   the raw JSON tree
//!
//! Every error carries a stable `error_code` and a structured `details`
//! bag; no user-facing sentences are produced. Rendering belongs to a
//! separate layer.
//!
//! # Example
//!
//! ```rust,ignore
//! use bv_validator::{BundleValidator, FhirVersion, ValidationRequest};
//!
//! let validator = BundleValidator::new()?;
//! let request = ValidationRequest::new(
//!     r#"{"resourceType": "Bundle", "type": "collection", "entry": []}"#,
//!     FhirVersion::R4,
//! );
//! let response = validator.validate(&request);
//! for error in &response.errors {
//!     println!("{} {} {:?}", error.severity, error.error_code, error.json_pointer);
//! }
//! ```

pub mod builder;
pub mod engine;
pub mod error;
pub mod navigator;
pub mod pipeline;
pub mod predicate;
pub mod questionnaire;
pub mod rules;
pub mod schema;
pub mod severity;
pub mod types;
pub mod validator;
pub mod valueset;

pub use builder::ErrorBuilder;
pub use error::{Result as ValidatorResult, ValidatorError};
pub use pipeline::{BundleValidator, ValidatorConfig};
pub use rules::{InstanceScope, Rule, RuleSet, RuleType};
pub use schema::{SchemaCatalog, SchemaNode, StaticSchemaCatalog};
pub use types::{
    ErrorSource, FhirVersion, Metadata, Severity, Summary, ValidationError, ValidationMode,
    ValidationRequest, ValidationResponse,
};
pub use valueset::{BindingStrength, EnumIndex, StaticEnumIndex};
