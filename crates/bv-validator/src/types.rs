//! Core types for bundle validation.
//!
//! This module provides the fundamental records exchanged across the
//! validation boundary:
//!
//! - [`ValidationRequest`] / [`ValidationResponse`] - the engine interface
//! - [`ValidationError`] - a single structured, prose-free finding
//! - [`Severity`] / [`ErrorSource`] - closed tag sets, stable string forms
//! - [`Summary`] / [`Metadata`] - response envelope
//!
//! Errors are value objects: the pipeline constructs them, deduplicates
//! them, and releases them with the response. `details` carries all
//! actionable context as short keys mapped to JSON-shaped values; no
//! user-facing sentences are produced anywhere in the engine.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Details bag attached to every validation error.
pub type Details = Map<String, Value>;

/// Severity level of a validation error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Critical error that prevents bundle acceptance
    Error,
    /// Warning that may cause issues
    Warning,
    /// Informational message
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
            Severity::Info => write!(f, "info"),
        }
    }
}

/// Origin of a validation error.
///
/// The string forms are part of the stable interface; internally the set
/// is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorSource {
    /// Schema-driven structural walk
    #[serde(rename = "STRUCTURE")]
    Structure,
    /// Declarative business rule
    Business,
    /// Reference resolution rule
    Reference,
    /// Code-master (enumerated value) rule
    CodeMaster,
    /// Heuristic advisory rule
    Lint,
    /// Specification-hint advisory rule
    SpecHint,
}

impl fmt::Display for ErrorSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorSource::Structure => write!(f, "STRUCTURE"),
            ErrorSource::Business => write!(f, "Business"),
            ErrorSource::Reference => write!(f, "Reference"),
            ErrorSource::CodeMaster => write!(f, "CodeMaster"),
            ErrorSource::Lint => write!(f, "Lint"),
            ErrorSource::SpecHint => write!(f, "SpecHint"),
        }
    }
}

/// Supported FHIR versions. Treated as opaque identifiers by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum FhirVersion {
    #[default]
    R4,
    R5,
}

impl fmt::Display for FhirVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FhirVersion::R4 => write!(f, "R4"),
            FhirVersion::R5 => write!(f, "R5"),
        }
    }
}

/// Requested validation depth. Accepted for interface stability; the core
/// behaves identically in both modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ValidationMode {
    #[default]
    Standard,
    Full,
}

/// A single validation finding.
///
/// `error_code`, `source`, `severity` and `details` are always present;
/// the remaining fields appear when the finding is anchored to a resource,
/// a path, or a rule. `message` is empty for all engine-produced errors;
/// only JSON-parse diagnostics propagated from the decoder may populate it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationError {
    pub source: ErrorSource,
    pub severity: Severity,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json_pointer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_index: Option<usize>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    pub details: Details,
}

impl ValidationError {
    /// Composite key used by the pipeline to collapse duplicates.
    pub fn dedup_key(&self) -> (ErrorSource, &str, Option<&str>, Option<&str>) {
        (
            self.source,
            self.error_code.as_str(),
            self.json_pointer.as_deref(),
            self.path.as_deref(),
        )
    }
}

/// Validation request as received from the hosting layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationRequest {
    pub bundle_json: String,
    #[serde(default)]
    pub rules_json: Option<String>,
    pub fhir_version: FhirVersion,
    #[serde(default)]
    pub validation_mode: ValidationMode,
    /// Opaque to the core.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
}

impl ValidationRequest {
    pub fn new(bundle_json: impl Into<String>, fhir_version: FhirVersion) -> Self {
        Self {
            bundle_json: bundle_json.into(),
            rules_json: None,
            fhir_version,
            validation_mode: ValidationMode::default(),
            project_id: None,
        }
    }

    pub fn with_rules(mut self, rules_json: impl Into<String>) -> Self {
        self.rules_json = Some(rules_json.into());
        self
    }
}

/// Per-severity counts over the final error list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Summary {
    pub error_count: usize,
    pub warning_count: usize,
    pub info_count: usize,
}

impl Summary {
    pub fn from_errors(errors: &[ValidationError]) -> Self {
        let mut summary = Summary::default();
        for error in errors {
            match error.severity {
                Severity::Error => summary.error_count += 1,
                Severity::Warning => summary.warning_count += 1,
                Severity::Info => summary.info_count += 1,
            }
        }
        summary
    }
}

/// Response envelope metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub api_version: String,
    pub engine_version: String,
    pub fhir_version: FhirVersion,
}

impl Metadata {
    pub fn new(fhir_version: FhirVersion) -> Self {
        Self {
            api_version: "2.0".to_string(),
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
            fhir_version,
        }
    }
}

/// Validation response returned to the hosting layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResponse {
    pub errors: Vec<ValidationError>,
    pub summary: Summary,
    pub metadata: Metadata,
}

impl ValidationResponse {
    pub fn new(errors: Vec<ValidationError>, fhir_version: FhirVersion) -> Self {
        let summary = Summary::from_errors(&errors);
        Self {
            errors,
            summary,
            metadata: Metadata::new(fhir_version),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.summary.error_count == 0
    }

    /// Serialize the response envelope to JSON.
    pub fn to_json(&self, pretty: bool) -> bv_foundation::Result<String> {
        bv_foundation::json::stringify(self, pretty)
    }

    /// Project the error list onto a FHIR OperationOutcome resource.
    ///
    /// Pure structural projection: `diagnostics` carries the stable
    /// `error_code`, `expression` the FHIR path, `location` the JSON
    /// Pointer. No prose is synthesized.
    pub fn to_operation_outcome(&self) -> OperationOutcome {
        let issue = self
            .errors
            .iter()
            .map(|error| OperationOutcomeIssue {
                severity: error.severity.to_string(),
                code: issue_code_for(error.source).to_string(),
                diagnostics: Some(error.error_code.clone()),
                location: error.json_pointer.as_ref().map(|p| vec![p.clone()]),
                expression: error.path.as_ref().map(|p| vec![p.clone()]),
            })
            .collect();

        OperationOutcome {
            resource_type: "OperationOutcome".to_string(),
            issue,
        }
    }
}

/// FHIR OperationOutcome resource representation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationOutcome {
    pub resource_type: String,
    pub issue: Vec<OperationOutcomeIssue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationOutcomeIssue {
    pub severity: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expression: Option<Vec<String>>,
}

fn issue_code_for(source: ErrorSource) -> &'static str {
    match source {
        ErrorSource::Structure => "structure",
        ErrorSource::Business => "business-rule",
        ErrorSource::Reference => "not-found",
        ErrorSource::CodeMaster => "code-invalid",
        ErrorSource::Lint | ErrorSource::SpecHint => "informational",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_display() {
        assert_eq!(Severity::Error.to_string(), "error");
        assert_eq!(Severity::Warning.to_string(), "warning");
        assert_eq!(Severity::Info.to_string(), "info");
    }

    #[test]
    fn test_source_serialized_forms() {
        assert_eq!(
            serde_json::to_string(&ErrorSource::Structure).unwrap(),
            r#""STRUCTURE""#
        );
        assert_eq!(
            serde_json::to_string(&ErrorSource::CodeMaster).unwrap(),
            r#""CodeMaster""#
        );
    }

    #[test]
    fn test_summary_counts() {
        let mut details = Details::new();
        details.insert("k".into(), serde_json::json!(1));
        let errors = vec![
            ValidationError {
                source: ErrorSource::Structure,
                severity: Severity::Error,
                error_code: "X".into(),
                resource_type: None,
                path: None,
                json_pointer: None,
                rule_id: None,
                entry_index: None,
                message: String::new(),
                details,
            },
            ValidationError {
                source: ErrorSource::Business,
                severity: Severity::Warning,
                error_code: "Y".into(),
                resource_type: None,
                path: None,
                json_pointer: None,
                rule_id: None,
                entry_index: None,
                message: String::new(),
                details: Details::new(),
            },
        ];
        let summary = Summary::from_errors(&errors);
        assert_eq!(summary.error_count, 1);
        assert_eq!(summary.warning_count, 1);
        assert_eq!(summary.info_count, 0);
    }

    #[test]
    fn test_request_defaults() {
        let request: ValidationRequest = serde_json::from_str(
            r#"{"bundle_json": "{}", "fhir_version": "R4"}"#,
        )
        .unwrap();
        assert_eq!(request.validation_mode, ValidationMode::Standard);
        assert!(request.rules_json.is_none());
        assert!(request.project_id.is_none());
    }

    #[test]
    fn test_empty_message_is_skipped() {
        let error = ValidationError {
            source: ErrorSource::Business,
            severity: Severity::Error,
            error_code: "FIELD_REQUIRED".into(),
            resource_type: Some("Patient".into()),
            path: None,
            json_pointer: None,
            rule_id: None,
            entry_index: None,
            message: String::new(),
            details: Details::new(),
        };
        let json = serde_json::to_string(&error).unwrap();
        assert!(!json.contains("message"));
    }
}
