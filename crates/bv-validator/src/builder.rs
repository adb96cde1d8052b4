//! Error construction.
//!
//! [`ErrorBuilder`] is the single construction path for
//! [`ValidationError`] records: every emitted error flows through it, so
//! the guaranteed fields (`error_code`, `source`, `severity`, `details`)
//! are present by construction. It also enforces the `user_hint`
//! invariants on rule ingress.

use serde_json::Value;

use crate::types::{Details, ErrorSource, Severity, ValidationError};

/// Maximum length of a rule's user hint, in Unicode scalar values.
pub const USER_HINT_MAX_CHARS: usize = 60;

/// Chaining builder for validation errors.
#[derive(Debug, Clone)]
pub struct ErrorBuilder {
    error: ValidationError,
}

impl ErrorBuilder {
    pub fn new(source: ErrorSource, severity: Severity, error_code: impl Into<String>) -> Self {
        Self {
            error: ValidationError {
                source,
                severity,
                error_code: error_code.into(),
                resource_type: None,
                path: None,
                json_pointer: None,
                rule_id: None,
                entry_index: None,
                message: String::new(),
                details: Details::new(),
            },
        }
    }

    /// A structural finding: `source = STRUCTURE`, `severity = error`.
    pub fn structural(error_code: impl Into<String>) -> Self {
        Self::new(ErrorSource::Structure, Severity::Error, error_code)
    }

    pub fn resource_type(mut self, resource_type: impl Into<String>) -> Self {
        self.error.resource_type = Some(resource_type.into());
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.error.path = Some(path.into());
        self
    }

    pub fn json_pointer(mut self, json_pointer: impl Into<String>) -> Self {
        self.error.json_pointer = Some(json_pointer.into());
        self
    }

    pub fn rule_id(mut self, rule_id: impl Into<String>) -> Self {
        self.error.rule_id = Some(rule_id.into());
        self
    }

    pub fn entry_index(mut self, entry_index: usize) -> Self {
        self.error.entry_index = Some(entry_index);
        self
    }

    /// Diagnostic text propagated from the JSON decoder. Engine-produced
    /// errors never set this.
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.error.message = message.into();
        self
    }

    pub fn detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.error.details.insert(key.into(), value.into());
        self
    }

    pub fn details(mut self, details: Details) -> Self {
        self.error.details.extend(details);
        self
    }

    pub fn build(self) -> ValidationError {
        self.error
    }

    /// Check the `user_hint` invariants: at most
    /// [`USER_HINT_MAX_CHARS`] scalar values, and no sentence structure -
    /// a `.` may only appear as part of a terminal `...`.
    pub fn validate_user_hint(hint: &str) -> std::result::Result<(), String> {
        let chars = hint.chars().count();
        if chars > USER_HINT_MAX_CHARS {
            return Err(format!(
                "user_hint exceeds {USER_HINT_MAX_CHARS} characters (found {chars})"
            ));
        }

        let body = hint.strip_suffix("...").unwrap_or(hint);
        if body.contains('.') {
            return Err("user_hint must not contain sentence punctuation".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_guarantees() {
        let error = ErrorBuilder::structural("FHIR_INVALID_ID_FORMAT")
            .resource_type("Patient")
            .path("Patient.id")
            .json_pointer("/entry/0/resource/id")
            .entry_index(0)
            .detail("actual", "bad@id")
            .build();

        assert_eq!(error.source, ErrorSource::Structure);
        assert_eq!(error.severity, Severity::Error);
        assert_eq!(error.error_code, "FHIR_INVALID_ID_FORMAT");
        assert!(error.message.is_empty());
        assert_eq!(error.details["actual"], "bad@id");
    }

    #[test]
    fn test_user_hint_length() {
        let ok = "a".repeat(60);
        assert!(ErrorBuilder::validate_user_hint(&ok).is_ok());
        let long = "a".repeat(61);
        assert!(ErrorBuilder::validate_user_hint(&long).is_err());
    }

    #[test]
    fn test_user_hint_sentences_rejected() {
        assert!(ErrorBuilder::validate_user_hint("check the code").is_ok());
        assert!(ErrorBuilder::validate_user_hint("see valueset...").is_ok());
        assert!(ErrorBuilder::validate_user_hint("Fix it. Then retry").is_err());
        assert!(ErrorBuilder::validate_user_hint("terminal period.").is_err());
    }
}
