//! Severity resolution.
//!
//! Applied by the pipeline to every surviving error after deduplication.
//! Structural and contract findings keep their severity. Advisory findings
//! (sources `Lint` / `SpecHint`) flagged as heuristic or spec-hint are
//! downgraded from `error` to `warning`, recording the reason under
//! `details._downgrade_reason`. Enum findings derive their severity from
//! the binding strength stamped into `details`. Severities are never
//! raised.

use serde_json::Value;

use crate::types::{ErrorSource, Severity, ValidationError};
use crate::valueset::BindingStrength;

pub struct SeverityResolver;

impl SeverityResolver {
    pub fn resolve(error: &mut ValidationError) {
        match error.error_code.as_str() {
            "INVALID_ENUM_VALUE" => {
                if let Some(strength) = binding_strength_of(error) {
                    let derived = match strength {
                        BindingStrength::Required => Severity::Error,
                        BindingStrength::Extensible => Severity::Warning,
                        BindingStrength::Preferred | BindingStrength::Example => Severity::Info,
                    };
                    downgrade_to(error, derived, None);
                }
            }
            "ENUM_VALIDATION_SKIPPED" => {
                if let Some(strength) = binding_strength_of(error) {
                    let derived = match strength {
                        BindingStrength::Required => Severity::Warning,
                        _ => Severity::Info,
                    };
                    downgrade_to(error, derived, None);
                }
            }
            _ => {
                if matches!(error.source, ErrorSource::Lint | ErrorSource::SpecHint)
                    && error.severity == Severity::Error
                {
                    if flag(error, "heuristic") {
                        downgrade_to(error, Severity::Warning, Some("heuristic confidence"));
                    } else if flag(error, "specHint") {
                        downgrade_to(error, Severity::Warning, Some("SpecHint"));
                    }
                }
            }
        }
    }
}

fn binding_strength_of(error: &ValidationError) -> Option<BindingStrength> {
    error
        .details
        .get("bindingStrength")
        .and_then(Value::as_str)
        .and_then(BindingStrength::parse)
}

fn flag(error: &ValidationError, name: &str) -> bool {
    error
        .details
        .get(name)
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

fn rank(severity: Severity) -> u8 {
    match severity {
        Severity::Error => 2,
        Severity::Warning => 1,
        Severity::Info => 0,
    }
}

// Monotone: applies only when it lowers the severity.
fn downgrade_to(error: &mut ValidationError, target: Severity, reason: Option<&str>) {
    if rank(target) >= rank(error.severity) {
        return;
    }
    error.severity = target;
    if let Some(reason) = reason {
        error
            .details
            .insert("_downgrade_reason".to_string(), Value::String(reason.to_string()));
    }
}
