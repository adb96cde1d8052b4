//! Declarative rule records and rule-set ingress validation.
//!
//! Rule sets arrive as opaque JSON (spec format: `version`, `fhir_version`,
//! `rules[]`). Loading is strict: a rule without an `error_code`, or with a
//! `user_hint` that breaks the hint invariants, rejects the whole set -
//! the pipeline turns that rejection into a single `InvalidRuleSet`
//! ingress fault.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::builder::ErrorBuilder;
use crate::error::ValidatorError;
use crate::types::{ErrorSource, FhirVersion, Severity};

/// Closed set of rule kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuleType {
    Required,
    FixedValue,
    AllowedValues,
    Regex,
    Reference,
    ArrayLength,
    #[serde(rename = "CustomFHIRPath")]
    CustomFhirPath,
    QuestionAnswer,
    /// Anything else. The engine skips the rule with an
    /// `UNSUPPORTED_RULE_TYPE` fault instead of rejecting the whole set.
    #[serde(other)]
    Unsupported,
}

/// Which entries of the matching resource type a rule applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(try_from = "ScopeRepr", into = "ScopeRepr")]
pub enum InstanceScope {
    #[default]
    All,
    Indices(Vec<usize>),
}

impl InstanceScope {
    /// Whether the rule applies to the n-th instance of its resource type
    /// (counted in bundle order, zero-based).
    pub fn selects(&self, instance: usize) -> bool {
        match self {
            InstanceScope::All => true,
            InstanceScope::Indices(indices) => indices.contains(&instance),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum ScopeRepr {
    Keyword(String),
    Indexed { indices: Vec<usize> },
}

impl TryFrom<ScopeRepr> for InstanceScope {
    type Error = String;

    fn try_from(repr: ScopeRepr) -> std::result::Result<Self, Self::Error> {
        match repr {
            ScopeRepr::Keyword(keyword) if keyword == "all" => Ok(InstanceScope::All),
            ScopeRepr::Keyword(other) => Err(format!("unknown instance_scope {other:?}")),
            ScopeRepr::Indexed { indices } => Ok(InstanceScope::Indices(indices)),
        }
    }
}

impl From<InstanceScope> for ScopeRepr {
    fn from(scope: InstanceScope) -> Self {
        match scope {
            InstanceScope::All => ScopeRepr::Keyword("all".to_string()),
            InstanceScope::Indices(indices) => ScopeRepr::Indexed { indices },
        }
    }
}

/// One declarative rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    #[serde(rename = "type")]
    pub rule_type: RuleType,
    pub resource_type: String,
    pub field_path: String,
    #[serde(default)]
    pub instance_scope: InstanceScope,
    pub severity: Severity,
    /// Mandatory; kept optional in the record so the rejection carries a
    /// structured reason instead of a decoder message.
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub user_hint: Option<String>,
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl Rule {
    /// The stable error code. Only valid after ingress validation.
    pub fn code(&self) -> &str {
        self.error_code.as_deref().unwrap_or_default()
    }

    fn flag(&self, name: &str) -> bool {
        self.params.get(name).and_then(Value::as_bool).unwrap_or(false)
    }

    /// Advisory rules are subject to the severity downgrade policy.
    pub fn is_advisory(&self) -> bool {
        self.flag("advisory")
    }

    pub fn is_heuristic(&self) -> bool {
        self.flag("heuristic")
    }

    pub fn is_spec_hint(&self) -> bool {
        self.flag("specHint")
    }

    /// Error source for findings emitted by this rule.
    pub fn source(&self) -> ErrorSource {
        if self.is_advisory() {
            if self.is_spec_hint() && !self.is_heuristic() {
                return ErrorSource::SpecHint;
            }
            return ErrorSource::Lint;
        }
        match self.rule_type {
            RuleType::Reference => ErrorSource::Reference,
            RuleType::AllowedValues | RuleType::QuestionAnswer => ErrorSource::CodeMaster,
            _ => ErrorSource::Business,
        }
    }
}

/// A parsed, validated rule set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSet {
    pub version: String,
    pub fhir_version: FhirVersion,
    #[serde(default)]
    pub rules: Vec<Rule>,
}

impl RuleSet {
    /// Parse and validate a rule set from JSON.
    pub fn parse(json: &str) -> Result<Self, ValidatorError> {
        let set: RuleSet =
            serde_json::from_str(json).map_err(|e| ValidatorError::InvalidRuleSet {
                reason: format!("malformed rule set: {e}"),
                rule_id: None,
            })?;
        set.validate()?;
        Ok(set)
    }

    /// Ingress checks over every rule.
    fn validate(&self) -> Result<(), ValidatorError> {
        for rule in &self.rules {
            match &rule.error_code {
                None => {
                    return Err(ValidatorError::InvalidRuleSet {
                        reason: "missing error_code".to_string(),
                        rule_id: Some(rule.id.clone()),
                    })
                }
                Some(code) if code.is_empty() => {
                    return Err(ValidatorError::InvalidRuleSet {
                        reason: "empty error_code".to_string(),
                        rule_id: Some(rule.id.clone()),
                    })
                }
                Some(_) => {}
            }

            if let Some(hint) = &rule.user_hint {
                if let Err(reason) = ErrorBuilder::validate_user_hint(hint) {
                    return Err(ValidatorError::InvalidRuleSet {
                        reason,
                        rule_id: Some(rule.id.clone()),
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_rule(extra: &str) -> String {
        format!(
            r#"{{
                "version": "1",
                "fhir_version": "R4",
                "rules": [{{
                    "id": "r1",
                    "type": "Required",
                    "resource_type": "Patient",
                    "field_path": "Patient.gender",
                    "instance_scope": "all",
                    "severity": "error"
                    {extra}
                }}]
            }}"#
        )
    }

    #[test]
    fn test_parse_valid_set() {
        let set = RuleSet::parse(&minimal_rule(r#", "error_code": "FIELD_REQUIRED""#)).unwrap();
        assert_eq!(set.rules.len(), 1);
        assert_eq!(set.rules[0].rule_type, RuleType::Required);
        assert_eq!(set.rules[0].code(), "FIELD_REQUIRED");
        assert_eq!(set.rules[0].instance_scope, InstanceScope::All);
    }

    #[test]
    fn test_missing_error_code_rejected() {
        let err = RuleSet::parse(&minimal_rule("")).unwrap_err();
        match err {
            ValidatorError::InvalidRuleSet { reason, rule_id } => {
                assert!(reason.contains("error_code"));
                assert_eq!(rule_id.as_deref(), Some("r1"));
            }
            other => panic!("expected InvalidRuleSet, got {other:?}"),
        }
    }

    #[test]
    fn test_prose_hint_rejected() {
        let err = RuleSet::parse(&minimal_rule(
            r#", "error_code": "X", "user_hint": "First sentence. Second""#,
        ))
        .unwrap_err();
        assert!(matches!(err, ValidatorError::InvalidRuleSet { .. }));
    }

    #[test]
    fn test_indexed_scope() {
        let json = r#"{
            "version": "1",
            "fhir_version": "R4",
            "rules": [{
                "id": "r2",
                "type": "Regex",
                "resource_type": "Patient",
                "field_path": "Patient.id",
                "instance_scope": {"indices": [0, 2]},
                "severity": "warning",
                "error_code": "PATTERN_MISMATCH",
                "params": {"pattern": "^p"}
            }]
        }"#;
        let set = RuleSet::parse(json).unwrap();
        let scope = &set.rules[0].instance_scope;
        assert!(scope.selects(0));
        assert!(!scope.selects(1));
        assert!(scope.selects(2));
    }

    #[test]
    fn test_unknown_scope_keyword_rejected() {
        let json = minimal_rule(r#", "error_code": "X""#).replace("\"all\"", "\"some\"");
        assert!(RuleSet::parse(&json).is_err());
    }

    #[test]
    fn test_unknown_rule_type_parses_as_unsupported() {
        let json = minimal_rule(r#", "error_code": "X""#).replace("Required", "Exotic");
        let set = RuleSet::parse(&json).unwrap();
        assert_eq!(set.rules[0].rule_type, RuleType::Unsupported);
    }

    #[test]
    fn test_advisory_source_selection() {
        let mut params = Map::new();
        params.insert("advisory".into(), Value::Bool(true));
        params.insert("specHint".into(), Value::Bool(true));
        let rule = Rule {
            id: "r3".into(),
            rule_type: RuleType::CustomFhirPath,
            resource_type: "Patient".into(),
            field_path: "Patient".into(),
            instance_scope: InstanceScope::All,
            severity: Severity::Error,
            error_code: Some("FHIRPATH_EXPRESSION_FAILED".into()),
            user_hint: None,
            params,
        };
        assert_eq!(rule.source(), ErrorSource::SpecHint);
    }
}
