//! Request orchestration.
//!
//! The pipeline runs a fixed, deterministic sequence and never
//! short-circuits past ingress:
//!
//! 1. decode the bundle JSON (with a nesting-depth guard),
//! 2. check `resourceType == "Bundle"`,
//! 3. load and validate the rule set,
//! 4. run the structural walk,
//! 5. run the rule engine,
//! 6. deduplicate on `(source, error_code, json_pointer, path)`,
//! 7. resolve severities,
//! 8. assemble the response envelope.
//!
//! Ingress faults (steps 1-3) terminate the request with a single-error
//! response. Everything later collects: a structural defect never hides a
//! rule defect and vice versa. Step order makes dedup prefer the
//! structural finding when both anchors coincide.

use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

use crate::builder::ErrorBuilder;
use crate::engine::{RegexCache, RuleEngine};
use crate::error::{Result, ValidatorError};
use crate::rules::RuleSet;
use crate::schema::{SchemaCatalog, StaticSchemaCatalog};
use crate::severity::SeverityResolver;
use crate::types::{
    ErrorSource, FhirVersion, Severity, ValidationError, ValidationRequest, ValidationResponse,
};
use crate::validator::StructuralValidator;
use crate::valueset::{EnumIndex, StaticEnumIndex};

/// Engine configuration. Constructor-injected; there are no environment
/// variables and no filesystem access.
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    /// Maximum JSON nesting depth accepted at ingress.
    pub max_nesting_depth: usize,
    /// Capacity of the compiled-pattern cache for Regex rules.
    pub regex_cache_size: usize,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            max_nesting_depth: 100,
            regex_cache_size: 64,
        }
    }
}

/// The bundle validation engine.
///
/// Holds the long-lived, read-only catalogs and serves any number of
/// concurrent requests; each request owns its decoded JSON and produced
/// errors exclusively. The contract is synchronous.
pub struct BundleValidator {
    catalogs: HashMap<FhirVersion, Arc<dyn SchemaCatalog>>,
    enums: Arc<dyn EnumIndex>,
    regex_cache: RegexCache,
    config: ValidatorConfig,
}

impl BundleValidator {
    /// Engine wired to the built-in schema catalogs and enum index.
    pub fn new() -> Result<Self> {
        Self::with_config(ValidatorConfig::default())
    }

    pub fn with_config(config: ValidatorConfig) -> Result<Self> {
        let mut catalogs: HashMap<FhirVersion, Arc<dyn SchemaCatalog>> = HashMap::new();
        catalogs.insert(
            FhirVersion::R4,
            Arc::new(StaticSchemaCatalog::builtin(FhirVersion::R4)?),
        );
        catalogs.insert(
            FhirVersion::R5,
            Arc::new(StaticSchemaCatalog::builtin(FhirVersion::R5)?),
        );
        Ok(Self::with_components(
            catalogs,
            Arc::new(StaticEnumIndex::builtin()?),
            config,
        ))
    }

    /// Engine with injected catalogs, for tests and custom wiring.
    pub fn with_components(
        catalogs: HashMap<FhirVersion, Arc<dyn SchemaCatalog>>,
        enums: Arc<dyn EnumIndex>,
        config: ValidatorConfig,
    ) -> Self {
        let regex_cache = RegexCache::new(config.regex_cache_size);
        Self {
            catalogs,
            enums,
            regex_cache,
            config,
        }
    }

    /// Validate a request. Never panics for recoverable faults; every
    /// such fault becomes a response error.
    pub fn validate(&self, request: &ValidationRequest) -> ValidationResponse {
        let version = request.fhir_version;

        // Steps 1-3 are ingress: any fault terminates the request with a
        // single-error response.
        let (bundle, rule_set) = match self.ingress(request) {
            Ok(decoded) => decoded,
            Err(fault) => {
                return ValidationResponse::new(vec![ingress_error(fault)], version);
            }
        };

        let mut errors: Vec<ValidationError> = Vec::new();

        // Step 4: structural walk.
        if let Some(catalog) = self.catalogs.get(&version) {
            let structural = StructuralValidator::new(catalog.as_ref(), self.enums.as_ref(), version);
            structural.validate(&bundle, &mut errors);
        }
        debug!(count = errors.len(), "structural walk complete");

        // Step 5: rules.
        if let Some(set) = &rule_set {
            let engine = RuleEngine::new(&self.regex_cache);
            engine.evaluate(&bundle, set, &mut errors);
        }
        debug!(count = errors.len(), "rule evaluation complete");

        // Step 6: dedup, first occurrence wins.
        let mut seen: HashSet<(ErrorSource, String, Option<String>, Option<String>)> =
            HashSet::new();
        errors.retain(|error| {
            seen.insert((
                error.source,
                error.error_code.clone(),
                error.json_pointer.clone(),
                error.path.clone(),
            ))
        });

        // Step 7: severities.
        for error in &mut errors {
            SeverityResolver::resolve(error);
        }

        // Step 8: envelope.
        ValidationResponse::new(errors, version)
    }

    // Steps 1-3: decode, bundle check, rule-set load.
    fn ingress(
        &self,
        request: &ValidationRequest,
    ) -> std::result::Result<(Value, Option<RuleSet>), ValidatorError> {
        let bundle = match serde_json::from_str::<Value>(&request.bundle_json) {
            Ok(bundle) => bundle,
            Err(e) => {
                return Err(ValidatorError::JsonSyntax {
                    message: e.to_string(),
                    line: e.line(),
                    column: e.column(),
                    offset: byte_offset(&request.bundle_json, e.line(), e.column()),
                });
            }
        };

        let depth = bv_foundation::json::nesting_depth(&bundle);
        if depth > self.config.max_nesting_depth {
            return Err(ValidatorError::DepthExceeded {
                max: self.config.max_nesting_depth,
                actual: depth,
            });
        }

        let resource_type = bundle.get("resourceType").and_then(Value::as_str);
        if resource_type != Some("Bundle") {
            return Err(ValidatorError::NotABundle {
                found: resource_type.map(str::to_string),
            });
        }

        let rule_set = match &request.rules_json {
            Some(rules_json) => {
                let set = RuleSet::parse(rules_json)?;
                if set.fhir_version != request.fhir_version {
                    return Err(ValidatorError::InvalidRuleSet {
                        reason: "fhir_version mismatch".to_string(),
                        rule_id: None,
                    });
                }
                Some(set)
            }
            None => None,
        };

        Ok((bundle, rule_set))
    }
}

// Map an ingress fault onto its single response error.
fn ingress_error(fault: ValidatorError) -> ValidationError {
    match fault {
        ValidatorError::JsonSyntax {
            message,
            line,
            column,
            offset,
        } => ErrorBuilder::new(ErrorSource::Structure, Severity::Error, "INVALID_JSON")
            .message(message)
            .detail("line", line)
            .detail("column", column)
            .detail("offset", offset)
            .build(),
        ValidatorError::DepthExceeded { max, actual } => {
            ErrorBuilder::new(ErrorSource::Structure, Severity::Error, "INVALID_JSON")
                .detail("reason", "max nesting depth exceeded")
                .detail("maxDepth", max)
                .detail("actualDepth", actual)
                .build()
        }
        ValidatorError::NotABundle { found } => {
            let mut builder =
                ErrorBuilder::new(ErrorSource::Structure, Severity::Error, "INVALID_BUNDLE");
            if let Some(found) = found {
                builder = builder.detail("found", found);
            }
            builder.build()
        }
        ValidatorError::InvalidRuleSet { reason, rule_id } => {
            let mut builder =
                ErrorBuilder::new(ErrorSource::Business, Severity::Error, "InvalidRuleSet")
                    .detail("reason", reason);
            if let Some(rule_id) = rule_id {
                builder = builder.rule_id(rule_id);
            }
            builder.build()
        }
        other => ErrorBuilder::new(ErrorSource::Structure, Severity::Error, "INVALID_JSON")
            .detail("reason", other.to_string())
            .build(),
    }
}

// serde_json reports 1-based line/column; recover the byte offset.
fn byte_offset(input: &str, line: usize, column: usize) -> usize {
    if line == 0 {
        return 0;
    }
    let mut offset = 0;
    for (i, l) in input.split('\n').enumerate() {
        if i + 1 == line {
            return offset + column.saturating_sub(1).min(l.len());
        }
        offset += l.len() + 1;
    }
    offset.min(input.len())
}
