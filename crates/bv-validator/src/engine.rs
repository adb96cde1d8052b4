//! Declarative rule evaluation.
//!
//! For each rule the engine selects the affected entries by resource type
//! and instance scope, extracts the addressed value through the path
//! navigator, and evaluates the rule body. A rule body that cannot execute
//! (missing or malformed params, unsupported type) emits an engine fault
//! and is skipped; overall validation always continues.

use lru::LruCache;
use regex::Regex;
use serde_json::Value;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use tracing::{debug, trace};

use crate::builder::ErrorBuilder;
use crate::navigator::PathNavigator;
use crate::predicate::{PredicateEvaluator, PredicateParser};
use crate::questionnaire::{self, ParamError, QuestionAnswerParams};
use crate::rules::{Rule, RuleSet, RuleType};
use crate::types::{Severity, ValidationError};
use crate::validator::{reference_target, ReferenceTarget};

/// Compiled-pattern cache shared across requests.
pub struct RegexCache {
    cache: Mutex<LruCache<String, Regex>>,
}

impl RegexCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Compile or fetch a pattern. `Err` carries the compile error text.
    fn get(&self, pattern: &str) -> Result<Regex, String> {
        let mut cache = match self.cache.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(re) = cache.get(pattern) {
            return Ok(re.clone());
        }
        let re = Regex::new(pattern).map_err(|e| e.to_string())?;
        cache.put(pattern.to_string(), re.clone());
        Ok(re)
    }
}

impl Default for RegexCache {
    fn default() -> Self {
        Self::new(64)
    }
}

/// Per-rule evaluation context.
struct RuleContext<'a> {
    rule: &'a Rule,
    entry_index: usize,
}

/// Rule evaluator over a decoded bundle.
pub struct RuleEngine<'a> {
    regex_cache: &'a RegexCache,
}

impl<'a> RuleEngine<'a> {
    pub fn new(regex_cache: &'a RegexCache) -> Self {
        Self { regex_cache }
    }

    /// Evaluate every rule in definition order, entries in bundle order.
    pub fn evaluate(&self, bundle: &Value, set: &RuleSet, errors: &mut Vec<ValidationError>) {
        debug!(rules = set.rules.len(), "evaluating rule set");
        let entries = bundle
            .get("entry")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[]);

        for rule in &set.rules {
            // Instance ordinals are counted per resource type.
            let mut instance = 0usize;
            for (entry_index, entry) in entries.iter().enumerate() {
                let Some(resource) = entry.get("resource") else {
                    continue;
                };
                if resource.get("resourceType").and_then(Value::as_str)
                    != Some(rule.resource_type.as_str())
                {
                    continue;
                }
                let selected = rule.instance_scope.selects(instance);
                instance += 1;
                if !selected {
                    continue;
                }

                trace!(rule = %rule.id, entry_index, "evaluating rule");
                let ctx = RuleContext { rule, entry_index };
                self.evaluate_on_entry(bundle, &ctx, errors);
            }
        }
    }

    fn evaluate_on_entry(
        &self,
        bundle: &Value,
        ctx: &RuleContext<'_>,
        errors: &mut Vec<ValidationError>,
    ) {
        let rule = ctx.rule;
        let resolved = PathNavigator::resolve(bundle, &rule.field_path, Some(ctx.entry_index));

        // QuestionAnswer owns its own missing-data code.
        if rule.rule_type == RuleType::QuestionAnswer {
            self.evaluate_question_answer(ctx, resolved, errors);
            return;
        }

        let Some(resolved) = resolved else {
            match rule.rule_type {
                RuleType::Required => {
                    errors.push(
                        self.contract(ctx, rule.code(), None)
                            .detail("isMissing", true)
                            .detail("isAllEmpty", false)
                            .build(),
                    );
                }
                _ => {
                    errors.push(
                        self.engine_fault(ctx, "VALIDATION_ENGINE_ERROR", None)
                            .detail("reason", "path did not resolve")
                            .build(),
                    );
                }
            }
            return;
        };

        match rule.rule_type {
            RuleType::Required => self.evaluate_required(ctx, &resolved, errors),
            RuleType::FixedValue => self.evaluate_fixed_value(ctx, &resolved, errors),
            RuleType::AllowedValues => self.evaluate_allowed_values(ctx, &resolved, errors),
            RuleType::Regex => self.evaluate_regex(ctx, &resolved, errors),
            RuleType::ArrayLength => self.evaluate_array_length(ctx, &resolved, errors),
            RuleType::Reference => self.evaluate_reference(bundle, ctx, &resolved, errors),
            RuleType::CustomFhirPath => self.evaluate_custom_path(ctx, &resolved, errors),
            RuleType::QuestionAnswer => unreachable!("handled above"),
            RuleType::Unsupported => {
                errors.push(
                    self.engine_fault(ctx, "UNSUPPORTED_RULE_TYPE", Some(&resolved.pointer))
                        .build(),
                );
            }
        }
    }

    // Present, non-empty for arrays, not all-whitespace for strings.
    fn evaluate_required(
        &self,
        ctx: &RuleContext<'_>,
        resolved: &crate::navigator::Resolved<'_>,
        errors: &mut Vec<ValidationError>,
    ) {
        let (missing, all_empty) = match resolved.value {
            Value::Null => (true, false),
            Value::Array(items) if items.is_empty() => (true, false),
            Value::Array(items) => {
                let all_blank = items
                    .iter()
                    .all(|v| v.as_str().is_some_and(|s| s.trim().is_empty()));
                (false, all_blank)
            }
            Value::String(s) if s.is_empty() => (true, false),
            Value::String(s) if s.trim().is_empty() => (false, true),
            _ => (false, false),
        };

        if missing || all_empty {
            errors.push(
                self.contract(ctx, ctx.rule.code(), Some(&resolved.pointer))
                    .detail("isMissing", missing)
                    .detail("isAllEmpty", all_empty)
                    .build(),
            );
        }
    }

    // Deep structural equality: object keys are order-indifferent, arrays
    // compare positionally.
    fn evaluate_fixed_value(
        &self,
        ctx: &RuleContext<'_>,
        resolved: &crate::navigator::Resolved<'_>,
        errors: &mut Vec<ValidationError>,
    ) {
        let Some(expected) = ctx.rule.params.get("value") else {
            errors.push(
                self.engine_fault(ctx, "RULE_PARAM_MISSING", Some(&resolved.pointer))
                    .detail("param", "value")
                    .build(),
            );
            return;
        };

        if resolved.value != expected {
            errors.push(
                self.contract(ctx, ctx.rule.code(), Some(&resolved.pointer))
                    .detail("expected", expected.clone())
                    .detail("actual", resolved.value.clone())
                    .build(),
            );
        }
    }

    fn evaluate_allowed_values(
        &self,
        ctx: &RuleContext<'_>,
        resolved: &crate::navigator::Resolved<'_>,
        errors: &mut Vec<ValidationError>,
    ) {
        let allowed: Vec<&str> = match ctx.rule.params.get("values").and_then(Value::as_array) {
            Some(values) => values.iter().filter_map(Value::as_str).collect(),
            None => {
                errors.push(
                    self.engine_fault(ctx, "RULE_PARAM_MISSING", Some(&resolved.pointer))
                        .detail("param", "values")
                        .build(),
                );
                return;
            }
        };

        let check = |value: &Value, pointer: String, errors: &mut Vec<ValidationError>| {
            let Some(s) = value.as_str() else {
                return;
            };
            if !allowed.contains(&s) {
                errors.push(
                    self.contract(ctx, ctx.rule.code(), Some(&pointer))
                        .detail("value", s)
                        .detail(
                            "allowedValues",
                            Value::Array(
                                allowed.iter().map(|v| Value::String((*v).into())).collect(),
                            ),
                        )
                        .build(),
                );
            }
        };

        match resolved.value {
            Value::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    check(item, format!("{}/{i}", resolved.pointer), errors);
                }
            }
            other => check(other, resolved.pointer.clone(), errors),
        }
    }

    fn evaluate_regex(
        &self,
        ctx: &RuleContext<'_>,
        resolved: &crate::navigator::Resolved<'_>,
        errors: &mut Vec<ValidationError>,
    ) {
        let Some(pattern) = ctx.rule.params.get("pattern").and_then(Value::as_str) else {
            errors.push(
                self.engine_fault(ctx, "RULE_PARAM_MISSING", Some(&resolved.pointer))
                    .detail("param", "pattern")
                    .build(),
            );
            return;
        };

        let re = match self.regex_cache.get(pattern) {
            Ok(re) => re,
            Err(reason) => {
                errors.push(
                    self.engine_fault(ctx, "RULE_CONFIGURATION_INVALID", Some(&resolved.pointer))
                        .detail("pattern", pattern)
                        .detail("reason", reason)
                        .build(),
                );
                return;
            }
        };

        let check = |value: &Value, pointer: String, errors: &mut Vec<ValidationError>| {
            match value.as_str() {
                Some(s) => {
                    if !re.is_match(s) {
                        errors.push(
                            self.contract(ctx, ctx.rule.code(), Some(&pointer))
                                .detail("value", s)
                                .detail("pattern", pattern)
                                .build(),
                        );
                    }
                }
                None => {
                    errors.push(
                        self.engine_fault(ctx, "VALIDATION_ENGINE_ERROR", Some(&pointer))
                            .detail("reason", "value is not a string")
                            .build(),
                    );
                }
            }
        };

        match resolved.value {
            Value::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    check(item, format!("{}/{i}", resolved.pointer), errors);
                }
            }
            other => check(other, resolved.pointer.clone(), errors),
        }
    }

    fn evaluate_array_length(
        &self,
        ctx: &RuleContext<'_>,
        resolved: &crate::navigator::Resolved<'_>,
        errors: &mut Vec<ValidationError>,
    ) {
        let min = ctx.rule.params.get("min").and_then(Value::as_u64);
        let max = ctx.rule.params.get("max").and_then(Value::as_u64);
        if min.is_none() && max.is_none() {
            errors.push(
                self.engine_fault(ctx, "RULE_PARAM_MISSING", Some(&resolved.pointer))
                    .detail("param", "min|max")
                    .build(),
            );
            return;
        }

        let Some(items) = resolved.value.as_array() else {
            errors.push(
                self.contract(ctx, "ARRAY_LENGTH_INVALID", Some(&resolved.pointer))
                    .detail("reason", "not an array")
                    .build(),
            );
            return;
        };

        let actual = items.len() as u64;
        if let Some(min) = min {
            if actual < min {
                errors.push(
                    self.contract(ctx, "ARRAY_TOO_SHORT", Some(&resolved.pointer))
                        .detail("min", min)
                        .detail("actual", actual)
                        .build(),
                );
            }
        }
        if let Some(max) = max {
            if actual > max {
                errors.push(
                    self.contract(ctx, "ARRAY_TOO_LONG", Some(&resolved.pointer))
                        .detail("max", max)
                        .detail("actual", actual)
                        .build(),
                );
            }
        }
    }

    // Format checking happened in the structural walk; here the target is
    // resolved against the bundle's entries.
    fn evaluate_reference(
        &self,
        bundle: &Value,
        ctx: &RuleContext<'_>,
        resolved: &crate::navigator::Resolved<'_>,
        errors: &mut Vec<ValidationError>,
    ) {
        let literal = match resolved.value {
            Value::Object(map) => map.get("reference").and_then(Value::as_str),
            Value::String(s) => Some(s.as_str()),
            _ => None,
        };
        let Some(literal) = literal else {
            errors.push(
                self.contract(ctx, "REFERENCE_INVALID", Some(&resolved.pointer))
                    .detail("reason", "no reference literal")
                    .build(),
            );
            return;
        };

        let entries = bundle
            .get("entry")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[]);

        match reference_target(literal) {
            None => {
                errors.push(
                    self.contract(ctx, "REFERENCE_INVALID", Some(&resolved.pointer))
                        .detail("value", literal)
                        .build(),
                );
            }
            Some(ReferenceTarget::Local { resource_type, id }) => {
                let target_types: Option<Vec<&str>> = ctx
                    .rule
                    .params
                    .get("targetTypes")
                    .and_then(Value::as_array)
                    .map(|types| types.iter().filter_map(Value::as_str).collect());

                if let Some(target_types) = &target_types {
                    if !target_types.contains(&resource_type) {
                        errors.push(
                            self.contract(
                                ctx,
                                "REFERENCE_TARGET_TYPE_MISMATCH",
                                Some(&resolved.pointer),
                            )
                            .detail("value", literal)
                            .detail("actualType", resource_type)
                            .detail(
                                "allowedTypes",
                                Value::Array(
                                    target_types
                                        .iter()
                                        .map(|t| Value::String((*t).into()))
                                        .collect(),
                                ),
                            )
                            .build(),
                        );
                        return;
                    }
                }

                let found = entries.iter().any(|entry| {
                    let Some(resource) = entry.get("resource") else {
                        return false;
                    };
                    resource.get("resourceType").and_then(Value::as_str) == Some(resource_type)
                        && resource.get("id").and_then(Value::as_str) == Some(id)
                });
                if !found {
                    errors.push(
                        self.contract(ctx, "REFERENCE_NOT_FOUND", Some(&resolved.pointer))
                            .detail("value", literal)
                            .build(),
                    );
                }
            }
            Some(ReferenceTarget::Urn(urn)) => {
                let found = entries
                    .iter()
                    .any(|entry| entry.get("fullUrl").and_then(Value::as_str) == Some(urn));
                if !found {
                    errors.push(
                        self.contract(ctx, "REFERENCE_NOT_FOUND", Some(&resolved.pointer))
                            .detail("value", literal)
                            .build(),
                    );
                }
            }
        }
    }

    // Limited to the predicate grammar; broader FHIRPath is out of scope.
    fn evaluate_custom_path(
        &self,
        ctx: &RuleContext<'_>,
        resolved: &crate::navigator::Resolved<'_>,
        errors: &mut Vec<ValidationError>,
    ) {
        let Some(expression) = ctx.rule.params.get("expression").and_then(Value::as_str) else {
            errors.push(
                self.engine_fault(ctx, "RULE_PARAM_MISSING", Some(&resolved.pointer))
                    .detail("param", "expression")
                    .build(),
            );
            return;
        };

        let Some(expr) = PredicateParser::parse(expression) else {
            errors.push(
                self.engine_fault(ctx, "RULE_CONFIGURATION_INVALID", Some(&resolved.pointer))
                    .detail("expression", expression)
                    .detail("reason", "expression does not parse")
                    .build(),
            );
            return;
        };

        if !PredicateEvaluator::evaluate(&expr, resolved.value) {
            errors.push(
                self.contract(ctx, ctx.rule.code(), Some(&resolved.pointer))
                    .detail("expression", expression)
                    .build(),
            );
        }
    }

    fn evaluate_question_answer(
        &self,
        ctx: &RuleContext<'_>,
        resolved: Option<crate::navigator::Resolved<'_>>,
        errors: &mut Vec<ValidationError>,
    ) {
        let params = match QuestionAnswerParams::parse(&ctx.rule.params) {
            Ok(params) => params,
            Err(ParamError::Missing(param)) => {
                errors.push(
                    self.engine_fault(ctx, "RULE_PARAM_MISSING", None)
                        .detail("param", param)
                        .build(),
                );
                return;
            }
            Err(ParamError::Invalid(reason)) => {
                errors.push(
                    self.engine_fault(ctx, "RULE_CONFIGURATION_INVALID", None)
                        .detail("reason", reason)
                        .build(),
                );
                return;
            }
        };

        let items = resolved.as_ref().and_then(|r| r.value.as_array());
        let base_pointer = resolved.as_ref().map(|r| r.pointer.as_str());

        for finding in questionnaire::evaluate(&params, items.map(Vec::as_slice)) {
            let pointer = match (&finding.pointer_suffix, base_pointer) {
                (Some(suffix), Some(base)) => Some(format!("{base}{suffix}")),
                (None, base) => base.map(str::to_string),
                (Some(_), None) => None,
            };
            let mut builder = self
                .contract(ctx, finding.code, pointer.as_deref())
                .details(finding.details);
            if let Some(pointer) = &pointer {
                builder = builder.detail("location", pointer.as_str());
            }
            errors.push(builder.build());
        }
    }

    // A contract finding: the rule's declared severity and source.
    fn contract(
        &self,
        ctx: &RuleContext<'_>,
        code: &str,
        pointer: Option<&str>,
    ) -> ErrorBuilder {
        self.base(ctx, code, pointer, ctx.rule.severity)
    }

    // An engine fault: the rule is skipped, the fault is always an error.
    fn engine_fault(
        &self,
        ctx: &RuleContext<'_>,
        code: &str,
        pointer: Option<&str>,
    ) -> ErrorBuilder {
        self.base(ctx, code, pointer, Severity::Error)
    }

    fn base(
        &self,
        ctx: &RuleContext<'_>,
        code: &str,
        pointer: Option<&str>,
        severity: Severity,
    ) -> ErrorBuilder {
        let rule = ctx.rule;
        let mut builder = ErrorBuilder::new(rule.source(), severity, code)
            .resource_type(rule.resource_type.clone())
            .path(rule.field_path.clone())
            .rule_id(rule.id.clone())
            .entry_index(ctx.entry_index);
        if let Some(pointer) = pointer {
            builder = builder.json_pointer(pointer);
        }
        if rule.is_advisory() {
            if rule.is_heuristic() {
                builder = builder.detail("heuristic", true);
            }
            if rule.is_spec_hint() {
                builder = builder.detail("specHint", true);
            }
        }
        builder
    }
}
