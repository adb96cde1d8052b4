//! QuestionAnswer rule evaluation.
//!
//! A QuestionAnswer rule addresses an array of question items (for example
//! `Observation.component` or `QuestionnaireResponse.item`), locates the
//! question by its coding (`system` + `code`), and checks the observed
//! answers against an expected shape: answer type, decimal range with an
//! optional unit, allowed-value set, required and repeats flags. Findings
//! are structured diffs - `question`, `expected`, `actual`, `location` -
//! never sentences.

use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::str::FromStr;

use crate::types::Details;

/// Keys probed to detect an answer value, in detection order.
const ANSWER_VALUE_KEYS: [&str; 12] = [
    "valueBoolean",
    "valueDecimal",
    "valueInteger",
    "valueDate",
    "valueDateTime",
    "valueTime",
    "valueString",
    "valueUri",
    "valueCoding",
    "valueQuantity",
    "valueReference",
    "valueAttachment",
];

/// Question identity: `code` plus optional `system`.
#[derive(Debug, Clone, Deserialize)]
pub struct QuestionKey {
    #[serde(default)]
    pub system: Option<String>,
    pub code: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExpectedRange {
    #[serde(default)]
    pub min: Option<Value>,
    #[serde(default)]
    pub max: Option<Value>,
    #[serde(default)]
    pub unit: Option<String>,
}

/// The expected answer shape from rule params.
#[derive(Debug, Clone, Deserialize)]
pub struct ExpectedAnswer {
    #[serde(rename = "type", default)]
    pub answer_type: Option<String>,
    #[serde(default)]
    pub range: Option<ExpectedRange>,
    #[serde(rename = "valueSet", default)]
    pub value_set: Option<Vec<String>>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub repeats: bool,
}

/// Parameter faults, mapped by the engine onto its engine-fault codes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamError {
    Missing(&'static str),
    Invalid(String),
}

#[derive(Debug, Clone)]
pub struct QuestionAnswerParams {
    pub question: QuestionKey,
    pub expected: ExpectedAnswer,
    /// Relative path from a question item to its identifying coding.
    pub question_path: String,
    /// Raw `expected` params value, echoed into finding details.
    expected_raw: Value,
}

impl QuestionAnswerParams {
    pub fn parse(params: &Map<String, Value>) -> Result<Self, ParamError> {
        let question = params.get("question").ok_or(ParamError::Missing("question"))?;
        let question: QuestionKey = serde_json::from_value(question.clone())
            .map_err(|e| ParamError::Invalid(format!("question: {e}")))?;

        let expected_raw = params
            .get("expected")
            .cloned()
            .ok_or(ParamError::Missing("expected"))?;
        let expected: ExpectedAnswer = serde_json::from_value(expected_raw.clone())
            .map_err(|e| ParamError::Invalid(format!("expected: {e}")))?;

        let question_path = params
            .get("questionPath")
            .and_then(Value::as_str)
            .unwrap_or("code.coding")
            .to_string();

        Ok(Self {
            question,
            expected,
            question_path,
            expected_raw,
        })
    }
}

/// One finding, relative to the rule's resolved field pointer.
#[derive(Debug, Clone)]
pub struct QaFinding {
    pub code: &'static str,
    pub details: Details,
    /// Pointer suffix below the question-item array, when anchored.
    pub pointer_suffix: Option<String>,
}

/// Evaluate the rule against the question-item array at the rule's
/// `field_path`. `items` is the resolved array; `None` means the path did
/// not resolve at all.
pub fn evaluate(params: &QuestionAnswerParams, items: Option<&[Value]>) -> Vec<QaFinding> {
    let mut findings = Vec::new();

    let Some(items) = items else {
        findings.push(QaFinding {
            code: "QUESTIONSET_DATA_MISSING",
            details: question_details(params),
            pointer_suffix: None,
        });
        return findings;
    };

    let matched: Vec<(usize, &Value)> = items
        .iter()
        .enumerate()
        .filter(|(_, item)| matches_question(item, params))
        .collect();

    if matched.is_empty() {
        findings.push(QaFinding {
            code: "QUESTION_NOT_FOUND",
            details: question_details(params),
            pointer_suffix: None,
        });
        return findings;
    }

    for (index, item) in matched {
        let answers = collect_answers(item, index);

        if answers.is_empty() {
            if params.expected.required {
                findings.push(QaFinding {
                    code: "ANSWER_REQUIRED",
                    details: question_details(params),
                    pointer_suffix: Some(format!("/{index}")),
                });
            }
            continue;
        }

        if answers.len() > 1 && !params.expected.repeats {
            let mut details = question_details(params);
            details.insert("actual".into(), json!({"count": answers.len()}));
            findings.push(QaFinding {
                code: "ANSWER_MULTIPLE_NOT_ALLOWED",
                details,
                pointer_suffix: Some(format!("/{index}")),
            });
        }

        for answer in &answers {
            check_answer(params, answer, &mut findings);
        }
    }

    findings
}

// An observed answer: the value[x] key, the value, and its pointer suffix.
struct Answer<'a> {
    key: &'a str,
    value: &'a Value,
    suffix: String,
}

fn collect_answers<'a>(item: &'a Value, item_index: usize) -> Vec<Answer<'a>> {
    // QuestionnaireResponse style: an `answer` array of value[x] carriers.
    if let Some(answer_items) = item.get("answer").and_then(Value::as_array) {
        return answer_items
            .iter()
            .enumerate()
            .filter_map(|(i, a)| {
                detect_value(a).map(|(key, value)| Answer {
                    key,
                    value,
                    suffix: format!("/{item_index}/answer/{i}/{key}"),
                })
            })
            .collect();
    }
    // Component style: the item itself carries one value[x].
    detect_value(item)
        .map(|(key, value)| Answer {
            key,
            value,
            suffix: format!("/{item_index}/{key}"),
        })
        .into_iter()
        .collect()
}

fn detect_value(node: &Value) -> Option<(&'static str, &Value)> {
    ANSWER_VALUE_KEYS
        .iter()
        .find_map(|key| node.get(*key).map(|value| (*key, value)))
}

fn matches_question(item: &Value, params: &QuestionAnswerParams) -> bool {
    let Some(target) = navigate_relative(item, &params.question_path) else {
        return false;
    };
    match target {
        Value::Array(codings) => codings.iter().any(|c| coding_matches(c, &params.question)),
        other => coding_matches(other, &params.question),
    }
}

fn coding_matches(coding: &Value, key: &QuestionKey) -> bool {
    let code_ok = coding.get("code").and_then(Value::as_str) == Some(key.code.as_str());
    let system_ok = match &key.system {
        Some(system) => coding.get("system").and_then(Value::as_str) == Some(system.as_str()),
        None => true,
    };
    code_ok && system_ok
}

// First-match array descent, as elsewhere in predicate navigation.
fn navigate_relative<'a>(node: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = node;
    for segment in path.split('.') {
        if let Value::Array(items) = current {
            current = items.first()?;
        }
        current = current.get(segment)?;
    }
    Some(current)
}

fn check_answer(params: &QuestionAnswerParams, answer: &Answer<'_>, findings: &mut Vec<QaFinding>) {
    let suffix = Some(answer.suffix.clone());

    if let Some(expected_type) = params.expected.answer_type.as_deref() {
        if !type_accepts(expected_type, answer.key) {
            findings.push(QaFinding {
                code: "INVALID_ANSWER_VALUE",
                details: diff_details(params, answer),
                pointer_suffix: suffix.clone(),
            });
            // A wrong-typed answer is not range- or set-checked.
            return;
        }
    }

    if let Some(range) = &params.expected.range {
        check_range(params, range, answer, findings);
    }

    if let Some(value_set) = &params.expected.value_set {
        if let Some(observed) = comparable_string(answer) {
            if !value_set.iter().any(|allowed| allowed == &observed) {
                findings.push(QaFinding {
                    code: "ANSWER_NOT_IN_VALUESET",
                    details: diff_details(params, answer),
                    pointer_suffix: suffix.clone(),
                });
            }
        }
    }
}

fn check_range(
    params: &QuestionAnswerParams,
    range: &ExpectedRange,
    answer: &Answer<'_>,
    findings: &mut Vec<QaFinding>,
) {
    let (observed, unit) = match answer.key {
        "valueDecimal" | "valueInteger" => (decimal_of(answer.value), None),
        "valueQuantity" => (
            answer.value.get("value").and_then(decimal_of),
            answer
                .value
                .get("code")
                .or_else(|| answer.value.get("unit"))
                .and_then(Value::as_str),
        ),
        _ => return,
    };

    if let Some(expected_unit) = range.unit.as_deref() {
        if unit != Some(expected_unit) {
            findings.push(QaFinding {
                code: "INVALID_ANSWER_VALUE",
                details: diff_details(params, answer),
                pointer_suffix: Some(answer.suffix.clone()),
            });
            return;
        }
    }

    let Some(observed) = observed else {
        return;
    };

    let min = range.min.as_ref().and_then(decimal_of);
    let max = range.max.as_ref().and_then(decimal_of);
    let below = min.is_some_and(|min| observed < min);
    let above = max.is_some_and(|max| observed > max);
    if below || above {
        findings.push(QaFinding {
            code: "ANSWER_OUT_OF_RANGE",
            details: diff_details(params, answer),
            pointer_suffix: Some(answer.suffix.clone()),
        });
    }
}

// JSON numbers are decimal text; parsing the printed form keeps exactness.
fn decimal_of(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        Value::String(s) => Decimal::from_str(s).ok(),
        _ => None,
    }
}

fn comparable_string(answer: &Answer<'_>) -> Option<String> {
    match answer.key {
        "valueString" | "valueDate" | "valueDateTime" | "valueTime" | "valueUri" => {
            answer.value.as_str().map(str::to_string)
        }
        "valueCoding" => answer
            .value
            .get("code")
            .and_then(Value::as_str)
            .map(str::to_string),
        "valueInteger" => answer.value.as_i64().map(|n| n.to_string()),
        "valueBoolean" => answer.value.as_bool().map(|b| b.to_string()),
        _ => None,
    }
}

fn type_accepts(expected: &str, key: &str) -> bool {
    match expected {
        "boolean" => key == "valueBoolean",
        "decimal" => key == "valueDecimal",
        "integer" => key == "valueInteger",
        "date" => key == "valueDate",
        "dateTime" => key == "valueDateTime",
        "time" => key == "valueTime",
        "string" | "text" => key == "valueString",
        "url" | "uri" => key == "valueUri",
        "coding" | "choice" => matches!(key, "valueCoding" | "valueString" | "valueInteger"),
        "quantity" => key == "valueQuantity",
        "reference" => key == "valueReference",
        "attachment" => key == "valueAttachment",
        _ => true,
    }
}

fn question_details(params: &QuestionAnswerParams) -> Details {
    let mut details = Details::new();
    details.insert(
        "question".into(),
        json!({
            "system": params.question.system.clone(),
            "code": params.question.code.clone(),
        }),
    );
    details.insert("expected".into(), params.expected_raw.clone());
    details
}

fn diff_details(params: &QuestionAnswerParams, answer: &Answer<'_>) -> Details {
    let mut details = question_details(params);
    details.insert(
        "actual".into(),
        json!({
            "type": answer.key.strip_prefix("value").unwrap_or(answer.key),
            "value": answer.value,
        }),
    );
    details
}
