//! `where(...)` predicate parsing and evaluation.
//!
//! The grammar is a closed subset of FHIRPath filter expressions:
//!
//! ```text
//! expr     := term ( ("and" | "or") term )*
//! term     := equals | exists | empty | "(" expr ")"
//! equals   := path "=" "'" literal "'"
//! exists   := path ".exists()"
//! empty    := path ".empty()"
//! path     := IDENT ( "." IDENT )*
//! ```
//!
//! Keywords are case-insensitive; `or` splits before `and`. On any
//! syntactic failure the parser returns `None` - callers treat an
//! unparseable predicate as "cannot be evaluated", never as a user-facing
//! error, so an author typo cannot corrupt navigation.

use nom::{
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_while, take_while1},
    character::complete::{char, multispace0, multispace1},
    combinator::map,
    multi::{many0, separated_list1},
    sequence::{delimited, preceded, tuple},
    IResult,
};
use serde_json::Value;

/// Predicate expression over a JSON node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PredicateExpr {
    /// `path = 'literal'`
    Equals(String, String),
    /// `path.exists()`
    Exists(String),
    /// `path.empty()`
    Empty(String),
    And(Box<PredicateExpr>, Box<PredicateExpr>),
    Or(Box<PredicateExpr>, Box<PredicateExpr>),
}

/// Parser for the predicate grammar.
pub struct PredicateParser;

impl PredicateParser {
    /// Parse a predicate string; `None` on any syntactic failure.
    pub fn parse(input: &str) -> Option<PredicateExpr> {
        match parse_expr(input.trim()) {
            Ok((remaining, expr)) if remaining.trim().is_empty() => Some(expr),
            _ => None,
        }
    }
}

// Whitespace handling
fn ws<'a, F, O>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O>
where
    F: FnMut(&'a str) -> IResult<&'a str, O> + 'a,
{
    delimited(multispace0, inner, multispace0)
}

fn ident(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_')(input)
}

fn dotted(input: &str) -> IResult<&str, Vec<&str>> {
    separated_list1(char('.'), ident)(input)
}

// Parse OR expressions (lowest precedence)
fn parse_expr(input: &str) -> IResult<&str, PredicateExpr> {
    let (input, first) = parse_and(input)?;
    let (input, rest) = many0(preceded(
        delimited(multispace1, tag_no_case("or"), multispace1),
        parse_and,
    ))(input)?;

    Ok((
        input,
        rest.into_iter().fold(first, |acc, expr| {
            PredicateExpr::Or(Box::new(acc), Box::new(expr))
        }),
    ))
}

fn parse_and(input: &str) -> IResult<&str, PredicateExpr> {
    let (input, first) = parse_term(input)?;
    let (input, rest) = many0(preceded(
        delimited(multispace1, tag_no_case("and"), multispace1),
        parse_term,
    ))(input)?;

    Ok((
        input,
        rest.into_iter().fold(first, |acc, expr| {
            PredicateExpr::And(Box::new(acc), Box::new(expr))
        }),
    ))
}

fn parse_term(input: &str) -> IResult<&str, PredicateExpr> {
    alt((
        delimited(ws(char('(')), parse_expr, ws(char(')'))),
        parse_path_term,
    ))(input)
}

// A term starting with a dotted path: equals, exists() or empty().
fn parse_path_term(input: &str) -> IResult<&str, PredicateExpr> {
    let (rest, segments) = dotted(input)?;

    // Function form: the final segment is the function name.
    if let Ok((rest, _)) = tag::<_, _, nom::error::Error<&str>>("()")(rest) {
        if segments.len() < 2 {
            return Err(nom::Err::Error(nom::error::Error::new(
                input,
                nom::error::ErrorKind::Tag,
            )));
        }
        let path = segments[..segments.len() - 1].join(".");
        return match segments[segments.len() - 1].to_ascii_lowercase().as_str() {
            "exists" => Ok((rest, PredicateExpr::Exists(path))),
            "empty" => Ok((rest, PredicateExpr::Empty(path))),
            _ => Err(nom::Err::Error(nom::error::Error::new(
                input,
                nom::error::ErrorKind::Tag,
            ))),
        };
    }

    // Equality form.
    map(
        tuple((
            ws(char('=')),
            delimited(char('\''), take_while(|c| c != '\''), char('\'')),
        )),
        move |(_, literal): (char, &str)| {
            PredicateExpr::Equals(segments.join("."), literal.to_string())
        },
    )(rest)
}

/// Evaluator over raw JSON nodes.
pub struct PredicateEvaluator;

impl PredicateEvaluator {
    /// Evaluate a predicate against a node. `and`/`or` short-circuit
    /// left-to-right.
    pub fn evaluate(expr: &PredicateExpr, node: &Value) -> bool {
        match expr {
            PredicateExpr::Equals(path, literal) => {
                let resolved = navigate(node, path);
                let scalar = match resolved {
                    Some(Value::Array(items)) => items.first(),
                    other => other,
                };
                scalar.and_then(Value::as_str) == Some(literal.as_str())
            }
            PredicateExpr::Exists(path) => {
                navigate(node, path).map(|v| !v.is_null()).unwrap_or(false)
            }
            PredicateExpr::Empty(path) => is_empty_at(node, path),
            PredicateExpr::And(left, right) => {
                Self::evaluate(left, node) && Self::evaluate(right, node)
            }
            PredicateExpr::Or(left, right) => {
                Self::evaluate(left, node) || Self::evaluate(right, node)
            }
        }
    }
}

// Property walk with first-match array descent.
fn navigate<'a>(node: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = node;
    for segment in path.split('.') {
        if let Value::Array(items) = current {
            current = items.first()?;
        }
        current = current.get(segment)?;
    }
    Some(current)
}

// Empty when any segment is missing, a traversed array has length 0, a
// string is empty, or a null is encountered. Objects are never empty.
fn is_empty_at(node: &Value, path: &str) -> bool {
    let mut current = node;
    for segment in path.split('.') {
        if let Value::Array(items) = current {
            match items.first() {
                Some(first) => current = first,
                None => return true,
            }
        }
        match current.get(segment) {
            Some(Value::Null) | None => return true,
            Some(next) => current = next,
        }
    }
    match current {
        Value::Array(items) => items.is_empty(),
        Value::String(s) => s.is_empty(),
        Value::Null => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_equals() {
        let expr = PredicateParser::parse("system='http://loinc.org'").unwrap();
        assert_eq!(
            expr,
            PredicateExpr::Equals("system".into(), "http://loinc.org".into())
        );
    }

    #[test]
    fn test_parse_dotted_equals() {
        let expr = PredicateParser::parse("coding.system = 'urn:x'").unwrap();
        assert_eq!(
            expr,
            PredicateExpr::Equals("coding.system".into(), "urn:x".into())
        );
    }

    #[test]
    fn test_parse_exists_and_empty() {
        assert_eq!(
            PredicateParser::parse("value.exists()").unwrap(),
            PredicateExpr::Exists("value".into())
        );
        assert_eq!(
            PredicateParser::parse("note.empty()").unwrap(),
            PredicateExpr::Empty("note".into())
        );
    }

    #[test]
    fn test_parse_and_or_precedence() {
        // or splits first: (a AND b) OR c
        let expr = PredicateParser::parse("a='1' and b='2' or c='3'").unwrap();
        match expr {
            PredicateExpr::Or(left, right) => {
                assert!(matches!(*left, PredicateExpr::And(_, _)));
                assert!(matches!(*right, PredicateExpr::Equals(_, _)));
            }
            other => panic!("expected Or, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_grouping() {
        let expr = PredicateParser::parse("a='1' and (b='2' or c='3')").unwrap();
        match expr {
            PredicateExpr::And(_, right) => {
                assert!(matches!(*right, PredicateExpr::Or(_, _)));
            }
            other => panic!("expected And, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_case_insensitive_keywords() {
        assert!(PredicateParser::parse("a='1' AND b.EXISTS()").is_some());
    }

    #[test]
    fn test_parse_failures_are_none() {
        for bad in [
            "",
            "system=",
            "system='unterminated",
            "= 'x'",
            "exists()",
            "a='1' and",
            "a='1' banana b='2'",
            "path.unknown()",
        ] {
            assert!(PredicateParser::parse(bad).is_none(), "should fail: {bad}");
        }
    }

    #[test]
    fn test_evaluate_equals_first_element() {
        let node = json!({"coding": [{"system": "a"}, {"system": "b"}]});
        let expr = PredicateParser::parse("coding.system='a'").unwrap();
        assert!(PredicateEvaluator::evaluate(&expr, &node));
        let expr = PredicateParser::parse("coding.system='b'").unwrap();
        assert!(!PredicateEvaluator::evaluate(&expr, &node));
    }

    #[test]
    fn test_evaluate_exists() {
        let node = json!({"value": 1, "gone": null});
        assert!(PredicateEvaluator::evaluate(
            &PredicateParser::parse("value.exists()").unwrap(),
            &node
        ));
        assert!(!PredicateEvaluator::evaluate(
            &PredicateParser::parse("gone.exists()").unwrap(),
            &node
        ));
        assert!(!PredicateEvaluator::evaluate(
            &PredicateParser::parse("missing.exists()").unwrap(),
            &node
        ));
    }

    #[test]
    fn test_evaluate_empty() {
        let node = json!({"list": [], "text": "", "obj": {}, "full": ["x"]});
        let empty = |p: &str| {
            PredicateEvaluator::evaluate(&PredicateParser::parse(p).unwrap(), &node)
        };
        assert!(empty("list.empty()"));
        assert!(empty("text.empty()"));
        assert!(empty("missing.empty()"));
        assert!(!empty("obj.empty()"));
        assert!(!empty("full.empty()"));
    }

    #[test]
    fn test_evaluate_short_circuit() {
        let node = json!({"a": "1"});
        let expr = PredicateParser::parse("a='1' or missing.exists()").unwrap();
        assert!(PredicateEvaluator::evaluate(&expr, &node));
        let expr = PredicateParser::parse("a='2' and missing.exists()").unwrap();
        assert!(!PredicateEvaluator::evaluate(&expr, &node));
    }
}
