//! FHIR dotted-path navigation over the raw bundle.
//!
//! Converts paths such as `Observation.component[0].valueString` or
//! `Bundle.entry[2].resource.code.coding.where(system='http://loinc.org').code`
//! into RFC 6901 JSON Pointers, walking the raw JSON tree only. Navigation
//! never fails loudly: any unresolvable segment yields `None`, which keeps
//! the navigator usable on bundles that also carry parse violations.

use serde_json::Value;

use crate::predicate::{PredicateEvaluator, PredicateParser};
use bv_foundation::pointer;

/// One segment of a dotted path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Property(String),
    ArrayIndex(usize),
    /// Raw predicate text from a `where(...)` clause.
    Where(String),
}

/// A resolved path: the pointer and the value it designates.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved<'a> {
    pub pointer: String,
    pub value: &'a Value,
}

/// Stateless path resolver.
pub struct PathNavigator;

impl PathNavigator {
    /// Resolve a path against a bundle.
    ///
    /// With `entry_index`, `Bundle.entry[entry_index].resource` is bound as
    /// the starting node and the leading resource-type segment is consumed.
    /// Without it, a leading resource-type segment selects the first entry
    /// whose `resourceType` matches; a leading `Bundle` segment walks from
    /// the document root.
    pub fn resolve<'a>(
        bundle: &'a Value,
        path: &str,
        entry_index: Option<usize>,
    ) -> Option<Resolved<'a>> {
        let segments = segment_path(path)?;
        let mut segments = segments.as_slice();

        let mut node = bundle;
        let mut ptr = String::new();

        match segments.first() {
            Some(PathSegment::Property(name)) if name == "Bundle" => {
                segments = &segments[1..];
            }
            Some(PathSegment::Property(name)) if is_resource_type_name(name) => {
                let entries = bundle.get("entry")?.as_array()?;
                let index = match entry_index {
                    Some(index) => {
                        let resource = entries.get(index)?.get("resource")?;
                        if resource.get("resourceType").and_then(Value::as_str)
                            != Some(name.as_str())
                        {
                            return None;
                        }
                        index
                    }
                    None => entries.iter().position(|entry| {
                        entry
                            .get("resource")
                            .and_then(|r| r.get("resourceType"))
                            .and_then(Value::as_str)
                            == Some(name.as_str())
                    })?,
                };
                node = entries.get(index)?.get("resource")?;
                ptr = format!("/entry/{index}/resource");
                segments = &segments[1..];
            }
            _ => {}
        }

        for segment in segments {
            match segment {
                PathSegment::Property(name) => {
                    // Implicit first-match descent when a property is
                    // applied to an array.
                    if let Value::Array(items) = node {
                        node = items.first()?;
                        ptr = pointer::push_index(&ptr, 0);
                    }
                    node = node.get(name.as_str())?;
                    ptr = pointer::push_token(&ptr, name);
                }
                PathSegment::ArrayIndex(index) => {
                    let items = node.as_array()?;
                    node = items.get(*index)?;
                    ptr = pointer::push_index(&ptr, *index);
                }
                PathSegment::Where(raw) => {
                    let expr = PredicateParser::parse(raw)?;
                    let items = node.as_array()?;
                    let index = items
                        .iter()
                        .position(|item| PredicateEvaluator::evaluate(&expr, item))?;
                    node = &items[index];
                    ptr = pointer::push_index(&ptr, index);
                }
            }
        }

        Some(Resolved {
            pointer: ptr,
            value: node,
        })
    }

    /// Resolve a path to its JSON Pointer only.
    pub fn to_pointer(bundle: &Value, path: &str, entry_index: Option<usize>) -> Option<String> {
        Self::resolve(bundle, path, entry_index).map(|r| r.pointer)
    }
}

fn is_resource_type_name(name: &str) -> bool {
    name.chars().next().is_some_and(|c| c.is_ascii_uppercase())
}

/// Split a dotted path into segments, honoring `[index]` suffixes and
/// `where(...)` clauses. Dots inside a where-clause (including inside
/// quoted literals) do not split. Returns `None` on malformed input.
pub fn segment_path(path: &str) -> Option<Vec<PathSegment>> {
    let mut segments = Vec::new();

    let mut depth = 0usize;
    let mut in_quote = false;
    let mut chunk = String::new();

    for c in path.chars() {
        match c {
            '\'' => {
                in_quote = !in_quote;
                chunk.push(c);
            }
            '(' if !in_quote => {
                depth += 1;
                chunk.push(c);
            }
            ')' if !in_quote => {
                depth = depth.checked_sub(1)?;
                chunk.push(c);
            }
            '.' if depth == 0 && !in_quote => {
                push_chunk(&mut segments, &chunk)?;
                chunk.clear();
            }
            _ => chunk.push(c),
        }
    }
    if depth != 0 || in_quote {
        return None;
    }
    push_chunk(&mut segments, &chunk)?;

    if segments.is_empty() {
        return None;
    }
    Some(segments)
}

fn push_chunk(segments: &mut Vec<PathSegment>, chunk: &str) -> Option<()> {
    if chunk.is_empty() {
        return None;
    }

    if let Some(inner) = chunk.strip_prefix("where(").and_then(|s| s.strip_suffix(')')) {
        segments.push(PathSegment::Where(inner.to_string()));
        return Some(());
    }

    if let Some(open) = chunk.find('[') {
        let close = chunk.strip_suffix(']')?;
        let name = &chunk[..open];
        let index: usize = close[open + 1..].parse().ok()?;
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return None;
        }
        segments.push(PathSegment::Property(name.to_string()));
        segments.push(PathSegment::ArrayIndex(index));
        return Some(());
    }

    if !chunk.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return None;
    }
    segments.push(PathSegment::Property(chunk.to_string()));
    Some(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bundle() -> Value {
        json!({
            "resourceType": "Bundle",
            "type": "collection",
            "entry": [
                {
                    "resource": {
                        "resourceType": "Patient",
                        "id": "p1",
                        "name": [{"family": "Ono", "given": ["Rin"]}]
                    }
                },
                {
                    "resource": {
                        "resourceType": "Observation",
                        "id": "o1",
                        "code": {
                            "coding": [
                                {"system": "http://example.org", "code": "x"},
                                {"system": "http://loinc.org", "code": "15074-8"}
                            ]
                        }
                    }
                }
            ]
        })
    }

    #[test]
    fn test_segment_simple() {
        let segments = segment_path("Patient.name[0].family").unwrap();
        assert_eq!(
            segments,
            vec![
                PathSegment::Property("Patient".into()),
                PathSegment::Property("name".into()),
                PathSegment::ArrayIndex(0),
                PathSegment::Property("family".into()),
            ]
        );
    }

    #[test]
    fn test_segment_where_keeps_dots() {
        let segments =
            segment_path("code.coding.where(system='http://loinc.org').code").unwrap();
        assert_eq!(
            segments,
            vec![
                PathSegment::Property("code".into()),
                PathSegment::Property("coding".into()),
                PathSegment::Where("system='http://loinc.org'".into()),
                PathSegment::Property("code".into()),
            ]
        );
    }

    #[test]
    fn test_segment_malformed() {
        assert!(segment_path("").is_none());
        assert!(segment_path("a..b").is_none());
        assert!(segment_path("a[x]").is_none());
        assert!(segment_path("a[1").is_none());
        assert!(segment_path("where(unclosed").is_none());
    }

    #[test]
    fn test_resolve_resource_type_scan() {
        let bundle = bundle();
        let resolved =
            PathNavigator::resolve(&bundle, "Patient.name[0].family", None).unwrap();
        assert_eq!(resolved.pointer, "/entry/0/resource/name/0/family");
        assert_eq!(resolved.value, &json!("Ono"));
    }

    #[test]
    fn test_resolve_with_entry_index() {
        let bundle = bundle();
        let resolved = PathNavigator::resolve(&bundle, "Observation.id", Some(1)).unwrap();
        assert_eq!(resolved.pointer, "/entry/1/resource/id");

        // entry_index pointing at a different resource type misses
        assert!(PathNavigator::resolve(&bundle, "Observation.id", Some(0)).is_none());
    }

    #[test]
    fn test_resolve_bundle_rooted() {
        let bundle = bundle();
        let pointer = PathNavigator::to_pointer(
            &bundle,
            "Bundle.entry[1].resource.code.coding.where(system='http://loinc.org').code",
            None,
        )
        .unwrap();
        assert_eq!(pointer, "/entry/1/resource/code/coding/1/code");
        assert_eq!(
            bv_foundation::pointer::resolve(&bundle, &pointer),
            Some(&json!("15074-8"))
        );
    }

    #[test]
    fn test_resolve_where_no_match_is_none() {
        let bundle = bundle();
        assert!(PathNavigator::to_pointer(
            &bundle,
            "Observation.code.coding.where(system='urn:none').code",
            Some(1),
        )
        .is_none());
    }

    #[test]
    fn test_resolve_unparseable_predicate_is_none() {
        let bundle = bundle();
        assert!(PathNavigator::to_pointer(
            &bundle,
            "Observation.code.coding.where(system=).code",
            Some(1),
        )
        .is_none());
    }

    #[test]
    fn test_resolve_missing_segment_is_none() {
        let bundle = bundle();
        assert!(PathNavigator::to_pointer(&bundle, "Patient.birthDate", None).is_none());
        assert!(PathNavigator::to_pointer(&bundle, "Medication.id", None).is_none());
    }

    #[test]
    fn test_implicit_first_match_descent() {
        let bundle = bundle();
        let resolved = PathNavigator::resolve(&bundle, "Patient.name.family", None).unwrap();
        assert_eq!(resolved.pointer, "/entry/0/resource/name/0/family");
    }
}
