//! JSON utility functions.
//!
//! This module provides convenience functions for working with JSON.

use crate::error::Result;
use serde::{Deserialize, Serialize};

/// Parse a JSON string into a typed value.
pub fn parse<T>(json: &str) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
{
    serde_json::from_str(json).map_err(Into::into)
}

/// Serialize a value to a JSON string.
pub fn stringify<T>(value: &T, pretty: bool) -> Result<String>
where
    T: Serialize,
{
    if pretty {
        serde_json::to_string_pretty(value).map_err(Into::into)
    } else {
        serde_json::to_string(value).map_err(Into::into)
    }
}

/// Depth of the deepest nesting in a JSON value.
///
/// A scalar has depth 0; each object or array layer adds one.
pub fn nesting_depth(value: &serde_json::Value) -> usize {
    match value {
        serde_json::Value::Object(map) => {
            1 + map.values().map(nesting_depth).max().unwrap_or(0)
        }
        serde_json::Value::Array(items) => {
            1 + items.iter().map(nesting_depth).max().unwrap_or(0)
        }
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct TestData {
        name: String,
        count: i32,
    }

    #[test]
    fn test_parse_and_stringify() {
        let data = TestData {
            name: "test".to_string(),
            count: 42,
        };

        let json = stringify(&data, false).unwrap();
        let parsed: TestData = parse(&json).unwrap();

        assert_eq!(data, parsed);
    }

    #[test]
    fn test_parse_rejects_invalid_json() {
        let result: Result<TestData> = parse("{broken");
        assert!(result.is_err());
    }

    #[test]
    fn test_pretty_stringify() {
        let data = TestData {
            name: "test".to_string(),
            count: 1,
        };
        let pretty = stringify(&data, true).unwrap();
        assert!(pretty.contains('\n'));
    }

    #[test]
    fn test_nesting_depth() {
        assert_eq!(nesting_depth(&json!("leaf")), 0);
        assert_eq!(nesting_depth(&json!({})), 1);
        assert_eq!(nesting_depth(&json!({"a": {"b": [1, 2]}})), 3);
    }
}
