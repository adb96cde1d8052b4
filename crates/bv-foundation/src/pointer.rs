//! RFC 6901 JSON Pointer utilities.
//!
//! Pointers are built incrementally during tree traversal and resolved
//! against raw [`serde_json::Value`] documents. Token escaping follows
//! RFC 6901 section 3: `~` becomes `~0` and `/` becomes `~1`.

use serde_json::Value;

/// Escape a single reference token.
pub fn escape_token(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

/// Append a property token to a pointer.
pub fn push_token(pointer: &str, token: &str) -> String {
    format!("{pointer}/{}", escape_token(token))
}

/// Append an array index to a pointer.
pub fn push_index(pointer: &str, index: usize) -> String {
    format!("{pointer}/{index}")
}

/// Resolve a pointer against a JSON document.
///
/// Returns `None` when any token does not resolve. The empty pointer
/// resolves to the document itself.
pub fn resolve<'a>(root: &'a Value, pointer: &str) -> Option<&'a Value> {
    if pointer.is_empty() {
        return Some(root);
    }
    if !pointer.starts_with('/') {
        return None;
    }

    let mut current = root;
    for token in pointer[1..].split('/') {
        let token = token.replace("~1", "/").replace("~0", "~");
        current = match current {
            Value::Object(map) => map.get(&token)?,
            Value::Array(items) => {
                let index: usize = token.parse().ok()?;
                items.get(index)?
            }
            _ => return None,
        };
    }
    Some(current)
}
