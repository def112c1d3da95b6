//! Dotted-path descent into JSON values.
//!
//! Map keys may themselves contain dots, so a path like `a.b.c` is ambiguous.
//! At every level the longest literal key wins: the whole remaining path is
//! tried as one key first, then successively shorter prefixes, descending into
//! each match and backtracking when the rest of the path does not resolve.
//!
//! | value                          | path           | result    |
//! |--------------------------------|----------------|-----------|
//! | `{"foo.json":"bar"}`           | `foo.json`     | `"bar"`   |
//! | `{"foo":{"key":"value"}}`      | `foo.key`      | `"value"` |
//! | `{"a":{"b.c":1},"a.b":{"c":2}}`| `a.b.c`        | `2`       |

use serde_json::Value;

/// Find the value at `path` below `value`; an empty path is the value itself
pub fn descend<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }

    if let Some(child) = child(value, path) {
        return Some(child);
    }

    let mut end = path.len();
    while let Some(split) = path[..end].rfind('.') {
        let (head, rest) = (&path[..split], &path[split + 1..]);
        if let Some(found) = child(value, head).and_then(|c| descend(c, rest)) {
            return Some(found);
        }
        end = split;
    }
    None
}

fn child<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => map.get(key),
        Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }
}

/// Text form of a resolved value: strings verbatim, `null` empty, other
/// scalars in their JSON spelling, objects and arrays re-serialized.
pub fn value_to_bytes(value: &Value) -> Vec<u8> {
    match value {
        Value::String(s) => s.as_bytes().to_vec(),
        Value::Null => Vec::new(),
        Value::Bool(b) => b.to_string().into_bytes(),
        Value::Number(n) => n.to_string().into_bytes(),
        Value::Object(_) | Value::Array(_) => value.to_string().into_bytes(),
    }
}
