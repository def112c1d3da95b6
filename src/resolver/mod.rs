//! # Value Resolution
//!
//! Turns fetched records into the bytes an output secret holds: one property,
//! one tag, an expanded map, or a merged map over several records.
//!
//! Resolution is pure; providers fetch records and hand them here so every
//! backend shares one set of rules.

pub mod find;
pub mod path;

pub use find::FindMatcher;
pub use path::{descend, value_to_bytes};

use crate::domain::{MetadataPolicy, RemoteRecord, RemoteRef, SecretData};
use crate::errors::{Result, SyncError};
use serde_json::Value;
use std::collections::BTreeMap;

fn parse_json(raw: &[u8]) -> Option<Value> {
    serde_json::from_slice(raw).ok()
}

/// One property of a record's value.
///
/// An empty `path` selects `default_property`: its value when the record is a
/// JSON object holding it, otherwise the raw value. A non-empty path is matched
/// with longest-literal-key-first descent.
pub fn resolve_property(record: &RemoteRecord, path: &str, default_property: Option<&str>) -> Result<Vec<u8>> {
    if path.is_empty() {
        if let Some(default) = default_property {
            let decoded = parse_json(&record.value);
            if let Some(found) = decoded.as_ref().and_then(|v| v.get(default)) {
                return Ok(value_to_bytes(found));
            }
        }
        return Ok(record.value.clone());
    }

    let value = parse_json(&record.value).ok_or_else(|| SyncError::property_not_found(&record.name, path))?;
    descend(&value, path)
        .map(value_to_bytes)
        .ok_or_else(|| SyncError::property_not_found(&record.name, path))
}

/// One tag of a record, or all tags as a JSON object when `tag` is empty.
///
/// A tag name with dots is first looked up literally; otherwise the longest
/// tag name that prefixes it is decoded as JSON and the rest used as a path.
pub fn resolve_tag(record: &RemoteRecord, tag: &str) -> Result<Vec<u8>> {
    if tag.is_empty() {
        return Ok(serde_json::to_vec(&record.tags)?);
    }
    if let Some(value) = record.tags.get(tag) {
        return Ok(value.as_bytes().to_vec());
    }

    let mut end = tag.len();
    while let Some(split) = tag[..end].rfind('.') {
        let (name, rest) = (&tag[..split], &tag[split + 1..]);
        if let Some(found) = record
            .tags
            .get(name)
            .and_then(|raw| parse_json(raw.as_bytes()))
            .and_then(|json| descend(&json, rest).map(value_to_bytes))
        {
            return Ok(found);
        }
        end = split;
    }
    Err(SyncError::tag_not_found(&record.name, tag))
}

/// Resolve a remote reference against an already fetched record
pub fn resolve_ref(record: &RemoteRecord, remote_ref: &RemoteRef, default_property: Option<&str>) -> Result<Vec<u8>> {
    match remote_ref.metadata_policy {
        MetadataPolicy::Fetch => resolve_tag(record, &remote_ref.property),
        MetadataPolicy::None => resolve_property(record, &remote_ref.property, default_property),
    }
}

fn expand_object(key: &str, property: &str, value: &Value) -> Result<SecretData> {
    match value {
        Value::Object(map) => Ok(map.iter().map(|(k, v)| (k.clone(), value_to_bytes(v))).collect()),
        _ => Err(SyncError::cannot_expand(key, property)),
    }
}

/// Like [`resolve_property`] but the result must be a JSON object, expanded
/// into one entry per top-level key
pub fn resolve_map(record: &RemoteRecord, path: &str) -> Result<SecretData> {
    let value = parse_json(&record.value).ok_or_else(|| SyncError::cannot_expand(&record.name, path))?;
    let target = descend(&value, path).ok_or_else(|| SyncError::property_not_found(&record.name, path))?;
    expand_object(&record.name, path, target)
}

/// Map form of a remote reference: tags when metadata is fetched, the value otherwise
pub fn resolve_ref_map(record: &RemoteRecord, remote_ref: &RemoteRef) -> Result<SecretData> {
    match remote_ref.metadata_policy {
        MetadataPolicy::None => resolve_map(record, &remote_ref.property),
        MetadataPolicy::Fetch if remote_ref.property.is_empty() => Ok(record
            .tags
            .iter()
            .map(|(k, v)| (k.clone(), v.as_bytes().to_vec()))
            .collect()),
        MetadataPolicy::Fetch => {
            let raw = resolve_tag(record, &remote_ref.property)?;
            let value = parse_json(&raw)
                .ok_or_else(|| SyncError::cannot_expand(&record.name, &remote_ref.property))?;
            expand_object(&record.name, &remote_ref.property, &value)
        }
    }
}

/// Merge several records into one map.
///
/// Each record contributes its properties: just `property` when set, else
/// every top-level key of a JSON object value, else its whole value under its
/// own name. With exactly one record the property names are used bare; with
/// two or more each key becomes `<record-name>/<property-name>`.
pub fn resolve_many(records: &[RemoteRecord], property: &str) -> Result<SecretData> {
    let prefixed = records.len() > 1;
    let mut out = BTreeMap::new();

    for record in records {
        let entries: Vec<(String, Vec<u8>, bool)> = if !property.is_empty() {
            vec![(property.to_string(), resolve_property(record, property, None)?, true)]
        } else {
            match parse_json(&record.value) {
                Some(Value::Object(map)) => {
                    map.iter().map(|(k, v)| (k.clone(), value_to_bytes(v), true)).collect()
                }
                _ => vec![(record.name.clone(), record.value.clone(), false)],
            }
        };

        for (name, value, is_property) in entries {
            let key = if prefixed && is_property { format!("{}/{}", record.name, name) } else { name };
            out.insert(key, value);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(bytes: Vec<u8>) -> String {
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn test_default_property() {
        let record = RemoteRecord::new("db-creds", r#"{"password":"s3cr3t","user":"app"}"#);
        assert_eq!(text(resolve_property(&record, "", Some("password")).unwrap()), "s3cr3t");

        let plain = RemoteRecord::new("token", "abc123");
        assert_eq!(text(resolve_property(&plain, "", Some("password")).unwrap()), "abc123");
        assert_eq!(text(resolve_property(&record, "", None).unwrap()), r#"{"password":"s3cr3t","user":"app"}"#);
    }

    #[test]
    fn test_property_paths() {
        let record = RemoteRecord::new("cfg", r#"{"foo.json":"bar","foo":{"key":"value"},"n":7}"#);
        assert_eq!(text(resolve_property(&record, "foo.json", None).unwrap()), "bar");
        assert_eq!(text(resolve_property(&record, "foo.key", None).unwrap()), "value");
        assert_eq!(text(resolve_property(&record, "foo", None).unwrap()), r#"{"key":"value"}"#);
        assert_eq!(text(resolve_property(&record, "n", None).unwrap()), "7");

        let err = resolve_property(&record, "Age", None).unwrap_err();
        assert_eq!(err.to_string(), "property Age does not exist in key cfg");
    }

    #[test]
    fn test_property_on_non_json_value() {
        let record = RemoteRecord::new("plain", "not json");
        assert!(matches!(resolve_property(&record, "x", None), Err(SyncError::PropertyNotFound { .. })));
    }

    #[test]
    fn test_tags() {
        let record = RemoteRecord::new("kv", "ignored")
            .with_tag("dev", "true")
            .with_tag("foo", r#"{"key":"value","foo.json":"bar"}"#);

        assert_eq!(text(resolve_tag(&record, "dev").unwrap()), "true");
        assert_eq!(text(resolve_tag(&record, "foo.key").unwrap()), "value");
        assert_eq!(text(resolve_tag(&record, "foo.foo.json").unwrap()), "bar");

        let all: serde_json::Value = serde_json::from_slice(&resolve_tag(&record, "").unwrap()).unwrap();
        assert_eq!(all["dev"], "true");

        let err = resolve_tag(&record, "something").unwrap_err();
        assert!(matches!(err, SyncError::TagNotFound { ref tag, .. } if tag == "something"));
    }

    #[test]
    fn test_no_tags_renders_empty_object() {
        let record = RemoteRecord::new("kv", "v");
        assert_eq!(text(resolve_tag(&record, "").unwrap()), "{}");
    }

    #[test]
    fn test_resolve_ref_dispatches_on_metadata_policy() {
        let record = RemoteRecord::new("kv", r#"{"dev":"from-value"}"#).with_tag("dev", "from-tag");
        let by_tag = RemoteRef::new("kv").with_property("dev").fetch_metadata();
        let by_value = RemoteRef::new("kv").with_property("dev");
        assert_eq!(text(resolve_ref(&record, &by_tag, None).unwrap()), "from-tag");
        assert_eq!(text(resolve_ref(&record, &by_value, None).unwrap()), "from-value");
    }

    #[test]
    fn test_map_requires_object() {
        let record = RemoteRecord::new("cfg", r#"{"db":{"host":"h","port":5432},"name":"x"}"#);
        let map = resolve_map(&record, "db").unwrap();
        assert_eq!(map.get("host").cloned().map(text).as_deref(), Some("h"));
        assert_eq!(map.get("port").cloned().map(text).as_deref(), Some("5432"));

        assert!(matches!(resolve_map(&record, "name"), Err(SyncError::CannotExpand { .. })));
        let scalar = RemoteRecord::new("s", "plain");
        assert!(matches!(resolve_map(&scalar, ""), Err(SyncError::CannotExpand { .. })));
    }

    #[test]
    fn test_tag_map() {
        let record = RemoteRecord::new("kv", "v").with_tag("a", "1").with_tag("j", r#"{"x":"y"}"#);
        let all = resolve_ref_map(&record, &RemoteRef::new("kv").fetch_metadata()).unwrap();
        assert_eq!(all.len(), 2);
        let nested = resolve_ref_map(&record, &RemoteRef::new("kv").with_property("j").fetch_metadata()).unwrap();
        assert_eq!(nested.get("x").cloned().map(text).as_deref(), Some("y"));
    }

    #[test]
    fn test_many_naming() {
        let a = RemoteRecord::new("A", r#"{"password":"p1"}"#);
        let b = RemoteRecord::new("B", r#"{"password":"p2"}"#);

        let one = resolve_many(std::slice::from_ref(&a), "").unwrap();
        assert_eq!(one.keys().collect::<Vec<_>>(), vec!["password"]);

        let two = resolve_many(&[a, b], "").unwrap();
        assert_eq!(two.get("A/password").cloned().map(text).as_deref(), Some("p1"));
        assert_eq!(two.get("B/password").cloned().map(text).as_deref(), Some("p2"));
        assert_eq!(two.len(), 2);
    }

    #[test]
    fn test_many_with_scalars_uses_record_names() {
        let a = RemoteRecord::new("API_KEY", "k1");
        let b = RemoteRecord::new("DB_URL", "postgres://");
        let out = resolve_many(&[a, b], "").unwrap();
        assert_eq!(out.keys().collect::<Vec<_>>(), vec!["API_KEY", "DB_URL"]);
    }
}
