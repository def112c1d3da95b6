//! Find-query matching.

use crate::domain::FindQuery;
use crate::errors::{Result, SyncError};
use regex::Regex;
use std::collections::BTreeMap;

/// A compiled [`FindQuery`]
#[derive(Debug, Clone)]
pub struct FindMatcher {
    path: Option<String>,
    name: Option<Regex>,
    tags: BTreeMap<String, String>,
}

impl FindMatcher {
    pub fn new(query: &FindQuery) -> Result<Self> {
        let name = query
            .name
            .as_ref()
            .map(|n| {
                Regex::new(&n.regexp).map_err(|e| {
                    SyncError::config_with_source(format!("invalid name regexp {}", n.regexp), Box::new(e))
                })
            })
            .transpose()?;
        Ok(Self { path: query.path.clone().filter(|p| !p.is_empty()), name, tags: query.tags.clone() })
    }

    pub fn matches_path(&self, key: &str) -> bool {
        self.path.as_deref().map_or(true, |prefix| key.starts_with(prefix))
    }

    pub fn matches_name(&self, name: &str) -> bool {
        self.name.as_ref().map_or(true, |re| re.is_match(name))
    }

    pub fn matches_tags(&self, tags: &BTreeMap<String, String>) -> bool {
        self.tags.iter().all(|(k, v)| tags.get(k) == Some(v))
    }

    /// All three filters at once
    pub fn matches(&self, key: &str, tags: &BTreeMap<String, String>) -> bool {
        self.matches_path(key) && self.matches_name(key) && self.matches_tags(tags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FindName;

    fn tags(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_name_regexp() {
        let matcher = FindMatcher::new(&FindQuery::by_name("^db-")).unwrap();
        assert!(matcher.matches("db-primary", &BTreeMap::new()));
        assert!(!matcher.matches("app-db", &BTreeMap::new()));
    }

    #[test]
    fn test_tags_and_path() {
        let query = FindQuery {
            path: Some("team-a/".to_string()),
            tags: tags(&[("env", "dev")]),
            ..Default::default()
        };
        let matcher = FindMatcher::new(&query).unwrap();
        assert!(matcher.matches("team-a/db", &tags(&[("env", "dev"), ("x", "y")])));
        assert!(!matcher.matches("team-a/db", &tags(&[("env", "prod")])));
        assert!(!matcher.matches("team-b/db", &tags(&[("env", "dev")])));
    }

    #[test]
    fn test_invalid_regexp_is_config_error() {
        let query = FindQuery { name: Some(FindName { regexp: "(".to_string() }), ..Default::default() };
        assert!(FindMatcher::new(&query).unwrap_err().is_config());
    }

    #[test]
    fn test_empty_query_matches_everything() {
        let matcher = FindMatcher::new(&FindQuery::default()).unwrap();
        assert!(matcher.matches("anything", &BTreeMap::new()));
    }
}
