//! Aggregated validation failures.
//!
//! Validators never stop at the first violated rule: every issue is collected
//! in order and rendered as one combined message.

use std::fmt;

/// A single violated rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    /// Dotted path of the offending field (e.g. `spec.dataFrom[0]`)
    pub field: String,
    pub message: String,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.field.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.field, self.message)
        }
    }
}

/// Ordered collection of validation issues
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors {
    issues: Vec<ValidationIssue>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a violated rule
    pub fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.issues.push(ValidationIssue { field: field.into(), message: message.into() });
    }

    /// Append all issues from another collection, prefixing their field paths
    pub fn extend_prefixed(&mut self, prefix: &str, other: ValidationErrors) {
        for issue in other.issues {
            let field = match (prefix.is_empty(), issue.field.is_empty()) {
                (true, _) => issue.field,
                (false, true) => prefix.to_string(),
                (false, false) => format!("{}.{}", prefix, issue.field),
            };
            self.issues.push(ValidationIssue { field, message: issue.message });
        }
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn len(&self) -> usize {
        self.issues.len()
    }

    pub fn issues(&self) -> &[ValidationIssue] {
        &self.issues
    }

    /// `Ok(())` when nothing was recorded, otherwise the whole collection as an error
    pub fn into_result(self) -> std::result::Result<(), ValidationErrors> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self.issues.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ");
        write!(f, "validation failed: {}", joined)
    }
}

impl std::error::Error for ValidationErrors {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_renders_every_issue_in_order() {
        let mut errs = ValidationErrors::new();
        errs.push("spec", "either data or dataFrom should be specified");
        errs.push("spec.target", "deletionPolicy=Merge must not be used with creationPolicy=None");

        assert_eq!(errs.len(), 2);
        assert_eq!(
            errs.to_string(),
            "validation failed: spec: either data or dataFrom should be specified; \
             spec.target: deletionPolicy=Merge must not be used with creationPolicy=None"
        );
    }

    #[test]
    fn test_prefixes_nested_fields() {
        let mut inner = ValidationErrors::new();
        inner.push("server", "cannot be empty");
        inner.push("", "bad auth");

        let mut outer = ValidationErrors::new();
        outer.extend_prefixed("spec.provider.vault", inner);

        assert_eq!(outer.issues()[0].field, "spec.provider.vault.server");
        assert_eq!(outer.issues()[1].field, "spec.provider.vault");
    }

    #[test]
    fn test_empty_collection_is_ok() {
        assert!(ValidationErrors::new().into_result().is_ok());
    }
}
