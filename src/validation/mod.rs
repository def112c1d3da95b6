//! # Validation
//!
//! Structural and policy rules for declarative objects, run at admission and
//! again before every reconciliation. Every rule is evaluated; all violations
//! come back together in one [`ValidationErrors`].

use crate::domain::{
    CreationPolicy, DataFromSource, DeletionPolicy, ExternalSecretSpec, PushSecretSpec, SecretKeySelector, SourceRef,
    StoreSpec,
};
use crate::errors::{Result, SyncError, ValidationErrors};
use crate::providers::ProviderRegistry;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

pub const ERR_REQUIRE_NAMESPACE: &str = "cluster scope requires namespace";
pub const ERR_NAMESPACE_NOT_ALLOWED: &str =
    "namespace should either be empty or match the namespace of the SecretStore for a namespaced SecretStore";

/// Keys of the local target secret
static SECRET_KEY_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[-._a-zA-Z0-9]+$").unwrap());

/// Validate a desired-secret spec, reporting every violated rule.
pub fn validate_external_secret(spec: &ExternalSecretSpec) -> Result<()> {
    let mut errors = ValidationErrors::new();

    validate_policies(spec, &mut errors);

    if spec.data.is_empty() && spec.data_from.is_empty() {
        errors.push("spec", "either data or dataFrom should be specified");
    }

    for (i, source) in spec.data_from.iter().enumerate() {
        validate_data_from(source, &format!("spec.dataFrom[{}]", i), &mut errors);
    }

    for (i, data) in spec.data.iter().enumerate() {
        if !SECRET_KEY_REGEX.is_match(&data.secret_key) {
            errors.push(
                format!("spec.data[{}].secretKey", i),
                "must consist of alphanumeric characters, '-', '_' or '.'",
            );
        }
        if data.remote_ref.key.is_empty() {
            errors.push(format!("spec.data[{}].remoteRef.key", i), "cannot be empty");
        }
    }

    if spec.secret_store_ref.name.is_empty() && needs_default_store(spec) {
        errors.push("spec.secretStoreRef.name", "cannot be empty when an entry has no sourceRef");
    }

    validate_duplicate_keys(spec, &mut errors);

    errors.into_result().map_err(SyncError::from)
}

fn validate_policies(spec: &ExternalSecretSpec, errors: &mut ValidationErrors) {
    let target = &spec.target;
    if target.deletion_policy == DeletionPolicy::Delete && target.creation_policy != CreationPolicy::Owner {
        errors.push(
            "spec.target",
            "deletionPolicy=Delete must not be used when the controller doesn't own the secret. Please set creationPolicy=Owner",
        );
    }
    if target.deletion_policy == DeletionPolicy::Merge && target.creation_policy == CreationPolicy::None {
        errors.push(
            "spec.target",
            "deletionPolicy=Merge must not be used with creationPolicy=None. There is no Secret to merge with",
        );
    }
}

fn validate_data_from(source: &DataFromSource, field: &str, errors: &mut ValidationErrors) {
    let generator = source.uses_generator();
    let set = [source.extract.is_some(), source.find.is_some(), generator].iter().filter(|s| **s).count();
    if set > 1 {
        errors.push(field, "extract, find, or generatorRef cannot be set at the same time");
    }

    if source.extract.is_none() && source.find.is_none() && source.source_ref.is_none() {
        errors.push(field, "either extract, find, or sourceRef must be set to dataFrom");
    }

    if let Some(ref source_ref) = source.source_ref {
        if source_ref.generator_ref.is_none() && source_ref.store_ref.is_none() {
            errors.push(field, "generatorRef or storeRef must be set when using sourceRef in dataFrom");
        }
        // A store override alone names no records
        if source_ref.store_ref.is_some() && !generator && source.extract.is_none() && source.find.is_none() {
            errors.push(field, "extract or find must be set when sourceRef only selects a store");
        }
    }
}

/// Only enforced with `Retain`
fn validate_duplicate_keys(spec: &ExternalSecretSpec, errors: &mut ValidationErrors) {
    if spec.target.deletion_policy != DeletionPolicy::Retain {
        return;
    }
    let mut seen = HashSet::new();
    for data in &spec.data {
        if !seen.insert(data.secret_key.as_str()) {
            errors.push("spec.data", format!("duplicate secretKey found: {}", data.secret_key));
        }
    }
}

fn needs_default_store(spec: &ExternalSecretSpec) -> bool {
    let has_source = |s: &Option<SourceRef>| {
        s.as_ref().is_some_and(|s| s.store_ref.is_some() || s.generator_ref.is_some())
    };
    spec.data.iter().any(|d| !has_source(&d.source_ref)) || spec.data_from.iter().any(|d| !has_source(&d.source_ref))
}

/// Validate a push declaration, reporting every violated rule.
pub fn validate_push_secret(spec: &PushSecretSpec) -> Result<()> {
    let mut errors = ValidationErrors::new();

    if spec.secret_store_refs.is_empty() {
        errors.push("spec.secretStoreRefs", "at least one store must be referenced");
    }
    if spec.source_secret.is_empty() {
        errors.push("spec.sourceSecret", "cannot be empty");
    }
    if spec.data.is_empty() {
        errors.push("spec.data", "at least one entry must be specified");
    }

    let mut seen = HashSet::new();
    for (i, data) in spec.data.iter().enumerate() {
        if data.remote_key.is_empty() {
            errors.push(format!("spec.data[{}].remoteKey", i), "remote key must be defined");
        } else if !seen.insert((data.remote_key.as_str(), data.property())) {
            errors.push("spec.data", format!("duplicate remoteKey found: {}", data.remote_key));
        }
    }

    errors.into_result().map_err(SyncError::from)
}

/// Validate a store: identity, exactly one backend, then the backend's own rules.
///
/// Returns warnings on success.
pub fn validate_store(registry: &ProviderRegistry, store: &StoreSpec) -> Result<Vec<String>> {
    let mut errors = ValidationErrors::new();

    if store.name().is_empty() {
        errors.push("metadata.name", "cannot be empty");
    }
    match (store.identity.kind.is_cluster(), store.namespace()) {
        (false, None) | (false, Some("")) => errors.push("metadata.namespace", "a SecretStore must be namespaced"),
        (true, Some(_)) => errors.push("metadata.namespace", "a ClusterSecretStore cannot be namespaced"),
        _ => {}
    }

    let backend = match registry.lookup(store) {
        Ok(descriptor) => match registry.validate_store(store) {
            Err(SyncError::Validation(inner)) => {
                let mut nested = ValidationErrors::new();
                nested.extend_prefixed(&format!("spec.provider.{}", descriptor.kind), inner);
                Err(SyncError::Validation(nested))
            }
            other => other,
        },
        Err(e) => Err(e),
    };

    match backend {
        Ok(warnings) => {
            errors.into_result()?;
            Ok(warnings)
        }
        Err(SyncError::Validation(nested)) => {
            errors.extend_prefixed("", nested);
            Err(SyncError::Validation(errors))
        }
        Err(other) if errors.is_empty() => Err(other),
        Err(other) => {
            errors.push("spec.provider", other.to_string());
            Err(SyncError::Validation(errors))
        }
    }
}

/// Namespace rules for a selector used by `store`
pub fn validate_selector_namespace(
    store: &StoreSpec,
    selector: &SecretKeySelector,
    field: &str,
    errors: &mut ValidationErrors,
) {
    let requested = selector.namespace.as_deref().filter(|ns| !ns.is_empty());
    if store.identity.kind.is_cluster() {
        if requested.is_none() {
            errors.push(format!("{}.namespace", field), ERR_REQUIRE_NAMESPACE);
        }
    } else if requested.is_some_and(|ns| Some(ns) != store.namespace()) {
        errors.push(format!("{}.namespace", field), ERR_NAMESPACE_NOT_ALLOWED);
    }
}

/// Namespace rules plus non-empty name and key
pub fn validate_selector(store: &StoreSpec, selector: &SecretKeySelector, field: &str, errors: &mut ValidationErrors) {
    validate_selector_namespace(store, selector, field, errors);
    if selector.name.is_empty() {
        errors.push(format!("{}.name", field), "cannot be empty");
    }
    if selector.key.is_empty() {
        errors.push(format!("{}.key", field), "cannot be empty");
    }
}
