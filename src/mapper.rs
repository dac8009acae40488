// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Namespace to `DynaKube` mapping.
//!
//! A namespace is owned by at most one `DynaKube`: the one with app injection whose
//! namespace selector matches the namespace labels and whose ignore list does not match
//! the namespace name. Two matching `DynaKube`s are a [`OperatorError::Conflict`].
//!
//! The decision is cached on the namespace in the
//! [`INSTANCE_LABEL`](crate::labels::INSTANCE_LABEL) label. Fan-out and the webhook read
//! that label; only the namespace mapper writes it.

use crate::crd::DynaKube;
use crate::errors::OperatorError;
use crate::labels::INSTANCE_LABEL;
use k8s_openapi::api::core::v1::Namespace;
use kube::ResourceExt;
use regex::Regex;
use std::collections::BTreeMap;

/// Whether `dk` selects a namespace with the given name and labels.
///
/// `DynaKube`s without app injection never select anything. Ignore-list entries that
/// are not valid regular expressions are skipped; `DynaKube::validate` reports them.
#[must_use]
pub fn dynakube_selects_namespace(
    dk: &DynaKube,
    namespace: &str,
    labels: &BTreeMap<String, String>,
) -> bool {
    if !dk.needs_app_injection() {
        return false;
    }

    let ignored = dk
        .spec
        .namespace_ignore_list
        .iter()
        .filter_map(|pattern| Regex::new(pattern).ok())
        .any(|re| re.is_match(namespace));
    if ignored {
        return false;
    }

    dk.spec
        .namespace_selector
        .as_ref()
        .is_none_or(|selector| selector.matches(labels))
}

/// Resolve the `DynaKube` owning a namespace.
///
/// Returns `Ok(None)` when nothing selects the namespace.
///
/// # Errors
///
/// Returns [`OperatorError::Conflict`] naming every matching `DynaKube` when more than
/// one selects the namespace.
pub fn resolve_dynakube_for_namespace<'a, I>(
    namespace: &Namespace,
    dynakubes: I,
) -> Result<Option<&'a DynaKube>, OperatorError>
where
    I: IntoIterator<Item = &'a DynaKube>,
{
    let name = namespace.name_any();
    let labels = namespace.labels();

    let matching: Vec<&DynaKube> = dynakubes
        .into_iter()
        .filter(|dk| dynakube_selects_namespace(dk, &name, labels))
        .collect();

    match matching.as_slice() {
        [] => Ok(None),
        [dk] => Ok(Some(dk)),
        many => {
            let mut names: Vec<String> = many.iter().map(|dk| dk.name_any()).collect();
            names.sort();
            Err(OperatorError::Conflict {
                namespace: name,
                dynakubes: names,
            })
        }
    }
}

/// Names of the namespaces whose instance label equals `dynakube`.
#[must_use]
pub fn namespaces_for_dynakube<'a, I>(dynakube: &str, namespaces: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a Namespace>,
{
    namespaces
        .into_iter()
        .filter(|ns| instance_label(ns) == Some(dynakube))
        .map(ResourceExt::name_any)
        .collect()
}

/// Value of the instance label on a namespace.
#[must_use]
pub fn instance_label(namespace: &Namespace) -> Option<&str> {
    namespace
        .labels()
        .get(INSTANCE_LABEL)
        .map(String::as_str)
        .filter(|v| !v.is_empty())
}

/// Platform and operator namespaces are never mapped.
#[must_use]
pub fn is_excluded_namespace(namespace: &str, operator_namespace: &str) -> bool {
    namespace == operator_namespace
        || namespace.starts_with("kube-")
        || namespace.starts_with("openshift")
}

/// What the namespace mapper has to do with a namespace's instance label.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LabelAction {
    /// Label is already correct (or absent and not needed)
    Keep,
    /// Set the label to this `DynaKube` name
    Set(String),
    /// Remove the label
    Remove,
    /// Several `DynaKube`s match; the label is removed and each gets a condition
    Conflict(Vec<String>),
}

/// Decide how the instance label of `namespace` must change.
#[must_use]
pub fn label_action<'a, I>(namespace: &Namespace, dynakubes: I, operator_namespace: &str) -> LabelAction
where
    I: IntoIterator<Item = &'a DynaKube>,
{
    let current = instance_label(namespace);

    if is_excluded_namespace(&namespace.name_any(), operator_namespace) {
        return if current.is_some() {
            LabelAction::Remove
        } else {
            LabelAction::Keep
        };
    }

    match resolve_dynakube_for_namespace(namespace, dynakubes) {
        Ok(Some(dk)) => {
            let name = dk.name_any();
            if current == Some(name.as_str()) {
                LabelAction::Keep
            } else {
                LabelAction::Set(name)
            }
        }
        Ok(None) if current.is_some() => LabelAction::Remove,
        Ok(None) => LabelAction::Keep,
        Err(OperatorError::Conflict { dynakubes, .. }) => LabelAction::Conflict(dynakubes),
        Err(_) => LabelAction::Keep,
    }
}

#[cfg(test)]
#[path = "mapper_tests.rs"]
mod mapper_tests;
