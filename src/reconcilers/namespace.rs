// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Namespace mapper.
//!
//! Keeps the [`INSTANCE_LABEL`] of every namespace in line with the `DynaKube`
//! selectors. The namespace controller runs it for one namespace on every namespace
//! event; the `DynaKube` reconciler runs it over all namespaces on each pass through
//! [`map_namespaces_for_dynakube`], so selector edits propagate without waiting for a
//! namespace event.
//!
//! A namespace selected by several `DynaKube`s loses its label and every one of those
//! `DynaKube`s gets a `NamespaceConflict` condition.

use crate::context::Context;
use crate::crd::DynaKube;
use crate::errors::OperatorError;
use crate::labels::INSTANCE_LABEL;
use crate::mapper::{instance_label, label_action, LabelAction};
use crate::reconcilers::status::patch_dynakube_condition;
use crate::status_reasons::{CONDITION_TYPE_NAMESPACE_CONFLICT, REASON_NAMESPACE_CONFLICT};
use anyhow::Result;
use k8s_openapi::api::core::v1::Namespace;
use kube::api::{ListParams, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Api, Client, ResourceExt};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Metrics label of this controller.
pub const RESOURCE_TYPE: &str = "Namespace";

/// Merge patch that brings the instance label of `namespace` in line with `action`,
/// or `None` when nothing has to be written.
#[must_use]
pub fn label_patch(namespace: &Namespace, action: &LabelAction) -> Option<Value> {
    match action {
        LabelAction::Keep => None,
        LabelAction::Set(name) => Some(json!({ "metadata": { "labels": { INSTANCE_LABEL: name } } })),
        LabelAction::Remove | LabelAction::Conflict(_) => instance_label(namespace)
            .map(|_| json!({ "metadata": { "labels": { INSTANCE_LABEL: Value::Null } } })),
    }
}

/// Write the label change of `action`. Returns `true` when the namespace was patched.
///
/// # Errors
///
/// Returns an error if the patch fails.
pub async fn apply_label_action(client: &Client, namespace: &Namespace, action: &LabelAction) -> Result<bool> {
    let Some(patch) = label_patch(namespace, action) else {
        return Ok(false);
    };

    let name = namespace.name_any();
    let api: Api<Namespace> = Api::all(client.clone());
    api.patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
        .await?;

    match action {
        LabelAction::Set(dynakube) => info!(namespace = %name, dynakube = %dynakube, "Mapped namespace"),
        LabelAction::Conflict(dynakubes) => warn!(
            namespace = %name,
            dynakubes = %dynakubes.join(", "),
            "Namespace selected by several DynaKubes, removed mapping"
        ),
        _ => info!(namespace = %name, "Unmapped namespace"),
    }
    Ok(true)
}

/// Result of mapping all namespaces, seen from one `DynaKube`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MappingSummary {
    /// Namespaces labelled with this `DynaKube` after the pass, sorted
    pub mapped: Vec<String>,
    /// Contested namespaces involving this `DynaKube`, with every selecting `DynaKube`
    pub conflicts: BTreeMap<String, Vec<String>>,
}

impl MappingSummary {
    /// Condition message naming every conflict, empty without conflicts.
    #[must_use]
    pub fn conflict_message(&self) -> String {
        self.conflicts
            .iter()
            .map(|(namespace, dynakubes)| {
                OperatorError::Conflict {
                    namespace: namespace.clone(),
                    dynakubes: dynakubes.clone(),
                }
                .to_string()
            })
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Label action for every namespace.
#[must_use]
pub fn plan_namespace_mapping(
    namespaces: &[Namespace],
    dynakubes: &[&DynaKube],
    operator_namespace: &str,
) -> Vec<LabelAction> {
    namespaces
        .iter()
        .map(|ns| label_action(ns, dynakubes.iter().copied(), operator_namespace))
        .collect()
}

/// What a mapping plan means for `dynakube`.
#[must_use]
pub fn summarize_mapping(dynakube: &str, namespaces: &[Namespace], plan: &[LabelAction]) -> MappingSummary {
    let mut summary = MappingSummary::default();
    for (namespace, action) in namespaces.iter().zip(plan) {
        let name = namespace.name_any();
        match action {
            LabelAction::Set(owner) if owner == dynakube => summary.mapped.push(name),
            LabelAction::Keep if instance_label(namespace) == Some(dynakube) => {
                summary.mapped.push(name);
            }
            LabelAction::Conflict(owners) if owners.iter().any(|o| o == dynakube) => {
                summary.conflicts.insert(name, owners.clone());
            }
            _ => {}
        }
    }
    summary.mapped.sort();
    summary
}

/// Map every namespace against `dynakubes` and report the outcome for `dk`.
///
/// # Errors
///
/// Returns an error if namespaces cannot be listed or a label patch fails.
pub async fn map_namespaces_for_dynakube(
    client: &Client,
    dk: &DynaKube,
    dynakubes: &[&DynaKube],
    operator_namespace: &str,
) -> Result<MappingSummary> {
    let api: Api<Namespace> = Api::all(client.clone());
    let namespaces = api.list(&ListParams::default()).await?.items;

    let plan = plan_namespace_mapping(&namespaces, dynakubes, operator_namespace);
    let mut patched = 0;
    for (namespace, action) in namespaces.iter().zip(&plan) {
        if apply_label_action(client, namespace, action).await? {
            patched += 1;
        }
    }

    let summary = summarize_mapping(&dk.name_any(), &namespaces, &plan);
    debug!(
        dynakube = %dk.name_any(),
        mapped = summary.mapped.len(),
        conflicts = summary.conflicts.len(),
        patched,
        "Mapped namespaces"
    );
    Ok(summary)
}

/// Reconcile the instance label of one namespace.
///
/// # Errors
///
/// Returns an error if the label patch or a conflict condition update fails.
pub async fn reconcile_namespace(ctx: Arc<Context>, namespace: Arc<Namespace>) -> Result<Action> {
    let dynakubes = ctx.stores.dynakubes();
    let action = label_action(
        &namespace,
        dynakubes.iter().map(|dk| &**dk),
        &ctx.config.namespace,
    );
    apply_label_action(&ctx.client, &namespace, &action).await?;

    if let LabelAction::Conflict(names) = &action {
        let message = OperatorError::Conflict {
            namespace: namespace.name_any(),
            dynakubes: names.clone(),
        }
        .to_string();
        for dk in dynakubes.iter().filter(|dk| names.contains(&dk.name_any())) {
            patch_dynakube_condition(
                &ctx.client,
                dk,
                CONDITION_TYPE_NAMESPACE_CONFLICT,
                "True",
                REASON_NAMESPACE_CONFLICT,
                &message,
            )
            .await?;
        }
    }

    Ok(Action::await_change())
}

#[cfg(test)]
#[path = "namespace_tests.rs"]
mod namespace_tests;
