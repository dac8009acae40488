// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Root-owner resolution for workload metadata.

use crate::webhook::client::WebhookClient;
use crate::webhook::request::Workload;
use anyhow::Result;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use std::collections::HashSet;
use tracing::{debug, warn};

/// Controller kinds the owner walk follows, by kind and group.
pub const KNOWN_CONTROLLERS: [(&str, &str); 8] = [
    ("ReplicaSet", "apps"),
    ("Deployment", "apps"),
    ("StatefulSet", "apps"),
    ("DaemonSet", "apps"),
    ("ReplicationController", ""),
    ("Job", "batch"),
    ("CronJob", "batch"),
    ("DeploymentConfig", "apps.openshift.io"),
];

/// Whether `owner` is a controller reference to a kind the walk follows.
#[must_use]
pub fn is_known_controller(owner: &OwnerReference) -> bool {
    if owner.controller != Some(true) {
        return false;
    }
    let group = owner
        .api_version
        .split_once('/')
        .map_or("", |(group, _)| group);
    KNOWN_CONTROLLERS
        .iter()
        .any(|(kind, g)| *kind == owner.kind && *g == group)
}

/// Find the top-most well-known controller of `pod`.
///
/// A pod without a known controller is its own root and reports an empty kind. The walk
/// stops on a repeated owner; cycles do not exist in a healthy cluster.
///
/// # Errors
///
/// Returns an error if an owner's metadata cannot be read.
pub async fn find_root_owner<C>(client: &C, pod: &Pod, namespace: &str) -> Result<Workload>
where
    C: WebhookClient + ?Sized,
{
    let mut root = Workload {
        kind: String::new(),
        name: crate::webhook::request::pod_display_name(pod),
    };
    let mut owners = pod.metadata.owner_references.clone().unwrap_or_default();
    let mut visited = HashSet::new();

    while let Some(owner) = owners.iter().find(|o| is_known_controller(o)).cloned() {
        if !visited.insert((owner.kind.clone(), owner.name.clone())) {
            warn!(kind = %owner.kind, name = %owner.name, "Owner reference cycle detected");
            break;
        }

        let metadata = client.get_owner_metadata(&owner, namespace).await?;
        root = Workload {
            kind: owner.kind,
            name: owner.name,
        };
        owners = metadata.owner_references.unwrap_or_default();
    }

    debug!(kind = %root.kind, name = %root.name, "Resolved workload");
    Ok(root)
}

#[cfg(test)]
#[path = "owner_tests.rs"]
mod owner_tests;
