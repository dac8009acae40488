// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Workload metadata enrichment: root owner, enrichment directory and ingest endpoint.

use crate::constants::{
    DATA_INGEST_ENDPOINT_VOLUME, DATA_INGEST_VOLUME, ENRICHMENT_ENDPOINT_PATH, ENRICHMENT_PATH,
    ENV_DATA_INGEST_INJECTED, ENV_DEPLOYMENT_METADATA, ENV_WORKLOAD_KIND, ENV_WORKLOAD_NAME,
    SECRET_ENDPOINT_NAME,
};
use crate::errors::OperatorError;
use crate::feature_flags;
use crate::labels::{ANNOTATION_DATA_INGEST_INJECT, ANNOTATION_DATA_INGEST_INJECTED};
use crate::webhook::mutators::{deployment_metadata, opted_in};
use crate::webhook::request::{add_env, add_mount, has_mount_path, set_env, MutationRequest};
use k8s_openapi::api::core::v1::{Container, EmptyDirVolumeSource, PodSpec, SecretVolumeSource, Volume};

#[must_use]
pub fn enabled(req: &MutationRequest) -> bool {
    !feature_flags::disable_metadata_enrichment(&req.dynakube)
        && opted_in(req, ANNOTATION_DATA_INGEST_INJECT)
}

#[must_use]
pub fn injected(req: &MutationRequest) -> bool {
    req.annotation(ANNOTATION_DATA_INGEST_INJECTED) == Some("true")
}

fn volumes() -> [Volume; 2] {
    [
        Volume {
            name: DATA_INGEST_VOLUME.to_string(),
            empty_dir: Some(EmptyDirVolumeSource::default()),
            ..Default::default()
        },
        Volume {
            name: DATA_INGEST_ENDPOINT_VOLUME.to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(SECRET_ENDPOINT_NAME.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        },
    ]
}

fn update_container(container: &mut Container, metadata: &str) {
    add_mount(container, DATA_INGEST_VOLUME, ENRICHMENT_PATH, None);
    add_mount(container, DATA_INGEST_ENDPOINT_VOLUME, ENRICHMENT_ENDPOINT_PATH, None);
    add_env(container, ENV_DEPLOYMENT_METADATA, metadata);
}

/// First injection. Needs the workload resolved by the pipeline.
///
/// # Errors
///
/// Returns an error when the request carries no workload.
pub fn mutate(req: &mut MutationRequest) -> Result<(), OperatorError> {
    let workload = req.workload.clone().ok_or_else(|| OperatorError::Transient {
        operation: format!("resolve workload of pod {}", req.pod_name()),
        reason: "owner lookup did not run".to_string(),
    })?;

    for volume in volumes() {
        req.add_volume(volume);
    }

    let install = &mut req.install_container;
    set_env(install, ENV_WORKLOAD_KIND, &workload.kind);
    set_env(install, ENV_WORKLOAD_NAME, &workload.name);
    set_env(install, ENV_DATA_INGEST_INJECTED, "true");
    add_mount(install, DATA_INGEST_VOLUME, ENRICHMENT_PATH, None);

    let metadata = deployment_metadata(req);
    let spec = req.pod.spec.get_or_insert_with(PodSpec::default);
    for container in &mut spec.containers {
        update_container(container, &metadata);
    }

    req.set_annotation(ANNOTATION_DATA_INGEST_INJECTED, "true");
    Ok(())
}

/// Enrich containers that lack the endpoint mount.
pub fn reinvoke(req: &mut MutationRequest) -> bool {
    let metadata = deployment_metadata(req);
    let spec = req.pod.spec.get_or_insert_with(PodSpec::default);

    let mut changed = false;
    for container in &mut spec.containers {
        if !has_mount_path(container, ENRICHMENT_ENDPOINT_PATH) {
            update_container(container, &metadata);
            changed = true;
        }
    }
    changed
}

#[cfg(test)]
#[path = "metadata_tests.rs"]
mod metadata_tests;
