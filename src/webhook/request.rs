// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! The per-call mutation request and the pod-spec helpers mutators share.
//!
//! Every helper here is append-only: it adds an env var, mount or volume only when the
//! container or pod does not carry one with the same name yet. That is what keeps
//! reinvocation from double-mounting volumes.

use crate::constants::INSTALL_CONTAINER_NAME;
use crate::crd::DynaKube;
use crate::initgeneration::SecretConfig;
use k8s_openapi::api::core::v1::{
    Container, EnvVar, EnvVarSource, Namespace, Pod, PodSpec, SecretKeySelector, Volume,
    VolumeMount,
};
use kube::ResourceExt;

/// Root controller of a pod, as written into `DT_WORKLOAD_KIND` / `DT_WORKLOAD_NAME`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Workload {
    pub kind: String,
    pub name: String,
}

/// State carried through one mutation pass.
///
/// The pod is an owned copy of the admission object; the response is a JSON patch of this
/// copy against the original. The install container is kept outside the pod until the
/// pass finishes so mutators can edit it in any order.
#[derive(Clone, Debug)]
pub struct MutationRequest {
    pub pod: Pod,
    pub namespace: Namespace,
    pub dynakube: DynaKube,
    pub install_container: Container,
    /// Init config of the namespace, read or created for this call
    pub init_config: SecretConfig,
    /// Root owner of the pod, resolved only when metadata enrichment runs
    pub workload: Option<Workload>,
    pub cluster_id: String,
}

impl MutationRequest {
    #[must_use]
    pub fn namespace_name(&self) -> String {
        self.namespace.name_any()
    }

    #[must_use]
    pub fn pod_name(&self) -> String {
        pod_display_name(&self.pod)
    }

    #[must_use]
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.pod
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(key))
            .map(String::as_str)
    }

    pub fn set_annotation(&mut self, key: &str, value: &str) {
        self.pod
            .metadata
            .annotations
            .get_or_insert_with(Default::default)
            .insert(key.to_string(), value.to_string());
    }

    /// User containers of the pod.
    pub fn containers_mut(&mut self) -> &mut Vec<Container> {
        &mut self.pod.spec.get_or_insert_with(PodSpec::default).containers
    }

    #[must_use]
    pub fn containers(&self) -> &[Container] {
        self.pod
            .spec
            .as_ref()
            .map_or(&[], |spec| spec.containers.as_slice())
    }

    /// Add `volume` to the pod unless one with the same name exists.
    pub fn add_volume(&mut self, volume: Volume) {
        let spec = self.pod.spec.get_or_insert_with(PodSpec::default);
        let volumes = spec.volumes.get_or_insert_with(Vec::new);
        if !volumes.iter().any(|v| v.name == volume.name) {
            volumes.push(volume);
        }
    }
}

/// Name used in messages: the pod name, or its generate-name prefix before creation.
#[must_use]
pub fn pod_display_name(pod: &Pod) -> String {
    pod.metadata
        .name
        .clone()
        .or_else(|| pod.metadata.generate_name.clone())
        .unwrap_or_default()
}

/// Pod annotation value, if present.
#[must_use]
pub fn pod_annotation<'a>(pod: &'a Pod, key: &str) -> Option<&'a str> {
    pod.metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(key))
        .map(String::as_str)
}

/// Find the install container already present in the pod's init containers.
#[must_use]
pub fn find_install_container(pod: &Pod) -> Option<&Container> {
    pod.spec
        .as_ref()
        .and_then(|spec| spec.init_containers.as_ref())
        .and_then(|init| init.iter().find(|c| c.name == INSTALL_CONTAINER_NAME))
}

#[must_use]
pub fn env_value<'a>(container: &'a Container, name: &str) -> Option<&'a str> {
    container
        .env
        .as_ref()
        .and_then(|env| env.iter().find(|e| e.name == name))
        .and_then(|e| e.value.as_deref())
}

#[must_use]
pub fn has_env(container: &Container, name: &str) -> bool {
    container
        .env
        .as_ref()
        .is_some_and(|env| env.iter().any(|e| e.name == name))
}

/// Add a literal env var unless the container already defines `name`.
pub fn add_env(container: &mut Container, name: &str, value: &str) {
    if !has_env(container, name) {
        container.env.get_or_insert_with(Vec::new).push(EnvVar {
            name: name.to_string(),
            value: Some(value.to_string()),
            ..Default::default()
        });
    }
}

/// Set a literal env var, replacing any previous value. Returns `true` on change.
pub fn set_env(container: &mut Container, name: &str, value: &str) -> bool {
    let env = container.env.get_or_insert_with(Vec::new);
    match env.iter_mut().find(|e| e.name == name) {
        Some(existing) if existing.value.as_deref() == Some(value) => false,
        Some(existing) => {
            existing.value = Some(value.to_string());
            existing.value_from = None;
            true
        }
        None => {
            env.push(EnvVar {
                name: name.to_string(),
                value: Some(value.to_string()),
                ..Default::default()
            });
            true
        }
    }
}

/// Add an env var sourced from a secret key unless the container already defines `name`.
pub fn add_secret_env(container: &mut Container, name: &str, secret: &str, key: &str) {
    if !has_env(container, name) {
        container.env.get_or_insert_with(Vec::new).push(EnvVar {
            name: name.to_string(),
            value_from: Some(EnvVarSource {
                secret_key_ref: Some(SecretKeySelector {
                    name: secret.to_string(),
                    key: key.to_string(),
                    optional: Some(false),
                }),
                ..Default::default()
            }),
            ..Default::default()
        });
    }
}

/// Whether the container mounts something at `mount_path`.
#[must_use]
pub fn has_mount_path(container: &Container, mount_path: &str) -> bool {
    container
        .volume_mounts
        .as_ref()
        .is_some_and(|mounts| mounts.iter().any(|m| m.mount_path == mount_path))
}

/// Mount `volume` at `mount_path` unless the container already has that mount path.
pub fn add_mount(container: &mut Container, volume: &str, mount_path: &str, sub_path: Option<&str>) {
    add_mount_with(container, volume, mount_path, sub_path, false);
}

/// Like [`add_mount`], read-only.
pub fn add_read_only_mount(container: &mut Container, volume: &str, mount_path: &str, sub_path: Option<&str>) {
    add_mount_with(container, volume, mount_path, sub_path, true);
}

fn add_mount_with(
    container: &mut Container,
    volume: &str,
    mount_path: &str,
    sub_path: Option<&str>,
    read_only: bool,
) {
    if has_mount_path(container, mount_path) {
        return;
    }
    container
        .volume_mounts
        .get_or_insert_with(Vec::new)
        .push(VolumeMount {
            name: volume.to_string(),
            mount_path: mount_path.to_string(),
            sub_path: sub_path.map(str::to_string),
            read_only: read_only.then_some(true),
            ..Default::default()
        });
}

#[cfg(test)]
#[path = "request_tests.rs"]
mod request_tests;
