// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! The `install-oneagent` init container.
//!
//! The webhook builds a base container here; mutators then add their own env vars and
//! mounts to it before it is appended to the pod.

use crate::constants::{
    CONFIG_DIR_MOUNT, DEFAULT_INSTALL_USER, ENV_CONTAINERS_COUNT, ENV_DATA_INGEST_INJECTED,
    ENV_FAILURE_POLICY, ENV_K8S_BASE_POD_NAME, ENV_K8S_CLUSTER_ID, ENV_K8S_NAMESPACE,
    ENV_K8S_NODE_NAME, ENV_K8S_POD_NAME, ENV_K8S_POD_UID, ENV_ONEAGENT_INJECTED,
    INJECTION_CONFIG_VOLUME, INSTALL_CONTAINER_NAME, READ_ONLY_CSI_USER,
};
use crate::crd::DynaKube;
use crate::feature_flags;
use crate::labels::ANNOTATION_FAILURE_POLICY;
use crate::webhook::request::{add_mount, pod_annotation};
use k8s_openapi::api::core::v1::{
    Capabilities, Container, EnvVar, EnvVarSource, ObjectFieldSelector, Pod, SecurityContext,
};

/// Pod name without its random suffix: `generateName` or `name`, cut at the last `-`.
#[must_use]
pub fn base_pod_name(pod: &Pod) -> String {
    let name = pod
        .metadata
        .generate_name
        .as_deref()
        .filter(|n| !n.is_empty())
        .or(pod.metadata.name.as_deref())
        .unwrap_or_default();
    match name.rfind('-') {
        Some(idx) => name[..idx].to_string(),
        None => name.to_string(),
    }
}

/// `silent` or `fail`, from the pod annotation or the `DynaKube` feature flag.
#[must_use]
pub fn failure_policy(pod: &Pod, dk: &DynaKube) -> String {
    match pod_annotation(pod, ANNOTATION_FAILURE_POLICY) {
        Some(policy) if policy == "fail" || policy == "silent" => policy.to_string(),
        _ => feature_flags::injection_failure_policy(dk).to_string(),
    }
}

/// Locked-down security context. User and group come from the first container, then
/// the pod, then the operator default.
///
/// One install container serves every container of the pod, so it runs as the pod's
/// primary container: the first one. Sidecars with other identities read the installed
/// files through the shared volume and are not considered.
#[must_use]
pub fn install_security_context(pod: &Pod, dk: &DynaKube) -> SecurityContext {
    let spec = pod.spec.as_ref();
    let container_ctx = spec
        .and_then(|s| s.containers.first())
        .and_then(|c| c.security_context.as_ref());
    let pod_ctx = spec.and_then(|s| s.security_context.as_ref());

    let default_id = if feature_flags::readonly_csi_volume(dk) {
        READ_ONLY_CSI_USER
    } else {
        DEFAULT_INSTALL_USER
    };

    let user = container_ctx
        .and_then(|c| c.run_as_user)
        .or_else(|| pod_ctx.and_then(|p| p.run_as_user))
        .unwrap_or(default_id);
    let group = container_ctx
        .and_then(|c| c.run_as_group)
        .or_else(|| pod_ctx.and_then(|p| p.run_as_group))
        .unwrap_or(default_id);

    SecurityContext {
        privileged: Some(false),
        allow_privilege_escalation: Some(false),
        read_only_root_filesystem: Some(true),
        run_as_user: Some(user),
        run_as_group: Some(group),
        run_as_non_root: (user != 0 && group != 0).then_some(true),
        capabilities: Some(Capabilities {
            drop: Some(vec!["ALL".to_string()]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn field_env(name: &str, field_path: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                field_path: field_path.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn literal_env(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        ..Default::default()
    }
}

/// Base install container for `pod`.
#[must_use]
pub fn build_install_container(pod: &Pod, dk: &DynaKube, image: &str, cluster_id: &str) -> Container {
    let containers = pod.spec.as_ref().map_or(0, |s| s.containers.len());

    let mut container = Container {
        name: INSTALL_CONTAINER_NAME.to_string(),
        image: Some(image.to_string()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        args: Some(vec!["init".to_string()]),
        env: Some(vec![
            literal_env(ENV_CONTAINERS_COUNT, containers.to_string()),
            literal_env(ENV_FAILURE_POLICY, failure_policy(pod, dk)),
            field_env(ENV_K8S_POD_NAME, "metadata.name"),
            field_env(ENV_K8S_POD_UID, "metadata.uid"),
            literal_env(ENV_K8S_BASE_POD_NAME, base_pod_name(pod)),
            field_env(ENV_K8S_NAMESPACE, "metadata.namespace"),
            field_env(ENV_K8S_NODE_NAME, "spec.nodeName"),
            literal_env(ENV_K8S_CLUSTER_ID, cluster_id),
            literal_env(ENV_ONEAGENT_INJECTED, "false"),
            literal_env(ENV_DATA_INGEST_INJECTED, "false"),
        ]),
        security_context: Some(install_security_context(pod, dk)),
        resources: dk.init_resources(),
        ..Default::default()
    };
    add_mount(&mut container, INJECTION_CONFIG_VOLUME, CONFIG_DIR_MOUNT, None);
    container
}

#[cfg(test)]
#[path = "install_container_tests.rs"]
mod install_container_tests;
