// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Code-module injection: preload library, agent binaries and per-container config.

use crate::constants::{
    BIN_DIR_MOUNT, CONTAINER_CONF_MOUNT, CONTAINER_CONF_SUBPATH_PREFIX, CSI_DRIVER_NAME,
    CUSTOM_CERT_MOUNT, CUSTOM_CERT_SUBPATH, DEFAULT_FLAVOR, DEFAULT_INSTALL_PATH,
    DEFAULT_TECHNOLOGIES, ENV_CONTAINERS_COUNT, ENV_DEPLOYMENT_METADATA, ENV_INSTALLER_FLAVOR,
    ENV_INSTALLER_TECH, ENV_INSTALLER_URL, ENV_INSTALL_PATH, ENV_INSTALL_VERSION,
    ENV_LD_PRELOAD, ENV_MODE, ENV_NETWORK_ZONE, ENV_ONEAGENT_INJECTED, ENV_PROXY,
    ENV_READONLY_CSI, INJECTION_CONFIG_VOLUME, INSTALL_MODE_INSTALLER, INSTALL_MODE_PROVISIONED,
    LD_PRELOAD_MOUNT, LD_PRELOAD_SUBPATH, ONEAGENT_BIN_VOLUME, ONEAGENT_SHARE_VOLUME,
    PRELOAD_LIBRARY_PATH, SECRET_CONFIG_NAME, SECRET_PROXY_KEY, SHARE_DIR_MOUNT,
};
use crate::errors::OperatorError;
use crate::feature_flags;
use crate::labels::{
    ANNOTATION_FLAVOR, ANNOTATION_INSTALLER_URL, ANNOTATION_INSTALL_PATH,
    ANNOTATION_ONEAGENT_INJECT, ANNOTATION_ONEAGENT_INJECTED, ANNOTATION_TECHNOLOGIES,
};
use crate::webhook::mutators::{deployment_metadata, opted_in};
use crate::webhook::request::{
    add_env, add_mount, add_secret_env, env_value, has_mount_path, set_env, MutationRequest,
};
use k8s_openapi::api::core::v1::{
    CSIVolumeSource, Container, EmptyDirVolumeSource, PodSpec, SecretVolumeSource, Volume,
};
use kube::ResourceExt;
use std::collections::BTreeMap;
use tracing::debug;

/// What every user container receives, computed once per request.
struct ContainerSettings {
    install_path: String,
    preload: String,
    deployment_metadata: String,
    network_zone: Option<String>,
    proxy: bool,
    trusted_cas: bool,
}

impl ContainerSettings {
    fn from_request(req: &MutationRequest) -> Self {
        let install_path = install_path(req);
        let dk = &req.dynakube;
        Self {
            preload: format!("{install_path}/{PRELOAD_LIBRARY_PATH}"),
            install_path,
            deployment_metadata: deployment_metadata(req),
            network_zone: dk.network_zone().map(str::to_string),
            proxy: dk.proxy().is_some() && !feature_flags::oneagent_ignore_proxy(dk),
            trusted_cas: dk.trusted_cas().is_some(),
        }
    }

    fn apply(&self, container: &mut Container) {
        let conf_subpath = format!("{CONTAINER_CONF_SUBPATH_PREFIX}{}.conf", container.name);
        add_mount(container, ONEAGENT_SHARE_VOLUME, LD_PRELOAD_MOUNT, Some(LD_PRELOAD_SUBPATH));
        add_mount(container, ONEAGENT_BIN_VOLUME, &self.install_path, None);
        add_mount(container, ONEAGENT_SHARE_VOLUME, CONTAINER_CONF_MOUNT, Some(&conf_subpath));
        if self.trusted_cas {
            add_mount(container, ONEAGENT_SHARE_VOLUME, CUSTOM_CERT_MOUNT, Some(CUSTOM_CERT_SUBPATH));
        }

        let current = env_value(container, ENV_LD_PRELOAD).map(str::to_string);
        match current.as_deref() {
            Some(existing) if existing.split([' ', ':']).any(|lib| lib == self.preload) => {}
            Some(existing) if !existing.is_empty() => {
                let combined = format!("{existing}:{}", self.preload);
                set_env(container, ENV_LD_PRELOAD, &combined);
            }
            _ => {
                set_env(container, ENV_LD_PRELOAD, &self.preload);
            }
        }
        add_env(container, ENV_DEPLOYMENT_METADATA, &self.deployment_metadata);
        if let Some(zone) = &self.network_zone {
            add_env(container, ENV_NETWORK_ZONE, zone);
        }
        if self.proxy {
            add_secret_env(container, ENV_PROXY, SECRET_CONFIG_NAME, SECRET_PROXY_KEY);
        }
    }
}

fn annotation_or(req: &MutationRequest, key: &str, default: &str) -> String {
    req.annotation(key)
        .filter(|v| !v.is_empty())
        .unwrap_or(default)
        .to_string()
}

/// Install path inside user containers.
#[must_use]
pub fn install_path(req: &MutationRequest) -> String {
    annotation_or(req, ANNOTATION_INSTALL_PATH, DEFAULT_INSTALL_PATH)
}

#[must_use]
pub fn enabled(req: &MutationRequest) -> bool {
    req.dynakube.needs_app_injection() && opted_in(req, ANNOTATION_ONEAGENT_INJECT)
}

#[must_use]
pub fn injected(req: &MutationRequest) -> bool {
    req.annotation(ANNOTATION_ONEAGENT_INJECTED) == Some("true")
}

/// Fail the pass when the pod is pinned to a node whose tenant is not known yet; the
/// in-pod init would otherwise group the agent under the wrong tenant.
///
/// Only pods admitted with `spec.nodeName` already set are checked here. Most pods are
/// admitted before scheduling; for those the in-pod init resolves the node's tenant at
/// startup and fails there instead.
fn check_node(req: &MutationRequest) -> Result<(), OperatorError> {
    let config = &req.init_config;
    let node = req.pod.spec.as_ref().and_then(|s| s.node_name.as_deref());
    match node {
        Some(node) if config.has_host && !config.monitoring_nodes.contains_key(node) => {
            Err(OperatorError::Transient {
                operation: format!("resolve tenant of node {node}"),
                reason: "the node has no host agent with a known tenant yet".to_string(),
            })
        }
        _ => Ok(()),
    }
}

fn bin_volume(req: &MutationRequest) -> Volume {
    let dk = &req.dynakube;
    if dk.needs_csi_driver() {
        Volume {
            name: ONEAGENT_BIN_VOLUME.to_string(),
            csi: Some(CSIVolumeSource {
                driver: CSI_DRIVER_NAME.to_string(),
                read_only: feature_flags::readonly_csi_volume(dk).then_some(true),
                volume_attributes: Some(BTreeMap::from([
                    ("mode".to_string(), "app".to_string()),
                    ("dynakube".to_string(), dk.name_any()),
                ])),
                ..Default::default()
            }),
            ..Default::default()
        }
    } else {
        empty_dir(ONEAGENT_BIN_VOLUME)
    }
}

fn empty_dir(name: &str) -> Volume {
    Volume {
        name: name.to_string(),
        empty_dir: Some(EmptyDirVolumeSource::default()),
        ..Default::default()
    }
}

/// Volume backed by the init-config secret.
#[must_use]
pub fn injection_config_volume() -> Volume {
    Volume {
        name: INJECTION_CONFIG_VOLUME.to_string(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(SECRET_CONFIG_NAME.to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn container_info(install: &mut Container, index: usize, container: &Container) {
    set_env(install, &format!("CONTAINER_{index}_NAME"), &container.name);
    set_env(
        install,
        &format!("CONTAINER_{index}_IMAGE"),
        container.image.as_deref().unwrap_or_default(),
    );
}

fn configure_install_container(req: &mut MutationRequest, install_path: &str) {
    let dk = &req.dynakube;
    let csi = dk.needs_csi_driver();
    let flavor = annotation_or(req, ANNOTATION_FLAVOR, DEFAULT_FLAVOR);
    let technologies = url::form_urlencoded::byte_serialize(
        annotation_or(req, ANNOTATION_TECHNOLOGIES, DEFAULT_TECHNOLOGIES).as_bytes(),
    )
    .collect::<String>();
    let installer_url = annotation_or(req, ANNOTATION_INSTALLER_URL, "");
    let version = dk
        .status
        .as_ref()
        .and_then(|s| s.one_agent.version.clone())
        .unwrap_or_default();
    let readonly_csi = csi && feature_flags::readonly_csi_volume(dk);

    let install = &mut req.install_container;
    set_env(install, ENV_INSTALLER_FLAVOR, &flavor);
    set_env(install, ENV_INSTALLER_TECH, &technologies);
    set_env(install, ENV_INSTALL_PATH, install_path);
    set_env(install, ENV_INSTALLER_URL, &installer_url);
    set_env(install, ENV_INSTALL_VERSION, &version);
    set_env(
        install,
        ENV_MODE,
        if csi { INSTALL_MODE_PROVISIONED } else { INSTALL_MODE_INSTALLER },
    );
    set_env(install, ENV_ONEAGENT_INJECTED, "true");
    if readonly_csi {
        set_env(install, ENV_READONLY_CSI, "true");
    }
    add_mount(install, ONEAGENT_BIN_VOLUME, BIN_DIR_MOUNT, None);
    add_mount(install, ONEAGENT_SHARE_VOLUME, SHARE_DIR_MOUNT, None);
}

/// First injection.
///
/// # Errors
///
/// Returns an error when the pod is pinned to a node without a known tenant.
pub fn mutate(req: &mut MutationRequest) -> Result<(), OperatorError> {
    check_node(req)?;

    let settings = ContainerSettings::from_request(req);
    let bin = bin_volume(req);
    req.add_volume(bin);
    req.add_volume(empty_dir(ONEAGENT_SHARE_VOLUME));
    req.add_volume(injection_config_volume());
    configure_install_container(req, &settings.install_path);

    let spec = req.pod.spec.get_or_insert_with(PodSpec::default);
    for (i, container) in spec.containers.iter_mut().enumerate() {
        settings.apply(container);
        container_info(&mut req.install_container, i + 1, container);
    }
    set_env(
        &mut req.install_container,
        ENV_CONTAINERS_COUNT,
        &spec.containers.len().to_string(),
    );

    req.set_annotation(ANNOTATION_ONEAGENT_INJECTED, "true");
    Ok(())
}

/// Inject containers that lack the preload mount.
pub fn reinvoke(req: &mut MutationRequest) -> bool {
    let settings = ContainerSettings::from_request(req);
    let spec = req.pod.spec.get_or_insert_with(PodSpec::default);

    let mut changed = false;
    for (i, container) in spec.containers.iter_mut().enumerate() {
        if has_mount_path(container, LD_PRELOAD_MOUNT) {
            continue;
        }
        debug!(container = %container.name, "Injecting container added after first admission");
        settings.apply(container);
        container_info(&mut req.install_container, i + 1, container);
        changed = true;
    }

    if changed {
        set_env(
            &mut req.install_container,
            ENV_CONTAINERS_COUNT,
            &spec.containers.len().to_string(),
        );
    }
    changed
}

#[cfg(test)]
#[path = "oneagent_tests.rs"]
mod oneagent_tests;
