// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Builders for the workloads a `DynaKube` rolls out.
//!
//! Pure functions: every object carries the standard `app.kubernetes.io/*` labels and a
//! controller owner reference to its `DynaKube`, so the garbage collector removes it
//! together with the `DynaKube`. The reconciler applies them with server-side apply.

use crate::constants::{
    ACTIVEGATE_CONTAINER_PORT, ACTIVEGATE_HTTPS_PORT, ACTIVEGATE_IMAGE_PATH,
    ACTIVEGATE_STATSD_PORT, API_GROUP_VERSION, ENV_DEPLOYMENT_METADATA, ENV_NETWORK_ZONE,
    KIND_DYNAKUBE, ONEAGENT_IMAGE_PATH, ONEAGENT_SUFFIX, OPERATOR_VERSION, TOKEN_PAAS,
};
use crate::crd::{Capability, DynaKube};
use crate::labels::{
    COMPONENT_ACTIVEGATE, COMPONENT_ONEAGENT, K8S_COMPONENT, K8S_INSTANCE, K8S_MANAGED_BY,
    K8S_NAME, MANAGED_BY_OPERATOR,
};
use k8s_openapi::api::apps::v1::{DaemonSet, DaemonSetSpec, StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, EnvVarSource, HostPathVolumeSource, PodSpec,
    PodTemplateSpec, SecretKeySelector, SecretVolumeSource, SecurityContext, Service,
    ServicePort, ServiceSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;
use std::collections::BTreeMap;
use tracing::debug;

/// Mount point of the ActiveGate server certificate.
const ACTIVEGATE_SSL_DIR: &str = "/var/lib/dynatrace/gateway/ssl";

/// Mount point of the host root filesystem in the host agent.
const HOST_ROOT_MOUNT: &str = "/mnt/root";

/// Labels shared by every object of `component` for `dk`. Also used as selector.
#[must_use]
pub fn build_labels(dk: &DynaKube, component: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (K8S_NAME.to_string(), component.to_string()),
        (K8S_INSTANCE.to_string(), dk.name_any()),
        (K8S_COMPONENT.to_string(), component.to_string()),
        (K8S_MANAGED_BY.to_string(), MANAGED_BY_OPERATOR.to_string()),
    ])
}

/// Controller owner reference pointing at `dk`.
#[must_use]
pub fn build_owner_references(dk: &DynaKube) -> Vec<OwnerReference> {
    vec![OwnerReference {
        api_version: API_GROUP_VERSION.to_string(),
        kind: KIND_DYNAKUBE.to_string(),
        name: dk.name_any(),
        uid: dk.metadata.uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }]
}

fn metadata(dk: &DynaKube, name: String, component: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name),
        namespace: dk.namespace(),
        labels: Some(build_labels(dk, component)),
        owner_references: Some(build_owner_references(dk)),
        ..Default::default()
    }
}

/// Host of `apiUrl`; the tenant serves its images from there.
fn registry(dk: &DynaKube) -> String {
    url::Url::parse(&dk.spec.api_url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_default()
}

fn env(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        ..Default::default()
    }
}

fn deployment_metadata(dk: &DynaKube, cluster_id: &str) -> String {
    format!(
        "orchestration_tech=Operator-{};script_version={OPERATOR_VERSION};orchestrator_id={cluster_id}",
        dk.one_agent_mode().deployment_type()
    )
}

/// `DT_CAPABILITIES` value: argument names of the enabled capabilities, comma separated.
#[must_use]
pub fn capabilities_argument(dk: &DynaKube) -> String {
    let mut capabilities: Vec<Capability> = dk
        .spec
        .active_gate
        .as_ref()
        .map(|ag| ag.capabilities.clone())
        .unwrap_or_default();
    capabilities.sort();
    capabilities.dedup();
    capabilities
        .iter()
        .map(Capability::argument_name)
        .collect::<Vec<_>>()
        .join(",")
}

/// ActiveGate service `<dk>-activegate`: HTTPS 443 to 9999, plus StatsD over UDP when
/// the `statsd-ingest` capability is enabled.
#[must_use]
pub fn build_activegate_service(dk: &DynaKube) -> Service {
    let labels = build_labels(dk, COMPONENT_ACTIVEGATE);

    let mut ports = vec![ServicePort {
        name: Some("https".to_string()),
        port: ACTIVEGATE_HTTPS_PORT,
        target_port: Some(IntOrString::Int(ACTIVEGATE_CONTAINER_PORT)),
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }];
    if dk.has_capability(Capability::StatsdIngest) {
        ports.push(ServicePort {
            name: Some("statsd".to_string()),
            port: ACTIVEGATE_STATSD_PORT,
            target_port: Some(IntOrString::Int(ACTIVEGATE_STATSD_PORT)),
            protocol: Some("UDP".to_string()),
            ..Default::default()
        });
    }

    Service {
        metadata: metadata(dk, dk.activegate_service_name(), COMPONENT_ACTIVEGATE),
        spec: Some(ServiceSpec {
            selector: Some(labels),
            ports: Some(ports),
            type_: Some("ClusterIP".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// ActiveGate statefulset for the capabilities of `dk`.
#[must_use]
pub fn build_activegate_statefulset(dk: &DynaKube, tenant_uuid: &str, cluster_id: &str) -> StatefulSet {
    let name = dk.activegate_service_name();
    let labels = build_labels(dk, COMPONENT_ACTIVEGATE);
    let ag = dk.spec.active_gate.clone().unwrap_or_default();
    let namespace = dk.namespace().unwrap_or_default();
    debug!(name = %name, replicas = ?ag.replicas, "Building ActiveGate statefulset");

    let mut env_vars = vec![
        env("DT_CAPABILITIES", capabilities_argument(dk)),
        env("DT_ID_SEED_NAMESPACE", namespace.clone()),
        env("DT_ID_SEED_K8S_CLUSTER_ID", cluster_id),
        env("DT_TENANT", tenant_uuid),
        env("DT_SERVER", dk.spec.api_url.trim_end_matches('/')),
        env(
            "DT_DNS_ENTRY_POINT",
            format!("https://{name}.{namespace}:{ACTIVEGATE_HTTPS_PORT}/communication"),
        ),
        env(ENV_DEPLOYMENT_METADATA, deployment_metadata(dk, cluster_id)),
    ];
    if let Some(zone) = dk.network_zone() {
        env_vars.push(env(ENV_NETWORK_ZONE, zone));
    }

    let mut ports = vec![ContainerPort {
        name: Some("https".to_string()),
        container_port: ACTIVEGATE_CONTAINER_PORT,
        ..Default::default()
    }];
    if dk.has_capability(Capability::StatsdIngest) {
        ports.push(ContainerPort {
            name: Some("statsd".to_string()),
            container_port: ACTIVEGATE_STATSD_PORT,
            protocol: Some("UDP".to_string()),
            ..Default::default()
        });
    }

    let mut volumes = Vec::new();
    let mut mounts = Vec::new();
    if let Some(secret) = dk.activegate_tls_secret() {
        volumes.push(Volume {
            name: "server-certs".to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(secret.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        });
        mounts.push(VolumeMount {
            name: "server-certs".to_string(),
            mount_path: ACTIVEGATE_SSL_DIR.to_string(),
            read_only: Some(true),
            ..Default::default()
        });
    }

    let container = Container {
        name: COMPONENT_ACTIVEGATE.to_string(),
        image: Some(
            ag.image
                .clone()
                .unwrap_or_else(|| format!("{}/{ACTIVEGATE_IMAGE_PATH}", registry(dk))),
        ),
        env: Some(env_vars),
        ports: Some(ports),
        resources: ag.resources.clone(),
        volume_mounts: Some(mounts).filter(|m| !m.is_empty()),
        ..Default::default()
    };

    StatefulSet {
        metadata: metadata(dk, name.clone(), COMPONENT_ACTIVEGATE),
        spec: Some(StatefulSetSpec {
            replicas: Some(ag.replicas.unwrap_or(1)),
            service_name: Some(name),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    volumes: Some(volumes).filter(|v| !v.is_empty()),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Name of the host agent daemonset, `<dynakube>-oneagent`.
#[must_use]
pub fn oneagent_daemonset_name(dk: &DynaKube) -> String {
    format!("{}-{ONEAGENT_SUFFIX}", dk.name_any())
}

/// Installer arguments: the user's, plus the operator version as host property.
fn oneagent_args(dk: &DynaKube) -> Vec<String> {
    let mut args: Vec<String> = dk
        .one_agent_mode()
        .host()
        .map(|host| host.args.clone())
        .unwrap_or_default();
    args.push(format!("--set-host-property=OperatorVersion={OPERATOR_VERSION}"));
    if let Some(zone) = dk.network_zone() {
        if !args.iter().any(|a| a.starts_with("--set-network-zone")) {
            args.push(format!("--set-network-zone={zone}"));
        }
    }
    args
}

/// Host agent daemonset for the host-injection modes; `None` for application-only
/// monitoring.
#[must_use]
pub fn build_oneagent_daemonset(dk: &DynaKube, cluster_id: &str) -> Option<DaemonSet> {
    let host = dk.one_agent_mode().host()?;
    let labels = build_labels(dk, COMPONENT_ONEAGENT);

    let installer_url = format!(
        "{}/v1/deployment/installer/agent/unix/default/latest?arch=x86",
        dk.spec.api_url.trim_end_matches('/')
    );
    let env_vars = vec![
        env("ONEAGENT_INSTALLER_SCRIPT_URL", installer_url),
        EnvVar {
            name: "ONEAGENT_INSTALLER_TOKEN".to_string(),
            value_from: Some(EnvVarSource {
                secret_key_ref: Some(SecretKeySelector {
                    name: dk.tokens_secret_name(),
                    key: TOKEN_PAAS.to_string(),
                    optional: Some(false),
                }),
                ..Default::default()
            }),
            ..Default::default()
        },
        env("ONEAGENT_INSTALLER_SKIP_CERT_CHECK", dk.spec.skip_cert_check.to_string()),
        env(ENV_DEPLOYMENT_METADATA, deployment_metadata(dk, cluster_id)),
    ];

    let container = Container {
        name: COMPONENT_ONEAGENT.to_string(),
        image: Some(
            host.image
                .clone()
                .unwrap_or_else(|| format!("{}/{ONEAGENT_IMAGE_PATH}", registry(dk))),
        ),
        args: Some(oneagent_args(dk)),
        env: Some(env_vars),
        security_context: Some(SecurityContext {
            privileged: Some(true),
            ..Default::default()
        }),
        volume_mounts: Some(vec![VolumeMount {
            name: "host-root".to_string(),
            mount_path: HOST_ROOT_MOUNT.to_string(),
            ..Default::default()
        }]),
        ..Default::default()
    };

    Some(DaemonSet {
        metadata: metadata(dk, oneagent_daemonset_name(dk), COMPONENT_ONEAGENT),
        spec: Some(DaemonSetSpec {
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    host_network: Some(true),
                    host_pid: Some(true),
                    host_ipc: Some(false),
                    dns_policy: Some("ClusterFirstWithHostNet".to_string()),
                    node_selector: host.node_selector.clone(),
                    tolerations: host.tolerations.clone(),
                    volumes: Some(vec![Volume {
                        name: "host-root".to_string(),
                        host_path: Some(HostPathVolumeSource {
                            path: "/".to_string(),
                            type_: None,
                        }),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    })
}

#[cfg(test)]
#[path = "workloads_tests.rs"]
mod workloads_tests;
