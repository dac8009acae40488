// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Objects shared by the admission tests.

use crate::crd::{
    ActiveGateSpec, ApplicationMonitoringSpec, Capability, CloudNativeFullStackSpec, DynaKube,
    DynaKubeSpec, DynaKubeStatus, HostInjectSpec, OneAgentSpec,
};
use crate::initgeneration::SecretConfig;
use crate::labels::INSTANCE_LABEL;
use crate::webhook::install_container::build_install_container;
use crate::webhook::request::MutationRequest;
use k8s_openapi::api::core::v1::{Container, Namespace, Pod, PodSpec};
use kube::api::ObjectMeta;
use std::collections::BTreeMap;

pub const OPERATOR_NAMESPACE: &str = "dynatrace";
pub const CLUSTER_ID: &str = "cluster-uid";
pub const OPERATOR_IMAGE: &str = "quay.io/dynatrace/dynatrace-operator:v1.0.0";

fn with_status(mut dk: DynaKube, tenant: Option<&str>) -> DynaKube {
    dk.metadata.namespace = Some(OPERATOR_NAMESPACE.to_string());
    dk.status = Some(DynaKubeStatus {
        tenant_uuid: tenant.map(str::to_string),
        ..Default::default()
    });
    dk
}

/// Cloud-native `DynaKube` `dk` with tenant `T`.
pub fn cloud_native(name: &str) -> DynaKube {
    let dk = DynaKube::new(
        name,
        DynaKubeSpec {
            api_url: "https://tenant.live/api".to_string(),
            one_agent: OneAgentSpec {
                cloud_native_full_stack: Some(CloudNativeFullStackSpec::default()),
                ..Default::default()
            },
            ..Default::default()
        },
    );
    with_status(dk, Some("T"))
}

/// Application-monitoring `DynaKube` without CSI.
pub fn app_monitoring(name: &str) -> DynaKube {
    let dk = DynaKube::new(
        name,
        DynaKubeSpec {
            api_url: "https://tenant.live/api".to_string(),
            one_agent: OneAgentSpec {
                application_monitoring: Some(ApplicationMonitoringSpec::default()),
                ..Default::default()
            },
            ..Default::default()
        },
    );
    with_status(dk, Some("T"))
}

/// Host-monitoring `DynaKube`; no app injection.
pub fn host_monitoring(name: &str) -> DynaKube {
    let dk = DynaKube::new(
        name,
        DynaKubeSpec {
            api_url: "https://tenant.live/api".to_string(),
            one_agent: OneAgentSpec {
                host_monitoring: Some(HostInjectSpec::default()),
                ..Default::default()
            },
            ..Default::default()
        },
    );
    with_status(dk, None)
}

pub fn with_metrics_ingest(mut dk: DynaKube) -> DynaKube {
    dk.spec.active_gate = Some(ActiveGateSpec {
        capabilities: vec![Capability::MetricsIngest],
        ..Default::default()
    });
    dk
}

pub fn with_annotation(mut dk: DynaKube, key: &str, value: &str) -> DynaKube {
    dk.metadata
        .annotations
        .get_or_insert_with(BTreeMap::new)
        .insert(key.to_string(), value.to_string());
    dk
}

pub fn namespace(name: &str, dynakube: Option<&str>) -> Namespace {
    Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: dynakube.map(|dk| BTreeMap::from([(INSTANCE_LABEL.to_string(), dk.to_string())])),
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn container(name: &str, image: &str) -> Container {
    Container {
        name: name.to_string(),
        image: Some(image.to_string()),
        ..Default::default()
    }
}

/// Pod `p` in `ns` with one container `c` running `alpine`.
pub fn pod() -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some("p".to_string()),
            namespace: Some("ns".to_string()),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: vec![container("c", "alpine")],
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn init_config() -> SecretConfig {
    SecretConfig {
        api_url: "https://tenant.live/api".to_string(),
        tenant_uuid: "T".to_string(),
        monitoring_nodes: BTreeMap::from([("n1".to_string(), "T".to_string())]),
        cluster_id: CLUSTER_ID.to_string(),
        ..Default::default()
    }
}

/// A request as the pipeline hands it to the mutators on first injection.
pub fn request(dk: DynaKube, pod: Pod) -> MutationRequest {
    let install_container = build_install_container(&pod, &dk, OPERATOR_IMAGE, CLUSTER_ID);
    MutationRequest {
        pod,
        namespace: namespace("ns", Some("dk")),
        dynakube: dk,
        install_container,
        init_config: init_config(),
        workload: None,
        cluster_id: CLUSTER_ID.to_string(),
    }
}
