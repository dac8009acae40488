// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! API access of the admission handlers.
//!
//! The mutation pipeline only talks to the cluster through [`WebhookClient`], so its
//! tests run against an in-memory fake instead of a live API server.

use crate::crd::DynaKube;
use crate::ingestendpoint::EndpointSecretGenerator;
use crate::initgeneration::{InitGenerator, SecretConfig};
use anyhow::{Context as _, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{ApiResource, DynamicObject, GroupVersionKind, ListParams, ObjectMeta};
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Api, Client, Resource};
use tracing::warn;

/// Cluster operations needed while admitting pods and `DynaKube`s.
#[async_trait]
pub trait WebhookClient: Send + Sync {
    async fn get_namespace(&self, name: &str) -> Result<Namespace>;

    async fn list_namespaces(&self) -> Result<Vec<Namespace>>;

    /// `DynaKube` by name in the operator namespace.
    async fn get_dynakube(&self, name: &str) -> Result<Option<DynaKube>>;

    /// Every `DynaKube` in the operator namespace.
    async fn list_dynakubes(&self) -> Result<Vec<DynaKube>>;

    /// Metadata of the object an owner reference points at, without its body.
    async fn get_owner_metadata(&self, owner: &OwnerReference, namespace: &str) -> Result<ObjectMeta>;

    /// Read the init secret of `namespace`, creating it when the reconciler has not yet.
    async fn ensure_init_secret(&self, dynakube: &DynaKube, namespace: &str) -> Result<SecretConfig>;

    /// Create the endpoint secret of `namespace` when it is missing.
    async fn ensure_endpoint_secret(&self, dynakube: &DynaKube, namespace: &str) -> Result<()>;

    /// Publish an event against `dynakube`. Failures are logged, never returned.
    async fn publish_event(&self, dynakube: &DynaKube, event_type: EventType, reason: &str, note: &str);
}

/// [`WebhookClient`] backed by the kube API.
pub struct KubeWebhookClient {
    client: Client,
    namespace: String,
    init_generator: InitGenerator,
    endpoint_generator: EndpointSecretGenerator,
    recorder: Recorder,
}

impl KubeWebhookClient {
    #[must_use]
    pub fn new(client: Client, namespace: &str, cluster_id: &str, pod_name: &str) -> Self {
        let reporter = Reporter {
            controller: "dynatrace-webhook".to_string(),
            instance: Some(pod_name.to_string()).filter(|p| !p.is_empty()),
        };
        Self {
            init_generator: InitGenerator::new(client.clone(), namespace, cluster_id),
            endpoint_generator: EndpointSecretGenerator::new(client.clone(), namespace),
            recorder: Recorder::new(client.clone(), reporter),
            namespace: namespace.to_string(),
            client,
        }
    }
}

/// Split an owner `apiVersion` into group and version. Core objects have no group.
#[must_use]
pub fn parse_api_version(api_version: &str) -> (&str, &str) {
    match api_version.split_once('/') {
        Some((group, version)) => (group, version),
        None => ("", api_version),
    }
}

#[async_trait]
impl WebhookClient for KubeWebhookClient {
    async fn get_namespace(&self, name: &str) -> Result<Namespace> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        api.get(name)
            .await
            .with_context(|| format!("failed to query namespace {name}"))
    }

    async fn list_namespaces(&self) -> Result<Vec<Namespace>> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn get_dynakube(&self, name: &str) -> Result<Option<DynaKube>> {
        let api: Api<DynaKube> = Api::namespaced(self.client.clone(), &self.namespace);
        api.get_opt(name)
            .await
            .with_context(|| format!("failed to query DynaKube {name}"))
    }

    async fn list_dynakubes(&self) -> Result<Vec<DynaKube>> {
        let api: Api<DynaKube> = Api::namespaced(self.client.clone(), &self.namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn get_owner_metadata(&self, owner: &OwnerReference, namespace: &str) -> Result<ObjectMeta> {
        let (group, version) = parse_api_version(&owner.api_version);
        let gvk = GroupVersionKind::gvk(group, version, &owner.kind);
        let resource = ApiResource::from_gvk(&gvk);
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), namespace, &resource);
        let partial = api
            .get_metadata(&owner.name)
            .await
            .with_context(|| format!("failed to query {} {namespace}/{}", owner.kind, owner.name))?;
        Ok(partial.metadata)
    }

    async fn ensure_init_secret(&self, dynakube: &DynaKube, namespace: &str) -> Result<SecretConfig> {
        let dynakubes = self.list_dynakubes().await?;
        let all: Vec<&DynaKube> = dynakubes.iter().collect();
        self.init_generator
            .generate_for_namespace(dynakube, &all, namespace)
            .await
    }

    async fn ensure_endpoint_secret(&self, dynakube: &DynaKube, namespace: &str) -> Result<()> {
        self.endpoint_generator
            .generate_for_namespace(dynakube, namespace)
            .await
            .map(|_| ())
    }

    async fn publish_event(&self, dynakube: &DynaKube, event_type: EventType, reason: &str, note: &str) {
        let event = Event {
            type_: event_type,
            reason: reason.to_string(),
            note: Some(note.to_string()),
            action: reason.to_string(),
            secondary: None,
        };
        let reference = dynakube.object_ref(&());
        if let Err(e) = self.recorder.publish(&event, &reference).await {
            warn!(reason = %reason, error = %e, "Failed to publish event");
        }
    }
}
