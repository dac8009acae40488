// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! In-memory [`WebhookClient`] for admission tests.

use crate::crd::DynaKube;
use crate::initgeneration::SecretConfig;
use crate::webhook::client::WebhookClient;
use anyhow::{bail, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::ObjectMeta;
use kube::runtime::events::EventType;
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::sync::Mutex;

/// I/O boundary a test makes fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailPoint {
    Namespace,
    DynaKube,
    Owner,
    InitSecret,
    EndpointSecret,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedEvent {
    pub dynakube: String,
    pub reason: String,
    pub note: String,
}

#[derive(Default)]
pub struct FakeWebhookClient {
    pub namespaces: Mutex<Vec<Namespace>>,
    pub dynakubes: Mutex<Vec<DynaKube>>,
    /// Owner metadata by `(kind, name)`
    pub owners: Mutex<BTreeMap<(String, String), ObjectMeta>>,
    pub init_config: Mutex<SecretConfig>,
    pub init_secrets: Mutex<Vec<String>>,
    pub endpoint_secrets: Mutex<Vec<String>>,
    pub events: Mutex<Vec<RecordedEvent>>,
    pub fail: Mutex<Option<FailPoint>>,
}

impl FakeWebhookClient {
    pub fn with(namespaces: Vec<Namespace>, dynakubes: Vec<DynaKube>) -> Self {
        Self {
            namespaces: Mutex::new(namespaces),
            dynakubes: Mutex::new(dynakubes),
            ..Default::default()
        }
    }

    pub fn fail_at(&self, point: FailPoint) {
        *self.fail.lock().unwrap() = Some(point);
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().unwrap().clone()
    }

    fn check(&self, point: FailPoint) -> Result<()> {
        if *self.fail.lock().unwrap() == Some(point) {
            bail!("injected failure at {point:?}");
        }
        Ok(())
    }
}

#[async_trait]
impl WebhookClient for FakeWebhookClient {
    async fn get_namespace(&self, name: &str) -> Result<Namespace> {
        self.check(FailPoint::Namespace)?;
        let namespaces = self.namespaces.lock().unwrap();
        match namespaces.iter().find(|ns| ns.name_any() == name) {
            Some(ns) => Ok(ns.clone()),
            None => bail!("namespace {name} not found"),
        }
    }

    async fn list_namespaces(&self) -> Result<Vec<Namespace>> {
        self.check(FailPoint::Namespace)?;
        Ok(self.namespaces.lock().unwrap().clone())
    }

    async fn get_dynakube(&self, name: &str) -> Result<Option<DynaKube>> {
        self.check(FailPoint::DynaKube)?;
        let dynakubes = self.dynakubes.lock().unwrap();
        Ok(dynakubes.iter().find(|dk| dk.name_any() == name).cloned())
    }

    async fn list_dynakubes(&self) -> Result<Vec<DynaKube>> {
        self.check(FailPoint::DynaKube)?;
        Ok(self.dynakubes.lock().unwrap().clone())
    }

    async fn get_owner_metadata(&self, owner: &OwnerReference, _namespace: &str) -> Result<ObjectMeta> {
        self.check(FailPoint::Owner)?;
        let owners = self.owners.lock().unwrap();
        match owners.get(&(owner.kind.clone(), owner.name.clone())) {
            Some(meta) => Ok(meta.clone()),
            None => bail!("{} {} not found", owner.kind, owner.name),
        }
    }

    async fn ensure_init_secret(&self, _dynakube: &DynaKube, namespace: &str) -> Result<SecretConfig> {
        self.check(FailPoint::InitSecret)?;
        self.init_secrets.lock().unwrap().push(namespace.to_string());
        Ok(self.init_config.lock().unwrap().clone())
    }

    async fn ensure_endpoint_secret(&self, _dynakube: &DynaKube, namespace: &str) -> Result<()> {
        self.check(FailPoint::EndpointSecret)?;
        self.endpoint_secrets.lock().unwrap().push(namespace.to_string());
        Ok(())
    }

    async fn publish_event(&self, dynakube: &DynaKube, _event_type: EventType, reason: &str, note: &str) {
        self.events.lock().unwrap().push(RecordedEvent {
            dynakube: dynakube.name_any(),
            reason: reason.to_string(),
            note: note.to_string(),
        });
    }
}
