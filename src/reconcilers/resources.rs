// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Generic resource creation and update helpers for Kubernetes resources.
//!
//! # Strategies
//!
//! - **Apply**: server-side apply for operator workloads (ActiveGate, OneAgent)
//! - **Secret upsert**: create, or replace only when the data or label hash differs, for the
//!   secrets fanned out into mapped namespaces
//!
//! # Example
//!
//! ```rust,no_run
//! use dynakube_operator::reconcilers::resources::create_or_update_secret;
//! use kube::Client;
//! use std::collections::BTreeMap;
//! use anyhow::Result;
//!
//! async fn example(client: &Client) -> Result<()> {
//!     let data = BTreeMap::from([("config".to_string(), b"{}".to_vec())]);
//!     let written = create_or_update_secret(
//!         client,
//!         "shop",
//!         "dynatrace-dynakube-config",
//!         &data,
//!         BTreeMap::new(),
//!     )
//!     .await?;
//!     println!("secret written: {written}");
//!     Ok(())
//! }
//! ```

use crate::errors::is_not_found;
use anyhow::Result;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::api::{DeleteParams, Patch, PatchParams, PostParams};
use kube::core::NamespaceResourceScope;
use kube::{Api, Client, Resource, ResourceExt};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Create or update a resource using server-side apply strategy.
///
/// # Errors
///
/// Returns an error if the resource has no name or API operations fail.
pub async fn create_or_apply<T>(
    client: &Client,
    namespace: &str,
    resource: &T,
    field_manager: &str,
) -> Result<()>
where
    T: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + ResourceExt
        + Clone
        + std::fmt::Debug
        + serde::Serialize
        + for<'de> serde::Deserialize<'de>,
{
    let name = resource
        .meta()
        .name
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("Resource must have a name"))?;

    let api: Api<T> = Api::namespaced(client.clone(), namespace);

    debug!(
        namespace = %namespace,
        name = %name,
        kind = %T::kind(&()),
        "Creating or updating resource with Apply strategy"
    );

    if api.get_opt(name).await?.is_some() {
        api.patch(
            name,
            &PatchParams::apply(field_manager).force(),
            &Patch::Apply(resource),
        )
        .await?;
        debug!("Applied {} {}/{}", T::kind(&()), namespace, name);
    } else {
        api.create(&PostParams::default(), resource).await?;
        info!("Created {} {}/{}", T::kind(&()), namespace, name);
    }

    Ok(())
}

fn hash_pairs<'a, I>(hasher: &mut Sha256, pairs: I)
where
    I: IntoIterator<Item = (&'a String, &'a [u8])>,
{
    for (key, value) in pairs {
        hasher.update((key.len() as u64).to_be_bytes());
        hasher.update(key.as_bytes());
        hasher.update((value.len() as u64).to_be_bytes());
        hasher.update(value);
    }
}

fn hex(hasher: Sha256) -> String {
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// SHA-256 over the sorted key/value pairs of a secret payload.
///
/// Keys are length-prefixed so `{"ab": "c"}` and `{"a": "bc"}` never collide.
#[must_use]
pub fn content_hash<'a, I>(data: I) -> String
where
    I: IntoIterator<Item = (&'a String, &'a [u8])>,
{
    let mut hasher = Sha256::new();
    hash_pairs(&mut hasher, data);
    hex(hasher)
}

/// Content hash of a payload about to be written.
#[must_use]
pub fn payload_hash(data: &BTreeMap<String, Vec<u8>>) -> String {
    content_hash(data.iter().map(|(k, v)| (k, v.as_slice())))
}

/// Hash of the data and labels of a secret; the data is count-prefixed so no data entry
/// can pass for a label.
fn state_hash<'a, I>(data: I, labels: &BTreeMap<String, String>) -> String
where
    I: ExactSizeIterator<Item = (&'a String, &'a [u8])>,
{
    let mut hasher = Sha256::new();
    hasher.update((data.len() as u64).to_be_bytes());
    hash_pairs(&mut hasher, data);
    hash_pairs(&mut hasher, labels.iter().map(|(k, v)| (k, v.as_bytes())));
    hex(hasher)
}

/// Data and labels of a stored secret.
#[must_use]
pub fn stored_secret_hash(secret: &Secret) -> String {
    let empty = BTreeMap::new();
    let labels = secret.metadata.labels.as_ref().unwrap_or(&empty);
    match &secret.data {
        Some(data) => state_hash(data.iter().map(|(k, v)| (k, v.0.as_slice())), labels),
        None => state_hash(std::iter::empty(), labels),
    }
}

/// Data and labels of a secret about to be written.
#[must_use]
pub fn desired_secret_hash(data: &BTreeMap<String, Vec<u8>>, labels: &BTreeMap<String, String>) -> String {
    state_hash(data.iter().map(|(k, v)| (k, v.as_slice())), labels)
}

fn build_secret(
    name: &str,
    namespace: &str,
    data: &BTreeMap<String, Vec<u8>>,
    labels: BTreeMap<String, String>,
) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        data: Some(
            data.iter()
                .map(|(k, v)| (k.clone(), ByteString(v.clone())))
                .collect(),
        ),
        type_: Some("Opaque".to_string()),
        ..Default::default()
    }
}

/// Create a secret, or replace it when its data or labels differ from `data` and `labels`.
///
/// Returns `true` when something was written. A `resourceVersion` conflict on replace is
/// returned as an error and retried on the next reconcile.
///
/// # Errors
///
/// Returns an error if API operations fail.
pub async fn create_or_update_secret(
    client: &Client,
    namespace: &str,
    name: &str,
    data: &BTreeMap<String, Vec<u8>>,
    labels: BTreeMap<String, String>,
) -> Result<bool> {
    let api: Api<Secret> = Api::namespaced(client.clone(), namespace);
    let desired_hash = desired_secret_hash(data, &labels);
    let desired = build_secret(name, namespace, data, labels);

    match api.get_opt(name).await? {
        Some(existing) => {
            if stored_secret_hash(&existing) == desired_hash {
                debug!(namespace = %namespace, name = %name, "Secret unchanged, skipping write");
                return Ok(false);
            }
            let mut replacement = desired;
            replacement.metadata.resource_version = existing.resource_version();
            api.replace(name, &PostParams::default(), &replacement)
                .await?;
            info!(namespace = %namespace, name = %name, "Updated secret");
        }
        None => {
            api.create(&PostParams::default(), &desired).await?;
            info!(namespace = %namespace, name = %name, "Created secret");
        }
    }
    crate::metrics::record_secret_write(name);

    Ok(true)
}

/// Create a secret only if it does not exist yet. Returns `true` when it was created.
///
/// Used on the admission path, where an existing (possibly stale) secret is left to the
/// reconciler.
///
/// # Errors
///
/// Returns an error if API operations fail. A concurrent create is not an error.
pub async fn create_secret_if_missing(
    client: &Client,
    namespace: &str,
    name: &str,
    data: &BTreeMap<String, Vec<u8>>,
    labels: BTreeMap<String, String>,
) -> Result<bool> {
    let api: Api<Secret> = Api::namespaced(client.clone(), namespace);
    if api.get_opt(name).await?.is_some() {
        return Ok(false);
    }

    match api
        .create(
            &PostParams::default(),
            &build_secret(name, namespace, data, labels),
        )
        .await
    {
        Ok(_) => {
            info!(namespace = %namespace, name = %name, "Created missing secret");
            crate::metrics::record_secret_write(name);
            Ok(true)
        }
        Err(kube::Error::Api(status)) if status.code == 409 => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Delete a secret, treating a missing secret as success.
///
/// # Errors
///
/// Returns an error if the delete fails for any reason other than 404.
pub async fn delete_secret_if_exists(client: &Client, namespace: &str, name: &str) -> Result<()> {
    let api: Api<Secret> = Api::namespaced(client.clone(), namespace);
    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => {
            info!(namespace = %namespace, name = %name, "Deleted secret");
            Ok(())
        }
        Err(e) if is_not_found(&e) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
#[path = "resources_tests.rs"]
mod resources_tests;
