// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Finalizer management for namespaced custom resources.
//!
//! The `DynaKube` reconciler adds [`FINALIZER_DYNAKUBE`](crate::labels::FINALIZER_DYNAKUBE)
//! on its first pass. When the object is deleted, [`handle_deletion`] runs the
//! resource's [`FinalizerCleanup`] and only then releases the finalizer, so injection
//! secrets never outlive their `DynaKube`.
//!
//! # Example
//!
//! ```rust,ignore
//! use dynakube_operator::reconcilers::finalizers::{ensure_finalizer, handle_deletion};
//! use dynakube_operator::labels::FINALIZER_DYNAKUBE;
//!
//! async fn reconcile(client: Client, dk: DynaKube) -> Result<()> {
//!     if dk.metadata.deletion_timestamp.is_some() {
//!         return handle_deletion(&client, &dk, FINALIZER_DYNAKUBE).await;
//!     }
//!     ensure_finalizer(&client, &dk, FINALIZER_DYNAKUBE).await?;
//!     Ok(())
//! }
//! ```

use anyhow::Result;
use kube::api::{Patch, PatchParams};
use kube::core::NamespaceResourceScope;
use kube::{Api, Client, Resource, ResourceExt};
use serde_json::json;
use tracing::info;

/// Cleanup a resource performs before its finalizer is removed.
#[async_trait::async_trait]
pub trait FinalizerCleanup: Resource + ResourceExt + Clone {
    /// Release everything the resource owns outside of its owner references.
    ///
    /// # Errors
    ///
    /// An error keeps the finalizer in place; deletion is retried on the next reconcile.
    async fn cleanup(&self, client: &Client) -> Result<()>;
}

/// Whether `finalizer` is set on the object.
#[must_use]
pub fn has_finalizer<T: Resource>(resource: &T, finalizer: &str) -> bool {
    resource
        .meta()
        .finalizers
        .as_ref()
        .is_some_and(|f| f.iter().any(|x| x == finalizer))
}

/// Finalizer list with `finalizer` appended, or `None` when it is already present.
#[must_use]
pub fn finalizers_with(current: Option<&Vec<String>>, finalizer: &str) -> Option<Vec<String>> {
    let mut finalizers = current.cloned().unwrap_or_default();
    if finalizers.iter().any(|f| f == finalizer) {
        return None;
    }
    finalizers.push(finalizer.to_string());
    Some(finalizers)
}

/// Finalizer list without `finalizer`, or `None` when it was not present.
#[must_use]
pub fn finalizers_without(current: Option<&Vec<String>>, finalizer: &str) -> Option<Vec<String>> {
    let current = current?;
    if !current.iter().any(|f| f == finalizer) {
        return None;
    }
    Some(current.iter().filter(|f| *f != finalizer).cloned().collect())
}

async fn patch_finalizers<T>(client: &Client, resource: &T, finalizers: &[String]) -> Result<()>
where
    T: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + ResourceExt
        + Clone
        + std::fmt::Debug
        + serde::Serialize
        + for<'de> serde::Deserialize<'de>,
{
    let namespace = resource.namespace().unwrap_or_default();
    let api: Api<T> = Api::namespaced(client.clone(), &namespace);
    let patch = json!({ "metadata": { "finalizers": finalizers } });
    api.patch(&resource.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

/// Add `finalizer` to the resource if it is missing.
///
/// # Errors
///
/// Returns an error if the patch fails.
pub async fn ensure_finalizer<T>(client: &Client, resource: &T, finalizer: &str) -> Result<()>
where
    T: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + ResourceExt
        + Clone
        + std::fmt::Debug
        + serde::Serialize
        + for<'de> serde::Deserialize<'de>,
{
    if let Some(finalizers) = finalizers_with(resource.meta().finalizers.as_ref(), finalizer) {
        patch_finalizers(client, resource, &finalizers).await?;
        info!(
            namespace = ?resource.namespace(),
            name = %resource.name_any(),
            kind = %T::kind(&()),
            finalizer = %finalizer,
            "Added finalizer"
        );
    }
    Ok(())
}

/// Remove `finalizer` from the resource if it is present.
///
/// # Errors
///
/// Returns an error if the patch fails.
pub async fn remove_finalizer<T>(client: &Client, resource: &T, finalizer: &str) -> Result<()>
where
    T: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + ResourceExt
        + Clone
        + std::fmt::Debug
        + serde::Serialize
        + for<'de> serde::Deserialize<'de>,
{
    if let Some(finalizers) = finalizers_without(resource.meta().finalizers.as_ref(), finalizer) {
        patch_finalizers(client, resource, &finalizers).await?;
        info!(
            namespace = ?resource.namespace(),
            name = %resource.name_any(),
            kind = %T::kind(&()),
            finalizer = %finalizer,
            "Removed finalizer"
        );
    }
    Ok(())
}

/// Run cleanup and release the finalizer of a resource that is being deleted.
///
/// Does nothing when the finalizer is already gone.
///
/// # Errors
///
/// Returns an error if cleanup or the finalizer patch fails; the finalizer then stays.
pub async fn handle_deletion<T>(client: &Client, resource: &T, finalizer: &str) -> Result<()>
where
    T: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + ResourceExt
        + FinalizerCleanup
        + Clone
        + std::fmt::Debug
        + serde::Serialize
        + for<'de> serde::Deserialize<'de>,
{
    if !has_finalizer(resource, finalizer) {
        return Ok(());
    }

    info!(
        namespace = ?resource.namespace(),
        name = %resource.name_any(),
        kind = %T::kind(&()),
        "Running cleanup before deletion"
    );
    resource.cleanup(client).await?;
    remove_finalizer(client, resource, finalizer).await
}

#[cfg(test)]
#[path = "finalizers_tests.rs"]
mod finalizers_tests;
