// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Shared context for all controllers with reflector stores.
//!
//! All controllers receive an `Arc<Context>` that contains:
//! - Kubernetes client
//! - Operator configuration
//! - Reflector store of `DynaKube` resources
//!
//! The store gives watch mappers (namespace and node events) in-memory access to every
//! `DynaKube` without API queries.

use crate::config::OperatorConfig;
use crate::crd::DynaKube;
use kube::runtime::reflector::Store;
use kube::{Client, ResourceExt};
use std::sync::Arc;

/// Shared context passed to all controllers.
#[derive(Clone)]
pub struct Context {
    /// Kubernetes client for API operations
    pub client: Client,

    /// Operator configuration
    pub config: Arc<OperatorConfig>,

    /// Reflector stores
    pub stores: Stores,
}

/// Collection of reflector stores for cross-controller queries.
#[derive(Clone)]
pub struct Stores {
    pub dynakubes: Store<DynaKube>,
}

impl Stores {
    /// Snapshot of every `DynaKube` in the store.
    #[must_use]
    pub fn dynakubes(&self) -> Vec<Arc<DynaKube>> {
        self.dynakubes.state()
    }

    #[must_use]
    pub fn get_dynakube(&self, name: &str, namespace: &str) -> Option<Arc<DynaKube>> {
        self.dynakubes
            .state()
            .into_iter()
            .find(|dk| dk.name_any() == name && dk.namespace().as_deref() == Some(namespace))
    }

    /// `DynaKube`s that inject code modules, i.e. those whose init config depends on
    /// namespaces and nodes.
    #[must_use]
    pub fn app_injection_dynakubes(&self) -> Vec<Arc<DynaKube>> {
        self.dynakubes
            .state()
            .into_iter()
            .filter(|dk| dk.needs_app_injection())
            .collect()
    }
}
