// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Reconcilers run by the operator.
//!
//! - [`reconcile_dynakube`] - tenant status, namespace mapping, injection secrets and
//!   agent workloads of one `DynaKube`
//! - [`reconcile_namespace`] - instance label of one namespace, on namespace events
//!
//! The webhook certificate controller lives in [`crate::certificates`].

pub mod dynakube;
pub mod finalizers;
pub mod namespace;
pub mod resources;
pub mod status;

pub use dynakube::reconcile_dynakube;
pub use namespace::reconcile_namespace;
