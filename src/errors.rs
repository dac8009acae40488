// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Error kinds surfaced by the operator core.
//!
//! [`OperatorError`] classifies failures the way reconcilers and the webhook need to act
//! on them:
//! - `NotFound` and `Transient` are recovered by requeueing
//! - `Conflict` is surfaced on the `DynaKube` status
//! - `Validation` stops reconciliation of one object until it is edited
//! - `Fatal` only happens at startup and terminates the process
//!
//! PKI and tenant API failures have their own error types in
//! [`crate::certificates::CertificateError`] and [`crate::tenant::TenantError`].

use crate::status_reasons::{
    REASON_CONFIGURATION_INVALID, REASON_NAMESPACE_CONFLICT, REASON_RECONCILE_ERROR,
};
use thiserror::Error;

/// Errors produced by the mapping resolver, the secret generators and reconcilers.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OperatorError {
    /// A dependent object does not exist (yet)
    ///
    /// Usually the object has not propagated. Recovered by requeue.
    #[error("{kind} '{name}' not found in namespace '{namespace}'")]
    NotFound {
        /// Kind of the missing object
        kind: String,
        /// Name of the missing object
        name: String,
        /// Namespace that was searched
        namespace: String,
    },

    /// Several `DynaKube`s with app injection select the same namespace
    ///
    /// Surfaced as a `NamespaceConflict` condition on every listed `DynaKube`. No
    /// secrets are written to the namespace and pods in it are admitted unmodified.
    #[error("namespace '{namespace}' is selected by more than one DynaKube: {}", dynakubes.join(", "))]
    Conflict {
        /// The contested namespace
        namespace: String,
        /// Names of all `DynaKube`s selecting it
        dynakubes: Vec<String>,
    },

    /// An update collided on `resourceVersion`
    ///
    /// Treated as transient and retried on the next reconcile tick.
    #[error("update of {kind} '{name}' conflicted with a concurrent write")]
    ResourceVersionConflict {
        /// Kind of the object
        kind: String,
        /// Name of the object
        name: String,
    },

    /// A `DynaKube` violates an invariant
    #[error("DynaKube '{name}' is invalid: {reason}")]
    Validation {
        /// Name of the `DynaKube`
        name: String,
        /// What is wrong
        reason: String,
    },

    /// An I/O operation against the API server failed
    #[error("{operation} failed: {reason}")]
    Transient {
        /// The operation that failed, e.g. `get secret dynatrace/dk`
        operation: String,
        /// Underlying error message
        reason: String,
    },

    /// Startup cannot proceed
    #[error("fatal: {reason}")]
    Fatal {
        /// What failed
        reason: String,
    },
}

impl OperatorError {
    /// Classify a kube client error.
    ///
    /// HTTP 404 becomes [`OperatorError::NotFound`], HTTP 409 becomes
    /// [`OperatorError::ResourceVersionConflict`], everything else is
    /// [`OperatorError::Transient`].
    #[must_use]
    pub fn from_kube(err: &kube::Error, kind: &str, name: &str, namespace: &str) -> Self {
        match err {
            kube::Error::Api(status) if status.code == 404 => Self::NotFound {
                kind: kind.to_string(),
                name: name.to_string(),
                namespace: namespace.to_string(),
            },
            kube::Error::Api(status) if status.code == 409 => Self::ResourceVersionConflict {
                kind: kind.to_string(),
                name: name.to_string(),
            },
            other => Self::Transient {
                operation: format!("{kind} {namespace}/{name}"),
                reason: other.to_string(),
            },
        }
    }

    /// Whether the error clears by itself and should simply be retried.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. } | Self::ResourceVersionConflict { .. } | Self::Transient { .. }
        )
    }

    /// Condition reason used when the error is surfaced on a `DynaKube` status.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Conflict { .. } => REASON_NAMESPACE_CONFLICT,
            Self::Validation { .. } => REASON_CONFIGURATION_INVALID,
            _ => REASON_RECONCILE_ERROR,
        }
    }
}

/// True when a kube error is an HTTP 404.
#[must_use]
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(status) if status.code == 404)
}

/// True when a kube error is an HTTP 403.
#[must_use]
pub fn is_forbidden(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(status) if status.code == 403)
}

#[cfg(test)]
#[path = "errors_tests.rs"]
mod errors_tests;
