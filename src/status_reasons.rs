// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Standard Kubernetes status condition reasons for `DynaKube` resources.
//!
//! This module defines constants for condition types and reasons following Kubernetes
//! conventions. Reasons are programmatic identifiers in CamelCase that explain why a
//! condition has a particular status, and event reasons are what the webhook records
//! against a `DynaKube` when it skips or fails an injection.
//!
//! # Condition Types
//!
//! - `Ready` is the encompassing condition of a `DynaKube`.
//! - `Tokens` reports whether the token secret could be read.
//! - `NamespaceConflict` is set when this `DynaKube` and another one select the same
//!   namespace for injection.
//!
//! # Example Status
//!
//! ```yaml
//! status:
//!   phase: Running
//!   conditions:
//!     - type: Ready
//!       status: "True"
//!       reason: SecretsPropagated
//!       message: "Injection secrets written to 3 namespaces"
//!     - type: NamespaceConflict
//!       status: "True"
//!       reason: NamespaceConflict
//!       message: "Namespace shop is also selected by dynakube-b"
//! ```

// ============================================================================
// Condition Types
// ============================================================================

/// Primary condition type indicating overall resource readiness.
pub const CONDITION_TYPE_READY: &str = "Ready";

/// Condition type reporting the state of the token secret.
pub const CONDITION_TYPE_TOKENS: &str = "Tokens";

/// Condition type set when two `DynaKube`s select the same namespace.
pub const CONDITION_TYPE_NAMESPACE_CONFLICT: &str = "NamespaceConflict";

// ============================================================================
// Ready Reasons
// ============================================================================

/// Init-config and endpoint secrets are present in every mapped namespace.
///
/// **Usage:** the encompassing `Ready` condition after a successful fan-out.
pub const REASON_SECRETS_PROPAGATED: &str = "SecretsPropagated";

/// Reconciliation is in progress (workloads requested, tenant not yet known).
pub const REASON_PROGRESSING: &str = "Progressing";

/// The `DynaKube` violates an invariant and is not reconciled until it is fixed.
///
/// **Examples:**
/// - more than one OneAgent mode set
/// - empty `apiUrl` without an ActiveGate
/// - an invalid regular expression in `namespaceIgnoreList`
pub const REASON_CONFIGURATION_INVALID: &str = "ConfigurationInvalid";

/// The token secret is missing or lacks `apiToken`.
pub const REASON_TOKENS_MISSING: &str = "TokensMissing";

/// The token secret was read successfully.
pub const REASON_TOKENS_VALID: &str = "TokensValid";

/// The tenant API could not be reached or rejected the request.
///
/// Secrets are still propagated with the last known tenant UUID.
pub const REASON_TENANT_UNREACHABLE: &str = "TenantUnreachable";

/// A namespace is selected by more than one `DynaKube` with app injection.
pub const REASON_NAMESPACE_CONFLICT: &str = "NamespaceConflict";

/// No namespace conflict is present.
pub const REASON_NO_CONFLICT: &str = "NoConflict";

/// A transient API error interrupted reconciliation.
pub const REASON_RECONCILE_ERROR: &str = "ReconcileError";

// ============================================================================
// Phases
// ============================================================================

/// Everything requested is deployed.
pub const PHASE_RUNNING: &str = "Running";

/// Workloads are requested or the tenant is not resolved yet.
pub const PHASE_DEPLOYING: &str = "Deploying";

/// The last reconcile failed.
pub const PHASE_ERROR: &str = "Error";

// ============================================================================
// Event Reasons (webhook)
// ============================================================================

/// A pod was injected for the first time.
pub const EVENT_REASON_INJECT: &str = "Inject";

/// An already-injected pod was patched on reinvocation.
pub const EVENT_REASON_UPDATE_POD: &str = "UpdatePod";

/// The namespace label names a `DynaKube` that does not exist.
pub const EVENT_REASON_MISSING_DYNAKUBE: &str = "MissingDynakube";

/// Injection was skipped because of an error. The pod is admitted unmodified.
pub const EVENT_REASON_INJECTION_FAILED: &str = "InjectionFailed";

// ============================================================================
// Helper Functions
// ============================================================================

/// Map a `Ready` reason to the phase reported in `status.phase`.
///
/// # Example
///
/// ```rust
/// use dynakube_operator::status_reasons::{phase_for_reason, REASON_SECRETS_PROPAGATED};
///
/// assert_eq!(phase_for_reason(REASON_SECRETS_PROPAGATED), "Running");
/// assert_eq!(phase_for_reason("ConfigurationInvalid"), "Error");
/// ```
#[must_use]
pub fn phase_for_reason(reason: &str) -> &'static str {
    match reason {
        REASON_SECRETS_PROPAGATED => PHASE_RUNNING,
        REASON_PROGRESSING | REASON_TENANT_UNREACHABLE => PHASE_DEPLOYING,
        _ => PHASE_ERROR,
    }
}

#[cfg(test)]
#[path = "status_reasons_tests.rs"]
mod status_reasons_tests;
