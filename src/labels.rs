// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Common label and annotation constants used across all reconcilers and the webhook.
//!
//! This module defines standard Kubernetes labels and the Dynatrace-specific
//! labels/annotations that make up the operator's stable external contract.

// ============================================================================
// Kubernetes Standard Labels
// https://kubernetes.io/docs/concepts/overview/working-with-objects/common-labels/
// ============================================================================

/// Standard label for the component name within the architecture
pub const K8S_COMPONENT: &str = "app.kubernetes.io/component";

/// Standard label for the tool being used to manage the operation of an application
pub const K8S_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Standard label for the name of the application
pub const K8S_NAME: &str = "app.kubernetes.io/name";

/// Standard label for a unique name identifying the instance of an application
pub const K8S_INSTANCE: &str = "app.kubernetes.io/instance";

// ============================================================================
// Kubernetes Standard Label Values
// ============================================================================

/// Value for `app.kubernetes.io/managed-by`
pub const MANAGED_BY_OPERATOR: &str = "dynatrace-operator";

/// Component value for ActiveGate workloads
pub const COMPONENT_ACTIVEGATE: &str = "activegate";

/// Component value for OneAgent workloads
pub const COMPONENT_ONEAGENT: &str = "oneagent";

/// Component value for injection secrets
pub const COMPONENT_INJECTION: &str = "injection";

/// Component value for the webhook certificates secret
pub const COMPONENT_WEBHOOK: &str = "webhook";

/// Application name for all operator-managed objects
pub const APP_NAME: &str = "dynakube";

// ============================================================================
// Instance Label
// ============================================================================

/// Label on namespaces (and operator-created secrets) naming the owning `DynaKube`
pub const INSTANCE_LABEL: &str = "dynakube.internal.dynatrace.com/instance";

// ============================================================================
// Pod Opt-out Annotations
// ============================================================================

/// Pod-level switch for all injection (`false` disables)
pub const ANNOTATION_INJECT: &str = "dynatrace.com/inject";

/// Pod-level switch for OneAgent injection
pub const ANNOTATION_ONEAGENT_INJECT: &str = "oneagent.dynatrace.com/inject";

/// Pod-level switch for data-ingest (metadata) injection
pub const ANNOTATION_DATA_INGEST_INJECT: &str = "data-ingest.dynatrace.com/inject";

// ============================================================================
// Post-mutation Markers
// ============================================================================

/// Set once any mutator has run on a pod
pub const ANNOTATION_DYNATRACE_INJECTED: &str = "dynakube.dynatrace.com/injected";

/// Set by the OneAgent mutator
pub const ANNOTATION_ONEAGENT_INJECTED: &str = "oneagent.dynatrace.com/injected";

/// Set by the workload-metadata mutator
pub const ANNOTATION_DATA_INGEST_INJECTED: &str = "data-ingest.dynatrace.com/injected";

// ============================================================================
// Install-container Tunables
// ============================================================================

/// Code module flavor
pub const ANNOTATION_FLAVOR: &str = "oneagent.dynatrace.com/flavor";

/// Code module technologies
pub const ANNOTATION_TECHNOLOGIES: &str = "oneagent.dynatrace.com/technologies";

/// Install path inside user containers
pub const ANNOTATION_INSTALL_PATH: &str = "oneagent.dynatrace.com/install-path";

/// Installer download URL
pub const ANNOTATION_INSTALLER_URL: &str = "oneagent.dynatrace.com/installer-url";

/// Failure policy of the in-pod init binary (`silent` or `fail`)
pub const ANNOTATION_FAILURE_POLICY: &str = "oneagent.dynatrace.com/failure-policy";

// ============================================================================
// Platform Heuristics
// ============================================================================

/// Annotation present on `oc debug` pods
pub const ANNOTATION_OPENSHIFT_DEBUG_SOURCE_CONTAINER: &str = "debug.openshift.io/source-container";

/// Annotation present on `oc debug` pods together with the source container
pub const ANNOTATION_OPENSHIFT_DEBUG_SOURCE_RESOURCE: &str = "debug.openshift.io/source-resource";

// ============================================================================
// Feature Flags
// ============================================================================

/// Prefix of every feature flag annotation on a `DynaKube`
pub const FEATURE_FLAG_PREFIX: &str = "feature.dynatrace.com/";

// ============================================================================
// Finalizers
// ============================================================================

/// Finalizer for `DynaKube` resources
pub const FINALIZER_DYNAKUBE: &str = "dynatrace.com/dynakube-finalizer";
