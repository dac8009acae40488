// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Pod admission: decide whether and how a pod is injected, then answer with a JSON patch.
//!
//! The handler never denies a pod. Every failure, including a handler timeout, turns
//! into an allow response whose status message explains why nothing was injected.
//!
//! # Flow
//!
//! 1. Opt-outs: `dynatrace.com/inject=false` and OpenShift debug pods
//! 2. Namespace and `DynaKube` resolution through the instance label
//! 3. Init (and endpoint) secret of the namespace, created on demand
//! 4. Already injected pods go through reinvocation; others through first injection

use crate::config::OperatorConfig;
use crate::constants::{INSTALL_CONTAINER_NAME, WEBHOOK_REQUEST_TIMEOUT_SECS};
use crate::crd::{DynaKube, DynaKubeSpec};
use crate::feature_flags;
use crate::labels::{
    ANNOTATION_DYNATRACE_INJECTED, ANNOTATION_INJECT, ANNOTATION_OPENSHIFT_DEBUG_SOURCE_CONTAINER,
    ANNOTATION_OPENSHIFT_DEBUG_SOURCE_RESOURCE,
};
use crate::mapper;
use crate::metrics;
use crate::status_reasons::{
    EVENT_REASON_INJECT, EVENT_REASON_INJECTION_FAILED, EVENT_REASON_MISSING_DYNAKUBE,
    EVENT_REASON_UPDATE_POD,
};
use crate::webhook::client::WebhookClient;
use crate::webhook::install_container::{base_pod_name, build_install_container};
use crate::webhook::mutators::{Mutator, MUTATORS};
use crate::webhook::owner::find_root_owner;
use crate::webhook::request::{pod_annotation, pod_display_name, MutationRequest};
use k8s_openapi::api::core::v1::{Container, Namespace, Pod, PodSpec};
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
use kube::core::DynamicObject;
use kube::runtime::events::EventType;
use kube::ResourceExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Result of one mutation pass.
#[derive(Debug)]
pub enum Outcome {
    /// The pod was changed and is returned as a patch
    Patched { pod: Box<Pod>, reinvoked: bool },
    /// Nothing to do; empty allow
    Skipped(&'static str),
    /// Injection failed; empty allow with the reason as status message
    Failed(String),
}

/// Whether the pod was started by `oc debug`.
#[must_use]
pub fn is_debug_pod(pod: &Pod) -> bool {
    pod_annotation(pod, ANNOTATION_OPENSHIFT_DEBUG_SOURCE_CONTAINER).is_some()
        && pod_annotation(pod, ANNOTATION_OPENSHIFT_DEBUG_SOURCE_RESOURCE).is_some()
}

/// Pod mutation handler.
pub struct PodMutator {
    client: Arc<dyn WebhookClient>,
    config: Arc<OperatorConfig>,
}

impl PodMutator {
    #[must_use]
    pub fn new(client: Arc<dyn WebhookClient>, config: Arc<OperatorConfig>) -> Self {
        Self { client, config }
    }

    /// Answer an admission review for a pod.
    pub async fn handle(&self, review: AdmissionReview<Pod>) -> AdmissionReview<DynamicObject> {
        let request: AdmissionRequest<Pod> = match review.try_into() {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "Invalid admission review");
                return AdmissionResponse::invalid(e.to_string()).into_review();
            }
        };

        let start = Instant::now();
        let timeout = Duration::from_secs(WEBHOOK_REQUEST_TIMEOUT_SECS);
        let outcome = match tokio::time::timeout(timeout, self.mutate(&request)).await {
            Ok(outcome) => outcome,
            Err(_) => Outcome::Failed(format!("the webhook did not answer within {timeout:?}")),
        };

        respond(&request, outcome, start.elapsed()).into_review()
    }

    /// Run the pipeline for one request.
    pub async fn mutate(&self, request: &AdmissionRequest<Pod>) -> Outcome {
        let Some(pod) = request.object.clone() else {
            return Outcome::Skipped("request carries no pod");
        };

        if pod_annotation(&pod, ANNOTATION_INJECT) == Some("false") {
            return Outcome::Skipped("pod opted out of injection");
        }
        if is_debug_pod(&pod) {
            return Outcome::Skipped("OpenShift debug pod");
        }

        let Some(namespace_name) = request.namespace.clone() else {
            return Outcome::Skipped("request carries no namespace");
        };
        let namespace = match self.client.get_namespace(&namespace_name).await {
            Ok(namespace) => namespace,
            Err(e) => return Outcome::Failed(format!("{e:#}")),
        };

        let dynakube = match self.resolve_dynakube(&namespace).await {
            Ok(Some(dk)) => dk,
            Ok(None) => return Outcome::Skipped("namespace is not mapped to a DynaKube"),
            Err(reason) => return Outcome::Failed(reason),
        };
        if !dynakube.needs_app_injection() {
            return Outcome::Skipped("DynaKube does not inject into applications");
        }

        let init_config = match self
            .client
            .ensure_init_secret(&dynakube, &namespace_name)
            .await
        {
            Ok(config) => config,
            Err(e) => return Outcome::Failed(format!("{e:#}")),
        };

        let mut req = MutationRequest {
            pod,
            namespace,
            dynakube,
            install_container: Container::default(),
            init_config,
            workload: None,
            cluster_id: self.config.cluster_id.clone(),
        };

        let injected = req.annotation(ANNOTATION_DYNATRACE_INJECTED) == Some("true")
            || MUTATORS.iter().any(|m| m.injected(&req));
        if injected {
            self.reinvoke(req).await
        } else {
            self.inject(req).await
        }
    }

    /// Look up the `DynaKube` of a namespace. Unlabelled namespaces are resolved from the
    /// selectors directly, so a pod admitted before the mapper ran is still injected.
    async fn resolve_dynakube(&self, namespace: &Namespace) -> Result<Option<DynaKube>, String> {
        if let Some(name) = mapper::instance_label(namespace) {
            return match self.client.get_dynakube(name).await {
                Ok(Some(dk)) => Ok(Some(dk)),
                Ok(None) => {
                    let message = format!("DynaKube {name} referenced by namespace {} does not exist", namespace.name_any());
                    let mut placeholder = DynaKube::new(name, DynaKubeSpec::default());
                    placeholder.metadata.namespace = Some(self.config.namespace.clone());
                    self.client
                        .publish_event(&placeholder, EventType::Warning, EVENT_REASON_MISSING_DYNAKUBE, &message)
                        .await;
                    Err(message)
                }
                Err(e) => Err(format!("{e:#}")),
            };
        }

        let namespace_name = namespace.name_any();
        if self.config.deployed_via_olm
            || mapper::is_excluded_namespace(&namespace_name, &self.config.namespace)
        {
            return Ok(None);
        }

        let dynakubes = self.client.list_dynakubes().await.map_err(|e| format!("{e:#}"))?;
        match mapper::resolve_dynakube_for_namespace(namespace, &dynakubes) {
            Ok(found) => Ok(found.cloned()),
            Err(conflict) => {
                let message = conflict.to_string();
                for dk in dynakubes.iter().filter(|dk| {
                    mapper::dynakube_selects_namespace(dk, &namespace_name, namespace.labels())
                }) {
                    self.client
                        .publish_event(dk, EventType::Warning, EVENT_REASON_INJECTION_FAILED, &message)
                        .await;
                }
                Err(message)
            }
        }
    }

    async fn inject(&self, mut req: MutationRequest) -> Outcome {
        let enabled: Vec<Mutator> = MUTATORS.into_iter().filter(|m| m.enabled(&req)).collect();
        if enabled.is_empty() {
            return Outcome::Skipped("no mutator is enabled for the pod");
        }

        let namespace = req.namespace_name();
        // The OTLP exporter takes its token from the endpoint secret too.
        if enabled.contains(&Mutator::Metadata) || enabled.contains(&Mutator::Otlp) {
            if let Err(e) = self.client.ensure_endpoint_secret(&req.dynakube, &namespace).await {
                return Outcome::Failed(format!("{e:#}"));
            }
        }
        if enabled.contains(&Mutator::Metadata) {
            match find_root_owner(self.client.as_ref(), &req.pod, &namespace).await {
                Ok(workload) => req.workload = Some(workload),
                Err(e) => return Outcome::Failed(format!("{e:#}")),
            }
        }

        req.install_container =
            build_install_container(&req.pod, &req.dynakube, &self.config.image, &self.config.cluster_id);

        for mutator in &enabled {
            if let Err(e) = mutator.mutate(&mut req) {
                let message = format!("{} injection failed: {e}", mutator.name());
                self.client
                    .publish_event(&req.dynakube, EventType::Warning, EVENT_REASON_INJECTION_FAILED, &message)
                    .await;
                return Outcome::Failed(message);
            }
            debug!(mutator = mutator.name(), pod = %req.pod_name(), "Mutator applied");
        }

        let install_container = std::mem::take(&mut req.install_container);
        req.pod
            .spec
            .get_or_insert_with(PodSpec::default)
            .init_containers
            .get_or_insert_with(Vec::new)
            .push(install_container);
        req.set_annotation(ANNOTATION_DYNATRACE_INJECTED, "true");

        let message = format!(
            "Injecting the necessary info into pod {} in namespace {namespace}",
            base_pod_name(&req.pod)
        );
        self.client
            .publish_event(&req.dynakube, EventType::Normal, EVENT_REASON_INJECT, &message)
            .await;
        info!(pod = %req.pod_name(), namespace = %namespace, dynakube = %req.dynakube.name_any(), "Injected pod");

        Outcome::Patched {
            pod: Box::new(req.pod),
            reinvoked: false,
        }
    }

    async fn reinvoke(&self, mut req: MutationRequest) -> Outcome {
        if feature_flags::disable_webhook_reinvocation_policy(&req.dynakube) {
            return Outcome::Skipped("reinvocation is disabled");
        }

        let position = req
            .pod
            .spec
            .as_ref()
            .and_then(|s| s.init_containers.as_ref())
            .and_then(|init| init.iter().position(|c| c.name == INSTALL_CONTAINER_NAME));
        let Some(position) = position else {
            return Outcome::Skipped("injected pod has no install container");
        };
        if let Some(init) = req.pod.spec.as_ref().and_then(|s| s.init_containers.as_ref()) {
            req.install_container = init[position].clone();
        }

        let mut changed = false;
        for mutator in MUTATORS {
            if mutator.enabled(&req) && mutator.reinvoke(&mut req) {
                debug!(mutator = mutator.name(), pod = %req.pod_name(), "Mutator reinvoked");
                changed = true;
            }
        }
        if !changed {
            return Outcome::Skipped("pod is up to date");
        }

        let install_container = std::mem::take(&mut req.install_container);
        if let Some(init) = req.pod.spec.as_mut().and_then(|s| s.init_containers.as_mut()) {
            init[position] = install_container;
        }

        let message = format!(
            "Updating pod {} in namespace {} with missing containers",
            base_pod_name(&req.pod),
            req.namespace_name()
        );
        self.client
            .publish_event(&req.dynakube, EventType::Normal, EVENT_REASON_UPDATE_POD, &message)
            .await;

        Outcome::Patched {
            pod: Box::new(req.pod),
            reinvoked: true,
        }
    }
}

/// Build the admission response for `outcome` and record it.
#[must_use]
pub fn respond(request: &AdmissionRequest<Pod>, outcome: Outcome, elapsed: Duration) -> AdmissionResponse {
    let pod_name = request
        .object
        .as_ref()
        .map(pod_display_name)
        .unwrap_or_default();

    match outcome {
        Outcome::Patched { pod, reinvoked } => match patch_response(request, &pod) {
            Ok(response) => {
                let result = if reinvoked {
                    metrics::INJECTION_REINVOKED
                } else {
                    metrics::INJECTION_INJECTED
                };
                metrics::record_injection(result, elapsed);
                response
            }
            Err(e) => failed_response(request, &pod_name, &e, elapsed),
        },
        Outcome::Skipped(reason) => {
            debug!(pod = %pod_name, reason, "Pod admitted without injection");
            metrics::record_injection(metrics::INJECTION_SKIPPED, elapsed);
            AdmissionResponse::from(request)
        }
        Outcome::Failed(reason) => failed_response(request, &pod_name, &reason, elapsed),
    }
}

fn patch_response(request: &AdmissionRequest<Pod>, pod: &Pod) -> Result<AdmissionResponse, String> {
    let original = serde_json::to_value(&request.object).map_err(|e| e.to_string())?;
    let mutated = serde_json::to_value(pod).map_err(|e| e.to_string())?;
    let patch = json_patch::diff(&original, &mutated);
    AdmissionResponse::from(request)
        .with_patch(patch)
        .map_err(|e| e.to_string())
}

fn failed_response(
    request: &AdmissionRequest<Pod>,
    pod_name: &str,
    reason: &str,
    elapsed: Duration,
) -> AdmissionResponse {
    let message = format!("Failed to inject into pod: {pod_name} because {reason}");
    warn!(namespace = ?request.namespace, "{message}");
    metrics::record_injection(metrics::INJECTION_ERROR, elapsed);

    let mut response = AdmissionResponse::from(request);
    response.result.message = message;
    response
}

#[cfg(test)]
#[path = "pod_mutator_tests.rs"]
mod pod_mutator_tests;
