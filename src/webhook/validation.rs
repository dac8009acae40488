// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! `DynaKube` admission: reject invalid specs and overlapping namespace selectors.

use crate::config::OperatorConfig;
use crate::crd::DynaKube;
use crate::mapper;
use crate::webhook::client::WebhookClient;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
use kube::core::DynamicObject;
use kube::ResourceExt;
use std::sync::Arc;
use tracing::{info, warn};

/// Validation handler for `DynaKube` create and update.
pub struct DynaKubeValidator {
    client: Arc<dyn WebhookClient>,
    config: Arc<OperatorConfig>,
}

impl DynaKubeValidator {
    #[must_use]
    pub fn new(client: Arc<dyn WebhookClient>, config: Arc<OperatorConfig>) -> Self {
        Self { client, config }
    }

    pub async fn handle(&self, review: AdmissionReview<DynaKube>) -> AdmissionReview<DynamicObject> {
        let request: AdmissionRequest<DynaKube> = match review.try_into() {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "Invalid admission review");
                return AdmissionResponse::invalid(e.to_string()).into_review();
            }
        };
        self.review(&request).await.into_review()
    }

    /// Decide on one request.
    pub async fn review(&self, request: &AdmissionRequest<DynaKube>) -> AdmissionResponse {
        let response = AdmissionResponse::from(request);
        if matches!(request.operation, Operation::Delete | Operation::Connect) {
            return response;
        }
        let Some(dk) = request.object.as_ref() else {
            return response;
        };

        if let Err(e) = dk.validate() {
            info!(name = %dk.name_any(), reason = %e, "Rejected DynaKube");
            return response.deny(e.to_string());
        }

        match self.conflicting_namespaces(dk).await {
            Ok(conflicts) if conflicts.is_empty() => response,
            Ok(conflicts) => {
                let message = conflicts
                    .iter()
                    .map(|(ns, other)| format!("namespace '{ns}' is already selected by DynaKube '{other}'"))
                    .collect::<Vec<_>>()
                    .join("; ");
                info!(name = %dk.name_any(), reason = %message, "Rejected DynaKube");
                response.deny(message)
            }
            Err(e) => {
                warn!(name = %dk.name_any(), error = %e, "Could not check namespace selectors");
                let mut response = response;
                response.warnings = Some(vec![format!(
                    "namespace selector overlap was not checked: {e:#}"
                )]);
                response
            }
        }
    }

    /// `(namespace, other DynaKube)` pairs where `dk` and another app-injecting
    /// `DynaKube` select the same namespace.
    async fn conflicting_namespaces(&self, dk: &DynaKube) -> anyhow::Result<Vec<(String, String)>> {
        if !dk.needs_app_injection() {
            return Ok(Vec::new());
        }

        let name = dk.name_any();
        let others: Vec<DynaKube> = self
            .client
            .list_dynakubes()
            .await?
            .into_iter()
            .filter(|other| other.name_any() != name && other.needs_app_injection())
            .collect();
        if others.is_empty() {
            return Ok(Vec::new());
        }

        let mut conflicts = Vec::new();
        for namespace in self.client.list_namespaces().await? {
            let ns_name = namespace.name_any();
            if mapper::is_excluded_namespace(&ns_name, &self.config.namespace)
                || !mapper::dynakube_selects_namespace(dk, &ns_name, namespace.labels())
            {
                continue;
            }
            for other in &others {
                if mapper::dynakube_selects_namespace(other, &ns_name, namespace.labels()) {
                    conflicts.push((ns_name.clone(), other.name_any()));
                }
            }
        }
        Ok(conflicts)
    }
}

#[cfg(test)]
#[path = "validation_tests.rs"]
mod validation_tests;
