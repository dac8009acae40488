// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Data-ingest endpoint secret generation.
//!
//! Every mapped namespace receives a `dynatrace-data-ingest-endpoint` secret with an
//! `endpoint.properties` file that enriched workloads read:
//!
//! ```text
//! DT_METRICS_INGEST_URL=https://dk-activegate.dynatrace/e/<tenant>/api/v2/metrics/ingest
//! DT_METRICS_INGEST_API_TOKEN=<data-ingest token>
//! DT_STATSD_INGEST_URL=dk-activegate.dynatrace:18125
//! ```
//!
//! The metrics lines are present unless metadata enrichment is disabled; the StatsD line
//! only when the ActiveGate has the `statsd-ingest` capability. The raw token under
//! `dataIngestToken` also backs the OTLP exporter's `DT_API_TOKEN`, so the secret stays
//! in place while OTLP is on even with enrichment disabled.

use crate::constants::{
    ACTIVEGATE_STATSD_PORT, SECRET_ENDPOINT_NAME, SECRET_ENDPOINT_PROPERTIES_KEY,
    SECRET_ENDPOINT_TOKEN_KEY,
};
use crate::crd::{Capability, DynaKube};
use crate::errors::OperatorError;
use crate::feature_flags;
use crate::initgeneration::injection_secret_labels;
use crate::reconcilers::resources::{
    create_or_update_secret, create_secret_if_missing, delete_secret_if_exists,
};
use crate::tokens::Tokens;
use anyhow::{Context as _, Result};
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client, ResourceExt};
use std::collections::BTreeMap;
use tracing::info;

pub const METRICS_URL_KEY: &str = "DT_METRICS_INGEST_URL";
pub const METRICS_TOKEN_KEY: &str = "DT_METRICS_INGEST_API_TOKEN";
pub const STATSD_URL_KEY: &str = "DT_STATSD_INGEST_URL";

/// Metrics ingest URL of `dk`.
///
/// # Errors
///
/// Returns [`OperatorError::Validation`] when `dk` has neither the `metrics-ingest`
/// capability nor an `apiUrl`, and [`OperatorError::Transient`] when the ActiveGate
/// route needs a tenant UUID that is not known yet.
pub fn metrics_ingest_url(dk: &DynaKube) -> Result<String, OperatorError> {
    if dk.has_capability(Capability::MetricsIngest) {
        let tenant = dk.tenant_uuid().ok_or_else(|| OperatorError::Transient {
            operation: format!("build metrics ingest URL for {}", dk.name_any()),
            reason: "tenant UUID is not known yet".to_string(),
        })?;
        return Ok(format!(
            "https://{}.{}/e/{tenant}/api/v2/metrics/ingest",
            dk.activegate_service_name(),
            dk.namespace().unwrap_or_default()
        ));
    }

    let api_url = dk.spec.api_url.trim().trim_end_matches('/');
    if api_url.is_empty() {
        return Err(OperatorError::Validation {
            name: dk.name_any(),
            reason: "no metrics-ingest ActiveGate capability and no apiUrl".to_string(),
        });
    }
    Ok(format!("{api_url}/v2/metrics/ingest"))
}

/// StatsD ingest address `<service>.<namespace>:18125`, if enabled.
#[must_use]
pub fn statsd_ingest_url(dk: &DynaKube) -> Option<String> {
    dk.has_capability(Capability::StatsdIngest).then(|| {
        format!(
            "{}.{}:{ACTIVEGATE_STATSD_PORT}",
            dk.activegate_service_name(),
            dk.namespace().unwrap_or_default()
        )
    })
}

/// Whether injected pods reference the endpoint secret: metadata enrichment reads the
/// properties file and the OTLP exporter reads the token.
#[must_use]
pub fn endpoint_secret_needed(dk: &DynaKube) -> bool {
    !feature_flags::disable_metadata_enrichment(dk) || dk.has_capability(Capability::MetricsIngest)
}

/// Render `endpoint.properties`.
///
/// # Errors
///
/// See [`metrics_ingest_url`].
pub fn build_endpoint_properties(dk: &DynaKube, data_ingest_token: &str) -> Result<String, OperatorError> {
    let mut properties = String::new();

    if !feature_flags::disable_metadata_enrichment(dk) {
        let url = metrics_ingest_url(dk)?;
        properties.push_str(&format!("{METRICS_URL_KEY}={url}\n"));
        properties.push_str(&format!("{METRICS_TOKEN_KEY}={data_ingest_token}\n"));
    }

    if let Some(statsd) = statsd_ingest_url(dk) {
        properties.push_str(&format!("{STATSD_URL_KEY}={statsd}\n"));
    }

    Ok(properties)
}

/// Secret payload with the properties file and the raw token.
///
/// # Errors
///
/// See [`metrics_ingest_url`].
pub fn build_endpoint_secret_data(
    dk: &DynaKube,
    tokens: &Tokens,
) -> Result<BTreeMap<String, Vec<u8>>, OperatorError> {
    let properties = build_endpoint_properties(dk, &tokens.data_ingest_token)?;
    Ok(BTreeMap::from([
        (
            SECRET_ENDPOINT_PROPERTIES_KEY.to_string(),
            properties.into_bytes(),
        ),
        (
            SECRET_ENDPOINT_TOKEN_KEY.to_string(),
            tokens.data_ingest_token.as_bytes().to_vec(),
        ),
    ]))
}

/// Generates endpoint secrets for one operator namespace.
#[derive(Clone)]
pub struct EndpointSecretGenerator {
    client: Client,
    namespace: String,
}

impl EndpointSecretGenerator {
    #[must_use]
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            client,
            namespace: namespace.to_string(),
        }
    }

    /// # Errors
    ///
    /// Returns an error if the token secret cannot be read or the URL cannot be built.
    pub async fn generate(&self, dk: &DynaKube) -> Result<BTreeMap<String, Vec<u8>>> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), &self.namespace);
        let tokens_name = dk.tokens_secret_name();
        let tokens = secrets
            .get(&tokens_name)
            .await
            .with_context(|| format!("failed to query tokens secret {tokens_name}"))?;

        Ok(build_endpoint_secret_data(dk, &Tokens::from_secret(&tokens))?)
    }

    /// Write the endpoint secret into every namespace. Returns the number written.
    ///
    /// # Errors
    ///
    /// Returns an error if generation or any write fails.
    pub async fn generate_for_dynakube(&self, dk: &DynaKube, namespaces: &[String]) -> Result<usize> {
        let data = self.generate(dk).await?;
        let labels = injection_secret_labels(&dk.name_any());

        let mut written = 0;
        for namespace in namespaces {
            if create_or_update_secret(
                &self.client,
                namespace,
                SECRET_ENDPOINT_NAME,
                &data,
                labels.clone(),
            )
            .await?
            {
                written += 1;
            }
        }

        info!(
            dynakube = %dk.name_any(),
            namespaces = namespaces.len(),
            written,
            "Reconciled data-ingest endpoint secrets"
        );
        Ok(written)
    }

    /// Create the endpoint secret in `namespace` if it is missing.
    ///
    /// # Errors
    ///
    /// Returns an error if generation or the create fails.
    pub async fn generate_for_namespace(&self, dk: &DynaKube, namespace: &str) -> Result<bool> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        if secrets.get_opt(SECRET_ENDPOINT_NAME).await?.is_some() {
            return Ok(false);
        }
        let data = self.generate(dk).await?;
        create_secret_if_missing(
            &self.client,
            namespace,
            SECRET_ENDPOINT_NAME,
            &data,
            injection_secret_labels(&dk.name_any()),
        )
        .await
    }

    /// Delete endpoint secrets from `namespaces`.
    ///
    /// # Errors
    ///
    /// Returns an error if a delete fails.
    pub async fn remove_endpoint_secrets(&self, namespaces: &[String]) -> Result<()> {
        for namespace in namespaces {
            delete_secret_if_exists(&self.client, namespace, SECRET_ENDPOINT_NAME).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "ingestendpoint_tests.rs"]
mod ingestendpoint_tests;
