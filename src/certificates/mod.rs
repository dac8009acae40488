// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Self-managed webhook PKI.
//!
//! The certificate reconciler watches the webhook `Deployment` in the operator namespace.
//! Each pass validates the `dynatrace-webhook-certs` secret, renews what is due, and
//! stamps the CA bundle into the mutating and validating webhook configurations and the
//! `DynaKube` CRD conversion webhook.
//!
//! The secret is always written before any bundle is patched, so a webhook pod that
//! restarts mid-rotation serves a certificate its API server already trusts.
//!
//! # Bootstrap
//!
//! When [`CertificateContext::bootstrap`] is set, the first pass that finds everything in
//! place signals it. The composition root uses that to stop the bootstrap controller and
//! start the main control loop.

pub mod certs;

use crate::constants::{
    CERT_PROPAGATION_REQUEUE_SECS, CERT_SUCCESS_REQUEUE_SECS, DYNAKUBE_CRD_NAME,
    SECRET_CERTS_NAME,
};
use crate::labels::{COMPONENT_WEBHOOK, K8S_COMPONENT, K8S_MANAGED_BY, MANAGED_BY_OPERATOR};
use crate::reconcilers::resources::create_or_update_secret;
use anyhow::Result;
use certs::Certs;
use k8s_openapi::api::admissionregistration::v1::{
    MutatingWebhookConfiguration, ValidatingWebhookConfiguration, WebhookClientConfig,
};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use k8s_openapi::ByteString;
use kube::api::PostParams;
use kube::runtime::controller::Action;
use kube::{Api, Client};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::Notify;
use tracing::{debug, info};

/// Webhook PKI errors
#[derive(Debug, Error)]
pub enum CertificateError {
    /// Key pair generation failed
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    /// Certificate generation or signing failed
    #[error("certificate generation failed: {0}")]
    Generation(String),

    /// Stored material could not be parsed
    #[error("certificate parsing error: {0}")]
    Parse(String),
}

/// Shared state of the certificate reconciler.
pub struct CertificateContext {
    pub client: Client,
    /// Operator namespace holding the certs secret and the webhook deployment
    pub namespace: String,
    /// Name of the webhook configurations to patch
    pub webhook_name: String,
    /// DNS name bound into the CA subject and the serving certificate SAN
    pub dns_name: String,
    /// Signalled on the first steady-state pass
    pub bootstrap: Option<Arc<Notify>>,
}

/// Set `bundle` on every webhook client config. Returns `true` if anything changed.
pub fn stamp_client_configs<'a, I>(configs: I, bundle: &[u8]) -> bool
where
    I: IntoIterator<Item = &'a mut WebhookClientConfig>,
{
    let mut changed = false;
    for config in configs {
        if config.ca_bundle.as_ref().map(|b| b.0.as_slice()) != Some(bundle) {
            config.ca_bundle = Some(ByteString(bundle.to_vec()));
            changed = true;
        }
    }
    changed
}

/// Stamp `bundle` into every webhook of a mutating configuration.
pub fn stamp_mutating(config: &mut MutatingWebhookConfiguration, bundle: &[u8]) -> bool {
    let webhooks = config.webhooks.iter_mut().flatten();
    stamp_client_configs(webhooks.map(|w| &mut w.client_config), bundle)
}

/// Stamp `bundle` into every webhook of a validating configuration.
pub fn stamp_validating(config: &mut ValidatingWebhookConfiguration, bundle: &[u8]) -> bool {
    let webhooks = config.webhooks.iter_mut().flatten();
    stamp_client_configs(webhooks.map(|w| &mut w.client_config), bundle)
}

/// Stamp `bundle` into the CRD conversion webhook, if the CRD has one.
pub fn stamp_conversion(crd: &mut CustomResourceDefinition, bundle: &[u8]) -> bool {
    let client_config = crd
        .spec
        .conversion
        .as_mut()
        .and_then(|c| c.webhook.as_mut())
        .and_then(|w| w.client_config.as_mut());

    match client_config {
        Some(config) if config.ca_bundle.as_ref().map(|b| b.0.as_slice()) != Some(bundle) => {
            config.ca_bundle = Some(ByteString(bundle.to_vec()));
            true
        }
        _ => false,
    }
}

fn certs_secret_labels() -> BTreeMap<String, String> {
    BTreeMap::from([
        (K8S_MANAGED_BY.to_string(), MANAGED_BY_OPERATOR.to_string()),
        (K8S_COMPONENT.to_string(), COMPONENT_WEBHOOK.to_string()),
    ])
}

/// Patch every target that does not carry `bundle` yet. Returns the number patched.
async fn propagate_bundle(ctx: &CertificateContext, bundle: &[u8]) -> Result<usize> {
    let mut patched = 0;

    let mutating: Api<MutatingWebhookConfiguration> = Api::all(ctx.client.clone());
    match mutating.get_opt(&ctx.webhook_name).await? {
        Some(mut config) => {
            if stamp_mutating(&mut config, bundle) {
                mutating
                    .replace(&ctx.webhook_name, &PostParams::default(), &config)
                    .await?;
                info!(name = %ctx.webhook_name, "Updated CA bundle of mutating webhook configuration");
                patched += 1;
            }
        }
        None => debug!(name = %ctx.webhook_name, "No mutating webhook configuration found"),
    }

    let validating: Api<ValidatingWebhookConfiguration> = Api::all(ctx.client.clone());
    match validating.get_opt(&ctx.webhook_name).await? {
        Some(mut config) => {
            if stamp_validating(&mut config, bundle) {
                validating
                    .replace(&ctx.webhook_name, &PostParams::default(), &config)
                    .await?;
                info!(name = %ctx.webhook_name, "Updated CA bundle of validating webhook configuration");
                patched += 1;
            }
        }
        None => debug!(name = %ctx.webhook_name, "No validating webhook configuration found"),
    }

    let crds: Api<CustomResourceDefinition> = Api::all(ctx.client.clone());
    if let Some(mut crd) = crds.get_opt(DYNAKUBE_CRD_NAME).await? {
        if stamp_conversion(&mut crd, bundle) {
            crds.replace(DYNAKUBE_CRD_NAME, &PostParams::default(), &crd)
                .await?;
            info!(name = DYNAKUBE_CRD_NAME, "Updated CA bundle of CRD conversion webhook");
            patched += 1;
        }
    }

    Ok(patched)
}

/// One reconciliation pass at time `now`.
///
/// # Errors
///
/// Returns an error if certificate generation or any API call fails; the pass is
/// idempotent and retried by the controller.
pub async fn reconcile_certificates_at(ctx: &CertificateContext, now: OffsetDateTime) -> Result<Action> {
    let secrets: Api<Secret> = Api::namespaced(ctx.client.clone(), &ctx.namespace);
    let existing = secrets.get_opt(SECRET_CERTS_NAME).await?;

    let mut certs = existing
        .as_ref()
        .and_then(|s| s.data.as_ref())
        .map(Certs::from_secret_data)
        .unwrap_or_default();
    let renewal = certs.validate(&ctx.dns_name, now)?;

    if renewal.ca {
        crate::metrics::record_certificate_rotation("ca");
    }
    if renewal.server {
        crate::metrics::record_certificate_rotation("server");
    }

    let secret_written = if existing.is_none() || renewal.changed() {
        create_or_update_secret(
            &ctx.client,
            &ctx.namespace,
            SECRET_CERTS_NAME,
            &certs.to_secret_data(),
            certs_secret_labels(),
        )
        .await?
    } else {
        false
    };

    let patched = propagate_bundle(ctx, &certs.ca_bundle()).await?;

    if secret_written || patched > 0 {
        info!(
            namespace = %ctx.namespace,
            secret_written,
            patched,
            "Webhook certificates propagated"
        );
        return Ok(Action::requeue(Duration::from_secs(
            CERT_PROPAGATION_REQUEUE_SECS,
        )));
    }

    if let Some(bootstrap) = &ctx.bootstrap {
        debug!("Webhook certificates in steady state, ending bootstrap");
        bootstrap.notify_one();
    }

    let success = Duration::from_secs(CERT_SUCCESS_REQUEUE_SECS);
    let requeue = certs
        .until_renewal(now)
        .map_or(success, |until| until.min(success));
    Ok(Action::requeue(requeue))
}

/// Reconcile the webhook certificates using the wall clock.
///
/// # Errors
///
/// See [`reconcile_certificates_at`].
pub async fn reconcile_certificates(ctx: Arc<CertificateContext>) -> Result<Action> {
    reconcile_certificates_at(&ctx, OffsetDateTime::now_utc()).await
}
