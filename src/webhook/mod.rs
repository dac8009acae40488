// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Admission webhook server.
//!
//! Serves `/inject` (pod mutation), `/validate` (`DynaKube` validation) and `/livez` over
//! TLS. The serving certificate comes from the certs secret maintained by the
//! certificate reconciler; it is written to the certs directory and reloaded
//! periodically so rotations take effect without a restart.

pub mod client;
pub mod install_container;
pub mod mutators;
pub mod owner;
pub mod pod_mutator;
pub mod request;
pub mod validation;

#[cfg(test)]
pub(crate) mod fake_client;
#[cfg(test)]
pub(crate) mod fixtures;

use crate::config::OperatorConfig;
use crate::constants::{CERT_RELOAD_INTERVAL_SECS, CERT_TLS_CERT, CERT_TLS_KEY, SECRET_CERTS_NAME};
use crate::crd::DynaKube;
use anyhow::{Context as _, Result};
use axum::{extract::State, routing::get, routing::post, Json, Router};
use axum_server::tls_rustls::RustlsConfig;
use client::WebhookClient;
use k8s_openapi::api::core::v1::{Pod, Secret};
use kube::core::admission::AdmissionReview;
use kube::core::DynamicObject;
use kube::{Api, Client};
use pod_mutator::PodMutator;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use validation::DynaKubeValidator;

/// How long to wait between polls for the certs secret at startup.
const CERT_WAIT_INTERVAL: Duration = Duration::from_secs(5);

/// Shared state of the webhook handlers.
pub struct WebhookState {
    pub pods: PodMutator,
    pub dynakubes: DynaKubeValidator,
}

impl WebhookState {
    #[must_use]
    pub fn new(client: Arc<dyn WebhookClient>, config: Arc<OperatorConfig>) -> Self {
        Self {
            pods: PodMutator::new(client.clone(), config.clone()),
            dynakubes: DynaKubeValidator::new(client, config),
        }
    }
}

/// Router with the admission and liveness endpoints.
pub fn webhook_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/inject", post(inject_handler))
        .route("/validate", post(validate_handler))
        .route("/livez", get(|| async { "ok" }))
        .with_state(state)
}

async fn inject_handler(
    State(state): State<Arc<WebhookState>>,
    Json(review): Json<AdmissionReview<Pod>>,
) -> Json<AdmissionReview<DynamicObject>> {
    Json(state.pods.handle(review).await)
}

async fn validate_handler(
    State(state): State<Arc<WebhookState>>,
    Json(review): Json<AdmissionReview<DynaKube>>,
) -> Json<AdmissionReview<DynamicObject>> {
    Json(state.dynakubes.handle(review).await)
}

/// Serving certificate and key from the certs secret, if both are present.
fn serving_pair(secret: &Secret) -> Option<(Vec<u8>, Vec<u8>)> {
    let data = secret.data.as_ref()?;
    let cert = data.get(CERT_TLS_CERT)?.0.clone();
    let key = data.get(CERT_TLS_KEY)?.0.clone();
    (!cert.is_empty() && !key.is_empty()).then_some((cert, key))
}

/// Write the serving pair from the certs secret into `dir`. Returns `false` while the
/// secret does not exist or is still incomplete.
///
/// # Errors
///
/// Returns an error when the secret cannot be read or the files cannot be written.
pub async fn sync_certificates(client: &Client, namespace: &str, dir: &Path) -> Result<bool> {
    let api: Api<Secret> = Api::namespaced(client.clone(), namespace);
    let Some(secret) = api.get_opt(SECRET_CERTS_NAME).await? else {
        return Ok(false);
    };
    let Some((cert, key)) = serving_pair(&secret) else {
        return Ok(false);
    };

    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("failed to create {}", dir.display()))?;
    tokio::fs::write(dir.join(CERT_TLS_CERT), cert).await?;
    tokio::fs::write(dir.join(CERT_TLS_KEY), key).await?;
    Ok(true)
}

/// Run the webhook server until it fails.
///
/// Blocks until the certs secret is populated, then serves on `config.webhook_port`.
///
/// # Errors
///
/// Returns an error when the TLS configuration cannot be loaded or the server stops.
pub async fn run_webhook_server(
    client: Client,
    webhook_client: Arc<dyn WebhookClient>,
    config: Arc<OperatorConfig>,
) -> Result<()> {
    let dir = config.certs_dir.clone();
    while !sync_certificates(&client, &config.namespace, &dir).await? {
        debug!(secret = SECRET_CERTS_NAME, "Waiting for webhook certificates");
        tokio::time::sleep(CERT_WAIT_INTERVAL).await;
    }

    let (cert_path, key_path) = (dir.join(CERT_TLS_CERT), dir.join(CERT_TLS_KEY));
    let tls = RustlsConfig::from_pem_file(&cert_path, &key_path)
        .await
        .context("failed to load webhook TLS configuration")?;

    tokio::spawn(reload_certificates(
        client,
        config.namespace.clone(),
        dir,
        tls.clone(),
    ));

    let state = Arc::new(WebhookState::new(webhook_client, config.clone()));
    let addr = SocketAddr::from(([0, 0, 0, 0], config.webhook_port));
    info!(addr = %addr, "Starting webhook server");

    axum_server::bind_rustls(addr, tls)
        .serve(webhook_router(state).into_make_service())
        .await
        .context("webhook server stopped")
}

async fn reload_certificates(client: Client, namespace: String, dir: PathBuf, tls: RustlsConfig) {
    let mut interval = tokio::time::interval(Duration::from_secs(CERT_RELOAD_INTERVAL_SECS));
    interval.tick().await;
    loop {
        interval.tick().await;
        match sync_certificates(&client, &namespace, &dir).await {
            Ok(true) => {
                let reload = tls
                    .reload_from_pem_file(dir.join(CERT_TLS_CERT), dir.join(CERT_TLS_KEY))
                    .await;
                match reload {
                    Ok(()) => debug!("Reloaded webhook certificates"),
                    Err(e) => error!(error = %e, "Failed to reload webhook certificates"),
                }
            }
            Ok(false) => warn!(secret = SECRET_CERTS_NAME, "Webhook certificates disappeared, keeping the current ones"),
            Err(e) => warn!(error = %e, "Failed to sync webhook certificates"),
        }
    }
}
