// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! OpenTelemetry exporter configuration pointing at the ActiveGate OTLP ingest.
//!
//! A container is configured all-or-nothing: if it sets any of the generic or
//! per-signal endpoint variables it is left untouched.

use crate::constants::{
    ENV_API_TOKEN, OTLP_CERT_DIR, OTLP_CERT_PATH, OTLP_CERT_VOLUME,
    SECRET_ACTIVEGATE_CERT_KEY, SECRET_CONFIG_NAME, SECRET_ENDPOINT_NAME,
    SECRET_ENDPOINT_TOKEN_KEY,
};
use crate::crd::Capability;
use crate::errors::OperatorError;
use crate::webhook::request::{
    add_env, add_read_only_mount, add_secret_env, has_env, MutationRequest,
};
use k8s_openapi::api::core::v1::{Container, KeyToPath, PodSpec, SecretVolumeSource, Volume};
use kube::ResourceExt;

/// Generic endpoint variable; its presence also opts a container out.
pub const OTLP_ENDPOINT: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";

/// Signals configured per container, as used in the variable names and URL paths.
pub const SIGNALS: [(&str, &str); 3] = [("TRACES", "traces"), ("METRICS", "metrics"), ("LOGS", "logs")];

const PROTOCOL: &str = "http/protobuf";

#[must_use]
pub fn enabled(req: &MutationRequest) -> bool {
    req.dynakube.has_capability(Capability::MetricsIngest)
}

/// OTLP carries no marker of its own; the pipeline's injected annotation and the
/// per-container endpoint check cover reinvocation.
#[must_use]
pub fn injected(_req: &MutationRequest) -> bool {
    false
}

/// Base OTLP URL of the ActiveGate, `https://<service>.<namespace>/e/<tenant>/api/v2/otlp`.
///
/// # Errors
///
/// Returns an error when the tenant UUID is not known yet.
pub fn otlp_base_url(req: &MutationRequest) -> Result<String, OperatorError> {
    let dk = &req.dynakube;
    let tenant = dk.tenant_uuid().ok_or_else(|| OperatorError::NotFound {
        kind: "tenant UUID".to_string(),
        name: dk.name_any(),
        namespace: dk.namespace().unwrap_or_default(),
    })?;
    Ok(format!(
        "https://{}.{}/e/{tenant}/api/v2/otlp",
        dk.activegate_service_name(),
        dk.namespace().unwrap_or_default()
    ))
}

/// Whether the container configures its own exporter.
#[must_use]
pub fn has_own_endpoint(container: &Container) -> bool {
    has_env(container, OTLP_ENDPOINT)
        || SIGNALS
            .iter()
            .any(|(signal, _)| has_env(container, &format!("OTEL_EXPORTER_OTLP_{signal}_ENDPOINT")))
}

fn update_container(container: &mut Container, base_url: &str, with_certificate: bool) {
    add_secret_env(container, ENV_API_TOKEN, SECRET_ENDPOINT_NAME, SECRET_ENDPOINT_TOKEN_KEY);
    for (signal, path) in SIGNALS {
        let prefix = format!("OTEL_EXPORTER_OTLP_{signal}");
        add_env(container, &format!("{prefix}_ENDPOINT"), &format!("{base_url}/{path}"));
        add_env(container, &format!("{prefix}_PROTOCOL"), PROTOCOL);
        add_env(
            container,
            &format!("{prefix}_HEADERS"),
            &format!("Authorization $({ENV_API_TOKEN})"),
        );
        if with_certificate {
            add_env(container, &format!("{prefix}_CERTIFICATE"), OTLP_CERT_PATH);
        }
    }
    if with_certificate {
        add_read_only_mount(container, OTLP_CERT_VOLUME, OTLP_CERT_DIR, None);
    }
}

fn cert_volume() -> Volume {
    Volume {
        name: OTLP_CERT_VOLUME.to_string(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(SECRET_CONFIG_NAME.to_string()),
            items: Some(vec![KeyToPath {
                key: SECRET_ACTIVEGATE_CERT_KEY.to_string(),
                path: SECRET_ACTIVEGATE_CERT_KEY.to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Configure every container without an exporter. Returns `true` if any was changed.
fn configure(req: &mut MutationRequest, base_url: &str) -> bool {
    let with_certificate = req.dynakube.activegate_tls_secret().is_some();
    let spec = req.pod.spec.get_or_insert_with(PodSpec::default);

    let mut changed = false;
    for container in &mut spec.containers {
        if has_own_endpoint(container) {
            continue;
        }
        update_container(container, base_url, with_certificate);
        changed = true;
    }

    if changed && with_certificate {
        req.add_volume(cert_volume());
    }
    changed
}

/// First injection.
///
/// # Errors
///
/// Returns an error when the OTLP endpoint cannot be built.
pub fn mutate(req: &mut MutationRequest) -> Result<(), OperatorError> {
    let base_url = otlp_base_url(req)?;
    configure(req, &base_url);
    Ok(())
}

/// Configure containers added since the first injection.
pub fn reinvoke(req: &mut MutationRequest) -> bool {
    match otlp_base_url(req) {
        Ok(base_url) => configure(req, &base_url),
        Err(_) => false,
    }
}

#[cfg(test)]
#[path = "otlp_tests.rs"]
mod otlp_tests;
