// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! `DynaKube` reconciler.
//!
//! Each pass:
//!
//! 1. releases everything on deletion, otherwise makes sure the finalizer is set
//! 2. validates the object; invalid ones get `Ready=False` and are not touched further
//! 3. reads the token secret and refreshes tenant UUID, communication hosts and agent
//!    version from the tenant API
//! 4. maps namespaces and fans the init-config and endpoint secrets out to every mapped
//!    namespace, deleting them where a namespace is no longer mapped
//! 5. applies the ActiveGate and OneAgent workloads
//! 6. writes conditions, phase and observed generation in one status patch

use crate::constants::{
    ERROR_REQUEUE_DURATION_SECS, FIELD_MANAGER, NOT_READY_REQUEUE_DURATION_SECS,
    READY_REQUEUE_DURATION_SECS, SECRET_CONFIG_NAME, SECRET_ENDPOINT_NAME,
};
use crate::context::Context;
use crate::crd::{DynaKube, OneAgentInstance};
use crate::ingestendpoint::{endpoint_secret_needed, EndpointSecretGenerator};
use crate::initgeneration::{resolve_proxy, InitGenerator};
use crate::labels::{
    COMPONENT_INJECTION, COMPONENT_ONEAGENT, FINALIZER_DYNAKUBE, INSTANCE_LABEL, K8S_COMPONENT,
    K8S_INSTANCE,
};
use crate::mapper::LabelAction;
use crate::reconcilers::finalizers::{ensure_finalizer, handle_deletion, FinalizerCleanup};
use crate::reconcilers::namespace::{apply_label_action, map_namespaces_for_dynakube};
use crate::reconcilers::resources::{create_or_apply, delete_secret_if_exists};
use crate::reconcilers::status::DynaKubeStatusUpdater;
use crate::status_reasons::{
    CONDITION_TYPE_NAMESPACE_CONFLICT, CONDITION_TYPE_TOKENS, REASON_NAMESPACE_CONFLICT,
    REASON_NO_CONFLICT, REASON_PROGRESSING, REASON_SECRETS_PROPAGATED, REASON_TENANT_UNREACHABLE,
    REASON_TOKENS_MISSING, REASON_TOKENS_VALID,
};
use crate::tenant::{HttpTenantClient, TenantClient, TenantError};
use crate::tokens::Tokens;
use crate::workloads::{
    build_activegate_service, build_activegate_statefulset, build_oneagent_daemonset,
};
use anyhow::Result;
use k8s_openapi::api::core::v1::{Namespace, Pod, Secret};
use kube::api::ListParams;
use kube::runtime::controller::Action;
use kube::{Api, Client, ResourceExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Metrics label of this controller.
pub const RESOURCE_TYPE: &str = "DynaKube";

/// Operating system of the agents the operator deploys.
const AGENT_OS: &str = "unix";

/// Label selector of the injection secrets written for `dynakube`.
#[must_use]
pub fn injection_secret_selector(dynakube: &str) -> String {
    format!("{INSTANCE_LABEL}={dynakube},{K8S_COMPONENT}={COMPONENT_INJECTION}")
}

/// Label selector of the host agent pods of `dynakube`.
#[must_use]
pub fn oneagent_pod_selector(dynakube: &str) -> String {
    format!("{K8S_INSTANCE}={dynakube},{K8S_COMPONENT}={COMPONENT_ONEAGENT}")
}

/// Every `DynaKube` from the store, with `current` in place of its stored copy.
#[must_use]
pub fn with_current<'a>(current: &'a DynaKube, stored: &'a [Arc<DynaKube>]) -> Vec<&'a DynaKube> {
    let name = current.name_any();
    let namespace = current.namespace();
    stored
        .iter()
        .map(|dk| &**dk)
        .filter(|dk| !(dk.name_any() == name && dk.namespace() == namespace))
        .chain(std::iter::once(current))
        .collect()
}

/// Injection secrets that must go: those in namespaces that are no longer mapped, and
/// endpoint secrets once no injected pod reads them. Returns `(namespace, name)` pairs.
#[must_use]
pub fn stale_secrets(secrets: &[Secret], mapped: &[String], endpoint_enabled: bool) -> Vec<(String, String)> {
    secrets
        .iter()
        .filter_map(|secret| {
            let namespace = secret.namespace()?;
            let name = secret.name_any();
            let stale = !mapped.contains(&namespace)
                || (name == SECRET_ENDPOINT_NAME && !endpoint_enabled);
            stale.then_some((namespace, name))
        })
        .collect()
}

/// Host agent instances by node, from the running agent pods.
#[must_use]
pub fn oneagent_instances_from_pods(pods: &[Pod]) -> BTreeMap<String, OneAgentInstance> {
    pods.iter()
        .filter_map(|pod| {
            let node = pod.spec.as_ref()?.node_name.clone()?;
            let instance = OneAgentInstance {
                pod_name: Some(pod.name_any()),
                ip_address: pod.status.as_ref().and_then(|s| s.host_ip.clone()),
            };
            Some((node, instance))
        })
        .collect()
}

/// Installer type whose latest version is reported for `dk`.
#[must_use]
pub fn installer_type(dk: &DynaKube) -> Option<&'static str> {
    if dk.needs_host_agent() {
        Some("default")
    } else if dk.needs_app_injection() {
        Some("paas")
    } else {
        None
    }
}

/// Requeue interval after a successful pass.
#[must_use]
pub fn requeue_action(ready: bool) -> Action {
    let secs = if ready {
        READY_REQUEUE_DURATION_SECS
    } else {
        NOT_READY_REQUEUE_DURATION_SECS
    };
    Action::requeue(Duration::from_secs(secs))
}

/// Refresh tenant UUID, communication hosts and agent version on `updater`.
///
/// A failed version lookup only logs; the rest of the status is still updated.
///
/// # Errors
///
/// Returns the [`TenantError`] of the connection info call.
pub async fn refresh_tenant_status(
    tenant: &dyn TenantClient,
    dk: &DynaKube,
    updater: &mut DynaKubeStatusUpdater,
) -> Result<(), TenantError> {
    let info = tenant.connection_info().await?;
    updater.set_tenant(&info.tenant_uuid, info.communication_hosts);

    if let Some(installer) = installer_type(dk) {
        match tenant.latest_agent_version(AGENT_OS, installer).await {
            Ok(version) => updater.set_oneagent_version(&version),
            Err(e) => warn!(dynakube = %dk.name_any(), error = %e, "Failed to query latest agent version"),
        }
    }
    Ok(())
}

async fn read_tokens(client: &Client, dk: &DynaKube) -> Result<Option<Tokens>> {
    let namespace = dk.namespace().unwrap_or_default();
    let secrets: Api<Secret> = Api::namespaced(client.clone(), &namespace);
    Ok(secrets
        .get_opt(&dk.tokens_secret_name())
        .await?
        .map(|secret| Tokens::from_secret(&secret))
        .filter(|tokens| !tokens.is_empty()))
}

async fn injection_secrets(client: &Client, dynakube: &str) -> Result<Vec<Secret>> {
    let api: Api<Secret> = Api::all(client.clone());
    let params = ListParams::default().labels(&injection_secret_selector(dynakube));
    Ok(api.list(&params).await?.items)
}

async fn oneagent_instances(client: &Client, dk: &DynaKube) -> Result<BTreeMap<String, OneAgentInstance>> {
    let namespace = dk.namespace().unwrap_or_default();
    let api: Api<Pod> = Api::namespaced(client.clone(), &namespace);
    let params = ListParams::default().labels(&oneagent_pod_selector(&dk.name_any()));
    Ok(oneagent_instances_from_pods(&api.list(&params).await?.items))
}

async fn apply_workloads(client: &Client, dk: &DynaKube, tenant_uuid: &str, cluster_id: &str) -> Result<()> {
    let namespace = dk.namespace().unwrap_or_default();

    if dk.has_activegate() {
        create_or_apply(client, &namespace, &build_activegate_service(dk), FIELD_MANAGER).await?;
        create_or_apply(
            client,
            &namespace,
            &build_activegate_statefulset(dk, tenant_uuid, cluster_id),
            FIELD_MANAGER,
        )
        .await?;
    }

    if let Some(daemonset) = build_oneagent_daemonset(dk, cluster_id) {
        create_or_apply(client, &namespace, &daemonset, FIELD_MANAGER).await?;
    }
    Ok(())
}

#[async_trait::async_trait]
impl FinalizerCleanup for DynaKube {
    async fn cleanup(&self, client: &Client) -> Result<()> {
        let name = self.name_any();

        for secret in injection_secrets(client, &name).await? {
            if let Some(namespace) = secret.namespace() {
                delete_secret_if_exists(client, &namespace, &secret.name_any()).await?;
            }
        }

        let namespaces: Api<Namespace> = Api::all(client.clone());
        let params = ListParams::default().labels(&format!("{INSTANCE_LABEL}={name}"));
        for namespace in namespaces.list(&params).await?.items {
            apply_label_action(client, &namespace, &LabelAction::Remove).await?;
        }

        info!(dynakube = %name, "Released mapped namespaces");
        Ok(())
    }
}

/// Reconcile one `DynaKube`.
///
/// # Errors
///
/// Returns an error on any API failure; the controller retries after
/// [`ERROR_REQUEUE_DURATION_SECS`].
pub async fn reconcile_dynakube(ctx: Arc<Context>, dk: Arc<DynaKube>) -> Result<Action> {
    let client = &ctx.client;
    let name = dk.name_any();
    let namespace = dk.namespace().unwrap_or_default();

    if dk.metadata.deletion_timestamp.is_some() {
        handle_deletion(client, dk.as_ref(), FINALIZER_DYNAKUBE).await?;
        return Ok(Action::await_change());
    }
    ensure_finalizer(client, dk.as_ref(), FINALIZER_DYNAKUBE).await?;

    let mut updater = DynaKubeStatusUpdater::new(&dk);
    updater.set_observed_generation(dk.metadata.generation);

    if let Err(e) = dk.validate() {
        warn!(dynakube = %name, error = %e, "DynaKube is invalid");
        updater.set_ready(false, e.reason(), &e.to_string());
        updater.apply(client).await?;
        return Ok(Action::requeue(Duration::from_secs(READY_REQUEUE_DURATION_SECS)));
    }

    let Some(tokens) = read_tokens(client, &dk).await? else {
        let message = format!("token secret '{}' is missing or has no apiToken", dk.tokens_secret_name());
        warn!(dynakube = %name, "{message}");
        updater.set_condition(CONDITION_TYPE_TOKENS, "False", REASON_TOKENS_MISSING, &message);
        updater.set_ready(false, REASON_TOKENS_MISSING, &message);
        updater.apply(client).await?;
        return Ok(Action::requeue(Duration::from_secs(ERROR_REQUEUE_DURATION_SECS)));
    };
    updater.set_condition(CONDITION_TYPE_TOKENS, "True", REASON_TOKENS_VALID, "");

    if !dk.spec.api_url.is_empty() {
        let proxy = resolve_proxy(client, &namespace, &dk).await?;
        let refreshed = match HttpTenantClient::for_dynakube(&dk, &tokens.paas_token, proxy.as_deref()) {
            Ok(tenant) => refresh_tenant_status(&tenant, &dk, &mut updater).await,
            Err(e) => Err(e),
        };
        if let Err(e) = refreshed {
            warn!(dynakube = %name, error = %e, "Tenant API not reachable");
            if updater.status().tenant_uuid.is_none() {
                updater.set_ready(false, REASON_TENANT_UNREACHABLE, &e.to_string());
                updater.apply(client).await?;
                return Ok(requeue_action(false));
            }
        }
    }

    if dk.needs_host_agent() {
        updater.set_oneagent_instances(oneagent_instances(client, &dk).await?);
    }

    // Generators read the tenant and instances from the status just collected.
    let mut current = (*dk).clone();
    current.status = Some(updater.status().clone());

    let stored = ctx.stores.dynakubes();
    let dynakubes = with_current(&current, &stored);
    let mapping = map_namespaces_for_dynakube(client, &current, &dynakubes, &ctx.config.namespace).await?;

    if mapping.conflicts.is_empty() {
        updater.set_condition(CONDITION_TYPE_NAMESPACE_CONFLICT, "False", REASON_NO_CONFLICT, "");
    } else {
        updater.set_condition(
            CONDITION_TYPE_NAMESPACE_CONFLICT,
            "True",
            REASON_NAMESPACE_CONFLICT,
            &mapping.conflict_message(),
        );
    }

    let endpoint_enabled = endpoint_secret_needed(&current);
    if current.needs_app_injection() && !mapping.mapped.is_empty() {
        InitGenerator::new(client.clone(), &namespace, &ctx.config.cluster_id)
            .generate_for_dynakube(&current, &dynakubes, &mapping.mapped)
            .await?;
        if endpoint_enabled {
            EndpointSecretGenerator::new(client.clone(), &namespace)
                .generate_for_dynakube(&current, &mapping.mapped)
                .await?;
        }
    }

    let existing = injection_secrets(client, &name).await?;
    for (secret_namespace, secret_name) in stale_secrets(&existing, &mapping.mapped, endpoint_enabled) {
        debug!(dynakube = %name, namespace = %secret_namespace, secret = %secret_name, "Removing stale injection secret");
        delete_secret_if_exists(client, &secret_namespace, &secret_name).await?;
    }

    let tenant_uuid = updater.status().tenant_uuid.clone().unwrap_or_default();
    apply_workloads(client, &current, &tenant_uuid, &ctx.config.cluster_id).await?;

    if tenant_uuid.is_empty() && !dk.spec.api_url.is_empty() {
        updater.set_ready(false, REASON_PROGRESSING, "waiting for the tenant UUID");
    } else if current.needs_app_injection() {
        let mut names = vec![SECRET_CONFIG_NAME];
        if endpoint_enabled {
            names.push(SECRET_ENDPOINT_NAME);
        }
        updater.set_ready(
            true,
            REASON_SECRETS_PROPAGATED,
            &format!("{} present in {} namespace(s)", names.join(" and "), mapping.mapped.len()),
        );
    } else {
        updater.set_ready(true, REASON_SECRETS_PROPAGATED, "workloads applied");
    }

    let ready = updater.is_ready();
    updater.apply(client).await?;
    info!(dynakube = %name, namespaces = mapping.mapped.len(), ready, "Reconciled DynaKube");

    Ok(requeue_action(ready))
}

#[cfg(test)]
#[path = "dynakube_tests.rs"]
mod dynakube_tests;
