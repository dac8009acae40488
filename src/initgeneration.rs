// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Init-config secret generation.
//!
//! Every namespace mapped to a `DynaKube` receives a `dynatrace-dynakube-config` secret
//! that the install init-container mounts. Its `config` key is a JSON [`SecretConfig`];
//! `proxy`, `ca.pem` and `activegate.pem` are separate keys so pods can mount them
//! without parsing the blob.
//!
//! # Node map
//!
//! `monitoringNodes` maps every node name to one of:
//! - the tenant UUID of the host-agent `DynaKube` running on the node
//! - `-` when no host agent runs on the node
//! - nothing (key absent) when a host agent should run there but its tenant is unknown,
//!   unless the `ignore-unknown-state` feature flag is set
//!
//! The in-pod init binary fails and retries on an absent node instead of reporting the
//! processes under a wrong host.

use crate::constants::{
    ACTIVEGATE_TLS_CERT_KEY, NODE_NOT_MAPPED, PROXY_SECRET_KEY, SECRET_ACTIVEGATE_CERT_KEY,
    SECRET_CONFIG_KEY, SECRET_CONFIG_NAME, SECRET_PROXY_KEY, SECRET_TRUSTED_CA_KEY,
    TRUSTED_CA_CONFIGMAP_KEY,
};
use crate::crd::DynaKube;
use crate::errors::is_forbidden;
use crate::feature_flags;
use crate::labels::{
    APP_NAME, COMPONENT_INJECTION, INSTANCE_LABEL, K8S_COMPONENT, K8S_MANAGED_BY, K8S_NAME,
    MANAGED_BY_OPERATOR,
};
use crate::reconcilers::resources::{
    create_or_update_secret, create_secret_if_missing, delete_secret_if_exists,
};
use crate::tokens::Tokens;
use anyhow::{Context as _, Result};
use k8s_openapi::api::core::v1::{ConfigMap, Node, Secret};
use kube::api::ListParams;
use kube::{Api, Client, ResourceExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Structured init configuration, serialized into the `config` key.
///
/// Field order is the serialization order and must not change.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretConfig {
    pub api_url: String,
    pub api_token: String,
    pub paas_token: String,
    pub proxy: String,
    pub network_zone: String,
    #[serde(rename = "trustedCAs")]
    pub trusted_cas: String,
    pub skip_cert_check: bool,
    #[serde(rename = "tenantUUID")]
    pub tenant_uuid: String,
    pub has_host: bool,
    pub monitoring_nodes: BTreeMap<String, String>,
    pub tls_cert: String,
    pub host_group: String,
    #[serde(rename = "clusterID")]
    pub cluster_id: String,
    pub initial_connect_retry: i64,
}

impl SecretConfig {
    /// Parse the `config` key of an init-config secret.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is missing or not valid JSON.
    pub fn from_secret(secret: &Secret) -> Result<Self> {
        let raw = secret
            .data
            .as_ref()
            .and_then(|data| data.get(SECRET_CONFIG_KEY))
            .ok_or_else(|| anyhow::anyhow!("init secret has no '{SECRET_CONFIG_KEY}' key"))?;
        serde_json::from_slice(&raw.0).context("failed to parse init config")
    }
}

/// Everything read from the cluster to build the init config of one `DynaKube`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct InitInputs {
    pub tokens: Tokens,
    pub proxy: Option<String>,
    pub trusted_cas: Option<String>,
    pub activegate_cert: Option<String>,
    pub cluster_id: String,
    pub monitoring_nodes: BTreeMap<String, String>,
}

/// Generated payload plus the config it was built from.
#[derive(Clone, Debug, PartialEq)]
pub struct InitSecret {
    pub config: SecretConfig,
    pub data: BTreeMap<String, Vec<u8>>,
}

/// Whether a host-agent node selector matches a node. Empty selectors match every node.
#[must_use]
pub fn node_selector_matches(
    selector: &BTreeMap<String, String>,
    node_labels: &BTreeMap<String, String>,
) -> bool {
    selector
        .iter()
        .all(|(key, value)| node_labels.get(key) == Some(value))
}

/// Build the node to tenant map from the full node list.
///
/// `dynakubes` may contain every `DynaKube` in the operator namespace; those without a
/// host agent are skipped. `context` decides `ignore-unknown-state`.
#[must_use]
pub fn build_node_map(
    context: &DynaKube,
    dynakubes: &[&DynaKube],
    nodes: &[Node],
) -> BTreeMap<String, String> {
    let mut map: BTreeMap<String, String> = nodes
        .iter()
        .map(|node| (node.name_any(), NODE_NOT_MAPPED.to_string()))
        .collect();
    let keep_unknown = feature_flags::ignore_unknown_state(context);

    for dk in dynakubes {
        let Some(selector) = dk.node_selector() else {
            continue;
        };
        let tenant = dk.tenant_uuid();
        for node in nodes {
            if !node_selector_matches(&selector, node.labels()) {
                continue;
            }
            match tenant {
                Some(uuid) => {
                    map.insert(node.name_any(), uuid.to_string());
                }
                None if !keep_unknown => {
                    map.remove(&node.name_any());
                }
                None => {}
            }
        }
    }

    map
}

/// Build the node map from `status.oneAgent.instances` when nodes cannot be listed.
#[must_use]
pub fn build_node_map_from_instances(
    context: &DynaKube,
    dynakubes: &[&DynaKube],
) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    let keep_unknown = feature_flags::ignore_unknown_state(context);

    for dk in dynakubes.iter().filter(|dk| dk.needs_host_agent()) {
        let tenant = dk.tenant_uuid();
        for node_name in dk.oneagent_instances().into_keys() {
            match tenant {
                Some(uuid) => {
                    map.insert(node_name, uuid.to_string());
                }
                None if !keep_unknown => {
                    map.remove(&node_name);
                }
                None => {}
            }
        }
    }

    map
}

/// Assemble the structured config of `dk`.
#[must_use]
pub fn build_secret_config(dk: &DynaKube, inputs: &InitInputs) -> SecretConfig {
    SecretConfig {
        api_url: dk.spec.api_url.clone(),
        api_token: inputs.tokens.api_token.clone(),
        paas_token: inputs.tokens.paas_token.clone(),
        proxy: inputs.proxy.clone().unwrap_or_default(),
        network_zone: dk.network_zone().unwrap_or_default().to_string(),
        trusted_cas: inputs.trusted_cas.clone().unwrap_or_default(),
        skip_cert_check: dk.spec.skip_cert_check,
        tenant_uuid: dk.tenant_uuid().unwrap_or_default().to_string(),
        has_host: dk.cloud_native_full_stack(),
        monitoring_nodes: inputs.monitoring_nodes.clone(),
        tls_cert: inputs.activegate_cert.clone().unwrap_or_default(),
        host_group: dk.host_group().unwrap_or_default(),
        cluster_id: inputs.cluster_id.clone(),
        initial_connect_retry: feature_flags::initial_connect_retry(dk),
    }
}

/// Serialize a config into the secret payload.
///
/// # Errors
///
/// Returns an error if the config cannot be serialized.
pub fn build_init_secret_data(config: &SecretConfig) -> Result<BTreeMap<String, Vec<u8>>> {
    let mut data = BTreeMap::new();
    data.insert(
        SECRET_CONFIG_KEY.to_string(),
        serde_json::to_vec(config).context("failed to serialize init config")?,
    );
    if !config.proxy.is_empty() {
        data.insert(
            SECRET_PROXY_KEY.to_string(),
            config.proxy.as_bytes().to_vec(),
        );
    }
    if !config.trusted_cas.is_empty() {
        data.insert(
            SECRET_TRUSTED_CA_KEY.to_string(),
            config.trusted_cas.as_bytes().to_vec(),
        );
    }
    if !config.tls_cert.is_empty() {
        data.insert(
            SECRET_ACTIVEGATE_CERT_KEY.to_string(),
            config.tls_cert.as_bytes().to_vec(),
        );
    }
    Ok(data)
}

/// Labels of every secret the operator writes into a mapped namespace.
#[must_use]
pub fn injection_secret_labels(dynakube: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (INSTANCE_LABEL.to_string(), dynakube.to_string()),
        (K8S_MANAGED_BY.to_string(), MANAGED_BY_OPERATOR.to_string()),
        (K8S_COMPONENT.to_string(), COMPONENT_INJECTION.to_string()),
        (K8S_NAME.to_string(), APP_NAME.to_string()),
    ])
}

fn secret_string(secret: &Secret, key: &str) -> Option<String> {
    secret
        .data
        .as_ref()
        .and_then(|data| data.get(key))
        .map(|bytes| String::from_utf8_lossy(&bytes.0).to_string())
        .filter(|value| !value.is_empty())
}

/// Proxy URL of a `DynaKube`, read from the referenced secret when `valueFrom` is set.
///
/// # Errors
///
/// Returns an error if the proxy secret cannot be read.
pub async fn resolve_proxy(client: &Client, namespace: &str, dk: &DynaKube) -> Result<Option<String>> {
    let Some(proxy) = dk.proxy() else {
        return Ok(None);
    };
    match proxy.value_from.as_deref().filter(|v| !v.is_empty()) {
        Some(secret_name) => {
            let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);
            let secret = secrets
                .get(secret_name)
                .await
                .with_context(|| format!("failed to query proxy secret {secret_name}"))?;
            Ok(secret_string(&secret, PROXY_SECRET_KEY))
        }
        None => Ok(proxy.value.clone()),
    }
}

/// Generates init-config secrets for one operator namespace.
#[derive(Clone)]
pub struct InitGenerator {
    client: Client,
    namespace: String,
    cluster_id: String,
    can_list_nodes: bool,
}

impl InitGenerator {
    #[must_use]
    pub fn new(client: Client, namespace: &str, cluster_id: &str) -> Self {
        Self {
            client,
            namespace: namespace.to_string(),
            cluster_id: cluster_id.to_string(),
            can_list_nodes: true,
        }
    }

    /// Use the instance-based node map instead of listing nodes.
    #[must_use]
    pub fn without_node_access(mut self) -> Self {
        self.can_list_nodes = false;
        self
    }

    async fn read_inputs(&self, dk: &DynaKube) -> Result<InitInputs> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), &self.namespace);

        let tokens_name = dk.tokens_secret_name();
        let tokens = secrets
            .get(&tokens_name)
            .await
            .with_context(|| format!("failed to query tokens secret {tokens_name}"))?;

        let proxy = if feature_flags::oneagent_ignore_proxy(dk) {
            None
        } else {
            resolve_proxy(&self.client, &self.namespace, dk).await?
        };

        let trusted_cas = match dk.trusted_cas() {
            Some(name) => {
                let config_maps: Api<ConfigMap> =
                    Api::namespaced(self.client.clone(), &self.namespace);
                let cm = config_maps
                    .get(name)
                    .await
                    .with_context(|| format!("failed to query trusted CA config map {name}"))?;
                cm.data
                    .and_then(|data| data.get(TRUSTED_CA_CONFIGMAP_KEY).cloned())
                    .filter(|certs| !certs.is_empty())
            }
            None => None,
        };

        let activegate_cert = match dk.activegate_tls_secret() {
            Some(name) => {
                let secret = secrets
                    .get(name)
                    .await
                    .with_context(|| format!("failed to query ActiveGate TLS secret {name}"))?;
                secret_string(&secret, ACTIVEGATE_TLS_CERT_KEY)
            }
            None => None,
        };

        Ok(InitInputs {
            tokens: Tokens::from_secret(&tokens),
            proxy,
            trusted_cas,
            activegate_cert,
            cluster_id: self.cluster_id.clone(),
            monitoring_nodes: BTreeMap::new(),
        })
    }

    async fn node_map(
        &self,
        dk: &DynaKube,
        dynakubes: &[&DynaKube],
    ) -> Result<BTreeMap<String, String>> {
        if self.can_list_nodes {
            let nodes: Api<Node> = Api::all(self.client.clone());
            match nodes.list(&ListParams::default()).await {
                Ok(list) => return Ok(build_node_map(dk, dynakubes, &list.items)),
                Err(e) if is_forbidden(&e) => {
                    warn!("Not allowed to list nodes, using DynaKube instances for the node map");
                }
                Err(e) => return Err(e).context("failed to list nodes"),
            }
        }
        Ok(build_node_map_from_instances(dk, dynakubes))
    }

    /// Generate the init secret payload of `dk`.
    ///
    /// `dynakubes` is every `DynaKube` in the operator namespace; their host-agent node
    /// selectors shape the node map.
    ///
    /// # Errors
    ///
    /// Returns an error if a referenced secret or config map cannot be read.
    pub async fn generate(&self, dk: &DynaKube, dynakubes: &[&DynaKube]) -> Result<InitSecret> {
        let mut inputs = self.read_inputs(dk).await?;
        inputs.monitoring_nodes = self.node_map(dk, dynakubes).await?;

        let config = build_secret_config(dk, &inputs);
        let data = build_init_secret_data(&config)?;
        Ok(InitSecret { config, data })
    }

    /// Write the init secret into every namespace in `namespaces`. Returns the number
    /// of secrets written.
    ///
    /// # Errors
    ///
    /// Returns an error if generation or any write fails.
    pub async fn generate_for_dynakube(
        &self,
        dk: &DynaKube,
        dynakubes: &[&DynaKube],
        namespaces: &[String],
    ) -> Result<usize> {
        let secret = self.generate(dk, dynakubes).await?;
        let labels = injection_secret_labels(&dk.name_any());

        let mut written = 0;
        for namespace in namespaces {
            if create_or_update_secret(
                &self.client,
                namespace,
                SECRET_CONFIG_NAME,
                &secret.data,
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
            "Reconciled init secrets"
        );
        Ok(written)
    }

    /// Make sure `namespace` has an init secret, creating it if it is missing, and
    /// return the config it carries.
    ///
    /// # Errors
    ///
    /// Returns an error if the secret cannot be read, generated or created.
    pub async fn generate_for_namespace(
        &self,
        dk: &DynaKube,
        dynakubes: &[&DynaKube],
        namespace: &str,
    ) -> Result<SecretConfig> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        if let Some(existing) = secrets.get_opt(SECRET_CONFIG_NAME).await? {
            return SecretConfig::from_secret(&existing);
        }

        debug!(namespace = %namespace, dynakube = %dk.name_any(), "Init secret missing, generating");
        let secret = self.generate(dk, dynakubes).await?;
        create_secret_if_missing(
            &self.client,
            namespace,
            SECRET_CONFIG_NAME,
            &secret.data,
            injection_secret_labels(&dk.name_any()),
        )
        .await?;
        Ok(secret.config)
    }

    /// Delete init secrets from namespaces no longer mapped.
    ///
    /// # Errors
    ///
    /// Returns an error if a delete fails.
    pub async fn cleanup(&self, namespaces: &[String]) -> Result<()> {
        for namespace in namespaces {
            delete_secret_if_exists(&self.client, namespace, SECRET_CONFIG_NAME).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "initgeneration_tests.rs"]
mod initgeneration_tests;
