// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

// Common test utilities for integration tests

use dynakube_operator::crd::{ApplicationMonitoringSpec, DynaKube, DynaKubeSpec, LabelSelector, OneAgentSpec};
use k8s_openapi::api::core::v1::{Namespace, Secret};
use kube::{
    api::{Api, DeleteParams, PostParams},
    client::Client,
};
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::sleep;

/// Get a Kubernetes client or skip the test if not in a cluster
pub async fn get_kube_client_or_skip() -> Option<Client> {
    match Client::try_default().await {
        Ok(client) => Some(client),
        Err(e) => {
            eprintln!("Skipping integration test: not running in Kubernetes cluster: {}", e);
            None
        }
    }
}

/// Create a test namespace carrying `labels`
pub async fn create_test_namespace(
    client: &Client,
    name: &str,
    labels: &[(&str, &str)],
) -> Result<(), Box<dyn std::error::Error>> {
    let namespaces: Api<Namespace> = Api::all(client.clone());

    let mut all_labels: BTreeMap<&str, &str> = labels.iter().copied().collect();
    all_labels.insert("managed-by", "dynakube-operator-test");

    let ns = serde_json::from_value(json!({
        "apiVersion": "v1",
        "kind": "Namespace",
        "metadata": { "name": name, "labels": all_labels }
    }))?;

    match namespaces.create(&PostParams::default(), &ns).await {
        Ok(_) => {
            println!("Created test namespace: {}", name);
            Ok(())
        }
        Err(kube::Error::Api(ae)) if ae.code == 409 => {
            println!("Test namespace already exists: {}", name);
            Ok(())
        }
        Err(e) => Err(Box::new(e)),
    }
}

/// Cleanup test namespace
pub async fn cleanup_test_namespace(client: &Client, name: &str) -> Result<(), Box<dyn std::error::Error>> {
    let namespaces: Api<Namespace> = Api::all(client.clone());

    match namespaces.delete(name, &DeleteParams::default()).await {
        Ok(_) => {
            println!("Deleted test namespace: {}", name);
            Ok(())
        }
        Err(kube::Error::Api(ae)) if ae.code == 404 => {
            println!("Test namespace already deleted: {}", name);
            Ok(())
        }
        Err(e) => Err(Box::new(e)),
    }
}

/// Create the token secret of a `DynaKube`
pub async fn create_token_secret(
    client: &Client,
    namespace: &str,
    name: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);
    let secret = serde_json::from_value(json!({
        "apiVersion": "v1",
        "kind": "Secret",
        "metadata": { "name": name, "namespace": namespace },
        "stringData": { "apiToken": "integration-api-token", "paasToken": "integration-paas-token" }
    }))?;

    match secrets.create(&PostParams::default(), &secret).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(()),
        Err(e) => Err(Box::new(e)),
    }
}

/// Application-monitoring `DynaKube` selecting namespaces labelled `team=<team>`
pub fn app_monitoring_dynakube(name: &str, namespace: &str, team: &str) -> DynaKube {
    let mut dk = DynaKube::new(
        name,
        DynaKubeSpec {
            api_url: "https://integration.invalid/api".to_string(),
            namespace_selector: Some(LabelSelector {
                match_labels: Some(BTreeMap::from([("team".to_string(), team.to_string())])),
                match_expressions: None,
            }),
            one_agent: OneAgentSpec {
                application_monitoring: Some(ApplicationMonitoringSpec::default()),
                ..Default::default()
            },
            ..Default::default()
        },
    );
    dk.metadata.namespace = Some(namespace.to_string());
    dk
}

/// Poll `check` every second until it returns true or `timeout_secs` elapse
pub async fn wait_for<F, Fut>(timeout_secs: u64, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..timeout_secs {
        if check().await {
            return true;
        }
        sleep(Duration::from_secs(1)).await;
    }
    false
}
