// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Integration tests against a cluster running the operator.
//!
//! Run with: cargo test --test dynakube_integration -- --ignored

mod common;

use common::{
    app_monitoring_dynakube, cleanup_test_namespace, create_test_namespace, create_token_secret,
    get_kube_client_or_skip, wait_for,
};
use dynakube_operator::constants::{DEFAULT_OPERATOR_NAMESPACE, SECRET_CONFIG_NAME};
use dynakube_operator::crd::DynaKube;
use dynakube_operator::labels::INSTANCE_LABEL;
use k8s_openapi::api::core::v1::{Namespace, Secret};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, DeleteParams, PostParams};

#[tokio::test]
#[ignore] // Run with: cargo test --test dynakube_integration -- --ignored
async fn test_dynakube_crd_installed() {
    let Some(client) = get_kube_client_or_skip().await else {
        return;
    };

    let crds: Api<CustomResourceDefinition> = Api::all(client);
    match crds.get_opt("dynakubes.dynatrace.com").await {
        Ok(Some(crd)) => {
            assert_eq!(crd.spec.names.kind, "DynaKube");
            println!("✓ DynaKube CRD installed");
        }
        Ok(None) => println!("⚠ DynaKube CRD not found. Install with: kubectl apply -f deploy/crds/"),
        Err(e) => println!("⚠ Could not check CRDs: {e}"),
    }
}

#[tokio::test]
#[ignore]
async fn test_selected_namespace_is_mapped_and_gets_init_secret() {
    let Some(client) = get_kube_client_or_skip().await else {
        return;
    };

    let operator_ns = DEFAULT_OPERATOR_NAMESPACE;
    let test_ns = "dynakube-it-mapped";
    let dk_name = "dynakube-it";

    create_test_namespace(&client, test_ns, &[("team", "it")])
        .await
        .expect("create namespace");
    create_token_secret(&client, operator_ns, dk_name)
        .await
        .expect("create token secret");

    let dynakubes: Api<DynaKube> = Api::namespaced(client.clone(), operator_ns);
    let dk = app_monitoring_dynakube(dk_name, operator_ns, "it");
    if let Err(e) = dynakubes.create(&PostParams::default(), &dk).await {
        println!("⚠ Could not create DynaKube (is the CRD installed?): {e}");
        let _ = cleanup_test_namespace(&client, test_ns).await;
        return;
    }

    let namespaces: Api<Namespace> = Api::all(client.clone());
    let namespaces = &namespaces;
    let labelled = wait_for(60, move || async move {
        namespaces
            .get_opt(test_ns)
            .await
            .ok()
            .flatten()
            .and_then(|ns| ns.metadata.labels)
            .and_then(|labels| labels.get(INSTANCE_LABEL).cloned())
            .as_deref()
            == Some(dk_name)
    })
    .await;

    let secrets: Api<Secret> = Api::namespaced(client.clone(), test_ns);
    let secrets = &secrets;
    let has_secret = wait_for(60, move || async move {
        matches!(secrets.get_opt(SECRET_CONFIG_NAME).await, Ok(Some(_)))
    })
    .await;

    let _ = dynakubes.delete(dk_name, &DeleteParams::default()).await;
    let _ = cleanup_test_namespace(&client, test_ns).await;

    assert!(labelled, "namespace {test_ns} was not labelled with {dk_name}");
    // The tenant is unreachable in the test cluster, so the init secret only appears
    // once a tenant UUID is known; report instead of failing.
    if !has_secret {
        println!("⚠ init secret not written; expected without a reachable tenant");
    }
}
