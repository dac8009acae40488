// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `validation.rs`

#[cfg(test)]
mod tests {
    use crate::config::OperatorConfig;
    use crate::crd::{DynaKube, LabelSelector, OneAgentSpec};
    use crate::webhook::fake_client::{FailPoint, FakeWebhookClient};
    use crate::webhook::fixtures::{app_monitoring, cloud_native, host_monitoring, namespace, OPERATOR_NAMESPACE};
    use crate::webhook::validation::*;
    use kube::core::admission::{AdmissionResponse, AdmissionReview};
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn validator(client: FakeWebhookClient) -> DynaKubeValidator {
        let config = OperatorConfig {
            namespace: OPERATOR_NAMESPACE.to_string(),
            ..Default::default()
        };
        DynaKubeValidator::new(Arc::new(client), Arc::new(config))
    }

    async fn admit(validator: &DynaKubeValidator, dk: &DynaKube, operation: &str) -> AdmissionResponse {
        let review: AdmissionReview<DynaKube> = serde_json::from_value(json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "request": {
                "uid": "e911857d-c318-11e8-bbad-025000000001",
                "kind": {"group": "dynatrace.com", "version": "v1beta1", "kind": "DynaKube"},
                "resource": {"group": "dynatrace.com", "version": "v1beta1", "resource": "dynakubes"},
                "name": dk.metadata.name,
                "namespace": OPERATOR_NAMESPACE,
                "operation": operation,
                "userInfo": {"username": "admin"},
                "object": dk,
                "oldObject": null,
                "dryRun": false
            }
        }))
        .unwrap();
        validator.handle(review).await.response.unwrap()
    }

    fn selecting(mut dk: DynaKube, key: &str, value: &str) -> DynaKube {
        dk.spec.namespace_selector = Some(LabelSelector {
            match_labels: Some(BTreeMap::from([(key.to_string(), value.to_string())])),
            match_expressions: None,
        });
        dk
    }

    fn labelled_namespace(name: &str, key: &str, value: &str) -> k8s_openapi::api::core::v1::Namespace {
        let mut ns = namespace(name, None);
        ns.metadata.labels = Some(BTreeMap::from([(key.to_string(), value.to_string())]));
        ns
    }

    #[tokio::test]
    async fn test_valid_dynakube_is_allowed() {
        let validator = validator(FakeWebhookClient::with(vec![namespace("ns", None)], vec![]));
        let response = admit(&validator, &cloud_native("dk"), "CREATE").await;
        assert!(response.allowed);
    }

    #[tokio::test]
    async fn test_invalid_spec_is_denied() {
        let validator = validator(FakeWebhookClient::default());
        let mut dk = cloud_native("dk");
        dk.spec.one_agent = OneAgentSpec {
            application_monitoring: app_monitoring("x").spec.one_agent.application_monitoring,
            cloud_native_full_stack: cloud_native("y").spec.one_agent.cloud_native_full_stack,
            ..Default::default()
        };

        let response = admit(&validator, &dk, "CREATE").await;
        assert!(!response.allowed);
        assert!(response.result.message.contains("more than one OneAgent mode"));
    }

    #[tokio::test]
    async fn test_overlapping_selectors_are_denied() {
        let client = FakeWebhookClient::with(
            vec![labelled_namespace("shop", "team", "a"), namespace("other", None)],
            vec![selecting(cloud_native("existing"), "team", "a")],
        );
        let validator = validator(client);

        let response = admit(&validator, &cloud_native("new"), "CREATE").await;
        assert!(!response.allowed);
        assert!(response.result.message.contains("'shop'"));
        assert!(response.result.message.contains("'existing'"));
    }

    #[tokio::test]
    async fn test_disjoint_selectors_are_allowed() {
        let client = FakeWebhookClient::with(
            vec![labelled_namespace("shop", "team", "a"), labelled_namespace("bank", "team", "b")],
            vec![selecting(cloud_native("existing"), "team", "a")],
        );
        let validator = validator(client);

        let response = admit(&validator, &selecting(cloud_native("new"), "team", "b"), "CREATE").await;
        assert!(response.allowed);
    }

    #[tokio::test]
    async fn test_update_of_same_dynakube_is_allowed() {
        let client = FakeWebhookClient::with(vec![namespace("ns", None)], vec![cloud_native("dk")]);
        let response = admit(&validator(client), &cloud_native("dk"), "UPDATE").await;
        assert!(response.allowed);
    }

    #[tokio::test]
    async fn test_host_monitoring_never_conflicts() {
        let client = FakeWebhookClient::with(vec![namespace("ns", None)], vec![cloud_native("dk")]);
        let response = admit(&validator(client), &host_monitoring("host"), "CREATE").await;
        assert!(response.allowed);
    }

    #[tokio::test]
    async fn test_excluded_namespaces_do_not_conflict() {
        let client = FakeWebhookClient::with(
            vec![namespace("kube-system", None), namespace(OPERATOR_NAMESPACE, None)],
            vec![cloud_native("existing")],
        );
        let response = admit(&validator(client), &cloud_native("new"), "CREATE").await;
        assert!(response.allowed);
    }

    #[tokio::test]
    async fn test_lookup_failure_allows_with_warning() {
        let client = FakeWebhookClient::with(vec![namespace("ns", None)], vec![cloud_native("existing")]);
        client.fail_at(FailPoint::DynaKube);
        let response = admit(&validator(client), &cloud_native("new"), "CREATE").await;
        assert!(response.allowed);
        assert_eq!(response.warnings.map(|w| w.len()), Some(1));
    }
}
