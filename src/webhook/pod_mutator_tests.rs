// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `pod_mutator.rs`

#[cfg(test)]
mod tests {
    use crate::config::OperatorConfig;
    use crate::webhook::fake_client::{FailPoint, FakeWebhookClient};
    use crate::webhook::fixtures::{
        app_monitoring, cloud_native, container, host_monitoring, init_config, namespace, pod,
        with_annotation, with_metrics_ingest, CLUSTER_ID, OPERATOR_IMAGE, OPERATOR_NAMESPACE,
    };
    use crate::webhook::pod_mutator::*;
    use crate::webhook::request::has_env;
    use k8s_openapi::api::core::v1::Pod;
    use kube::core::admission::{AdmissionResponse, AdmissionReview};
    use serde_json::{json, Value};
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn config() -> Arc<OperatorConfig> {
        Arc::new(OperatorConfig {
            namespace: OPERATOR_NAMESPACE.to_string(),
            cluster_id: CLUSTER_ID.to_string(),
            image: OPERATOR_IMAGE.to_string(),
            ..Default::default()
        })
    }

    fn mutator(client: &Arc<FakeWebhookClient>) -> PodMutator {
        PodMutator::new(client.clone(), config())
    }

    fn client_with_init_config(client: FakeWebhookClient) -> Arc<FakeWebhookClient> {
        *client.init_config.lock().unwrap() = init_config();
        Arc::new(client)
    }

    fn review(pod: &Pod) -> AdmissionReview<Pod> {
        serde_json::from_value(json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "request": {
                "uid": "705ab4f5-6393-11e8-b7cc-42010a800002",
                "kind": {"group": "", "version": "v1", "kind": "Pod"},
                "resource": {"group": "", "version": "v1", "resource": "pods"},
                "requestKind": {"group": "", "version": "v1", "kind": "Pod"},
                "requestResource": {"group": "", "version": "v1", "resource": "pods"},
                "name": "p",
                "namespace": "ns",
                "operation": "CREATE",
                "userInfo": {"username": "system:serviceaccount:kube-system:replicaset-controller"},
                "object": pod,
                "oldObject": null,
                "dryRun": false
            }
        }))
        .unwrap()
    }

    async fn admit(mutator: &PodMutator, pod: &Pod) -> AdmissionResponse {
        mutator.handle(review(pod)).await.response.unwrap()
    }

    /// Apply the response patch to `pod`; `None` when the response carries no patch.
    fn patched(pod: &Pod, response: &AdmissionResponse) -> Option<Pod> {
        let bytes = response.patch.as_ref()?;
        let patch: json_patch::Patch = serde_json::from_slice(bytes).unwrap();
        let mut doc: Value = serde_json::to_value(pod).unwrap();
        json_patch::patch(&mut doc, &patch).unwrap();
        Some(serde_json::from_value(doc).unwrap())
    }

    fn annotation<'a>(pod: &'a Pod, key: &str) -> Option<&'a str> {
        pod.metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(key))
            .map(String::as_str)
    }

    fn with_pod_annotation(mut pod: Pod, key: &str, value: &str) -> Pod {
        pod.metadata
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .insert(key.to_string(), value.to_string());
        pod
    }

    fn mount_paths(pod: &Pod, container: usize) -> Vec<String> {
        pod.spec.as_ref().unwrap().containers[container]
            .volume_mounts
            .as_ref()
            .map(|m| m.iter().map(|m| m.mount_path.clone()).collect())
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn test_cloud_native_injection() {
        let client = client_with_init_config(FakeWebhookClient::with(
            vec![namespace("ns", Some("dk"))],
            vec![cloud_native("dk")],
        ));
        let original = pod();
        let response = admit(&mutator(&client), &original).await;

        assert!(response.allowed);
        let pod = patched(&original, &response).expect("pod must be patched");
        let spec = pod.spec.as_ref().unwrap();

        let init = spec.init_containers.as_ref().unwrap();
        assert_eq!(init.len(), 1);
        assert_eq!(init[0].name, "install-oneagent");
        assert_eq!(init[0].image.as_deref(), Some(OPERATOR_IMAGE));

        let volumes = spec.volumes.as_ref().unwrap();
        let bin = volumes.iter().find(|v| v.name == "oneagent-bin").unwrap();
        assert!(bin.csi.is_some());

        let paths = mount_paths(&pod, 0);
        assert!(paths.contains(&"/etc/ld.so.preload".to_string()));
        assert!(paths.contains(&"/opt/dynatrace/oneagent-paas".to_string()));

        assert_eq!(annotation(&pod, "dynakube.dynatrace.com/injected"), Some("true"));
        assert_eq!(annotation(&pod, "oneagent.dynatrace.com/injected"), Some("true"));

        assert_eq!(*client.init_secrets.lock().unwrap(), vec!["ns".to_string()]);
        assert_eq!(*client.endpoint_secrets.lock().unwrap(), vec!["ns".to_string()]);
        let events = client.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].reason, "Inject");
        assert_eq!(events[0].note, "Injecting the necessary info into pod p in namespace ns");
    }

    #[tokio::test]
    async fn test_otlp_token_secret_ensured_without_metadata_enrichment() {
        let dk = with_annotation(
            with_metrics_ingest(app_monitoring("dk")),
            "feature.dynatrace.com/disable-metadata-enrichment",
            "true",
        );
        let client = client_with_init_config(FakeWebhookClient::with(vec![namespace("ns", Some("dk"))], vec![dk]));
        let original = pod();
        let response = admit(&mutator(&client), &original).await;

        let pod = patched(&original, &response).expect("pod must be patched");
        assert!(has_env(&pod.spec.as_ref().unwrap().containers[0], "DT_API_TOKEN"));
        assert_eq!(annotation(&pod, "data-ingest.dynatrace.com/injected"), None);
        assert_eq!(*client.endpoint_secrets.lock().unwrap(), vec!["ns".to_string()]);
    }

    #[tokio::test]
    async fn test_otlp_token_secret_ensured_when_pod_opts_out_of_enrichment() {
        let client = client_with_init_config(FakeWebhookClient::with(
            vec![namespace("ns", Some("dk"))],
            vec![with_metrics_ingest(app_monitoring("dk"))],
        ));
        let original = with_pod_annotation(pod(), "data-ingest.dynatrace.com/inject", "false");
        let response = admit(&mutator(&client), &original).await;

        let pod = patched(&original, &response).expect("pod must be patched");
        assert!(has_env(&pod.spec.as_ref().unwrap().containers[0], "DT_API_TOKEN"));
        assert_eq!(*client.endpoint_secrets.lock().unwrap(), vec!["ns".to_string()]);
    }

    #[tokio::test]
    async fn test_app_monitoring_uses_empty_dir() {
        let client = client_with_init_config(FakeWebhookClient::with(
            vec![namespace("ns", Some("dk"))],
            vec![app_monitoring("dk")],
        ));
        let original = pod();
        let response = admit(&mutator(&client), &original).await;

        let pod = patched(&original, &response).unwrap();
        let volumes = pod.spec.as_ref().unwrap().volumes.clone().unwrap();
        let bin = volumes.iter().find(|v| v.name == "oneagent-bin").unwrap();
        assert!(bin.csi.is_none());
        assert!(bin.empty_dir.is_some());
    }

    #[tokio::test]
    async fn test_unknown_node_of_cloud_native_pod_is_not_injected() {
        let client = FakeWebhookClient::with(vec![namespace("ns", Some("dk"))], vec![cloud_native("dk")]);
        *client.init_config.lock().unwrap() = crate::initgeneration::SecretConfig {
            has_host: true,
            ..init_config()
        };
        let client = Arc::new(client);

        let mut original = pod();
        original.spec.as_mut().unwrap().node_name = Some("n2".to_string());
        let response = admit(&mutator(&client), &original).await;

        assert!(response.allowed);
        assert!(response.patch.is_none());
        assert!(response.result.message.starts_with("Failed to inject into pod: p"));
        assert!(client
            .events()
            .iter()
            .any(|e| e.reason == "InjectionFailed" && e.dynakube == "dk"));
    }

    #[tokio::test]
    async fn test_known_node_is_injected() {
        let client = FakeWebhookClient::with(vec![namespace("ns", Some("dk"))], vec![cloud_native("dk")]);
        *client.init_config.lock().unwrap() = crate::initgeneration::SecretConfig {
            has_host: true,
            ..init_config()
        };
        let client = Arc::new(client);

        let mut original = pod();
        original.spec.as_mut().unwrap().node_name = Some("n1".to_string());
        let response = admit(&mutator(&client), &original).await;
        assert!(patched(&original, &response).is_some());
    }

    #[tokio::test]
    async fn test_reinvocation_adds_new_containers_only() {
        let client = client_with_init_config(FakeWebhookClient::with(
            vec![namespace("ns", Some("dk"))],
            vec![cloud_native("dk")],
        ));
        let mutator = mutator(&client);

        let original = pod();
        let first = patched(&original, &admit(&mutator, &original).await).unwrap();
        let mounts_before = mount_paths(&first, 0);

        // Unchanged pod: nothing to do.
        let response = admit(&mutator, &first).await;
        assert!(response.allowed);
        assert!(response.patch.is_none());

        let mut grown = first.clone();
        grown.spec.as_mut().unwrap().containers.push(container("sidecar", "nginx"));
        let response = admit(&mutator, &grown).await;
        let second = patched(&grown, &response).expect("new container must be patched");

        assert_eq!(mount_paths(&second, 0), mounts_before);
        assert!(mount_paths(&second, 1).contains(&"/etc/ld.so.preload".to_string()));

        let init = second.spec.as_ref().unwrap().init_containers.as_ref().unwrap();
        assert_eq!(init.len(), 1);
        let env = init[0].env.as_ref().unwrap();
        assert!(env
            .iter()
            .any(|e| e.name == "CONTAINER_2_NAME" && e.value.as_deref() == Some("sidecar")));

        assert!(client.events().iter().any(|e| e.reason == "UpdatePod"));
    }

    #[tokio::test]
    async fn test_reinvocation_can_be_disabled() {
        let dk = with_annotation(
            cloud_native("dk"),
            "feature.dynatrace.com/disable-webhook-reinvocation-policy",
            "true",
        );
        let client = client_with_init_config(FakeWebhookClient::with(vec![namespace("ns", Some("dk"))], vec![dk]));
        let mutator = mutator(&client);

        let original = pod();
        let mut first = patched(&original, &admit(&mutator, &original).await).unwrap();
        first.spec.as_mut().unwrap().containers.push(container("sidecar", "nginx"));

        let response = admit(&mutator, &first).await;
        assert!(response.allowed);
        assert!(response.patch.is_none());
    }

    #[tokio::test]
    async fn test_conflicting_dynakubes_fail_open() {
        let client = client_with_init_config(FakeWebhookClient::with(
            vec![namespace("ns", None)],
            vec![cloud_native("a"), cloud_native("b")],
        ));
        let original = pod();
        let response = admit(&mutator(&client), &original).await;

        assert!(response.allowed);
        assert!(response.patch.is_none());
        assert!(response.result.message.contains("ns"));

        let mut flagged: Vec<String> = client
            .events()
            .into_iter()
            .filter(|e| e.reason == "InjectionFailed")
            .map(|e| e.dynakube)
            .collect();
        flagged.sort();
        assert_eq!(flagged, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn test_unlabelled_namespace_resolved_by_selector() {
        let client = client_with_init_config(FakeWebhookClient::with(
            vec![namespace("ns", None)],
            vec![cloud_native("dk")],
        ));
        let original = pod();
        let response = admit(&mutator(&client), &original).await;
        assert!(patched(&original, &response).is_some());
    }

    #[tokio::test]
    async fn test_unlabelled_namespace_skipped_under_olm() {
        let client = client_with_init_config(FakeWebhookClient::with(
            vec![namespace("ns", None)],
            vec![cloud_native("dk")],
        ));
        let config = Arc::new(OperatorConfig {
            deployed_via_olm: true,
            ..(*config()).clone()
        });
        let mutator = PodMutator::new(client.clone(), config);

        let response = admit(&mutator, &pod()).await;
        assert!(response.allowed);
        assert!(response.patch.is_none());
        assert!(response.result.message.is_empty());
    }

    #[tokio::test]
    async fn test_opt_out_annotation() {
        let client = client_with_init_config(FakeWebhookClient::with(
            vec![namespace("ns", Some("dk"))],
            vec![cloud_native("dk")],
        ));
        let original = with_pod_annotation(pod(), "dynatrace.com/inject", "false");
        let response = admit(&mutator(&client), &original).await;

        assert!(response.allowed);
        assert!(response.patch.is_none());
        assert!(client.init_secrets.lock().unwrap().is_empty());
        assert!(client.events().is_empty());
    }

    #[tokio::test]
    async fn test_openshift_debug_pod_is_skipped() {
        let client = client_with_init_config(FakeWebhookClient::with(
            vec![namespace("ns", Some("dk"))],
            vec![cloud_native("dk")],
        ));
        let original = with_pod_annotation(
            with_pod_annotation(pod(), "debug.openshift.io/source-container", "c"),
            "debug.openshift.io/source-resource",
            "pods/p",
        );
        assert!(is_debug_pod(&original));

        let response = admit(&mutator(&client), &original).await;
        assert!(response.patch.is_none());
    }

    #[tokio::test]
    async fn test_host_monitoring_is_not_injected() {
        let client = client_with_init_config(FakeWebhookClient::with(
            vec![namespace("ns", Some("dk"))],
            vec![host_monitoring("dk")],
        ));
        let response = admit(&mutator(&client), &pod()).await;
        assert!(response.allowed);
        assert!(response.patch.is_none());
    }

    #[tokio::test]
    async fn test_missing_dynakube_publishes_event() {
        let client = client_with_init_config(FakeWebhookClient::with(vec![namespace("ns", Some("gone"))], vec![]));
        let response = admit(&mutator(&client), &pod()).await;

        assert!(response.allowed);
        assert!(response.patch.is_none());
        let events = client.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].reason, "MissingDynakube");
        assert_eq!(events[0].dynakube, "gone");
    }

    #[tokio::test]
    async fn test_lookup_failures_never_deny() {
        for point in [
            FailPoint::Namespace,
            FailPoint::DynaKube,
            FailPoint::InitSecret,
            FailPoint::EndpointSecret,
        ] {
            let client = client_with_init_config(FakeWebhookClient::with(
                vec![namespace("ns", Some("dk"))],
                vec![cloud_native("dk")],
            ));
            client.fail_at(point);

            let response = admit(&mutator(&client), &pod()).await;
            assert!(response.allowed, "{point:?} must not deny");
            assert!(response.patch.is_none(), "{point:?} must not patch");
            assert!(
                response.result.message.contains("injected failure"),
                "{point:?}: {}",
                response.result.message
            );
        }
    }

    #[tokio::test]
    async fn test_owner_lookup_failure_never_denies() {
        let client = client_with_init_config(FakeWebhookClient::with(
            vec![namespace("ns", Some("dk"))],
            vec![cloud_native("dk")],
        ));
        client.fail_at(FailPoint::Owner);

        let mut original = pod();
        original.metadata.owner_references = Some(vec![
            k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference {
                api_version: "apps/v1".to_string(),
                kind: "ReplicaSet".to_string(),
                name: "web-7d9f".to_string(),
                uid: "rs-uid".to_string(),
                controller: Some(true),
                ..Default::default()
            },
        ]);
        let response = admit(&mutator(&client), &original).await;
        assert!(response.allowed);
        assert!(response.patch.is_none());
    }

    #[tokio::test]
    async fn test_review_without_request_is_invalid() {
        let client = Arc::new(FakeWebhookClient::default());
        let review: AdmissionReview<Pod> = serde_json::from_value(json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview"
        }))
        .unwrap();

        let response = mutator(&client).handle(review).await.response.unwrap();
        assert!(!response.allowed);
    }
}
