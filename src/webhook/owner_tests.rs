// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `owner.rs`

#[cfg(test)]
mod tests {
    use crate::webhook::fake_client::{FailPoint, FakeWebhookClient};
    use crate::webhook::owner::*;
    use k8s_openapi::api::core::v1::Pod;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
    use kube::api::ObjectMeta;

    fn owner(api_version: &str, kind: &str, name: &str, controller: bool) -> OwnerReference {
        OwnerReference {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
            name: name.to_string(),
            uid: format!("{name}-uid"),
            controller: Some(controller),
            ..Default::default()
        }
    }

    fn pod_owned_by(owners: Vec<OwnerReference>) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some("web-7d9f-abcde".to_string()),
                owner_references: Some(owners),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn meta_owned_by(owners: Vec<OwnerReference>) -> ObjectMeta {
        ObjectMeta {
            owner_references: Some(owners),
            ..Default::default()
        }
    }

    #[test]
    fn test_is_known_controller() {
        assert!(is_known_controller(&owner("apps/v1", "ReplicaSet", "rs", true)));
        assert!(is_known_controller(&owner("v1", "ReplicationController", "rc", true)));
        assert!(is_known_controller(&owner(
            "apps.openshift.io/v1",
            "DeploymentConfig",
            "dc",
            true
        )));
        assert!(!is_known_controller(&owner("apps/v1", "ReplicaSet", "rs", false)));
        assert!(!is_known_controller(&owner("argoproj.io/v1alpha1", "Rollout", "r", true)));
    }

    #[tokio::test]
    async fn test_pod_without_owner_is_its_own_root() {
        let client = FakeWebhookClient::default();
        let root = find_root_owner(&client, &pod_owned_by(vec![]), "ns").await.unwrap();
        assert_eq!(root.kind, "");
        assert_eq!(root.name, "web-7d9f-abcde");
    }

    #[tokio::test]
    async fn test_walks_to_deployment() {
        let client = FakeWebhookClient::default();
        client.owners.lock().unwrap().insert(
            ("ReplicaSet".to_string(), "web-7d9f".to_string()),
            meta_owned_by(vec![owner("apps/v1", "Deployment", "web", true)]),
        );
        client
            .owners
            .lock()
            .unwrap()
            .insert(("Deployment".to_string(), "web".to_string()), ObjectMeta::default());

        let pod = pod_owned_by(vec![owner("apps/v1", "ReplicaSet", "web-7d9f", true)]);
        let root = find_root_owner(&client, &pod, "ns").await.unwrap();

        assert_eq!(root.kind, "Deployment");
        assert_eq!(root.name, "web");
    }

    #[tokio::test]
    async fn test_stops_at_unknown_kind() {
        let client = FakeWebhookClient::default();
        client.owners.lock().unwrap().insert(
            ("ReplicaSet".to_string(), "web-7d9f".to_string()),
            meta_owned_by(vec![owner("argoproj.io/v1alpha1", "Rollout", "web", true)]),
        );

        let pod = pod_owned_by(vec![owner("apps/v1", "ReplicaSet", "web-7d9f", true)]);
        let root = find_root_owner(&client, &pod, "ns").await.unwrap();

        assert_eq!(root.kind, "ReplicaSet");
        assert_eq!(root.name, "web-7d9f");
    }

    #[tokio::test]
    async fn test_cycle_terminates() {
        let client = FakeWebhookClient::default();
        client.owners.lock().unwrap().insert(
            ("Job".to_string(), "a".to_string()),
            meta_owned_by(vec![owner("batch/v1", "CronJob", "b", true)]),
        );
        client.owners.lock().unwrap().insert(
            ("CronJob".to_string(), "b".to_string()),
            meta_owned_by(vec![owner("batch/v1", "Job", "a", true)]),
        );

        let pod = pod_owned_by(vec![owner("batch/v1", "Job", "a", true)]);
        let root = find_root_owner(&client, &pod, "ns").await.unwrap();

        assert_eq!(root.kind, "CronJob");
        assert_eq!(root.name, "b");
    }

    #[tokio::test]
    async fn test_read_failure_is_returned() {
        let client = FakeWebhookClient::default();
        client.fail_at(FailPoint::Owner);

        let pod = pod_owned_by(vec![owner("apps/v1", "StatefulSet", "db", true)]);
        assert!(find_root_owner(&client, &pod, "ns").await.is_err());
    }
}
