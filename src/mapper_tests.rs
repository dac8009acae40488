// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `mapper.rs`

#[cfg(test)]
mod tests {
    use crate::crd::{
        ApplicationMonitoringSpec, DynaKube, DynaKubeSpec, HostInjectSpec, LabelSelector,
        LabelSelectorRequirement, OneAgentSpec,
    };
    use crate::errors::OperatorError;
    use crate::labels::INSTANCE_LABEL;
    use crate::mapper::*;
    use k8s_openapi::api::core::v1::Namespace;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use kube::ResourceExt;
    use std::collections::BTreeMap;

    fn namespace(name: &str, labels: &[(&str, &str)]) -> Namespace {
        Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(
                    labels
                        .iter()
                        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                        .collect(),
                ),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn app_dynakube(name: &str, selector: Option<LabelSelector>) -> DynaKube {
        let mut dk = DynaKube::new(
            name,
            DynaKubeSpec {
                api_url: "https://tenant.live/api".into(),
                namespace_selector: selector,
                one_agent: OneAgentSpec {
                    application_monitoring: Some(ApplicationMonitoringSpec::default()),
                    ..Default::default()
                },
                ..Default::default()
            },
        );
        dk.metadata.namespace = Some("dynatrace".into());
        dk
    }

    fn selector(key: &str, value: &str) -> Option<LabelSelector> {
        Some(LabelSelector {
            match_labels: Some(BTreeMap::from([(key.to_string(), value.to_string())])),
            match_expressions: None,
        })
    }

    #[test]
    fn test_unset_selector_matches_every_namespace() {
        let dks = vec![app_dynakube("dk", None)];
        let ns = namespace("shop", &[]);

        let resolved = resolve_dynakube_for_namespace(&ns, &dks).unwrap();
        assert_eq!(resolved.map(ResourceExt::name_any).as_deref(), Some("dk"));
    }

    #[test]
    fn test_selector_filters_namespaces() {
        let dks = vec![app_dynakube("dk", selector("monitor", "yes"))];

        let labelled = namespace("shop", &[("monitor", "yes")]);
        let unlabelled = namespace("other", &[]);

        assert!(resolve_dynakube_for_namespace(&labelled, &dks)
            .unwrap()
            .is_some());
        assert!(resolve_dynakube_for_namespace(&unlabelled, &dks)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_match_expressions() {
        let dks = vec![app_dynakube(
            "dk",
            Some(LabelSelector {
                match_labels: None,
                match_expressions: Some(vec![LabelSelectorRequirement {
                    key: "tier".into(),
                    operator: "NotIn".into(),
                    values: Some(vec!["system".into()]),
                }]),
            }),
        )];

        assert!(
            resolve_dynakube_for_namespace(&namespace("a", &[("tier", "web")]), &dks)
                .unwrap()
                .is_some()
        );
        assert!(
            resolve_dynakube_for_namespace(&namespace("b", &[("tier", "system")]), &dks)
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_dynakube_without_app_injection_is_ignored() {
        let mut host_only = app_dynakube("host", None);
        host_only.spec.one_agent = OneAgentSpec {
            host_monitoring: Some(HostInjectSpec::default()),
            ..Default::default()
        };
        let dks = vec![host_only, app_dynakube("app", None)];

        let resolved = resolve_dynakube_for_namespace(&namespace("shop", &[]), &dks).unwrap();
        assert_eq!(resolved.map(ResourceExt::name_any).as_deref(), Some("app"));
    }

    #[test]
    fn test_ignore_list_excludes_namespace() {
        let mut dk = app_dynakube("dk", None);
        dk.spec.namespace_ignore_list = vec!["^test-.*".into()];
        let dks = vec![dk];

        assert!(
            resolve_dynakube_for_namespace(&namespace("test-shop", &[]), &dks)
                .unwrap()
                .is_none()
        );
        assert!(resolve_dynakube_for_namespace(&namespace("shop", &[]), &dks)
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_two_matching_dynakubes_conflict() {
        let dks = vec![app_dynakube("b", None), app_dynakube("a", None)];

        let err = resolve_dynakube_for_namespace(&namespace("ns", &[]), &dks).unwrap_err();
        assert_eq!(
            err,
            OperatorError::Conflict {
                namespace: "ns".into(),
                dynakubes: vec!["a".into(), "b".into()],
            }
        );
    }

    #[test]
    fn test_namespaces_for_dynakube() {
        let namespaces = vec![
            namespace("a", &[(INSTANCE_LABEL, "dk")]),
            namespace("b", &[(INSTANCE_LABEL, "other")]),
            namespace("c", &[]),
            namespace("d", &[(INSTANCE_LABEL, "dk")]),
        ];

        assert_eq!(namespaces_for_dynakube("dk", &namespaces), vec!["a", "d"]);
    }

    #[test]
    fn test_excluded_namespaces() {
        assert!(is_excluded_namespace("kube-system", "dynatrace"));
        assert!(is_excluded_namespace("openshift-monitoring", "dynatrace"));
        assert!(is_excluded_namespace("dynatrace", "dynatrace"));
        assert!(!is_excluded_namespace("shop", "dynatrace"));
    }

    #[test]
    fn test_label_action_set_and_keep() {
        let dks = vec![app_dynakube("dk", None)];

        assert_eq!(
            label_action(&namespace("shop", &[]), &dks, "dynatrace"),
            LabelAction::Set("dk".into())
        );
        assert_eq!(
            label_action(&namespace("shop", &[(INSTANCE_LABEL, "dk")]), &dks, "dynatrace"),
            LabelAction::Keep
        );
        assert_eq!(
            label_action(&namespace("shop", &[(INSTANCE_LABEL, "old")]), &dks, "dynatrace"),
            LabelAction::Set("dk".into())
        );
    }

    #[test]
    fn test_label_action_remove() {
        let dks = vec![app_dynakube("dk", selector("monitor", "yes"))];

        assert_eq!(
            label_action(&namespace("shop", &[(INSTANCE_LABEL, "dk")]), &dks, "dynatrace"),
            LabelAction::Remove
        );
        assert_eq!(
            label_action(&namespace("shop", &[]), &dks, "dynatrace"),
            LabelAction::Keep
        );
        assert_eq!(
            label_action(
                &namespace("kube-public", &[(INSTANCE_LABEL, "dk")]),
                &dks,
                "dynatrace"
            ),
            LabelAction::Remove
        );
    }

    #[test]
    fn test_label_action_conflict() {
        let dks = vec![app_dynakube("a", None), app_dynakube("b", None)];

        assert_eq!(
            label_action(&namespace("ns", &[(INSTANCE_LABEL, "a")]), &dks, "dynatrace"),
            LabelAction::Conflict(vec!["a".into(), "b".into()])
        );
    }
}
