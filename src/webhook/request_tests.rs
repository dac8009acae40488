// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `request.rs`

#[cfg(test)]
mod tests {
    use crate::webhook::request::*;
    use k8s_openapi::api::core::v1::{Container, EnvVar, Pod, PodSpec, Volume};
    use kube::api::ObjectMeta;

    fn container() -> Container {
        Container {
            name: "app".to_string(),
            image: Some("alpine".to_string()),
            env: Some(vec![EnvVar {
                name: "LD_PRELOAD".to_string(),
                value: Some("/usr/lib/libcustom.so".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }
    }

    #[test]
    fn test_add_env_keeps_existing_value() {
        let mut c = container();
        add_env(&mut c, "LD_PRELOAD", "/other.so");
        add_env(&mut c, "DT_NETWORK_ZONE", "eu");

        assert_eq!(env_value(&c, "LD_PRELOAD"), Some("/usr/lib/libcustom.so"));
        assert_eq!(env_value(&c, "DT_NETWORK_ZONE"), Some("eu"));
        assert_eq!(c.env.unwrap().len(), 2);
    }

    #[test]
    fn test_set_env_reports_change() {
        let mut c = container();
        assert!(set_env(&mut c, "HOST_GROUP", "prod"));
        assert!(!set_env(&mut c, "HOST_GROUP", "prod"));
        assert!(set_env(&mut c, "HOST_GROUP", "staging"));
        assert_eq!(env_value(&c, "HOST_GROUP"), Some("staging"));
    }

    #[test]
    fn test_add_secret_env() {
        let mut c = Container::default();
        add_secret_env(&mut c, "DT_PROXY", "dynatrace-dynakube-config", "proxy");

        let env = &c.env.unwrap()[0];
        assert!(env.value.is_none());
        let selector = env
            .value_from
            .as_ref()
            .and_then(|v| v.secret_key_ref.as_ref())
            .unwrap();
        assert_eq!(selector.name, "dynatrace-dynakube-config");
        assert_eq!(selector.key, "proxy");
    }

    #[test]
    fn test_add_mount_is_idempotent() {
        let mut c = Container::default();
        add_mount(&mut c, "oneagent-share", "/etc/ld.so.preload", Some("ld.so.preload"));
        add_mount(&mut c, "oneagent-share", "/etc/ld.so.preload", Some("ld.so.preload"));
        add_read_only_mount(&mut c, "certs", "/certs", None);

        let mounts = c.volume_mounts.unwrap();
        assert_eq!(mounts.len(), 2);
        assert_eq!(mounts[0].sub_path.as_deref(), Some("ld.so.preload"));
        assert_eq!(mounts[0].read_only, None);
        assert_eq!(mounts[1].read_only, Some(true));
    }

    #[test]
    fn test_pod_display_name_falls_back_to_generate_name() {
        let pod = Pod {
            metadata: ObjectMeta {
                generate_name: Some("web-7d9f-".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(pod_display_name(&pod), "web-7d9f-");
    }

    #[test]
    fn test_find_install_container() {
        let pod = Pod {
            spec: Some(PodSpec {
                init_containers: Some(vec![
                    Container {
                        name: "migrate".to_string(),
                        ..Default::default()
                    },
                    Container {
                        name: "install-oneagent".to_string(),
                        ..Default::default()
                    },
                ]),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(find_install_container(&pod).is_some());
        assert!(find_install_container(&Pod::default()).is_none());
    }

    #[test]
    fn test_pod_annotation() {
        let pod = Pod {
            metadata: ObjectMeta {
                annotations: Some([("dynatrace.com/inject".to_string(), "false".to_string())].into()),
                ..Default::default()
            },
            spec: Some(PodSpec {
                volumes: Some(vec![Volume::default()]),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(pod_annotation(&pod, "dynatrace.com/inject"), Some("false"));
        assert_eq!(pod_annotation(&pod, "oneagent.dynatrace.com/inject"), None);
    }
}
