// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `main.rs` - command line and leadership handling

#[cfg(test)]
mod tests {
    use crate::{wait_for_leadership, Cli, Command};
    use clap::Parser;
    use std::path::PathBuf;
    use std::time::Duration;
    use tokio::sync::watch;
    use tokio::time::timeout;

    fn operator_args(args: &[&str]) -> crate::OperatorArgs {
        let argv = ["dynakube-operator", "operator"].iter().chain(args);
        match Cli::try_parse_from(argv).unwrap().command {
            Command::Operator(args) => args,
            Command::Init => panic!("expected the operator command"),
        }
    }

    #[test]
    fn test_operator_flags() {
        let args = operator_args(&[
            "--namespace",
            "monitoring",
            "--pod-name",
            "operator-0",
            "--webhook-port",
            "9443",
            "--leader-election",
            "false",
            "--deployed-via-olm",
            "true",
        ]);
        let config = args.into_config("cluster-uid".to_string());

        assert_eq!(config.namespace, "monitoring");
        assert_eq!(config.pod_name, "operator-0");
        assert_eq!(config.webhook_port, 9443);
        assert_eq!(config.metrics_port, 8080);
        assert!(!config.leader_election);
        assert!(config.deployed_via_olm);
        assert_eq!(config.cluster_id, "cluster-uid");
        assert_eq!(config.webhook_dns_name(), "dynatrace-webhook.monitoring.svc");
    }

    #[test]
    fn test_operator_defaults() {
        let config = operator_args(&["--namespace", "dynatrace"]).into_config(String::new());
        assert!(config.leader_election);
        assert_eq!(config.webhook_port, 8443);
        assert_eq!(config.webhook_service, "dynatrace-webhook");
        assert_eq!(config.certs_dir, PathBuf::from("/tmp/webhook/certs"));
    }

    #[test]
    fn test_init_command() {
        let cli = Cli::try_parse_from(["dynakube-operator", "init"]).unwrap();
        assert!(matches!(cli.command, Command::Init));
    }

    #[test]
    fn test_missing_command_is_rejected() {
        assert!(Cli::try_parse_from(["dynakube-operator"]).is_err());
    }

    #[tokio::test]
    async fn test_wait_for_leadership() {
        let (tx, mut rx) = watch::channel(false);

        let pending = timeout(Duration::from_millis(50), wait_for_leadership(&mut rx, true)).await;
        assert!(pending.is_err(), "must wait while not leader");

        tx.send(true).unwrap();
        timeout(Duration::from_millis(500), wait_for_leadership(&mut rx, true))
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_for_leadership_fails_when_lease_task_ends() {
        let (tx, mut rx) = watch::channel(true);
        drop(tx);
        assert!(wait_for_leadership(&mut rx, false).await.is_err());
    }
}
