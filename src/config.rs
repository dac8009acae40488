// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Runtime configuration of the `operator` command.
//!
//! Built once in `main` from CLI flags (with environment fallbacks) plus the cluster ID
//! read at startup, then shared read-only through [`crate::context::Context`].

use crate::constants::{
    DEFAULT_OPERATOR_NAMESPACE, METRICS_SERVER_PORT, WEBHOOK_DEPLOYMENT_NAME, WEBHOOK_PORT,
};
use std::path::PathBuf;

/// Operator-wide settings.
#[derive(Clone, Debug, PartialEq)]
pub struct OperatorConfig {
    /// Namespace the operator and its `DynaKube`s live in.
    pub namespace: String,

    /// Name of this pod, used as the leader-election identity.
    pub pod_name: String,

    /// UID of the `kube-system` namespace.
    pub cluster_id: String,

    /// Operator image, reused for the install init-container.
    pub image: String,

    /// Installed through the Operator Lifecycle Manager.
    pub deployed_via_olm: bool,

    /// Name of the webhook service; also the name of the webhook configurations.
    pub webhook_service: String,

    /// Directory the serving certificate is written to for the webhook server.
    pub certs_dir: PathBuf,

    pub webhook_port: u16,
    pub metrics_port: u16,
    pub leader_election: bool,
}

impl OperatorConfig {
    /// DNS name the webhook certificates are issued for, `<service>.<namespace>.svc`.
    #[must_use]
    pub fn webhook_dns_name(&self) -> String {
        format!("{}.{}.svc", self.webhook_service, self.namespace)
    }
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_OPERATOR_NAMESPACE.to_string(),
            pod_name: String::new(),
            cluster_id: String::new(),
            image: String::new(),
            deployed_via_olm: false,
            webhook_service: WEBHOOK_DEPLOYMENT_NAME.to_string(),
            certs_dir: PathBuf::from("/tmp/webhook/certs"),
            webhook_port: WEBHOOK_PORT,
            metrics_port: METRICS_SERVER_PORT,
            leader_election: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_webhook_dns_name() {
        let config = OperatorConfig::default();
        assert_eq!(config.webhook_dns_name(), "dynatrace-webhook.dynatrace.svc");
    }
}
