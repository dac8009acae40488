// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Custom Resource Definition for the `DynaKube` resource.
//!
//! A `DynaKube` declares the desired observability posture for one tenant: which
//! OneAgent mode runs on the cluster, which ActiveGate capabilities are deployed, and
//! which namespaces receive code-module injection.
//!
//! # OneAgent modes
//!
//! At most one of the following may be set:
//!
//! - `classicFullStack` - host agent with full-stack process injection from the host
//! - `hostMonitoring` - host agent for infrastructure monitoring only
//! - `cloudNativeFullStack` - host agent plus webhook-driven code-module injection
//! - `applicationMonitoring` - webhook-driven code-module injection without a host agent
//!
//! The raw spec is exposed through [`OneAgentMode`], a borrowed sum type returned by
//! [`DynaKube::one_agent_mode`], so callers never branch on several optional fields.
//!
//! # Example
//!
//! ```rust,no_run
//! use dynakube_operator::crd::{DynaKube, DynaKubeSpec, OneAgentSpec, CloudNativeFullStackSpec};
//!
//! let dk = DynaKube::new("dynakube", DynaKubeSpec {
//!     api_url: "https://abc123.live.dynatrace.com/api".to_string(),
//!     one_agent: OneAgentSpec {
//!         cloud_native_full_stack: Some(CloudNativeFullStackSpec::default()),
//!         ..Default::default()
//!     },
//!     ..Default::default()
//! });
//! assert!(dk.needs_app_injection());
//! ```

use crate::constants::ACTIVEGATE_SUFFIX;
use crate::errors::OperatorError;
use k8s_openapi::api::core::v1::{ResourceRequirements, Toleration};
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Label selector to match Kubernetes resources.
///
/// A label selector is a label query over a set of resources. The result of matchLabels and
/// matchExpressions are `ANDed`. An empty label selector matches all objects.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelector {
    /// Map of {key,value} pairs. A single {key,value} in the matchLabels map is equivalent
    /// to an element of matchExpressions, whose key field is "key", the operator is "In",
    /// and the values array contains only "value". All requirements must be satisfied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_labels: Option<BTreeMap<String, String>>,

    /// List of label selector requirements. All requirements must be satisfied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_expressions: Option<Vec<LabelSelectorRequirement>>,
}

impl LabelSelector {
    /// Standard Kubernetes selector semantics: every `matchLabels` pair and every
    /// requirement must hold. An empty selector matches everything. Unknown operators
    /// never match.
    #[must_use]
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        let labels_match = self.match_labels.as_ref().is_none_or(|wanted| {
            wanted
                .iter()
                .all(|(key, value)| labels.get(key) == Some(value))
        });
        labels_match
            && self
                .match_expressions
                .as_ref()
                .is_none_or(|exprs| exprs.iter().all(|req| req.matches(labels)))
    }
}

impl LabelSelectorRequirement {
    #[must_use]
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        let values = self.values.as_deref().unwrap_or_default();
        match self.operator.as_str() {
            "In" => labels.get(&self.key).is_some_and(|v| values.contains(v)),
            "NotIn" => labels.get(&self.key).is_none_or(|v| !values.contains(v)),
            "Exists" => labels.contains_key(&self.key),
            "DoesNotExist" => !labels.contains_key(&self.key),
            _ => false,
        }
    }
}

/// A label selector requirement is a selector that contains values, a key, and an operator
/// that relates the key and values.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct LabelSelectorRequirement {
    /// The label key that the selector applies to.
    pub key: String,

    /// Operator represents a key's relationship to a set of values.
    /// Valid operators are In, `NotIn`, Exists and `DoesNotExist`.
    pub operator: String,

    /// An array of string values. If the operator is In or `NotIn`,
    /// the values array must be non-empty. If the operator is Exists or `DoesNotExist`,
    /// the values array must be empty.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<String>>,
}

/// Condition represents an observation of a resource's current state.
///
/// Conditions are used in status subresources to communicate the state of
/// a resource to users and controllers.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition. Common types include: Ready, Tokens, NamespaceConflict.
    pub r#type: String,

    /// Status of the condition: True, False, or Unknown.
    pub status: String,

    /// Brief CamelCase reason for the condition's last transition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human-readable message indicating details about the transition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Last time the condition transitioned from one status to another (RFC3339 format).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

/// HTTP proxy configuration, either literal or read from a secret.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DynaKubeProxy {
    /// Literal proxy URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    /// Name of a secret in the `DynaKube` namespace whose `proxy` key holds the URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_from: Option<String>,
}

impl DynaKubeProxy {
    /// True when either the literal or the secret reference is set.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.value.as_deref().is_some_and(|v| !v.is_empty())
            || self.value_from.as_deref().is_some_and(|v| !v.is_empty())
    }
}

/// Settings shared by the modes that deploy a host agent.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HostInjectSpec {
    /// Nodes the host agent daemonset is scheduled on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_selector: Option<BTreeMap<String, String>>,

    /// Tolerations for the host agent pods.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerations: Option<Vec<Toleration>>,

    /// Extra installer arguments, e.g. `--set-host-group=prod`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    /// Custom OneAgent image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// Settings shared by the modes that inject code modules into application pods.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AppInjectionSpec {
    /// Resources of the install init-container.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init_resources: Option<ResourceRequirements>,

    /// Custom code modules image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_modules_image: Option<String>,
}

/// Host agent plus webhook-driven code-module injection.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CloudNativeFullStackSpec {
    #[serde(flatten)]
    pub host: HostInjectSpec,

    #[serde(flatten)]
    pub app: AppInjectionSpec,
}

/// Webhook-driven code-module injection without a host agent.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationMonitoringSpec {
    #[serde(flatten)]
    pub app: AppInjectionSpec,

    /// Source the agent binaries from the CSI driver instead of downloading them per pod.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_csi_driver: Option<bool>,
}

/// OneAgent configuration. At most one mode may be set.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OneAgentSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classic_full_stack: Option<HostInjectSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_monitoring: Option<HostInjectSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_native_full_stack: Option<CloudNativeFullStackSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_monitoring: Option<ApplicationMonitoringSpec>,
}

impl OneAgentSpec {
    /// Number of modes that are set. Anything above one is invalid.
    #[must_use]
    pub fn modes_set(&self) -> usize {
        [
            self.classic_full_stack.is_some(),
            self.host_monitoring.is_some(),
            self.cloud_native_full_stack.is_some(),
            self.application_monitoring.is_some(),
        ]
        .iter()
        .filter(|set| **set)
        .count()
    }
}

/// The effective OneAgent mode of a `DynaKube`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum OneAgentMode<'a> {
    ClassicFullStack(&'a HostInjectSpec),
    HostMonitoring(&'a HostInjectSpec),
    CloudNativeFullStack(&'a CloudNativeFullStackSpec),
    ApplicationMonitoring(&'a ApplicationMonitoringSpec),
    None,
}

impl<'a> OneAgentMode<'a> {
    /// Host-agent settings, for the modes that deploy a daemonset.
    #[must_use]
    pub fn host(&self) -> Option<&'a HostInjectSpec> {
        match self {
            Self::ClassicFullStack(host) | Self::HostMonitoring(host) => Some(host),
            Self::CloudNativeFullStack(cn) => Some(&cn.host),
            Self::ApplicationMonitoring(_) | Self::None => None,
        }
    }

    /// App-injection settings, for the modes that use the webhook.
    #[must_use]
    pub fn app(&self) -> Option<&'a AppInjectionSpec> {
        match self {
            Self::CloudNativeFullStack(cn) => Some(&cn.app),
            Self::ApplicationMonitoring(am) => Some(&am.app),
            _ => None,
        }
    }

    /// Deployment type used in `DT_DEPLOYMENT_METADATA` and daemonset labels.
    #[must_use]
    pub fn deployment_type(&self) -> &'static str {
        match self {
            Self::ClassicFullStack(_) => "classic_fullstack",
            Self::HostMonitoring(_) => "host_monitoring",
            Self::CloudNativeFullStack(_) => "cloud_native_fullstack",
            Self::ApplicationMonitoring(_) | Self::None => "application_monitoring",
        }
    }
}

/// ActiveGate capability.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    Routing,
    KubernetesMonitoring,
    MetricsIngest,
    DynatraceApi,
    StatsdIngest,
}

impl Capability {
    /// Short name used in object names and labels.
    #[must_use]
    pub fn short_name(&self) -> &'static str {
        match self {
            Self::Routing => "routing",
            Self::KubernetesMonitoring => "kubemon",
            Self::MetricsIngest => "metrics-ingest",
            Self::DynatraceApi => "dynatrace-api",
            Self::StatsdIngest => "statsd-ingest",
        }
    }

    /// Module names passed to the ActiveGate in `DT_CAPABILITIES`.
    #[must_use]
    pub fn argument_name(&self) -> &'static str {
        match self {
            Self::Routing => "MSGrouter",
            Self::KubernetesMonitoring => "kubernetes_monitoring",
            Self::MetricsIngest => "metrics_ingest",
            Self::DynatraceApi => "restInterface",
            Self::StatsdIngest => "extension_controller,statsd_data_source",
        }
    }
}

/// ActiveGate configuration.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ActiveGateSpec {
    /// Enabled capabilities.
    #[serde(default)]
    pub capabilities: Vec<Capability>,

    /// Secret holding the ActiveGate server certificate (`server.crt`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_secret_name: Option<String>,

    /// Number of ActiveGate replicas.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Custom ActiveGate image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// ActiveGate container resources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
}

/// `DynaKube` declares the observability posture of one tenant on this cluster.
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[kube(
    group = "dynatrace.com",
    version = "v1beta1",
    kind = "DynaKube",
    namespaced,
    shortname = "dk",
    doc = "DynaKube declares how Dynatrace monitors this cluster: the OneAgent mode, ActiveGate capabilities and the namespaces that receive code-module injection.",
    printcolumn = r#"{"name":"ApiUrl","type":"string","jsonPath":".spec.apiUrl"}"#,
    printcolumn = r#"{"name":"Tenant","type":"string","jsonPath":".status.tenantUUID"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#
)]
#[kube(status = "DynaKubeStatus")]
#[serde(rename_all = "camelCase")]
pub struct DynaKubeSpec {
    /// Tenant API URL, e.g. `https://abc123.live.dynatrace.com/api`.
    #[serde(default)]
    pub api_url: String,

    /// Name of the secret holding `apiToken`, `paasToken` and `dataIngestToken`.
    /// Defaults to the `DynaKube` name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<String>,

    /// HTTP proxy used by agents and the operator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<DynaKubeProxy>,

    /// Name of a config map whose `certs` key holds trusted CA certificates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trusted_cas: Option<String>,

    /// Network zone agents connect through.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_zone: Option<String>,

    /// Disable certificate validation towards the tenant.
    #[serde(default)]
    pub skip_cert_check: bool,

    /// Namespaces receiving code-module injection. Unset matches every namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_selector: Option<LabelSelector>,

    /// Regular expressions of namespace names that are never injected.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub namespace_ignore_list: Vec<String>,

    /// OneAgent configuration.
    #[serde(default)]
    pub one_agent: OneAgentSpec,

    /// ActiveGate configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_gate: Option<ActiveGateSpec>,
}

/// Communication endpoint reported by the tenant.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CommunicationHost {
    pub protocol: String,
    pub host: String,
    pub port: u32,
}

/// Host agent instance observed on a node.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OneAgentInstance {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
}

/// OneAgent part of the status.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OneAgentStatus {
    /// Agent version resolved from the tenant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Host agent instances by node name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub instances: BTreeMap<String, OneAgentInstance>,
}

/// `DynaKube` status
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DynaKubeStatus {
    /// UUID of the tenant behind `apiUrl`.
    #[serde(
        default,
        rename = "tenantUUID",
        skip_serializing_if = "Option::is_none"
    )]
    pub tenant_uuid: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub communication_hosts: Vec<CommunicationHost>,

    #[serde(default)]
    pub one_agent: OneAgentStatus,

    #[serde(default)]
    pub conditions: Vec<Condition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// `Running`, `Deploying` or `Error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
}

impl DynaKube {
    /// The effective OneAgent mode. Invalid specs with several modes report `None`;
    /// [`DynaKube::validate`] surfaces that case.
    #[must_use]
    pub fn one_agent_mode(&self) -> OneAgentMode<'_> {
        let oa = &self.spec.one_agent;
        if oa.modes_set() > 1 {
            return OneAgentMode::None;
        }
        if let Some(spec) = &oa.classic_full_stack {
            OneAgentMode::ClassicFullStack(spec)
        } else if let Some(spec) = &oa.host_monitoring {
            OneAgentMode::HostMonitoring(spec)
        } else if let Some(spec) = &oa.cloud_native_full_stack {
            OneAgentMode::CloudNativeFullStack(spec)
        } else if let Some(spec) = &oa.application_monitoring {
            OneAgentMode::ApplicationMonitoring(spec)
        } else {
            OneAgentMode::None
        }
    }

    /// True for the modes that inject code modules through the webhook.
    #[must_use]
    pub fn needs_app_injection(&self) -> bool {
        self.one_agent_mode().app().is_some()
    }

    /// True for the modes that deploy a host agent daemonset.
    #[must_use]
    pub fn needs_host_agent(&self) -> bool {
        self.one_agent_mode().host().is_some()
    }

    #[must_use]
    pub fn cloud_native_full_stack(&self) -> bool {
        matches!(self.one_agent_mode(), OneAgentMode::CloudNativeFullStack(_))
    }

    /// Agent binaries come from the CSI driver.
    #[must_use]
    pub fn needs_csi_driver(&self) -> bool {
        match self.one_agent_mode() {
            OneAgentMode::CloudNativeFullStack(_) => true,
            OneAgentMode::ApplicationMonitoring(am) => am.use_csi_driver.unwrap_or(false),
            _ => false,
        }
    }

    /// Host group from `--set-host-group=<value>`. Only cloud-native mode propagates it.
    #[must_use]
    pub fn host_group(&self) -> Option<String> {
        let OneAgentMode::CloudNativeFullStack(cn) = self.one_agent_mode() else {
            return None;
        };
        cn.host.args.iter().find_map(|arg| {
            let parts: Vec<&str> = arg.split('=').collect();
            match parts.as_slice() {
                ["--set-host-group", value] if !value.is_empty() => Some((*value).to_string()),
                _ => None,
            }
        })
    }

    #[must_use]
    pub fn init_resources(&self) -> Option<ResourceRequirements> {
        self.one_agent_mode()
            .app()
            .and_then(|app| app.init_resources.clone())
    }

    /// Node selector of the host agent, if this `DynaKube` deploys one.
    #[must_use]
    pub fn node_selector(&self) -> Option<BTreeMap<String, String>> {
        self.one_agent_mode()
            .host()
            .map(|host| host.node_selector.clone().unwrap_or_default())
    }

    #[must_use]
    pub fn has_capability(&self, capability: Capability) -> bool {
        self.spec
            .active_gate
            .as_ref()
            .is_some_and(|ag| ag.capabilities.contains(&capability))
    }

    #[must_use]
    pub fn has_activegate(&self) -> bool {
        self.spec
            .active_gate
            .as_ref()
            .is_some_and(|ag| !ag.capabilities.is_empty())
    }

    /// Name of the ActiveGate service, `<dynakube>-activegate`.
    #[must_use]
    pub fn activegate_service_name(&self) -> String {
        format!("{}-{ACTIVEGATE_SUFFIX}", self.name_any())
    }

    #[must_use]
    pub fn activegate_tls_secret(&self) -> Option<&str> {
        self.spec
            .active_gate
            .as_ref()
            .and_then(|ag| ag.tls_secret_name.as_deref())
            .filter(|name| !name.is_empty())
    }

    /// Name of the token secret, defaulting to the `DynaKube` name.
    #[must_use]
    pub fn tokens_secret_name(&self) -> String {
        self.spec
            .tokens
            .clone()
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| self.name_any())
    }

    #[must_use]
    pub fn proxy(&self) -> Option<&DynaKubeProxy> {
        self.spec.proxy.as_ref().filter(|p| p.is_set())
    }

    #[must_use]
    pub fn network_zone(&self) -> Option<&str> {
        self.spec.network_zone.as_deref().filter(|z| !z.is_empty())
    }

    #[must_use]
    pub fn trusted_cas(&self) -> Option<&str> {
        self.spec.trusted_cas.as_deref().filter(|c| !c.is_empty())
    }

    #[must_use]
    pub fn tenant_uuid(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.tenant_uuid.as_deref())
            .filter(|t| !t.is_empty())
    }

    /// Host agent instances from the status.
    #[must_use]
    pub fn oneagent_instances(&self) -> BTreeMap<String, OneAgentInstance> {
        self.status
            .as_ref()
            .map(|s| s.one_agent.instances.clone())
            .unwrap_or_default()
    }

    /// Check the invariants a `DynaKube` must satisfy before it is reconciled.
    ///
    /// # Errors
    ///
    /// Returns [`OperatorError::Validation`] when more than one OneAgent mode is set,
    /// when `apiUrl` is empty and no ActiveGate is configured, when `apiUrl` is not a
    /// tenant API URL, or when an ignore-list entry is not a valid regular expression.
    pub fn validate(&self) -> Result<(), OperatorError> {
        let name = self.name_any();
        let invalid = |reason: String| OperatorError::Validation {
            name: name.clone(),
            reason,
        };

        if self.spec.one_agent.modes_set() > 1 {
            return Err(invalid(
                "more than one OneAgent mode is set, only one of classicFullStack, hostMonitoring, cloudNativeFullStack, applicationMonitoring is allowed".to_string(),
            ));
        }

        let api_url = self.spec.api_url.trim();
        if api_url.is_empty() {
            if !self.has_activegate() {
                return Err(invalid(
                    "apiUrl is empty and no ActiveGate capability is configured".to_string(),
                ));
            }
        } else {
            let parsed = url::Url::parse(api_url)
                .map_err(|e| invalid(format!("apiUrl '{api_url}' is not a valid URL: {e}")))?;
            if !api_url.trim_end_matches('/').ends_with("/api") {
                return Err(invalid(format!("apiUrl '{api_url}' must end with /api")));
            }
            if parsed.host_str().is_none_or(str::is_empty) {
                return Err(invalid(format!("apiUrl '{api_url}' has no host")));
            }
        }

        for pattern in &self.spec.namespace_ignore_list {
            regex::Regex::new(pattern).map_err(|e| {
                invalid(format!(
                    "namespaceIgnoreList entry '{pattern}' is not a valid regex: {e}"
                ))
            })?;
        }

        Ok(())
    }
}

#[cfg(test)]
#[path = "crd_tests.rs"]
mod crd_tests;
