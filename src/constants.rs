// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Global constants for the DynaKube operator.
//!
//! This module contains all numeric and string constants used throughout the codebase.
//! Constants are organized by category for easy maintenance. Label and annotation keys
//! live in [`crate::labels`].

// ============================================================================
// API Constants
// ============================================================================

/// API group for the `DynaKube` CRD
pub const API_GROUP: &str = "dynatrace.com";

/// API version for the `DynaKube` CRD
pub const API_VERSION: &str = "v1beta1";

/// Fully qualified API version (group/version)
pub const API_GROUP_VERSION: &str = "dynatrace.com/v1beta1";

/// Kind name for `DynaKube` resource
pub const KIND_DYNAKUBE: &str = "DynaKube";

/// Name of the `DynaKube` CRD object (carries the conversion webhook)
pub const DYNAKUBE_CRD_NAME: &str = "dynakubes.dynatrace.com";

/// Field manager used for server-side apply
pub const FIELD_MANAGER: &str = "dynatrace-operator";

/// Operator version reported in deployment metadata
pub const OPERATOR_VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// Operator Defaults
// ============================================================================

/// Default namespace the operator runs in
pub const DEFAULT_OPERATOR_NAMESPACE: &str = "dynatrace";

/// Namespace holding the cluster identity (its UID is the cluster ID)
pub const KUBE_SYSTEM_NAMESPACE: &str = "kube-system";

/// Name of the webhook `Deployment`, `Service` and webhook configurations
pub const WEBHOOK_DEPLOYMENT_NAME: &str = "dynatrace-webhook";

/// Name of the leader election lease
pub const LEADER_LEASE_NAME: &str = "dynatrace-operator-lock";

// ============================================================================
// Namespace-scoped Secrets
// ============================================================================

/// Init-config secret written into every mapped namespace
pub const SECRET_CONFIG_NAME: &str = "dynatrace-dynakube-config";

/// Data-ingest endpoint secret written into every mapped namespace
pub const SECRET_ENDPOINT_NAME: &str = "dynatrace-data-ingest-endpoint";

/// Key of the structured config blob in the init-config secret
pub const SECRET_CONFIG_KEY: &str = "config";

/// Key of the proxy literal in the init-config secret
pub const SECRET_PROXY_KEY: &str = "proxy";

/// Key of the trusted CA bundle in the init-config secret
pub const SECRET_TRUSTED_CA_KEY: &str = "ca.pem";

/// Key of the ActiveGate TLS certificate in the init-config secret
pub const SECRET_ACTIVEGATE_CERT_KEY: &str = "activegate.pem";

/// Key of the properties file in the endpoint secret
pub const SECRET_ENDPOINT_PROPERTIES_KEY: &str = "endpoint.properties";

/// Key of the data-ingest token in the endpoint secret (sourced by `DT_API_TOKEN`)
pub const SECRET_ENDPOINT_TOKEN_KEY: &str = "dataIngestToken";

// ============================================================================
// Token Secret
// ============================================================================

/// API token key in the user-owned token secret
pub const TOKEN_API: &str = "apiToken";

/// PaaS token key in the user-owned token secret
pub const TOKEN_PAAS: &str = "paasToken";

/// Data-ingest token key in the user-owned token secret
pub const TOKEN_DATA_INGEST: &str = "dataIngestToken";

/// Key of the certificates in the trusted CA config map
pub const TRUSTED_CA_CONFIGMAP_KEY: &str = "certs";

/// Key of the proxy in a proxy secret referenced by `proxy.valueFrom`
pub const PROXY_SECRET_KEY: &str = "proxy";

/// Key of the ActiveGate server certificate in its TLS secret
pub const ACTIVEGATE_TLS_CERT_KEY: &str = "server.crt";

// ============================================================================
// Webhook Certificates
// ============================================================================

/// Secret holding the webhook CA and serving certificate
pub const SECRET_CERTS_NAME: &str = "dynatrace-webhook-certs";

/// Field holding the CA private key
pub const CERT_CA_KEY: &str = "ca.key";

/// Field holding the current CA certificate
pub const CERT_CA_CERT: &str = "ca.crt";

/// Field holding the previous CA certificate during rotation
pub const CERT_CA_CERT_OLD: &str = "ca.crt.old";

/// Field holding the serving private key
pub const CERT_TLS_KEY: &str = "tls.key";

/// Field holding the serving certificate
pub const CERT_TLS_CERT: &str = "tls.crt";

/// Certificates are renewed when they expire within this many hours
pub const CERT_RENEWAL_THRESHOLD_HOURS: i64 = 12;

/// CA validity (1 year)
pub const CA_VALIDITY_DAYS: i64 = 365;

/// Serving certificate validity (7 days)
pub const SERVER_CERT_VALIDITY_DAYS: i64 = 7;

/// Requeue interval once certificates are valid and propagated (3 hours)
pub const CERT_SUCCESS_REQUEUE_SECS: u64 = 3 * 60 * 60;

/// Requeue after certificates or bundles were written, to confirm they settled
pub const CERT_PROPAGATION_REQUEUE_SECS: u64 = 5;

/// Interval at which the webhook server reloads its TLS material (10 minutes)
pub const CERT_RELOAD_INTERVAL_SECS: u64 = 600;

// ============================================================================
// Injection: Volumes and Paths
// ============================================================================

/// Name of the install init-container
pub const INSTALL_CONTAINER_NAME: &str = "install-oneagent";

/// Volume holding the agent binaries (CSI or empty-dir)
pub const ONEAGENT_BIN_VOLUME: &str = "oneagent-bin";

/// Volume shared between the install container and user containers
pub const ONEAGENT_SHARE_VOLUME: &str = "oneagent-share";

/// Volume backed by the init-config secret
pub const INJECTION_CONFIG_VOLUME: &str = "injection-config";

/// Empty-dir volume for enrichment files
pub const DATA_INGEST_VOLUME: &str = "data-ingest-enrichment";

/// Volume backed by the endpoint secret
pub const DATA_INGEST_ENDPOINT_VOLUME: &str = "data-ingest-endpoint";

/// Volume carrying the ActiveGate certificate for OTLP exporters
pub const OTLP_CERT_VOLUME: &str = "activegate-server-certs";

/// Mount path of the init-config in the install container
pub const CONFIG_DIR_MOUNT: &str = "/mnt/config";

/// Mount path of the agent binaries in the install container
pub const BIN_DIR_MOUNT: &str = "/mnt/bin";

/// Mount path of the shared volume in the install container
pub const SHARE_DIR_MOUNT: &str = "/mnt/share";

/// Default agent install path inside user containers
pub const DEFAULT_INSTALL_PATH: &str = "/opt/dynatrace/oneagent-paas";

/// Relative path of the preload library under the install path
pub const PRELOAD_LIBRARY_PATH: &str = "agent/lib64/liboneagentproc.so";

/// Preload file mounted into user containers
pub const LD_PRELOAD_MOUNT: &str = "/etc/ld.so.preload";

/// Sub path of the preload file on the shared volume
pub const LD_PRELOAD_SUBPATH: &str = "ld.so.preload";

/// Container configuration file path inside user containers
pub const CONTAINER_CONF_MOUNT: &str = "/var/lib/dynatrace/oneagent/agent/config/container.conf";

/// Custom certificate path inside user containers
pub const CUSTOM_CERT_MOUNT: &str = "/var/lib/dynatrace/oneagent/agent/customkeys/custom.pem";

/// Sub path of the custom certificate on the shared volume
pub const CUSTOM_CERT_SUBPATH: &str = "custom.pem";

/// Enrichment directory inside user containers
pub const ENRICHMENT_PATH: &str = "/var/lib/dynatrace/enrichment";

/// Endpoint secret mount inside user containers
pub const ENRICHMENT_ENDPOINT_PATH: &str = "/var/lib/dynatrace/enrichment/endpoint";

/// Directory holding the OTLP exporter certificate
pub const OTLP_CERT_DIR: &str = "/var/lib/dynatrace/otlp/certs";

/// OTLP exporter certificate path inside user containers
pub const OTLP_CERT_PATH: &str = "/var/lib/dynatrace/otlp/certs/activegate.pem";

/// CSI driver backing the agent binaries volume
pub const CSI_DRIVER_NAME: &str = "csi.oneagent.dynatrace.com";

/// Install mode when binaries come from the CSI driver
pub const INSTALL_MODE_PROVISIONED: &str = "provisioned";

/// Install mode when the init container downloads binaries itself
pub const INSTALL_MODE_INSTALLER: &str = "installer";

/// Default code module flavor
pub const DEFAULT_FLAVOR: &str = "multidistro";

/// Default code module technologies
pub const DEFAULT_TECHNOLOGIES: &str = "all";

/// Default failure policy of the install container
pub const DEFAULT_FAILURE_POLICY: &str = "silent";

/// Default user and group of the install container
pub const DEFAULT_INSTALL_USER: i64 = 1000;

/// User and group of the install container in read-only CSI mode
pub const READ_ONLY_CSI_USER: i64 = 420;

// ============================================================================
// Injection: Install Container Environment
// ============================================================================

/// Number of user containers the install container prepares
pub const ENV_CONTAINERS_COUNT: &str = "CONTAINERS_COUNT";

/// `silent` or `fail`; decides the exit code of the in-pod init on error
pub const ENV_FAILURE_POLICY: &str = "FAILURE_POLICY";

pub const ENV_K8S_POD_NAME: &str = "K8S_PODNAME";
pub const ENV_K8S_POD_UID: &str = "K8S_PODUID";
pub const ENV_K8S_BASE_POD_NAME: &str = "K8S_BASEPODNAME";
pub const ENV_K8S_NAMESPACE: &str = "K8S_NAMESPACE";
pub const ENV_K8S_NODE_NAME: &str = "K8S_NODE_NAME";
pub const ENV_K8S_CLUSTER_ID: &str = "K8S_CLUSTER_ID";

pub const ENV_INSTALLER_FLAVOR: &str = "INSTALLER_FLAVOR";
pub const ENV_INSTALLER_TECH: &str = "INSTALLER_TECH";
pub const ENV_INSTALL_PATH: &str = "INSTALL_PATH";
pub const ENV_INSTALLER_URL: &str = "INSTALLER_URL";
pub const ENV_INSTALL_VERSION: &str = "INSTALL_VERSION";

/// `provisioned` (CSI) or `installer`
pub const ENV_MODE: &str = "MODE";

pub const ENV_ONEAGENT_INJECTED: &str = "ONEAGENT_INJECTED";
pub const ENV_DATA_INGEST_INJECTED: &str = "DATA_INGEST_INJECTED";
pub const ENV_WORKLOAD_KIND: &str = "DT_WORKLOAD_KIND";
pub const ENV_WORKLOAD_NAME: &str = "DT_WORKLOAD_NAME";
pub const ENV_HOST_GROUP: &str = "HOST_GROUP";
pub const ENV_READONLY_CSI: &str = "ONEAGENT_READONLY_CSI";

// ============================================================================
// Injection: User Container Environment
// ============================================================================

pub const ENV_LD_PRELOAD: &str = "LD_PRELOAD";
pub const ENV_DEPLOYMENT_METADATA: &str = "DT_DEPLOYMENT_METADATA";
pub const ENV_NETWORK_ZONE: &str = "DT_NETWORK_ZONE";
pub const ENV_PROXY: &str = "DT_PROXY";

/// Data-ingest token sourced from the endpoint secret, referenced by OTLP headers
pub const ENV_API_TOKEN: &str = "DT_API_TOKEN";

/// Sub path template of the per-container config file on the shared volume
pub const CONTAINER_CONF_SUBPATH_PREFIX: &str = "container_";

// ============================================================================
// Injection: Init Config
// ============================================================================

/// Node map value for nodes without a host agent
pub const NODE_NOT_MAPPED: &str = "-";

/// Unset value for the initial connect retry
pub const INITIAL_CONNECT_RETRY_UNSET: i64 = -1;

// ============================================================================
// ActiveGate
// ============================================================================

/// Suffix of the ActiveGate service and statefulset names
pub const ACTIVEGATE_SUFFIX: &str = "activegate";

/// HTTPS port exposed by the ActiveGate service
pub const ACTIVEGATE_HTTPS_PORT: i32 = 443;

/// HTTPS container port of the ActiveGate
pub const ACTIVEGATE_CONTAINER_PORT: i32 = 9999;

/// StatsD UDP port exposed by the ActiveGate service
pub const ACTIVEGATE_STATSD_PORT: i32 = 18125;

/// Default ActiveGate image path on the tenant registry
pub const ACTIVEGATE_IMAGE_PATH: &str = "linux/activegate:latest";

/// Suffix of the OneAgent daemonset name
pub const ONEAGENT_SUFFIX: &str = "oneagent";

/// Default OneAgent image path on the tenant registry
pub const ONEAGENT_IMAGE_PATH: &str = "linux/oneagent:latest";

// ============================================================================
// Controller Error Handling Constants
// ============================================================================

/// Requeue duration for controller errors (30 seconds)
pub const ERROR_REQUEUE_DURATION_SECS: u64 = 30;

/// Requeue duration when a resource is ready (5 minutes)
pub const READY_REQUEUE_DURATION_SECS: u64 = 300;

/// Requeue duration when a resource is not ready yet (30 seconds)
pub const NOT_READY_REQUEUE_DURATION_SECS: u64 = 30;

/// Timeout for a single admission request (the API server's default is 10s)
pub const WEBHOOK_REQUEST_TIMEOUT_SECS: u64 = 8;

// ============================================================================
// Leader Election Constants
// ============================================================================

/// Default leader election lease duration (15 seconds)
pub const DEFAULT_LEASE_DURATION_SECS: u64 = 15;

/// Default leader election grace period (5 seconds)
pub const DEFAULT_LEASE_GRACE_SECS: u64 = 5;

// ============================================================================
// Runtime Constants
// ============================================================================

/// Number of worker threads for Tokio runtime
pub const TOKIO_WORKER_THREADS: usize = 4;

/// Default webhook HTTPS port
pub const WEBHOOK_PORT: u16 = 8443;

// ============================================================================
// Metrics Server Constants
// ============================================================================

/// Port for Prometheus metrics HTTP server
pub const METRICS_SERVER_PORT: u16 = 8080;

/// Path for Prometheus metrics endpoint
pub const METRICS_SERVER_PATH: &str = "/metrics";

/// Bind address for metrics and webhook HTTP servers
pub const SERVER_BIND_ADDRESS: &str = "0.0.0.0";
