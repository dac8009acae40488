// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! In-pod `init` command run by the install container.
//!
//! Reads what the webhook put into the install container environment, loads the init
//! config mounted from the namespace secret and writes the files the injected
//! containers pick up from the shared volumes:
//!
//! - `ld.so.preload` and one `container_<name>.conf` per container
//! - `custom.pem` when trusted CAs are configured
//! - `curl_options.conf` when an initial connect retry is set
//! - `dt_metadata.json` / `dt_metadata.properties` for metadata enrichment
//!
//! Agent binaries are provided by the CSI driver or an external installer.

use crate::constants::{
    CONFIG_DIR_MOUNT, CONTAINER_CONF_SUBPATH_PREFIX, CUSTOM_CERT_SUBPATH, DEFAULT_FLAVOR, ENRICHMENT_PATH, ENV_CONTAINERS_COUNT,
    ENV_DATA_INGEST_INJECTED, ENV_FAILURE_POLICY, ENV_INSTALLER_FLAVOR, ENV_INSTALLER_TECH,
    ENV_INSTALLER_URL, ENV_INSTALL_PATH, ENV_INSTALL_VERSION, ENV_K8S_BASE_POD_NAME,
    ENV_K8S_CLUSTER_ID, ENV_K8S_NAMESPACE, ENV_K8S_NODE_NAME, ENV_K8S_POD_NAME, ENV_K8S_POD_UID,
    ENV_MODE, ENV_ONEAGENT_INJECTED, ENV_READONLY_CSI, ENV_WORKLOAD_KIND, ENV_WORKLOAD_NAME,
    INITIAL_CONNECT_RETRY_UNSET, LD_PRELOAD_SUBPATH, NODE_NOT_MAPPED, PRELOAD_LIBRARY_PATH,
    SECRET_CONFIG_KEY, SHARE_DIR_MOUNT,
};
use crate::initgeneration::SecretConfig;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Workload value the webhook uses when the owner could not be named.
const UNKNOWN_WORKLOAD: &str = "UNKNOWN";

/// Errors of the in-pod init.
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("{0} environment variable is missing")]
    MissingEnv(String),

    #[error("{name} has an invalid value: {reason}")]
    InvalidEnv { name: String, reason: String },

    #[error("failed to read init config {path}: {reason}")]
    Config { path: String, reason: String },

    /// The node runs no host agent with a known tenant yet.
    #[error("node {0} is not in the tenant node map")]
    UnknownNode(String),

    #[error("failed to write {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// What the init does when it fails.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Log and let the pod start uninjected
    Silent,
    /// Fail the init container
    Fail,
}

impl FailurePolicy {
    fn parse(value: &str) -> Self {
        match value {
            "fail" | "force" => Self::Fail,
            _ => Self::Silent,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContainerInfo {
    pub name: String,
    pub image: String,
}

/// Parsed install container environment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InitEnv {
    pub failure_policy: FailurePolicy,
    pub oneagent_injected: bool,
    pub data_ingest_injected: bool,
    pub readonly_csi: bool,

    pub mode: String,
    pub installer_flavor: String,
    pub installer_tech: Vec<String>,
    pub installer_url: String,
    pub install_version: String,
    pub install_path: String,
    pub containers: Vec<ContainerInfo>,

    pub pod_name: String,
    pub pod_uid: String,
    pub base_pod_name: String,
    pub namespace: String,
    pub node_name: String,
    pub cluster_id: String,

    pub workload_kind: String,
    pub workload_name: String,
}

struct Vars<'a>(&'a BTreeMap<String, String>);

impl Vars<'_> {
    fn optional(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str).filter(|v| !v.is_empty())
    }

    fn required(&self, name: &str) -> Result<&str, InitError> {
        self.optional(name)
            .ok_or_else(|| InitError::MissingEnv(name.to_string()))
    }

    fn flag(&self, name: &str) -> bool {
        self.optional(name) == Some("true")
    }

    fn workload(&self, name: &str) -> Result<String, InitError> {
        let value = self.required(name)?;
        Ok(if value == UNKNOWN_WORKLOAD { String::new() } else { value.to_string() })
    }
}

impl InitEnv {
    /// Read the environment of the current process.
    ///
    /// # Errors
    ///
    /// See [`InitEnv::from_vars`].
    pub fn from_env() -> Result<Self, InitError> {
        let vars: BTreeMap<String, String> = std::env::vars().collect();
        Self::from_vars(&vars)
    }

    /// Parse the environment. Fields a mutator did not inject for are left empty.
    ///
    /// # Errors
    ///
    /// Returns [`InitError::MissingEnv`] for the first missing variable the injected
    /// features need, or [`InitError::InvalidEnv`] for a malformed container count.
    pub fn from_vars(vars: &BTreeMap<String, String>) -> Result<Self, InitError> {
        let v = Vars(vars);
        let oneagent_injected = v.flag(ENV_ONEAGENT_INJECTED);
        let data_ingest_injected = v.flag(ENV_DATA_INGEST_INJECTED);

        let mut env = Self {
            failure_policy: FailurePolicy::parse(v.required(ENV_FAILURE_POLICY)?),
            oneagent_injected,
            data_ingest_injected,
            readonly_csi: v.flag(ENV_READONLY_CSI),
            mode: String::new(),
            installer_flavor: v.optional(ENV_INSTALLER_FLAVOR).unwrap_or(DEFAULT_FLAVOR).to_string(),
            installer_tech: Vec::new(),
            installer_url: v.optional(ENV_INSTALLER_URL).unwrap_or_default().to_string(),
            install_version: v.optional(ENV_INSTALL_VERSION).unwrap_or_default().to_string(),
            install_path: String::new(),
            containers: Vec::new(),
            pod_name: String::new(),
            pod_uid: String::new(),
            base_pod_name: String::new(),
            namespace: String::new(),
            node_name: String::new(),
            cluster_id: String::new(),
            workload_kind: String::new(),
            workload_name: String::new(),
        };

        if oneagent_injected || data_ingest_injected {
            env.pod_name = v.required(ENV_K8S_POD_NAME)?.to_string();
            env.pod_uid = v.required(ENV_K8S_POD_UID)?.to_string();
            env.namespace = v.required(ENV_K8S_NAMESPACE)?.to_string();
        }

        if oneagent_injected {
            env.mode = v.required(ENV_MODE)?.to_string();
            env.installer_tech = v
                .required(ENV_INSTALLER_TECH)?
                .split(',')
                .map(str::to_string)
                .collect();
            env.install_path = v.required(ENV_INSTALL_PATH)?.to_string();
            env.node_name = v.required(ENV_K8S_NODE_NAME)?.to_string();
            env.base_pod_name = v.required(ENV_K8S_BASE_POD_NAME)?.to_string();
            env.containers = containers(&v)?;
        }

        if data_ingest_injected {
            env.workload_kind = v.workload(ENV_WORKLOAD_KIND)?;
            env.workload_name = v.workload(ENV_WORKLOAD_NAME)?;
            env.cluster_id = v.required(ENV_K8S_CLUSTER_ID)?.to_string();
        }

        Ok(env)
    }
}

fn containers(v: &Vars<'_>) -> Result<Vec<ContainerInfo>, InitError> {
    let raw = v.required(ENV_CONTAINERS_COUNT)?;
    let count: usize = raw.parse().map_err(|e: std::num::ParseIntError| InitError::InvalidEnv {
        name: ENV_CONTAINERS_COUNT.to_string(),
        reason: e.to_string(),
    })?;

    (1..=count)
        .map(|i| {
            Ok(ContainerInfo {
                name: v.required(&format!("CONTAINER_{i}_NAME"))?.to_string(),
                image: v.required(&format!("CONTAINER_{i}_IMAGE"))?.to_string(),
            })
        })
        .collect()
}

/// Where the init reads and writes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InitPaths {
    pub config_dir: PathBuf,
    pub share_dir: PathBuf,
    pub enrichment_dir: PathBuf,
}

impl Default for InitPaths {
    fn default() -> Self {
        Self {
            config_dir: PathBuf::from(CONFIG_DIR_MOUNT),
            share_dir: PathBuf::from(SHARE_DIR_MOUNT),
            enrichment_dir: PathBuf::from(ENRICHMENT_PATH),
        }
    }
}

/// Load the init config from the mounted secret.
///
/// # Errors
///
/// Returns [`InitError::Config`] when the file is missing or not valid JSON.
pub fn read_config(config_dir: &Path) -> Result<SecretConfig, InitError> {
    let path = config_dir.join(SECRET_CONFIG_KEY);
    let config_error = |reason: String| InitError::Config {
        path: path.display().to_string(),
        reason,
    };
    let raw = std::fs::read(&path).map_err(|e| config_error(e.to_string()))?;
    serde_json::from_slice(&raw).map_err(|e| config_error(e.to_string()))
}

/// Tenant of the host agent on `node`, or `-` when the `DynaKube` runs no host agent.
///
/// # Errors
///
/// Returns [`InitError::UnknownNode`] when a host agent is expected but the node is not
/// mapped yet.
pub fn host_tenant(config: &SecretConfig, node: &str) -> Result<String, InitError> {
    if !config.has_host {
        return Ok(NODE_NOT_MAPPED.to_string());
    }
    config
        .monitoring_nodes
        .get(node)
        .cloned()
        .ok_or_else(|| InitError::UnknownNode(node.to_string()))
}

/// Contents of `container_<name>.conf`.
#[must_use]
pub fn container_conf(env: &InitEnv, container: &ContainerInfo, config: &SecretConfig, host_tenant: &str) -> String {
    let mut conf = format!(
        "[container]\n\
         containerName {name}\n\
         imageName {image}\n\
         k8s_fullpodname {pod}\n\
         k8s_poduid {uid}\n\
         k8s_containername {name}\n\
         k8s_basepodname {base}\n\
         k8s_namespace {ns}\n",
        name = container.name,
        image = container.image,
        pod = env.pod_name,
        uid = env.pod_uid,
        base = env.base_pod_name,
        ns = env.namespace,
    );
    if !config.cluster_id.is_empty() {
        conf.push_str(&format!("k8s_cluster_id {}\n", config.cluster_id));
    }
    if !config.host_group.is_empty() {
        conf.push_str(&format!("hostGroup {}\n", config.host_group));
    }
    if host_tenant != NODE_NOT_MAPPED {
        conf.push_str(&format!("[host]\ntenant {host_tenant}\nisCloudNativeFullStack true\n"));
    }
    conf
}

/// Enrichment attributes written for metadata enrichment.
#[must_use]
pub fn enrichment_attributes(env: &InitEnv) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("k8s.cluster.uid".to_string(), env.cluster_id.clone()),
        ("k8s.namespace.name".to_string(), env.namespace.clone()),
        ("k8s.pod.name".to_string(), env.pod_name.clone()),
        ("k8s.pod.uid".to_string(), env.pod_uid.clone()),
        ("k8s.workload.kind".to_string(), env.workload_kind.to_lowercase()),
        ("k8s.workload.name".to_string(), env.workload_name.clone()),
        ("dt.kubernetes.cluster.id".to_string(), env.cluster_id.clone()),
        ("dt.kubernetes.workload.kind".to_string(), env.workload_kind.to_lowercase()),
        ("dt.kubernetes.workload.name".to_string(), env.workload_name.clone()),
    ])
}

fn write(path: &Path, contents: &[u8]) -> Result<(), InitError> {
    let io_error = |source| InitError::Io {
        path: path.display().to_string(),
        source,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_error)?;
    }
    std::fs::write(path, contents).map_err(io_error)
}

/// Files written by one run, relative to their directory.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InitSummary {
    pub written: Vec<PathBuf>,
}

/// Write the in-pod configuration.
///
/// # Errors
///
/// Returns an error when the config cannot be read, the node has no known tenant, or
/// a file cannot be written.
pub fn configure(env: &InitEnv, paths: &InitPaths) -> Result<InitSummary, InitError> {
    let mut summary = InitSummary::default();
    if !env.oneagent_injected && !env.data_ingest_injected {
        return Ok(summary);
    }
    let config = read_config(&paths.config_dir)?;

    if env.oneagent_injected {
        let tenant = host_tenant(&config, &env.node_name)?;

        let preload = format!("{}/{PRELOAD_LIBRARY_PATH}", env.install_path.trim_end_matches('/'));
        let path = paths.share_dir.join(LD_PRELOAD_SUBPATH);
        write(&path, preload.as_bytes())?;
        summary.written.push(path);

        for container in &env.containers {
            let path = paths
                .share_dir
                .join(format!("{CONTAINER_CONF_SUBPATH_PREFIX}{}.conf", container.name));
            write(&path, container_conf(env, container, &config, &tenant).as_bytes())?;
            summary.written.push(path);
        }

        if !config.trusted_cas.is_empty() {
            let path = paths.share_dir.join(CUSTOM_CERT_SUBPATH);
            write(&path, config.trusted_cas.as_bytes())?;
            summary.written.push(path);
        }

        if config.initial_connect_retry != INITIAL_CONNECT_RETRY_UNSET {
            let path = paths.share_dir.join("curl_options.conf");
            let contents = format!("initialConnectRetryMs {}\n", config.initial_connect_retry);
            write(&path, contents.as_bytes())?;
            summary.written.push(path);
        }
    }

    if env.data_ingest_injected {
        let attributes = enrichment_attributes(env);

        let json = serde_json::to_vec_pretty(&attributes).map_err(|e| InitError::Config {
            path: "dt_metadata.json".to_string(),
            reason: e.to_string(),
        })?;
        let path = paths.enrichment_dir.join("dt_metadata.json");
        write(&path, &json)?;
        summary.written.push(path);

        let properties: String = attributes
            .iter()
            .map(|(k, v)| format!("{k}={v}\n"))
            .collect();
        let path = paths.enrichment_dir.join("dt_metadata.properties");
        write(&path, properties.as_bytes())?;
        summary.written.push(path);
    }

    Ok(summary)
}

/// Run the init command and return the process exit code.
///
/// Failures exit with 0 under the `silent` failure policy so the pod still starts.
#[must_use]
pub fn run(paths: &InitPaths) -> i32 {
    let env = match InitEnv::from_env() {
        Ok(env) => env,
        Err(e) => {
            // Without a readable policy the safe default applies.
            let silent = std::env::var(ENV_FAILURE_POLICY).map_or(true, |p| FailurePolicy::parse(&p) == FailurePolicy::Silent);
            error!(error = %e, "Failed to read the install environment");
            return if silent { 0 } else { 1 };
        }
    };

    match configure(&env, paths) {
        Ok(summary) => {
            for path in &summary.written {
                println!("wrote {}", path.display());
            }
            info!(files = summary.written.len(), "In-pod configuration written");
            0
        }
        Err(e) if env.failure_policy == FailurePolicy::Silent => {
            warn!(error = %e, "In-pod configuration failed, continuing without injection");
            0
        }
        Err(e) => {
            error!(error = %e, "In-pod configuration failed");
            1
        }
    }
}

#[cfg(test)]
#[path = "standalone_tests.rs"]
mod standalone_tests;
