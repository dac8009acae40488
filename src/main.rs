// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

use anyhow::{anyhow, Result};
use axum::{http::StatusCode, routing::get, Router};
use clap::{ArgAction, Args, Parser, Subcommand};
use dynakube_operator::{
    certificates::{reconcile_certificates, CertificateContext},
    config::OperatorConfig,
    constants::{
        DEFAULT_LEASE_DURATION_SECS, DEFAULT_LEASE_GRACE_SECS, DEFAULT_OPERATOR_NAMESPACE,
        ERROR_REQUEUE_DURATION_SECS, KUBE_SYSTEM_NAMESPACE, LEADER_LEASE_NAME,
        METRICS_SERVER_PATH, METRICS_SERVER_PORT, SERVER_BIND_ADDRESS, TOKIO_WORKER_THREADS,
        WEBHOOK_DEPLOYMENT_NAME, WEBHOOK_PORT,
    },
    context::{Context, Stores},
    crd::DynaKube,
    errors::OperatorError,
    mapper::instance_label,
    metrics,
    reconcilers::{dynakube, namespace, reconcile_dynakube, reconcile_namespace},
    standalone::{self, InitPaths},
    webhook::{client::KubeWebhookClient, run_webhook_server},
};
use futures::StreamExt;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{Namespace, Node};
use kube::{
    runtime::{
        controller::{Action, Config as ControllerConfig},
        reflector::ObjectRef,
        watcher::Config,
        Controller,
    },
    Api, Client, Resource, ResourceExt,
};
use kube_lease_manager::LeaseManagerBuilder;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Notify};
use tracing::{debug, error, info, warn};

#[derive(Debug, thiserror::Error)]
#[error(transparent)]
struct ReconcileError(#[from] anyhow::Error);

/// Dynatrace operator for Kubernetes.
#[derive(Debug, Parser)]
#[command(name = "dynakube-operator", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the reconcilers and the admission webhook.
    Operator(OperatorArgs),
    /// Configure code-module injection inside a pod; runs as the install init-container.
    Init,
}

#[derive(Debug, Args)]
struct OperatorArgs {
    /// Namespace of the operator and its DynaKubes
    #[arg(long, env = "POD_NAMESPACE", default_value = DEFAULT_OPERATOR_NAMESPACE)]
    namespace: String,

    /// Name of this pod, the leader-election identity
    #[arg(long, env = "POD_NAME", default_value = "")]
    pod_name: String,

    #[arg(long, default_value_t = WEBHOOK_PORT)]
    webhook_port: u16,

    #[arg(long, default_value_t = METRICS_SERVER_PORT)]
    metrics_port: u16,

    /// Directory the webhook serving certificate is written to
    #[arg(long, default_value = "/tmp/webhook/certs")]
    certs_dir: PathBuf,

    /// Operator image, reused for the install init-container
    #[arg(long, env = "RELATED_IMAGE_DYNATRACE_OPERATOR", default_value = "")]
    image: String,

    #[arg(long, env = "DEPLOYED_VIA_OLM", action = ArgAction::Set, default_value_t = false)]
    deployed_via_olm: bool,

    #[arg(long, action = ArgAction::Set, default_value_t = true)]
    leader_election: bool,

    /// Name of the webhook service and webhook configurations
    #[arg(long, default_value = WEBHOOK_DEPLOYMENT_NAME)]
    webhook_service: String,
}

impl OperatorArgs {
    fn into_config(self, cluster_id: String) -> OperatorConfig {
        OperatorConfig {
            namespace: self.namespace,
            pod_name: self.pod_name,
            cluster_id,
            image: self.image,
            deployed_via_olm: self.deployed_via_olm,
            webhook_service: self.webhook_service,
            certs_dir: self.certs_dir,
            webhook_port: self.webhook_port,
            metrics_port: self.metrics_port,
            leader_election: self.leader_election,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    match cli.command {
        Command::Init => std::process::exit(standalone::run(&InitPaths::default())),
        Command::Operator(args) => {
            // Build Tokio runtime with custom thread names
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(TOKIO_WORKER_THREADS)
                .thread_name("dynakube-operator")
                .enable_all()
                .build()?;

            runtime.block_on(run_operator(args))
        }
    }
}

/// Respects `RUST_LOG` (default `info`) and `RUST_LOG_FORMAT=json|text`.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let log_format = std::env::var("RUST_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    match log_format.to_lowercase().as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .json()
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .with_ansi(true)
                .compact()
                .init();
        }
    }
}

async fn run_operator(args: OperatorArgs) -> Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("failed to install the rustls crypto provider"))?;

    info!("Starting Dynatrace operator");

    debug!("Initializing Kubernetes client");
    let client = Client::try_default().await?;

    let cluster_id = read_cluster_id(&client).await?;
    let config = Arc::new(args.into_config(cluster_id));
    info!(
        namespace = %config.namespace,
        cluster_id = %config.cluster_id,
        leader_election = config.leader_election,
        "Operator configured"
    );

    let webhook_client = Arc::new(KubeWebhookClient::new(
        client.clone(),
        &config.namespace,
        &config.cluster_id,
        &config.pod_name,
    ));

    // The webhook and metrics servers run on every replica; reconcilers only on the leader.
    tokio::select! {
        result = run_metrics_server(config.metrics_port) => {
            error!("CRITICAL: metrics server exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("metrics server exited unexpectedly without error")
        }
        result = run_webhook_server(client.clone(), webhook_client, config.clone()) => {
            error!("CRITICAL: webhook server exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("webhook server exited unexpectedly without error")
        }
        result = run_leader(client.clone(), config.clone()) => {
            error!("CRITICAL: controllers exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("controllers exited unexpectedly without error")
        }
        () = shutdown_signal() => {
            info!("Received shutdown signal, stopping operator");
            Ok(())
        }
    }
}

/// UID of the `kube-system` namespace, used as the cluster ID.
async fn read_cluster_id(client: &Client) -> Result<String> {
    let namespaces: Api<Namespace> = Api::all(client.clone());
    let kube_system = namespaces.get(KUBE_SYSTEM_NAMESPACE).await.map_err(|e| OperatorError::Fatal {
        reason: format!("cannot read namespace {KUBE_SYSTEM_NAMESPACE}: {e}"),
    })?;
    kube_system
        .metadata
        .uid
        .filter(|uid| !uid.is_empty())
        .ok_or_else(|| {
            OperatorError::Fatal {
                reason: format!("namespace {KUBE_SYSTEM_NAMESPACE} has no UID"),
            }
            .into()
        })
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler, only Ctrl+C stops the operator");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

async fn run_metrics_server(port: u16) -> Result<()> {
    let app = Router::new()
        .route(METRICS_SERVER_PATH, get(metrics_handler))
        .route("/healthz", get(|| async { "ok" }));

    let addr: SocketAddr = format!("{SERVER_BIND_ADDRESS}:{port}").parse()?;
    info!(addr = %addr, "Starting metrics server");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn metrics_handler() -> Result<String, (StatusCode, String)> {
    metrics::gather_metrics().map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

/// Wait for the lease, then run the controllers until leadership is lost.
async fn run_leader(client: Client, config: Arc<OperatorConfig>) -> Result<()> {
    if !config.leader_election {
        info!("Leader election disabled, starting controllers");
        return run_controllers(client, config).await;
    }

    let mut builder = LeaseManagerBuilder::new(client.clone(), LEADER_LEASE_NAME)
        .with_namespace(config.namespace.clone())
        .with_duration(DEFAULT_LEASE_DURATION_SECS)
        .with_grace(DEFAULT_LEASE_GRACE_SECS);
    // Without a pod name the lease manager picks a random identity.
    if !config.pod_name.is_empty() {
        builder = builder.with_identity(config.pod_name.clone());
    }
    let manager = builder
        .build()
        .await
        .map_err(|e| OperatorError::Fatal {
            reason: format!("cannot set up leader election: {e}"),
        })?;

    let (mut leadership, _lease_task) = manager.watch().await;
    info!(lease = LEADER_LEASE_NAME, identity = %config.pod_name, "Waiting for leadership");
    wait_for_leadership(&mut leadership, true).await?;
    info!(identity = %config.pod_name, "Acquired leadership");
    metrics::record_leader_elected(&config.pod_name);

    tokio::select! {
        result = run_controllers(client, config.clone()) => result,
        result = wait_for_leadership(&mut leadership, false) => {
            metrics::record_leader_lost(&config.pod_name);
            result?;
            anyhow::bail!("lost leadership of lease {LEADER_LEASE_NAME}")
        }
    }
}

async fn wait_for_leadership(leadership: &mut watch::Receiver<bool>, leader: bool) -> Result<()> {
    while *leadership.borrow_and_update() != leader {
        leadership.changed().await?;
    }
    Ok(())
}

/// Bootstrap the webhook certificates, then run every reconciler.
async fn run_controllers(client: Client, config: Arc<OperatorConfig>) -> Result<()> {
    let bootstrap = Arc::new(Notify::new());
    let certificates = Arc::new(CertificateContext {
        client: client.clone(),
        namespace: config.namespace.clone(),
        webhook_name: config.webhook_service.clone(),
        dns_name: config.webhook_dns_name(),
        bootstrap: Some(bootstrap.clone()),
    });

    tokio::select! {
        result = run_certificate_controller(certificates, &config) => {
            error!("CRITICAL: certificate controller exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("certificate controller exited unexpectedly without error")
        }
        result = run_dynakube_controllers(client, config.clone(), bootstrap) => {
            error!("CRITICAL: DynaKube controllers exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("DynaKube controllers exited unexpectedly without error")
        }
    }
}

/// Run the webhook certificate controller on the webhook deployment.
async fn run_certificate_controller(ctx: Arc<CertificateContext>, config: &OperatorConfig) -> Result<()> {
    info!("Starting webhook certificate controller");

    let api = Api::<Deployment>::namespaced(ctx.client.clone(), &config.namespace);
    let deployment = Config::default().fields(&format!("metadata.name={}", config.webhook_service));

    Controller::new(api, deployment)
        .with_config(ControllerConfig::default().concurrency(1))
        .run(reconcile_certificates_wrapper, error_policy, ctx)
        .for_each(|_| futures::future::ready(()))
        .await;

    Ok(())
}

/// Wait for the first steady-state certificate pass, then run the `DynaKube` and
/// `Namespace` controllers.
async fn run_dynakube_controllers(client: Client, config: Arc<OperatorConfig>, bootstrap: Arc<Notify>) -> Result<()> {
    bootstrap.notified().await;
    info!("Webhook certificates in place, starting DynaKube and Namespace controllers");

    let api = Api::<DynaKube>::namespaced(client.clone(), &config.namespace);
    let controller = Controller::new(api, Config::default());
    let ctx = Arc::new(Context {
        client,
        config,
        stores: Stores {
            dynakubes: controller.store(),
        },
    });

    tokio::select! {
        result = run_dynakube_controller(controller, ctx.clone()) => {
            error!("CRITICAL: DynaKube controller exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("DynaKube controller exited unexpectedly without error")
        }
        result = run_namespace_controller(ctx) => {
            error!("CRITICAL: Namespace controller exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("Namespace controller exited unexpectedly without error")
        }
    }
}

/// Run the `DynaKube` controller.
///
/// Besides `DynaKube` events it reacts to its own workloads, to namespaces whose
/// instance label points at a `DynaKube`, and to node changes, which rebuild the node
/// map of every app-injection `DynaKube`.
async fn run_dynakube_controller(controller: Controller<DynaKube>, ctx: Arc<Context>) -> Result<()> {
    info!("Starting DynaKube controller");

    let client = ctx.client.clone();
    let namespace = ctx.config.namespace.clone();
    let store = ctx.stores.dynakubes.clone();
    let operator_namespace = namespace.clone();

    controller
        .owns(Api::<DaemonSet>::namespaced(client.clone(), &namespace), Config::default())
        .owns(Api::<StatefulSet>::namespaced(client.clone(), &namespace), Config::default())
        .watches(Api::<Namespace>::all(client.clone()), Config::default(), move |ns| {
            instance_label(&ns).map(|dk| ObjectRef::<DynaKube>::new(dk).within(&operator_namespace))
        })
        .watches(Api::<Node>::all(client), Config::default(), move |_node| {
            store
                .state()
                .into_iter()
                .filter(|dk| dk.needs_app_injection())
                .map(|dk| ObjectRef::from_obj(&*dk))
                .collect::<Vec<_>>()
        })
        .run(reconcile_dynakube_wrapper, error_policy, ctx)
        .for_each(|_| futures::future::ready(()))
        .await;

    Ok(())
}

/// Run the `Namespace` controller once the `DynaKube` store is populated, so an
/// empty store never unlabels every namespace.
async fn run_namespace_controller(ctx: Arc<Context>) -> Result<()> {
    ctx.stores.dynakubes.wait_until_ready().await?;
    info!("Starting Namespace controller");

    let api = Api::<Namespace>::all(ctx.client.clone());

    Controller::new(api, Config::default())
        .run(reconcile_namespace_wrapper, error_policy, ctx)
        .for_each(|_| futures::future::ready(()))
        .await;

    Ok(())
}

/// Reconcile wrapper for `DynaKube`
async fn reconcile_dynakube_wrapper(dk: Arc<DynaKube>, ctx: Arc<Context>) -> Result<Action, ReconcileError> {
    let start = Instant::now();
    match reconcile_dynakube(ctx, dk.clone()).await {
        Ok(action) => {
            debug!("Successfully reconciled DynaKube: {}", dk.name_any());
            metrics::record_reconciliation_success(dynakube::RESOURCE_TYPE, start.elapsed());
            Ok(action)
        }
        Err(e) => {
            error!("Failed to reconcile DynaKube {}: {}", dk.name_any(), e);
            metrics::record_reconciliation_error(dynakube::RESOURCE_TYPE, start.elapsed());
            Err(e.into())
        }
    }
}

/// Reconcile wrapper for `Namespace`
async fn reconcile_namespace_wrapper(ns: Arc<Namespace>, ctx: Arc<Context>) -> Result<Action, ReconcileError> {
    let start = Instant::now();
    match reconcile_namespace(ctx, ns.clone()).await {
        Ok(action) => {
            metrics::record_reconciliation_success(namespace::RESOURCE_TYPE, start.elapsed());
            Ok(action)
        }
        Err(e) => {
            error!("Failed to reconcile Namespace {}: {}", ns.name_any(), e);
            metrics::record_reconciliation_error(namespace::RESOURCE_TYPE, start.elapsed());
            Err(e.into())
        }
    }
}

/// Reconcile wrapper for the webhook certificates
async fn reconcile_certificates_wrapper(
    _deployment: Arc<Deployment>,
    ctx: Arc<CertificateContext>,
) -> Result<Action, ReconcileError> {
    let start = Instant::now();
    match reconcile_certificates(ctx).await {
        Ok(action) => {
            metrics::record_reconciliation_success("Certificates", start.elapsed());
            Ok(action)
        }
        Err(e) => {
            error!("Failed to reconcile webhook certificates: {}", e);
            metrics::record_reconciliation_error("Certificates", start.elapsed());
            Err(e.into())
        }
    }
}

/// Error policy shared by every controller
fn error_policy<K, C>(_resource: Arc<K>, _err: &ReconcileError, _ctx: Arc<C>) -> Action
where
    K: Resource<DynamicType = ()>,
{
    metrics::record_reconciliation_requeue(&K::kind(&()), "error");
    Action::requeue(Duration::from_secs(ERROR_REQUEUE_DURATION_SECS))
}

#[cfg(test)]
#[path = "main_tests.rs"]
mod main_tests;
