// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! chesterd: the autoscaling control loop (§2, §4.6).
//!
//! Boots the real adapters, runs the startup sweep (§4.7), then pulls
//! incidents off the subscription forever. Any error past config
//! validation is fatal (§6 exit codes) — there is no supervised restart
//! inside the process; that is the orchestrator's job.

mod config;
mod error;
mod http;

use chester_adapters::{
    split_provisioning_backend, EventSource, HttpDecryptor, HttpProvisioningClient, HttpPubSub,
    KubernetesProxyConfigWriter, OperationPoller, WebhookNotifier,
};
use chester_core::{SystemClock, TokioSleeper};
use chester_engine::{ReconcilerConfig, ReconcilerContext, Reconciler, StartupSweeper};
use chester_storage::{IncidentStore, WalIncidentStore};
use clap::Parser;
use config::Config;
use error::DaemonError;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "chesterd", about = "MySQL fleet autoscaling control loop")]
struct Args {
    /// Path to a kube-config file. Ignored when `IN_CLUSTER=true` (§6).
    #[arg(long)]
    kubeconfig: Option<PathBuf>,
}

fn default_kubeconfig() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(|home| PathBuf::from(home).join(".kube").join("config"))
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            // Tracing isn't wired up until the log filter is known, so a
            // config failure goes straight to stderr.
            eprintln!("chesterd: fatal: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&config.log_filter).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(e) = run(config, args).await {
        tracing::error!(error = %e, "chesterd exiting");
        std::process::exit(1);
    }
}

async fn run(config: Config, args: Args) -> Result<(), DaemonError> {
    std::fs::create_dir_all(&config.state_dir)
        .map_err(|e| DaemonError::StateDirCreate(config.state_dir.clone(), e))?;

    // `Client::try_default` already infers in-cluster config first, falling
    // back to a kubeconfig file read via `$KUBECONFIG`; pointing that env
    // var at the resolved flag/default is simpler than hand-rolling the
    // kubeconfig-loading path ourselves (§6: `IN_CLUSTER`/`--kubeconfig`).
    if !config.in_cluster {
        if let Some(path) = args.kubeconfig.or_else(default_kubeconfig) {
            std::env::set_var("KUBECONFIG", path);
        }
    }
    let kube_client = kube::Client::try_default().await?;

    let sleeper = Arc::new(TokioSleeper);
    let clock = Arc::new(SystemClock);

    let sqladmin_http = http::bearer_client(&config.sqladmin_creds)?;
    let kms_http = http::bearer_client(&config.kms_creds)?;
    let pubsub_http = http::bearer_client(&config.pubsub_creds)?;
    let webhook_http = reqwest::Client::new();

    // DATASTORE_CREDS is validated for parity with §6 but unused: incidents
    // and proxy config live in the local WAL-backed store, not a cloud
    // datastore (see DESIGN.md).
    let _ = &config.datastore_creds;

    let provisioning_client = Arc::new(HttpProvisioningClient::new(
        sqladmin_http,
        config.sqladmin_base_url(),
        sleeper.clone(),
    ));
    let (provisioning, operation_source) = split_provisioning_backend(provisioning_client);
    let poller = OperationPoller::new(sleeper.clone(), config.operation_timeout);

    let proxy_writer = Arc::new(KubernetesProxyConfigWriter::new(kube_client));
    let decryptor = Arc::new(HttpDecryptor::new(kms_http, config.kms_endpoint()));
    let notifier = Arc::new(WebhookNotifier::new(
        webhook_http,
        &config.first_segment,
        &config.second_segment,
        &config.third_segment,
    ));

    let store = Arc::new(WalIncidentStore::open(config.wal_path())?);

    let pubsub = Arc::new(HttpPubSub::new(
        pubsub_http,
        config.pubsub_base_url(),
        config.pubsub_topic.clone(),
        config.pubsub_subscription.clone(),
    ));

    let reconciler_config = ReconcilerConfig::new(config.network_project_id.clone(), config.network_name.clone());
    let ctx = Arc::new(ReconcilerContext {
        store: store.clone(),
        provisioning,
        operation_source,
        proxy_writer,
        notifier,
        decryptor,
        poller,
        clock: clock.clone(),
        sleeper,
        config: reconciler_config,
    });

    let sweeper = StartupSweeper::new(store.clone(), pubsub.clone(), clock);
    let report = sweeper.run().await?;
    tracing::info!(closed = report.closed, republished = report.republished, "startup sweep complete");

    ingest_forever(pubsub, ctx).await
}

/// §4.6: ack immediately, then dispatch. A decode failure or a dead
/// subscription is fatal and propagates out of `main`. The reconciler
/// checkpoints progress through `IncidentStore::update_incident`, which
/// only ever updates an existing record, so the incident has to be made
/// durable here before a reconcile attempt can touch it.
async fn ingest_forever(source: Arc<dyn EventSource>, ctx: Arc<ReconcilerContext>) -> Result<(), DaemonError> {
    loop {
        let delivered = source.recv().await?;
        source.ack(delivered.ack_id()).await?;

        let incident_id = delivered.incident.incident_id.clone();
        if let Err(e) = ctx.store.put_incident(&delivered.incident) {
            tracing::warn!(incident_id, error = %e, "failed to persist incoming incident");
            continue;
        }

        let ctx = ctx.clone();
        tokio::spawn(async move {
            let reconciler = Reconciler::new(ctx);
            if let Err(e) = reconciler.run(delivered.incident).await {
                tracing::warn!(incident_id, error = %e, "incident reconcile failed");
            }
        });
    }
}
