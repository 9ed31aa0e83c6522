use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use serde::Deserialize;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use vmig_inventory::adapter::AdapterRegistry;
use vmig_inventory::client::{host_of, new_client};
use vmig_inventory::container::ReconcilerContainer;
use vmig_inventory::provider::{Provider, ProviderType, Secret};
use vmig_inventory::reconciler::Reconciler;
use vmig_inventory::web;

#[derive(Parser)]
#[command(name = "vmig-inventory")]
#[command(about = "vmig inventory controller daemon")]
struct Args {
    /// Provider definition file (JSON)
    #[arg(short, long)]
    providers: PathBuf,

    /// Directory for per-provider inventory databases
    #[arg(short, long, default_value = "/var/lib/vmig")]
    data_dir: PathBuf,

    /// REST listen address
    #[arg(short, long, default_value = "[::1]:8070")]
    listen: String,
}

/// On-disk provider definitions: each provider with its resolved
/// credentials.
#[derive(Deserialize)]
struct ProviderFile {
    providers: Vec<ProviderEntry>,
}

#[derive(Deserialize)]
struct ProviderEntry {
    #[serde(flatten)]
    provider: Provider,
    secret: Secret,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("vmig_inventory=info".parse()?),
        )
        .init();

    let args = Args::parse();

    let raw = tokio::fs::read_to_string(&args.providers)
        .await
        .context("Failed to read provider definitions")?;
    let file: ProviderFile =
        serde_json::from_str(&raw).context("Failed to parse provider definitions")?;
    tokio::fs::create_dir_all(&args.data_dir)
        .await
        .context("Failed to create data directory")?;

    let container = Arc::new(ReconcilerContainer::new());
    let remotes = vmig_watch::Container::new();

    for entry in file.providers {
        let mut provider = entry.provider;
        if provider.uid.is_empty() {
            provider.uid = uuid::Uuid::new_v4().to_string();
        }
        let key = provider.key();

        let client = match new_client(&provider, &entry.secret) {
            Ok(client) => client,
            Err(err) => {
                provider.status.set_blocker("ConfigurationInvalid", err.to_string());
                warn!(provider = %key, %err, "provider rejected");
                continue;
            }
        };
        let registry = match provider.spec.r#type {
            ProviderType::Vsphere => AdapterRegistry::vsphere(),
            ProviderType::Ovirt => AdapterRegistry::ovirt(),
        };

        let reconciler = Arc::new(Reconciler::new(
            provider.clone(),
            client,
            registry,
            &args.data_dir,
        ));
        if let Err(err) = reconciler.start().await {
            provider.status.set_blocker("ConnectionFailed", err.to_string());
            warn!(provider = %key, %err, "reconciler failed to start");
            continue;
        }
        provider.status.observed_generation = provider.generation;
        provider.status.set_ready(true, "inventory reconciler running");
        container.add(key.clone(), reconciler);

        // Mirror the provider into the watch hub so in-process
        // subscribers can relay its resource changes.
        let owner = vmig_watch::OwnerRef::new(
            provider.kind.clone(),
            provider.namespace.clone(),
            provider.name.clone(),
        );
        let cfg = vmig_watch::RestConfig {
            host: provider.spec.url.clone(),
            user: entry.secret.user.clone(),
            password: entry.secret.password.clone(),
            insecure: true,
        };
        if let Err(err) = remotes.ensure(
            &owner,
            vmig_watch::Remote::new(host_of(&provider.spec.url), Some(cfg)),
        ) {
            warn!(provider = %key, %err, "watch hub entry not started");
        }

        info!(provider = %key, "provider ready");
    }

    let router = web::router(container.clone());
    let listener = tokio::net::TcpListener::bind(&args.listen)
        .await
        .context("Failed to bind listen address")?;
    info!(addr = %args.listen, "inventory API listening");

    let (shutdown_tx, mut shutdown_rx) = tokio::sync::watch::channel(false);
    let server = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                shutdown_rx.changed().await.ok();
            })
            .await
    });

    let ctrl_c = signal::ctrl_c();
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
        .context("Failed to install SIGTERM handler")?;
    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = sigterm.recv() => info!("Received SIGTERM"),
    }

    let _ = shutdown_tx.send(true);
    let _ = server.await;

    for reconciler in container.list() {
        reconciler.shutdown(false).await;
    }

    Ok(())
}
