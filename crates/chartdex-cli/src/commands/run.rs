//! Run the engine against the cluster

use chartdex_kube::{EngineConfig, HelmRepository, Sequencer, watch};
use chartdex_repo::{IndexStore, MemoryIndexStore, RemoteIndexFetcher};
use console::style;
use kube::Api;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::{connect_cluster, open_store};
use crate::error::Result;

/// Watch repositories and keep the index cache in step until interrupted
pub async fn run(config: &EngineConfig, namespace: Option<&str>, memory: bool) -> Result<()> {
    let cluster = Arc::new(connect_cluster().await?);
    let store: Arc<dyn IndexStore> = if memory {
        Arc::new(MemoryIndexStore::new())
    } else {
        Arc::new(open_store(config)?)
    };

    let sequencer = Sequencer::new(
        store,
        Arc::new(RemoteIndexFetcher::new()),
        cluster.clone(),
        config.sequencer(),
    );

    let api: Api<HelmRepository> = match namespace {
        Some(ns) => Api::namespaced(cluster.client().clone(), ns),
        None => Api::all(cluster.client().clone()),
    };

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
            shutdown.cancel();
        });
    }

    eprintln!(
        "{} watching helm repositories in {}",
        style("→").cyan(),
        style(namespace.unwrap_or("all namespaces")).yellow()
    );

    let result = watch::run(api, &sequencer, &shutdown).await;

    sequencer.shutdown();
    sequencer.wait_idle().await;
    tracing::info!("engine stopped");

    result?;
    eprintln!("{} stopped", style("✓").green());
    Ok(())
}
