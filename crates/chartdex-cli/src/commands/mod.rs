//! CLI commands

pub mod cache;
pub mod config;
pub mod package;
pub mod repo;
pub mod run;

use chartdex_kube::{
    Authorizer, Caller, EngineConfig, KubeAccessReviewer, KubeCluster, RepositoryService,
};
use chartdex_repo::SqliteIndexStore;
use clap::Args;
use std::path::Path;
use std::sync::Arc;

use crate::error::{CliError, Result};

/// Identity the request is made for
#[derive(Args, Debug, Clone)]
pub struct CallerArgs {
    /// User whose rights are checked
    #[arg(long = "as", env = "CHARTDEX_AS", value_name = "USER")]
    pub user: String,

    /// Groups of that user (repeatable)
    #[arg(long = "as-group", value_name = "GROUP")]
    pub groups: Vec<String>,
}

impl CallerArgs {
    pub fn caller(&self) -> Caller {
        Caller {
            user: self.user.clone(),
            groups: self.groups.clone(),
        }
    }
}

/// Load the engine configuration from `path` or the default location
pub fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let config = match path {
        Some(path) => EngineConfig::load_from(path)?,
        None => EngineConfig::load()?,
    };
    Ok(config)
}

/// Open the shared SQLite index cache
pub fn open_store(config: &EngineConfig) -> Result<SqliteIndexStore> {
    let store = match &config.cache_path {
        Some(path) => SqliteIndexStore::open_at(path)?,
        None => SqliteIndexStore::open()?,
    };
    Ok(store)
}

pub async fn connect_cluster() -> Result<KubeCluster> {
    KubeCluster::new().await.map_err(|e| CliError::Unavailable {
        message: format!("cannot reach the cluster: {}", e),
    })
}

/// Service backed by the live cluster and the local index cache
pub async fn connect(config: &EngineConfig) -> Result<RepositoryService> {
    let cluster = Arc::new(connect_cluster().await?);
    let reviewer = KubeAccessReviewer::new(cluster.client().clone());
    let store = Arc::new(open_store(config)?);
    Ok(RepositoryService::new(
        cluster,
        Authorizer::new(Arc::new(reviewer)),
        store,
        config,
    ))
}
