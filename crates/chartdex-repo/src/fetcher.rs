//! Unified index fetcher
//!
//! Provides a single interface for all repository kinds (HTTP, OCI)

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::{FetchSource, RepositoryKind};
use crate::credentials::AuthMaterial;
use crate::error::Result;
use crate::http::HttpIndexFetcher;
use crate::index::NormalizedIndex;
use crate::oci::OciIndexFetcher;

/// Fetch and normalize a remote repository index
///
/// Implementations must observe `cancel` at every blocking point and return
/// `RepoError::Cancelled` promptly once it fires.
#[async_trait]
pub trait IndexFetcher: Send + Sync {
    async fn fetch(
        &self,
        source: &FetchSource,
        auth: &AuthMaterial,
        cancel: &CancellationToken,
    ) -> Result<NormalizedIndex>;
}

/// Fetcher that talks to real HTTP repositories and OCI registries
#[derive(Debug, Default, Clone)]
pub struct RemoteIndexFetcher;

impl RemoteIndexFetcher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl IndexFetcher for RemoteIndexFetcher {
    async fn fetch(
        &self,
        source: &FetchSource,
        auth: &AuthMaterial,
        cancel: &CancellationToken,
    ) -> Result<NormalizedIndex> {
        tracing::debug!(url = %source.url, kind = %source.kind, auth = auth.kind(), "fetching index");
        match source.kind {
            RepositoryKind::Default => HttpIndexFetcher::new(source, auth)?.fetch(source, cancel).await,
            RepositoryKind::Oci => OciIndexFetcher::new(source, auth)?.fetch(source, cancel).await,
        }
    }
}
