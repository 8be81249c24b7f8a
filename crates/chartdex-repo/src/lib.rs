//! Chartdex Repository Access
//!
//! This crate knows how to turn a remote chart repository into a cached,
//! normalized package list:
//!
//! - **HTTP repositories**: Helm-style repos serving `index.yaml`
//! - **OCI registries**: charts stored as OCI artifacts (GHCR, Harbor, ...)
//! - **Index cache**: in-memory or SQLite-backed store keyed by repository
//!
//! Nothing here depends on the cluster; the credential material and the
//! repository identity are handed in by the caller.
//!
//! ## Example
//!
//! ```rust,no_run
//! use chartdex_repo::{
//!     AuthMaterial, FetchSource, IndexCacheEntry, IndexFetcher, IndexStore,
//!     MemoryIndexStore, RemoteIndexFetcher, RepositoryKind, RepositoryRef,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let source = FetchSource::new("https://stefanprodan.github.io/podinfo", RepositoryKind::Default);
//! let index = RemoteIndexFetcher::new()
//!     .fetch(&source, &AuthMaterial::None, &CancellationToken::new())
//!     .await?;
//!
//! let store = MemoryIndexStore::new();
//! let key = RepositoryRef::new("default", "podinfo");
//! store.put(IndexCacheEntry::new(key.clone(), index, "1")).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Security Notes
//!
//! - Credentials are NEVER sent after cross-origin redirects unless the
//!   repository opts in with `passCredentials`
//! - `AuthMaterial` redacts secrets in its `Debug` output

pub mod error;
pub mod config;
pub mod credentials;
pub mod index;
pub mod http;
pub mod oci;
pub mod fetcher;
pub mod cache;

// Re-exports for convenience
pub use error::{RepoError, Result};
pub use config::{DEFAULT_MAX_INDEX_SIZE, FetchSource, RepositoryKind, RepositoryRef};
pub use credentials::{AuthMaterial, SecureHttpClient};
pub use index::{NormalizedIndex, PackageRecord, RepositoryIndex, VersionRecord};
pub use http::HttpIndexFetcher;
pub use oci::OciIndexFetcher;
pub use fetcher::{IndexFetcher, RemoteIndexFetcher};
pub use cache::{IndexCacheEntry, IndexStore, MemoryIndexStore, SqliteIndexStore};
