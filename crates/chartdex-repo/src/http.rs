//! HTTP repository index fetching
//!
//! Supports traditional Helm-style HTTP repositories with index.yaml

use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;

use crate::config::FetchSource;
use crate::credentials::{AuthMaterial, SecureHttpClient};
use crate::error::{RepoError, Result};
use crate::index::{NormalizedIndex, RepositoryIndex};

/// Fetches and normalizes `index.yaml` from an HTTP repository
pub struct HttpIndexFetcher {
    client: SecureHttpClient,
}

impl HttpIndexFetcher {
    pub fn new(source: &FetchSource, auth: &AuthMaterial) -> Result<Self> {
        let client = SecureHttpClient::new(auth.clone(), source.timeout)?
            .pass_credentials(source.pass_credentials);
        Ok(Self { client })
    }

    /// Download, parse and normalize the index
    ///
    /// The raw payload is dropped as soon as it has been parsed. Parsing runs
    /// on the blocking pool and is abandoned if `cancel` fires meanwhile.
    pub async fn fetch(
        &self,
        source: &FetchSource,
        cancel: &CancellationToken,
    ) -> Result<NormalizedIndex> {
        let index_url = source.index_url();
        let raw = self
            .client
            .get_bytes(&index_url, source.max_index_size, cancel)
            .await?;
        tracing::debug!(
            url = %index_url,
            bytes = raw.len(),
            digest = %payload_digest(&raw),
            "downloaded repository index"
        );

        if cancel.is_cancelled() {
            return Err(RepoError::Cancelled);
        }

        let parse = tokio::task::spawn_blocking(move || {
            RepositoryIndex::from_bytes(&raw).map(RepositoryIndex::normalize)
        });

        tokio::select! {
            _ = cancel.cancelled() => Err(RepoError::Cancelled),
            joined = parse => joined.map_err(|e| RepoError::IndexParseError {
                message: format!("index parser panicked: {}", e),
            })?,
        }
    }
}

/// `sha256:<hex>` digest of a downloaded payload
pub fn payload_digest(raw: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(raw)))
}
