//! OCI registry indexing
//!
//! OCI registries have no `index.yaml`, so the index is assembled from the
//! registry itself: chart repositories under the URL path are discovered via
//! the `_catalog` endpoint (when the registry exposes it), then every tag's
//! manifest and chart config are read. Each registry call is raced against
//! the cancellation token.

use oci_distribution::Reference;
use oci_distribution::client::{Client, ClientConfig, ClientProtocol};
use oci_distribution::secrets::RegistryAuth;
use serde::Deserialize;
use std::future::Future;
use tokio_util::sync::CancellationToken;

use crate::config::FetchSource;
use crate::credentials::{AuthMaterial, SecureHttpClient};
use crate::error::{RepoError, Result};
use crate::index::{PackageRecord, VersionRecord, NormalizedIndex, sort_newest_first};

/// Media types for Helm charts in OCI
pub mod media_types {
    /// Helm chart config
    pub const HELM_CONFIG: &str = "application/vnd.cncf.helm.config.v1+json";
    /// Helm chart content layer
    pub const HELM_CONTENT: &str = "application/vnd.cncf.helm.chart.content.v1.tar+gzip";
}

const CREATED_ANNOTATION: &str = "org.opencontainers.image.created";

/// Registry catalogs are small JSON documents
const CATALOG_MAX_SIZE: u64 = 8 * 1024 * 1024;

/// Parsed `oci://registry/path` location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OciLocation {
    pub registry: String,
    pub path: String,
}

impl OciLocation {
    pub fn parse(url: &str) -> Result<Self> {
        let clean = url
            .trim_start_matches("oci://")
            .trim_end_matches('/');
        let (registry, path) = clean
            .split_once('/')
            .ok_or_else(|| RepoError::InvalidReference {
                reference: url.to_string(),
            })?;
        if registry.is_empty() || path.is_empty() {
            return Err(RepoError::InvalidReference {
                reference: url.to_string(),
            });
        }
        Ok(Self {
            registry: registry.to_string(),
            path: path.to_string(),
        })
    }

    /// Chart name for a repository path below this location
    fn chart_name<'a>(&self, repository: &'a str) -> &'a str {
        repository.rsplit('/').next().unwrap_or(repository)
    }
}

/// Chart metadata stored in the OCI config blob
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartConfig {
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    app_version: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    icon: Option<String>,
    #[serde(default)]
    home: Option<String>,
    #[serde(default)]
    keywords: Vec<String>,
    #[serde(default)]
    deprecated: bool,
}

#[derive(Debug, Deserialize)]
struct CatalogResponse {
    #[serde(default)]
    repositories: Vec<String>,
}

/// Builds a normalized index from an OCI registry
pub struct OciIndexFetcher {
    client: Client,
    auth: RegistryAuth,
    http: SecureHttpClient,
}

impl OciIndexFetcher {
    pub fn new(source: &FetchSource, auth: &AuthMaterial) -> Result<Self> {
        let registry_auth = match auth {
            AuthMaterial::Basic { username, password } => {
                RegistryAuth::Basic(username.clone(), password.clone())
            }
            AuthMaterial::None => RegistryAuth::Anonymous,
            AuthMaterial::Tls { .. } => {
                tracing::warn!(
                    url = %source.url,
                    "TLS client certificates are not supported for OCI registries, pulling anonymously"
                );
                RegistryAuth::Anonymous
            }
        };

        let config = ClientConfig {
            protocol: ClientProtocol::Https,
            ..Default::default()
        };

        Ok(Self {
            client: Client::new(config),
            auth: registry_auth,
            http: SecureHttpClient::new(auth.clone(), source.timeout)?,
        })
    }

    pub async fn fetch(
        &self,
        source: &FetchSource,
        cancel: &CancellationToken,
    ) -> Result<NormalizedIndex> {
        let location = OciLocation::parse(&source.url)?;
        let repositories = self.discover(&location, cancel).await?;

        let mut packages = Vec::with_capacity(repositories.len());
        for repository in repositories {
            if let Some(package) = self.index_chart(&location, &repository, cancel).await? {
                packages.push(package);
            }
        }
        packages.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(NormalizedIndex { packages })
    }

    /// Chart repositories below the location path
    async fn discover(
        &self,
        location: &OciLocation,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        let catalog_url = format!("https://{}/v2/_catalog", location.registry);
        let prefix = format!("{}/", location.path);

        match self.http.get_bytes(&catalog_url, Some(CATALOG_MAX_SIZE), cancel).await {
            Ok(body) => {
                let catalog: CatalogResponse = serde_json::from_slice(&body)?;
                let charts: Vec<String> = catalog
                    .repositories
                    .into_iter()
                    .filter(|r| r.starts_with(&prefix))
                    .collect();
                if !charts.is_empty() {
                    return Ok(charts);
                }
            }
            Err(RepoError::Cancelled) => return Err(RepoError::Cancelled),
            Err(e) => {
                tracing::debug!(registry = %location.registry, "catalog unavailable: {}", e);
            }
        }

        // Without a catalog the URL itself must name a chart repository
        Ok(vec![location.path.clone()])
    }

    async fn index_chart(
        &self,
        location: &OciLocation,
        repository: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<PackageRecord>> {
        let base = Reference::with_tag(
            location.registry.clone(),
            repository.to_string(),
            "latest".to_string(),
        );

        let tags = cancellable(
            cancel,
            self.client.list_tags(&base, &self.auth, None, None),
        )
        .await?
        .map_err(|e| map_oci_error(repository, e))?
        .tags;

        if tags.is_empty() {
            return Ok(None);
        }

        let mut record = PackageRecord {
            name: location.chart_name(repository).to_string(),
            ..Default::default()
        };

        let mut newest: Option<(semver::Version, ChartConfig)> = None;
        for tag in tags {
            let reference =
                Reference::with_tag(location.registry.clone(), repository.to_string(), tag.clone());
            let (manifest, digest, config) = cancellable(
                cancel,
                self.client.pull_manifest_and_config(&reference, &self.auth),
            )
            .await?
            .map_err(|e| map_oci_error(repository, e))?;

            let chart: ChartConfig =
                serde_json::from_str(&config).map_err(|e| RepoError::IndexParseError {
                    message: format!("invalid chart config for {}:{}: {}", repository, tag, e),
                })?;

            // Helm stores '+' as '_' in OCI tags
            let version = chart.version.clone().unwrap_or_else(|| tag.replace('_', "+"));
            let created = manifest
                .annotations
                .as_ref()
                .and_then(|a| a.get(CREATED_ANNOTATION))
                .and_then(|c| chrono::DateTime::parse_from_rfc3339(c).ok())
                .map(|c| c.with_timezone(&chrono::Utc));

            record.versions.push(VersionRecord {
                version: version.clone(),
                app_version: chart.app_version.clone(),
                digest: Some(digest),
                created,
                urls: vec![format!("oci://{}/{}:{}", location.registry, repository, tag)],
                deprecated: chart.deprecated,
            });

            if let Ok(parsed) = semver::Version::parse(&version) {
                if newest.as_ref().map(|(v, _)| parsed > *v).unwrap_or(true) {
                    newest = Some((parsed, chart));
                }
            }
        }

        sort_newest_first(&mut record.versions);
        if let Some((_, chart)) = newest {
            record.description = chart.description;
            record.icon = chart.icon;
            record.home = chart.home;
            record.keywords = chart.keywords;
        }

        Ok(Some(record))
    }
}

/// Race a registry call against the token
async fn cancellable<F: Future>(cancel: &CancellationToken, fut: F) -> Result<F::Output> {
    tokio::select! {
        _ = cancel.cancelled() => Err(RepoError::Cancelled),
        out = fut => Ok(out),
    }
}

fn map_oci_error(repository: &str, e: oci_distribution::errors::OciDistributionError) -> RepoError {
    let message = e.to_string();
    let lower = message.to_lowercase();
    if lower.contains("401") || lower.contains("unauthorized") {
        RepoError::AuthFailed {
            url: repository.to_string(),
            status: "401 Unauthorized".to_string(),
        }
    } else if lower.contains("403") || lower.contains("denied") {
        RepoError::AuthFailed {
            url: repository.to_string(),
            status: "403 Forbidden".to_string(),
        }
    } else {
        RepoError::OciError { message }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oci_location_parse() {
        let loc = OciLocation::parse("oci://ghcr.io/stefanprodan/charts").unwrap();
        assert_eq!(loc.registry, "ghcr.io");
        assert_eq!(loc.path, "stefanprodan/charts");
        assert_eq!(loc.chart_name("stefanprodan/charts/podinfo"), "podinfo");

        let loc = OciLocation::parse("oci://localhost:5000/charts/").unwrap();
        assert_eq!(loc.registry, "localhost:5000");
        assert_eq!(loc.path, "charts");

        assert!(OciLocation::parse("oci://ghcr.io").is_err());
        assert!(OciLocation::parse("oci:///charts").is_err());
    }

    #[test]
    fn test_chart_config_parse() {
        let config: ChartConfig = serde_json::from_str(
            r#"{"name":"podinfo","version":"6.1.6","appVersion":"6.1.6","description":"Podinfo Helm chart for Kubernetes"}"#,
        )
        .unwrap();
        assert_eq!(config.version.as_deref(), Some("6.1.6"));
        assert_eq!(config.app_version.as_deref(), Some("6.1.6"));
        assert!(!config.deprecated);
    }

    #[test]
    fn test_oci_error_mapping() {
        let err = map_oci_error(
            "org/charts/podinfo",
            oci_distribution::errors::OciDistributionError::AuthenticationFailure(
                "401 Unauthorized".to_string(),
            ),
        );
        assert!(err.is_auth());
        assert!(err.to_string().contains("401"));
    }

    #[tokio::test]
    async fn test_cancellable_short_circuits() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = cancellable(&cancel, std::future::pending::<()>()).await;
        assert!(matches!(result, Err(RepoError::Cancelled)));
    }
}
