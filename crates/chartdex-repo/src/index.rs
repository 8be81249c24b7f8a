//! Repository index types
//!
//! `RepositoryIndex` is the Helm-compatible `index.yaml` document as served by
//! chart repositories. `NormalizedIndex` is what gets cached: one record per
//! package with its versions sorted newest first.

use chrono::{DateTime, Utc};
use semver::Version;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

use crate::error::{RepoError, Result};

/// Repository index (Helm-compatible)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryIndex {
    /// API version
    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// When this index was generated
    #[serde(default)]
    pub generated: Option<DateTime<Utc>>,

    /// Charts indexed by name
    #[serde(default)]
    pub entries: HashMap<String, Vec<ChartEntry>>,
}

fn default_api_version() -> String {
    "v1".to_string()
}

impl Default for RepositoryIndex {
    fn default() -> Self {
        Self {
            api_version: default_api_version(),
            generated: None,
            entries: HashMap::new(),
        }
    }
}

impl RepositoryIndex {
    /// Parse index from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| RepoError::IndexParseError {
            message: e.to_string(),
        })
    }

    /// Parse index from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let yaml = std::str::from_utf8(bytes).map_err(|e| RepoError::IndexParseError {
            message: format!("Invalid UTF-8: {}", e),
        })?;
        let index = Self::from_yaml(yaml)?;
        if index.api_version.is_empty() {
            return Err(RepoError::IndexParseError {
                message: "no API version specified".to_string(),
            });
        }
        Ok(index)
    }

    /// Add an entry to the index
    pub fn add_entry(&mut self, entry: ChartEntry) {
        self.entries
            .entry(entry.name.clone())
            .or_default()
            .push(entry);
    }

    /// Flatten into the cached representation
    pub fn normalize(self) -> NormalizedIndex {
        let mut packages: Vec<PackageRecord> = self
            .entries
            .into_iter()
            .filter(|(_, versions)| !versions.is_empty())
            .map(|(name, versions)| PackageRecord::from_entries(name, versions))
            .collect();
        packages.sort_by(|a, b| a.name.cmp(&b.name));
        NormalizedIndex { packages }
    }
}

/// Chart entry in the index
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartEntry {
    /// Chart name
    pub name: String,

    /// Chart version (semver)
    pub version: String,

    /// Application version
    #[serde(default)]
    pub app_version: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub home: Option<String>,

    #[serde(default)]
    pub icon: Option<String>,

    /// Keywords for search
    #[serde(default)]
    pub keywords: Vec<String>,

    /// URLs to download the chart archive
    #[serde(default)]
    pub urls: Vec<String>,

    /// SHA256 digest of the archive
    #[serde(default)]
    pub digest: Option<String>,

    /// Creation timestamp
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,

    #[serde(default)]
    pub deprecated: bool,
}

/// Normalized, cache-ready form of a repository index
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizedIndex {
    pub packages: Vec<PackageRecord>,
}

impl NormalizedIndex {
    pub fn get(&self, name: &str) -> Option<&PackageRecord> {
        self.packages.iter().find(|p| p.name == name)
    }

    pub fn package_count(&self) -> usize {
        self.packages.len()
    }

    pub fn version_count(&self) -> usize {
        self.packages.iter().map(|p| p.versions.len()).sum()
    }
}

/// One package and all of its versions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PackageRecord {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub home: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Newest first
    pub versions: Vec<VersionRecord>,
}

impl PackageRecord {
    fn from_entries(name: String, entries: Vec<ChartEntry>) -> Self {
        let mut versions: Vec<VersionRecord> = entries
            .iter()
            .map(|e| VersionRecord {
                version: e.version.clone(),
                app_version: e.app_version.clone(),
                digest: e.digest.clone(),
                created: e.created,
                urls: e.urls.clone(),
                deprecated: e.deprecated,
            })
            .collect();
        sort_newest_first(&mut versions);

        // Package-level metadata comes from the newest version
        let newest = entries
            .iter()
            .find(|e| versions.first().map(|v| v.version == e.version).unwrap_or(false))
            .or_else(|| entries.first());

        Self {
            name,
            description: newest.and_then(|e| e.description.clone()),
            icon: newest.and_then(|e| e.icon.clone()),
            home: newest.and_then(|e| e.home.clone()),
            keywords: newest.map(|e| e.keywords.clone()).unwrap_or_default(),
            versions,
        }
    }

    pub fn latest(&self) -> Option<&VersionRecord> {
        self.versions.first()
    }
}

/// Per-version metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VersionRecord {
    pub version: String,
    #[serde(default)]
    pub app_version: Option<String>,
    #[serde(default)]
    pub digest: Option<String>,
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default)]
    pub deprecated: bool,
}

/// Sort by semver descending; unparsable versions go last
pub fn sort_newest_first(versions: &mut [VersionRecord]) {
    versions.sort_by(|a, b| {
        let va = Version::parse(&a.version).ok();
        let vb = Version::parse(&b.version).ok();
        match (va, vb) {
            (Some(va), Some(vb)) => vb.cmp(&va),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => b.version.cmp(&a.version),
        }
    });
}
