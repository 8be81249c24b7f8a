//! Repository identity and fetch configuration

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::{RepoError, Result};

/// Identity of a tracked repository, also used as the cache key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RepositoryRef {
    pub namespace: String,
    pub name: String,
}

impl RepositoryRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Parse `namespace/name`
    pub fn parse(s: &str) -> Result<Self> {
        match s.split_once('/') {
            Some((ns, name)) if !ns.is_empty() && !name.is_empty() && !name.contains('/') => {
                Ok(Self::new(ns, name))
            }
            _ => Err(RepoError::InvalidReference {
                reference: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for RepositoryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Repository kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepositoryKind {
    /// Traditional HTTP repository with index.yaml
    #[default]
    #[serde(alias = "helm")]
    Default,

    /// OCI-compliant registry
    Oci,
}

impl RepositoryKind {
    /// Auto-detect repository kind from URL
    pub fn detect(url: &str) -> Result<Self> {
        if url.starts_with("oci://") {
            Ok(RepositoryKind::Oci)
        } else if url.starts_with("http://") || url.starts_with("https://") {
            Ok(RepositoryKind::Default)
        } else {
            Err(RepoError::InvalidRepositoryUrl {
                url: url.to_string(),
                reason: "URL must start with http://, https:// or oci://".to_string(),
            })
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RepositoryKind::Default => "default",
            RepositoryKind::Oci => "oci",
        }
    }
}

impl fmt::Display for RepositoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Index size limit used when none is configured (256 MiB)
pub const DEFAULT_MAX_INDEX_SIZE: u64 = 256 * 1024 * 1024;

/// Everything the fetcher needs to know about where an index lives
#[derive(Debug, Clone)]
pub struct FetchSource {
    pub url: String,
    pub kind: RepositoryKind,

    /// Forward credentials to hosts other than the repository host
    pub pass_credentials: bool,

    /// Per-request timeout
    pub timeout: Duration,

    /// Upper bound on the raw index size; `None` disables the check
    pub max_index_size: Option<u64>,
}

impl FetchSource {
    pub fn new(url: impl Into<String>, kind: RepositoryKind) -> Self {
        Self {
            url: url.into(),
            kind,
            pass_credentials: false,
            timeout: Duration::from_secs(120),
            max_index_size: Some(DEFAULT_MAX_INDEX_SIZE),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_index_size(mut self, max: Option<u64>) -> Self {
        self.max_index_size = max;
        self
    }

    pub fn with_pass_credentials(mut self, pass: bool) -> Self {
        self.pass_credentials = pass;
        self
    }

    /// Location of `index.yaml` for HTTP repositories
    pub fn index_url(&self) -> String {
        match self.kind {
            RepositoryKind::Default => {
                let base = self.url.trim_end_matches('/');
                if base.ends_with("index.yaml") {
                    base.to_string()
                } else {
                    format!("{}/index.yaml", base)
                }
            }
            RepositoryKind::Oci => self.url.clone(),
        }
    }

    /// Validate that the URL matches the declared kind
    pub fn validate(&self) -> Result<()> {
        let detected = RepositoryKind::detect(&self.url)?;
        if detected != self.kind {
            return Err(RepoError::InvalidRepositoryUrl {
                url: self.url.clone(),
                reason: format!("URL scheme does not match repository type '{}'", self.kind),
            });
        }
        url::Url::parse(&self.url)?;
        Ok(())
    }
}
