//! Auth material and a credential-scoped HTTP client
//!
//! Key security features:
//! - Credentials scoped to the repository origin
//! - NEVER sends credentials after cross-origin redirect (unless asked to)
//! - TLS client identities and custom CA bundles per repository

use futures::StreamExt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::{RepoError, Result};

/// Most memory reserved up front from a server-announced `Content-Length`
const PREALLOC_LIMIT: u64 = 8 * 1024 * 1024;

/// Resolved authentication material for one repository
#[derive(Clone, Default)]
pub enum AuthMaterial {
    #[default]
    None,
    Basic {
        username: String,
        password: String,
    },
    /// TLS client certificate/key (empty when only a CA is given), with an optional CA bundle
    Tls {
        cert_pem: Vec<u8>,
        key_pem: Vec<u8>,
        ca_pem: Option<Vec<u8>>,
    },
}

// Hand-written so secrets never end up in logs
impl std::fmt::Debug for AuthMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthMaterial::None => f.write_str("None"),
            AuthMaterial::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            AuthMaterial::Tls { ca_pem, .. } => f
                .debug_struct("Tls")
                .field("ca", &ca_pem.is_some())
                .finish_non_exhaustive(),
        }
    }
}

impl AuthMaterial {
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        AuthMaterial::Basic {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Authorization header value, if this material is header based
    pub fn auth_header(&self) -> Option<String> {
        match self {
            AuthMaterial::Basic { username, password } => {
                let encoded = base64::Engine::encode(
                    &base64::engine::general_purpose::STANDARD,
                    format!("{}:{}", username, password),
                );
                Some(format!("Basic {}", encoded))
            }
            AuthMaterial::None | AuthMaterial::Tls { .. } => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, AuthMaterial::None)
    }

    /// Short label for logs and status messages
    pub fn kind(&self) -> &'static str {
        match self {
            AuthMaterial::None => "none",
            AuthMaterial::Basic { .. } => "basic-auth",
            AuthMaterial::Tls { .. } => "tls",
        }
    }
}

/// Check if two URLs are same-origin (for redirect safety)
pub fn same_origin(url1: &str, url2: &str) -> bool {
    match (Url::parse(url1), Url::parse(url2)) {
        (Ok(u1), Ok(u2)) => {
            u1.scheme() == u2.scheme()
                && u1.host() == u2.host()
                && u1.port_or_known_default() == u2.port_or_known_default()
        }
        _ => false,
    }
}

/// HTTP client bound to one repository's credentials, with redirect protection
pub struct SecureHttpClient {
    client: reqwest::Client,
    auth: AuthMaterial,
    pass_credentials: bool,
}

impl SecureHttpClient {
    /// Create a client for the given auth material
    pub fn new(auth: AuthMaterial, timeout: Duration) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            // CRITICAL: Disable automatic redirect following
            // We handle redirects manually to prevent credential leaks
            .redirect(reqwest::redirect::Policy::none())
            .timeout(timeout);

        if let AuthMaterial::Tls {
            cert_pem,
            key_pem,
            ca_pem,
        } = &auth
        {
            // A CA bundle alone is valid: server verification without a client identity
            if !cert_pem.is_empty() {
                let mut pem = cert_pem.clone();
                pem.push(b'\n');
                pem.extend_from_slice(key_pem);
                let identity = reqwest::Identity::from_pem(&pem).map_err(|e| {
                    RepoError::InvalidCredentials {
                        message: format!("invalid TLS certificate/key: {}", e),
                    }
                })?;
                builder = builder.identity(identity);
            }

            if let Some(ca) = ca_pem {
                let cert = reqwest::Certificate::from_pem(ca).map_err(|e| {
                    RepoError::InvalidCredentials {
                        message: format!("invalid CA bundle: {}", e),
                    }
                })?;
                builder = builder.add_root_certificate(cert);
            }
        }

        let client = builder.build().map_err(|e| RepoError::NetworkError {
            message: e.to_string(),
        })?;

        Ok(Self {
            client,
            auth,
            pass_credentials: false,
        })
    }

    /// Create without credentials (public repos)
    pub fn public(timeout: Duration) -> Result<Self> {
        Self::new(AuthMaterial::None, timeout)
    }

    /// Forward credentials across origins on redirect
    pub fn pass_credentials(mut self, pass: bool) -> Self {
        self.pass_credentials = pass;
        self
    }

    /// Fetch a URL with secure redirect handling
    ///
    /// SECURITY: Credentials are NEVER sent after cross-origin redirects
    pub async fn get(&self, url: &str) -> Result<reqwest::Response> {
        self.get_with_redirects(url, 10).await
    }

    async fn get_with_redirects(&self, url: &str, max_redirects: u32) -> Result<reqwest::Response> {
        let mut current_url = url.to_string();
        let mut redirects = 0;

        loop {
            let mut request = self.client.get(&current_url);

            if self.pass_credentials || same_origin(url, &current_url) {
                if let Some(auth) = self.auth.auth_header() {
                    request = request.header("Authorization", auth);
                }
            } else if !self.auth.is_none() {
                tracing::warn!(
                    "Cross-origin redirect from {} to {} - credentials not forwarded",
                    url,
                    current_url
                );
            }

            let response = request.send().await?;
            let status = response.status();

            if status.is_redirection() {
                redirects += 1;
                if redirects > max_redirects {
                    return Err(RepoError::NetworkError {
                        message: format!("Too many redirects (max {})", max_redirects),
                    });
                }

                let location = response
                    .headers()
                    .get("Location")
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| RepoError::NetworkError {
                        message: "Redirect without Location header".to_string(),
                    })?;

                let base = Url::parse(&current_url)?;
                current_url = base.join(location)?.to_string();
                continue;
            }

            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                let retry_after = response
                    .headers()
                    .get("Retry-After")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(60);

                return Err(RepoError::RateLimited { retry_after });
            }

            if status == reqwest::StatusCode::UNAUTHORIZED
                || status == reqwest::StatusCode::FORBIDDEN
            {
                return Err(RepoError::AuthFailed {
                    url: current_url,
                    status: status.to_string(),
                });
            }

            if !status.is_success() {
                return Err(RepoError::HttpError {
                    url: current_url,
                    status: status.to_string(),
                });
            }

            return Ok(response);
        }
    }

    /// Stream a response body into memory, observing `cancel` between chunks
    pub async fn get_bytes(
        &self,
        url: &str,
        max_size: Option<u64>,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>> {
        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(RepoError::Cancelled),
            res = self.get(url) => res?,
        };

        if let (Some(max), Some(len)) = (max_size, response.content_length()) {
            if len > max {
                return Err(RepoError::IndexTooLarge {
                    url: url.to_string(),
                    max,
                });
            }
        }

        let announced = response.content_length().unwrap_or(0);
        let mut body = Vec::with_capacity(announced.min(PREALLOC_LIMIT) as usize);
        let mut stream = response.bytes_stream();
        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => return Err(RepoError::Cancelled),
                chunk = stream.next() => chunk,
            };
            let Some(chunk) = chunk else { break };
            let chunk = chunk.map_err(|e| RepoError::NetworkError {
                message: format!("transfer of {} interrupted: {}", url, e),
            })?;
            body.extend_from_slice(&chunk);
            if let Some(max) = max_size {
                if body.len() as u64 > max {
                    return Err(RepoError::IndexTooLarge {
                        url: url.to_string(),
                        max,
                    });
                }
            }
        }

        Ok(body)
    }
}
