//! Repository commands: list, show, add, update, remove

use chartdex_kube::{CredentialInput, EngineConfig, RepositoryRequest};
use chartdex_repo::RepositoryRef;
use clap::Args;
use console::style;
use std::path::{Path, PathBuf};

use super::{CallerArgs, connect};
use crate::display;
use crate::error::{CliError, Result};
use crate::util::parse_repository;

/// Fields shared by `add` and `update`
#[derive(Args, Debug, Clone)]
pub struct RepositoryArgs {
    /// Repository as <namespace>/<name>
    pub repository: String,

    /// Index URL (https://… or oci://…)
    pub url: String,

    /// Repository type (helm or oci); derived from the URL when omitted
    #[arg(long = "type", value_name = "TYPE")]
    pub repo_type: Option<String>,

    /// Resync interval, e.g. 10m
    #[arg(long)]
    pub interval: Option<String>,

    /// Send credentials to hosts other than the index host
    #[arg(long)]
    pub pass_credentials: bool,

    #[command(flatten)]
    pub credentials: CredentialArgs,
}

impl RepositoryArgs {
    pub fn request(&self) -> Result<RepositoryRequest> {
        let key = parse_repository(&self.repository)?;
        let mut request = RepositoryRequest::new(key, &self.url)
            .with_credentials(self.credentials.input()?);
        if let Some(interval) = &self.interval {
            request = request.with_interval(interval);
        }
        request.repo_type = self.repo_type.clone();
        request.pass_credentials = self.pass_credentials;
        Ok(request)
    }
}

#[derive(Args, Debug, Clone, Default)]
pub struct CredentialArgs {
    /// Basic auth username
    #[arg(long, requires = "password")]
    pub username: Option<String>,

    /// Basic auth password
    #[arg(long, env = "CHARTDEX_PASSWORD", hide_env_values = true, requires = "username")]
    pub password: Option<String>,

    /// Client certificate (PEM)
    #[arg(long, requires = "key_file")]
    pub cert_file: Option<PathBuf>,

    /// Client key (PEM)
    #[arg(long, requires = "cert_file")]
    pub key_file: Option<PathBuf>,

    /// CA bundle (PEM)
    #[arg(long)]
    pub ca_file: Option<PathBuf>,

    /// Existing secret holding the credentials (user-managed secrets only)
    #[arg(long, conflicts_with_all = ["username", "cert_file", "ca_file"])]
    pub secret: Option<String>,
}

impl CredentialArgs {
    pub fn input(&self) -> Result<CredentialInput> {
        if let Some(secret) = &self.secret {
            return Ok(CredentialInput::SecretRef(secret.clone()));
        }

        let basic = self.username.is_some() || self.password.is_some();
        let tls = self.cert_file.is_some() || self.key_file.is_some() || self.ca_file.is_some();
        if basic && tls {
            return Err(CliError::input_with_help(
                "basic auth and TLS credentials cannot be combined",
                "pass either --username/--password or --cert-file/--key-file",
            ));
        }

        if basic {
            let (Some(username), Some(password)) = (&self.username, &self.password) else {
                return Err(CliError::input("--username and --password go together"));
            };
            return Ok(CredentialInput::Basic {
                username: username.clone(),
                password: password.clone(),
            });
        }

        if tls {
            let (Some(cert), Some(key)) = (&self.cert_file, &self.key_file) else {
                return Err(CliError::input(
                    "a TLS client needs both --cert-file and --key-file",
                ));
            };
            return Ok(CredentialInput::Tls {
                cert_pem: read_pem(cert)?,
                key_pem: read_pem(key)?,
                ca_pem: self.ca_file.as_deref().map(read_pem).transpose()?,
            });
        }

        Ok(CredentialInput::None)
    }
}

fn read_pem(path: &Path) -> Result<String> {
    let content = std::fs::read_to_string(path).map_err(|e| CliError::Io {
        message: format!("cannot read {}: {}", path.display(), e),
    })?;
    if !content.contains("-----BEGIN") {
        return Err(CliError::input(format!(
            "{} is not a PEM file",
            path.display()
        )));
    }
    Ok(content)
}

pub async fn list(
    config: &EngineConfig,
    caller: &CallerArgs,
    namespace: Option<&str>,
    json: bool,
) -> Result<()> {
    let service = connect(config).await?;
    let repositories = service
        .get_repository_summaries(&caller.caller(), namespace)
        .await?;

    if json {
        return display::print_json(&repositories);
    }
    if repositories.is_empty() {
        println!("No repositories found");
        return Ok(());
    }
    display::print_repositories(&repositories);
    Ok(())
}

pub async fn show(
    config: &EngineConfig,
    caller: &CallerArgs,
    repository: &str,
    json: bool,
) -> Result<()> {
    let key = parse_repository(repository)?;
    let service = connect(config).await?;
    let detail = service.get_repository_detail(&caller.caller(), &key).await?;

    if json {
        return display::print_json(&detail);
    }
    display::print_detail(&detail);
    Ok(())
}

pub async fn add(config: &EngineConfig, caller: &CallerArgs, args: &RepositoryArgs) -> Result<()> {
    let request = args.request()?;
    let key = request.key.clone();
    let service = connect(config).await?;
    service.add_repository(&caller.caller(), request).await?;

    println!("{} Added repository {}", style("✓").green(), style(&key).cyan());
    print_poll_hint(&key);
    Ok(())
}

pub async fn update(
    config: &EngineConfig,
    caller: &CallerArgs,
    args: &RepositoryArgs,
) -> Result<()> {
    let request = args.request()?;
    let key = request.key.clone();
    let service = connect(config).await?;
    service.update_repository(&caller.caller(), request).await?;

    println!("{} Updated repository {}", style("✓").green(), style(&key).cyan());
    print_poll_hint(&key);
    Ok(())
}

pub async fn remove(config: &EngineConfig, caller: &CallerArgs, repository: &str) -> Result<()> {
    let key = parse_repository(repository)?;
    let service = connect(config).await?;
    service.delete_repository(&caller.caller(), &key).await?;

    println!("{} Removed repository {}", style("✓").green(), style(&key).cyan());
    Ok(())
}

fn print_poll_hint(key: &RepositoryRef) {
    println!(
        "  {} the index is fetched in the background; check with 'chartdex show {}'",
        style("→").dim(),
        key
    );
}
