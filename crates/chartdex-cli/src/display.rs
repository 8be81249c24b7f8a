//! Display formatting for CLI output
//!
//! Tables for repositories and packages, the repository detail view, and
//! status coloring shared by all of them.

use chartdex_kube::{AuthDetail, PackageSummary, RepositoryDetail, RepositorySummary, StatusReason};
use chartdex_repo::{IndexCacheEntry, VersionRecord};
use console::{Style, style};
use serde::Serialize;

use crate::error::Result;
use crate::util::truncate_hash;

/// Print any serializable value as pretty JSON
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Color for a status label
pub fn status_style(reason: StatusReason) -> Style {
    match reason {
        StatusReason::Succeeded => Style::new().green(),
        StatusReason::Failed => Style::new().red(),
        StatusReason::Pending => Style::new().yellow(),
    }
}

pub fn print_repositories(repositories: &[RepositorySummary]) {
    println!(
        "{:<20} {:<25} {:<8} {:<12} {}",
        style("NAMESPACE").bold(),
        style("NAME").bold(),
        style("TYPE").bold(),
        style("STATUS").bold(),
        style("URL").bold()
    );

    for repo in repositories {
        let name = if repo.has_credentials {
            format!("{} {}", repo.name, style("*").dim())
        } else {
            repo.name.clone()
        };
        // pad before styling so ANSI codes do not break alignment
        let status = status_style(repo.status.reason).apply_to(format!("{:<12}", repo.status.reason));
        println!(
            "{:<20} {:<25} {:<8} {} {}",
            repo.namespace,
            name,
            repo.repo_type,
            status,
            repo.url
        );
    }
}

pub fn print_detail(detail: &RepositoryDetail) {
    let summary = &detail.summary;
    println!("{}", style("REPOSITORY").bold().underlined());
    println!("  Name:        {}", style(&summary.name).cyan());
    println!("  Namespace:   {}", style(&summary.namespace).yellow());
    println!("  URL:         {}", summary.url);
    println!("  Type:        {}", summary.repo_type);
    println!("  Interval:    {}", detail.interval);
    if let Some(timeout) = &detail.timeout {
        println!("  Timeout:     {}", timeout);
    }
    if detail.suspend {
        println!("  Suspended:   {}", style("yes").yellow());
    }
    println!(
        "  Status:      {}",
        status_style(summary.status.reason).apply_to(summary.status.reason)
    );
    if !summary.status.user_message.is_empty() {
        println!("               {}", style(&summary.status.user_message).dim());
    }

    println!();
    println!("{}", style("AUTH").bold().underlined());
    match &detail.auth {
        AuthDetail::None => println!("  none"),
        AuthDetail::Basic { username } => println!("  basic, user {}", style(username).cyan()),
        AuthDetail::Tls {
            client_certificate,
            custom_ca,
        } => println!(
            "  tls, client certificate: {}, custom CA: {}",
            yes_no(*client_certificate),
            yes_no(*custom_ca)
        ),
        AuthDetail::Redacted { secret } => {
            println!("  secret {} {}", secret, style("(no permission to read)").dim())
        }
        AuthDetail::Unresolved { secret, message } => {
            println!("  secret {} {}", secret, style(message).red())
        }
    }
    if detail.pass_credentials {
        println!("  credentials forwarded to other hosts");
    }

    println!();
    println!("{}", style("INDEX").bold().underlined());
    match (detail.package_count, detail.indexed_at) {
        (Some(count), Some(at)) => println!(
            "  {} packages, fetched {}",
            count,
            at.format("%Y-%m-%d %H:%M:%S")
        ),
        _ => println!("  {}", style("not cached").dim()),
    }
}

pub fn print_packages(packages: &[PackageSummary]) {
    println!(
        "{:<30} {:<12} {:<12} {:<30} {}",
        style("NAME").bold(),
        style("VERSION").bold(),
        style("APP VERSION").bold(),
        style("REPOSITORY").bold(),
        style("DESCRIPTION").bold()
    );

    for package in packages {
        let version = if package.deprecated {
            style(format!("{:<12}", package.latest_version)).dim().to_string()
        } else {
            format!("{:<12}", package.latest_version)
        };
        println!(
            "{:<30} {} {:<12} {:<30} {}",
            package.name,
            version,
            package.app_version.as_deref().unwrap_or("-"),
            package.repository.to_string(),
            truncate_text(package.description.as_deref().unwrap_or(""), 60)
        );
    }
}

pub fn print_versions(versions: &[VersionRecord]) {
    println!(
        "{:<15} {:<15} {:<20} {}",
        style("VERSION").bold(),
        style("APP VERSION").bold(),
        style("CREATED").bold(),
        style("DIGEST").bold()
    );

    for version in versions {
        let created = version
            .created
            .map(|c| c.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        let digest = version
            .digest
            .as_deref()
            .map(|d| truncate_hash(d, 12))
            .unwrap_or("-");
        let marker = if version.deprecated {
            style(" (deprecated)").yellow().to_string()
        } else {
            String::new()
        };
        println!(
            "{:<15} {:<15} {:<20} {}{}",
            version.version,
            version.app_version.as_deref().unwrap_or("-"),
            created,
            digest,
            marker
        );
    }
}

/// Table of local cache entries
pub fn print_cache_entries(entries: &[IndexCacheEntry]) {
    println!(
        "{:<45} {:<10} {:<25} {}",
        style("REPOSITORY").bold(),
        style("PACKAGES").bold(),
        style("VERSION").bold(),
        style("FETCHED").bold()
    );
    for entry in entries {
        println!(
            "{:<45} {:<10} {:<25} {}",
            entry.key.to_string(),
            entry.payload.package_count(),
            entry.source_version,
            entry.fetched_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
}

fn yes_no(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}

/// Cut `text` to at most `max` characters, marking the cut
fn truncate_text(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let cut: String = text.chars().take(max.saturating_sub(3)).collect();
    format!("{}...", cut)
}
