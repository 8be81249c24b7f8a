//! Inspect the local index cache without contacting the cluster

use chartdex_kube::EngineConfig;
use chartdex_repo::IndexStore;
use console::style;

use super::open_store;
use crate::display;
use crate::error::{CliError, Result};
use crate::util::parse_repository;

pub async fn list(config: &EngineConfig, json: bool) -> Result<()> {
    let store = open_store(config)?;
    let mut entries = Vec::new();
    for key in store.keys().await? {
        if let Some(entry) = store.get(&key).await? {
            entries.push(entry);
        }
    }

    if json {
        let rows: Vec<_> = entries
            .iter()
            .map(|e| {
                serde_json::json!({
                    "repository": e.key,
                    "packages": e.payload.package_count(),
                    "versions": e.payload.version_count(),
                    "sourceVersion": e.source_version,
                    "fetchedAt": e.fetched_at,
                })
            })
            .collect();
        return display::print_json(&rows);
    }
    if entries.is_empty() {
        println!("Cache is empty");
        return Ok(());
    }
    display::print_cache_entries(&entries);
    Ok(())
}

pub async fn show(config: &EngineConfig, repository: &str, json: bool) -> Result<()> {
    let key = parse_repository(repository)?;
    let store = open_store(config)?;
    let entry = store.get(&key).await?.ok_or_else(|| CliError::NotFound {
        message: format!("no cached index for {}", key),
    })?;

    if json {
        return display::print_json(&entry);
    }

    println!(
        "{} {}",
        style(&key).cyan().bold(),
        style(format!("@ {}", entry.source_version)).dim()
    );
    println!(
        "  fetched {}, {} packages, {} versions",
        entry.fetched_at.format("%Y-%m-%d %H:%M:%S"),
        entry.payload.package_count(),
        entry.payload.version_count()
    );
    println!();
    for package in &entry.payload.packages {
        let latest = package
            .latest()
            .map(|v| v.version.as_str())
            .unwrap_or("-");
        println!("  {:<30} {}", package.name, style(latest).dim());
    }
    Ok(())
}

pub async fn remove(config: &EngineConfig, repository: &str) -> Result<()> {
    let key = parse_repository(repository)?;
    let store = open_store(config)?;
    if !store.delete(&key).await? {
        return Err(CliError::NotFound {
            message: format!("no cached index for {}", key),
        });
    }
    println!("{} Removed cached index for {}", style("✓").green(), key);
    Ok(())
}
