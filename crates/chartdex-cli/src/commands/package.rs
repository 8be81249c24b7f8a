//! Package browsing across cached repository indexes

use chartdex_kube::EngineConfig;
use console::style;

use super::{CallerArgs, connect};
use crate::display;
use crate::error::Result;
use crate::util::parse_repository;

pub async fn packages(
    config: &EngineConfig,
    caller: &CallerArgs,
    namespace: Option<&str>,
    json: bool,
) -> Result<()> {
    let service = connect(config).await?;
    let packages = service
        .get_available_package_summaries(&caller.caller(), namespace)
        .await?;

    if json {
        return display::print_json(&packages);
    }
    if packages.is_empty() {
        println!("No packages found");
        println!(
            "  {} indexes appear once 'chartdex run' has fetched them",
            style("→").dim()
        );
        return Ok(());
    }
    display::print_packages(&packages);
    Ok(())
}

pub async fn versions(
    config: &EngineConfig,
    caller: &CallerArgs,
    repository: &str,
    package: &str,
    json: bool,
) -> Result<()> {
    let key = parse_repository(repository)?;
    let service = connect(config).await?;
    let versions = service
        .get_available_package_versions(&caller.caller(), &key, package)
        .await?;

    if json {
        return display::print_json(&versions);
    }
    println!(
        "{} {} in {}",
        style(package).cyan().bold(),
        style(format!("({} versions)", versions.len())).dim(),
        key
    );
    println!();
    display::print_versions(&versions);
    Ok(())
}
