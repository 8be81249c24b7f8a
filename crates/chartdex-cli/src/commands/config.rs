//! Engine configuration commands

use chartdex_kube::EngineConfig;
use console::style;
use std::path::{Path, PathBuf};

use super::load_config;
use crate::error::{CliError, Result};
use crate::util::format_size;

fn config_path(path: Option<&Path>) -> Result<PathBuf> {
    match path {
        Some(path) => Ok(path.to_path_buf()),
        None => Ok(EngineConfig::default_path()?),
    }
}

/// Print the effective configuration as YAML
pub fn show(path: Option<&Path>) -> Result<()> {
    let config = load_config(path)?;
    print!("{}", serde_yaml::to_string(&config)?);
    if let Some(max) = config.max_index_size {
        println!("# maxIndexSize = {}", format_size(max));
    }
    Ok(())
}

pub fn path(path: Option<&Path>) -> Result<()> {
    let path = config_path(path)?;
    let marker = if path.exists() {
        style("").dim()
    } else {
        style(" (not created)").dim()
    };
    println!("{}{}", path.display(), marker);
    Ok(())
}

/// Write the default configuration
pub fn init(path: Option<&Path>, force: bool) -> Result<()> {
    let path = config_path(path)?;
    if path.exists() && !force {
        return Err(CliError::input_with_help(
            format!("{} already exists", path.display()),
            "use --force to overwrite it",
        ));
    }
    EngineConfig::default().save_to(&path)?;
    println!("{} Wrote {}", style("✓").green(), path.display());
    Ok(())
}
