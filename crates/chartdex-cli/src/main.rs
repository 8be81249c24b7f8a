//! Chartdex CLI - browse and manage Helm chart repositories in a cluster

use chartdex_kube::SecretMode;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod display;
mod error;
mod exit_codes;
mod util;

use commands::CallerArgs;
use commands::repo::RepositoryArgs;
use error::Result;

#[derive(Parser)]
#[command(name = "chartdex")]
#[command(version)]
#[command(about = "Index and browse Helm chart repositories declared in a cluster", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug output
    #[arg(long, global = true)]
    debug: bool,

    /// Configuration file
    #[arg(long, global = true, env = "CHARTDEX_CONFIG")]
    config: Option<PathBuf>,

    /// Override who owns repository secrets (system-managed or user-managed)
    #[arg(long, global = true, env = "CHARTDEX_SECRET_MODE")]
    secret_mode: Option<SecretMode>,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch repositories and keep the index cache up to date
    Run {
        /// Only watch this namespace
        #[arg(short, long)]
        namespace: Option<String>,

        /// Keep indexes in memory instead of the cache database
        #[arg(long)]
        memory: bool,
    },

    /// List repositories
    Repos {
        #[command(flatten)]
        caller: CallerArgs,

        /// Namespace (all namespaces the caller may list when omitted)
        #[arg(short, long)]
        namespace: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show one repository, its auth and index state
    Show {
        #[command(flatten)]
        caller: CallerArgs,

        /// Repository as <namespace>/<name>
        repository: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Add a repository
    Add {
        #[command(flatten)]
        caller: CallerArgs,

        #[command(flatten)]
        args: RepositoryArgs,
    },

    /// Update a repository's URL, type, interval or credentials
    Update {
        #[command(flatten)]
        caller: CallerArgs,

        #[command(flatten)]
        args: RepositoryArgs,
    },

    /// Remove a repository
    Remove {
        #[command(flatten)]
        caller: CallerArgs,

        /// Repository as <namespace>/<name>
        repository: String,
    },

    /// List the latest version of every available package
    Packages {
        #[command(flatten)]
        caller: CallerArgs,

        #[arg(short, long)]
        namespace: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List all versions of a package
    Versions {
        #[command(flatten)]
        caller: CallerArgs,

        /// Repository as <namespace>/<name>
        repository: String,

        /// Package name
        package: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Inspect the local index cache
    #[command(subcommand)]
    Cache(CacheCommands),

    /// Manage the engine configuration
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
enum CacheCommands {
    /// List cached indexes
    List {
        #[arg(long)]
        json: bool,
    },

    /// Show the packages of a cached index
    Show {
        /// Repository as <namespace>/<name>
        repository: String,

        #[arg(long)]
        json: bool,
    },

    /// Drop a cached index
    Remove {
        /// Repository as <namespace>/<name>
        repository: String,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration
    Show,

    /// Print the configuration file location
    Path,

    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn init_tracing(cli: &Cli) {
    let default = if cli.debug {
        "debug"
    } else if matches!(cli.command, Commands::Run { .. }) {
        "info"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

async fn dispatch(cli: Cli) -> Result<()> {
    let config_file = cli.config.as_deref();

    if let Commands::Config(command) = &cli.command {
        return match command {
            ConfigCommands::Show => commands::config::show(config_file),
            ConfigCommands::Path => commands::config::path(config_file),
            ConfigCommands::Init { force } => commands::config::init(config_file, *force),
        };
    }

    let mut config = commands::load_config(config_file)?;
    if let Some(mode) = cli.secret_mode {
        config.secret_mode = mode;
    }

    match &cli.command {
        Commands::Run { namespace, memory } => {
            commands::run::run(&config, namespace.as_deref(), *memory).await
        }

        Commands::Repos {
            caller,
            namespace,
            json,
        } => commands::repo::list(&config, caller, namespace.as_deref(), *json).await,

        Commands::Show {
            caller,
            repository,
            json,
        } => commands::repo::show(&config, caller, repository, *json).await,

        Commands::Add { caller, args } => commands::repo::add(&config, caller, args).await,

        Commands::Update { caller, args } => commands::repo::update(&config, caller, args).await,

        Commands::Remove { caller, repository } => {
            commands::repo::remove(&config, caller, repository).await
        }

        Commands::Packages {
            caller,
            namespace,
            json,
        } => commands::package::packages(&config, caller, namespace.as_deref(), *json).await,

        Commands::Versions {
            caller,
            repository,
            package,
            json,
        } => commands::package::versions(&config, caller, repository, package, *json).await,

        Commands::Cache(command) => match command {
            CacheCommands::List { json } => commands::cache::list(&config, *json).await,
            CacheCommands::Show { repository, json } => {
                commands::cache::show(&config, repository, *json).await
            }
            CacheCommands::Remove { repository } => {
                commands::cache::remove(&config, repository).await
            }
        },

        Commands::Config(_) => Ok(()),
    }
}

#[tokio::main]
async fn main() {
    miette::set_panic_hook();

    let cli = Cli::parse();
    init_tracing(&cli);

    if let Err(err) = dispatch(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}
