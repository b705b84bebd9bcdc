use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;
use modhost::{run, HandlerKind, HostRuntime, Module, RunOptions, ShutdownOptions, SqlConfigStore};
use modhost_bootstrap::{AppConfig, CliArgs};

use std::path::{Path, PathBuf};
use std::sync::Arc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// ModHost Server - module host for GraphQL engine actions and event triggers
#[derive(Parser)]
#[command(name = "modhost-server")]
#[command(about = "ModHost Server - module host for GraphQL engine actions and event triggers")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port override for the internal (actions/events) listener
    #[arg(long)]
    internal_port: Option<u16>,

    /// Port override for the external (module REST) listener
    #[arg(long)]
    external_port: Option<u16>,

    /// Print effective configuration (YAML) and exit
    #[arg(long)]
    print_config: bool,

    /// Log verbosity level (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Use an in-memory SQLite config store instead of the configured database
    #[arg(long)]
    mock: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server
    Run,
    /// Validate configuration, run every module hook and exit
    Check,
}

/// Modules hosted by this binary, in the order their hooks run.
fn modules() -> Vec<Arc<dyn Module>> {
    vec![Arc::new(greeter::GreeterModule)]
}

#[tokio::main]
async fn main() -> Result<()> {
    // Before anything reads the environment.
    let env_file = modhost_bootstrap::load_env_files();

    let cli = Cli::parse();

    let args = CliArgs {
        config: cli.config.as_ref().map(|p| p.to_string_lossy().to_string()),
        internal_port: cli.internal_port,
        external_port: cli.external_port,
        print_config: cli.print_config,
        verbose: cli.verbose,
        mock: cli.mock,
    };

    // Layered config:
    // 1) defaults -> 2) YAML (if provided) -> 3) env (APP_*, DB_*) -> 4) CLI overrides
    let mut config = AppConfig::load_or_default(cli.config.as_deref())?;
    config.apply_cli_overrides(&args);

    if cli.print_config {
        println!("{}", config.to_yaml()?);
        return Ok(());
    }

    let logging_config = config.logging.clone().unwrap_or_default();
    modhost_bootstrap::init_logging(&logging_config, Path::new(&config.server.logs_dir));

    match env_file {
        Some(file) => tracing::info!(file, "Loaded environment file"),
        None if !config.server.production => {
            tracing::warn!("No .env file found; using process environment only")
        }
        None => {}
    }

    tracing::info!("ModHost Server starting");

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_server(config).await,
        Commands::Check => check_config(config).await,
    }
}

async fn connect_store(config: &AppConfig) -> Result<Arc<SqlConfigStore>> {
    let dsn = config.database.dsn();
    let store = SqlConfigStore::connect(&dsn, config.database.max_conns)
        .await
        .context("Failed to open the config store")?;
    tracing::info!(
        in_memory = dsn.contains(":memory:"),
        max_conns = config.database.max_conns,
        "Config store ready"
    );
    Ok(Arc::new(store))
}

async fn run_server(config: AppConfig) -> Result<()> {
    tracing::info!("Initializing modules…");
    let store = connect_store(&config).await?;

    run(RunOptions {
        server: config.server,
        store,
        modules: modules(),
        shutdown: ShutdownOptions::Signals,
    })
    .await
}

async fn check_config(config: AppConfig) -> Result<()> {
    tracing::info!("Checking configuration…");
    let store = connect_store(&config).await?;

    let mut host = modules()
        .into_iter()
        .fold(HostRuntime::builder(store), |b, m| b.module_arc(m))
        .build()?;
    host.prepare().await?;

    let handlers = host.handlers();
    println!("Configuration is valid");
    println!("modules: {}", host.registry().names().join(", "));
    println!("actions: {}", handlers.names(HandlerKind::Action).join(", "));
    println!("events: {}", handlers.names(HandlerKind::Event).join(", "));
    Ok(())
}
