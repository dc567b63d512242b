//! meshctl - Meshplane command line
//!
//! Operates directly on the local state store.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;
mod output;

use commands::{iface, mesh, realize, route, router, rule};
use meshplane_controller::{ControllerConfig, StateManager};

/// Meshplane - WireGuard mesh control plane
#[derive(Parser)]
#[command(name = "meshctl")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "MESHPLANE_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Store directory (overrides the config file)
    #[arg(long, env = "MESHPLANE_STORE", global = true)]
    store: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage routers
    #[command(subcommand)]
    Router(router::RouterCommands),

    /// Manage mesh networks and membership
    #[command(subcommand)]
    Mesh(mesh::MeshCommands),

    /// Manage router interfaces
    #[command(subcommand)]
    Iface(iface::IfaceCommands),

    /// Inspect WireGuard peers
    #[command(subcommand)]
    Peer(iface::PeerCommands),

    /// Manage static routes
    #[command(subcommand)]
    Route(route::RouteCommands),

    /// Manage firewall rules
    #[command(subcommand)]
    Rule(rule::RuleCommands),

    /// Submit a realization job for a router
    Realize(realize::RealizeArgs),

    /// Show what realizing a router would deploy
    Render(realize::RenderArgs),
}

fn init_logging(verbose: bool, json: bool) {
    let level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json().with_writer(std::io::stderr)).init();
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init();
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config_path = cli
        .config
        .unwrap_or_else(meshplane_common::default_config_path);
    let mut config = ControllerConfig::load(&config_path)?;
    if let Some(store) = cli.store {
        config.store_path = store;
    }
    debug!("config {:?}, store {:?}", config_path, config.store_path);

    let state = StateManager::open(&config)?;
    let format = cli.format;

    match cli.command {
        Commands::Router(cmd) => router::execute(cmd, &state, format)?,
        Commands::Mesh(cmd) => mesh::execute(cmd, &state, format).await?,
        Commands::Iface(cmd) => iface::execute(cmd, &state, format)?,
        Commands::Peer(cmd) => iface::execute_peer(cmd, &state, format)?,
        Commands::Route(cmd) => route::execute(cmd, &state, format)?,
        Commands::Rule(cmd) => rule::execute(cmd, &state, format)?,
        Commands::Realize(args) => realize::execute(args, &state, format).await?,
        Commands::Render(args) => realize::render(args, &state).await?,
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_json);

    if let Err(e) = run(cli).await {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}
