//! Rendezvous Node -- WebSocket signaling server.
//!
//! Usage:
//!   rendezvous-node                        # Run with ./rendezvous.toml or defaults
//!   rendezvous-node --config path.toml     # Run with custom config
//!   rendezvous-node check-config           # Validate config and list apps

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use rendezvous_node::config::NodeConfig;
use rendezvous_node::expand_tilde;
use rendezvous_node::server::SignalingServer;

/// How long sessions get to close after Ctrl-C.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "rendezvous-node", about = "WebSocket signaling relay")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "rendezvous.toml")]
    config: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the server (default)
    Run,
    /// Load and validate the config, then print the effective apps
    CheckConfig,
    /// Print the default config as TOML
    PrintDefaultConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path = expand_tilde(&cli.config);

    match cli.command {
        Some(Commands::PrintDefaultConfig) => {
            print!("{}", toml::to_string_pretty(&NodeConfig::default())?);
        }
        Some(Commands::CheckConfig) => {
            let cfg = load_config(&config_path)?;
            println!("config: {}", config_path.display());
            println!("listen: {}", cfg.server.listen_addr);
            for pool in cfg.pool_configs() {
                println!(
                    "app {} sharing={} max_address_length={}",
                    pool.path, pool.address_sharing, pool.max_address_length
                );
            }
        }
        Some(Commands::Run) | None => {
            let cfg = load_config(&config_path)?;
            run_server(cfg).await?;
        }
    }

    Ok(())
}

/// Load config, start logging, then apply environment overrides.
fn load_config(path: &Path) -> anyhow::Result<NodeConfig> {
    let mut cfg = NodeConfig::load_or_default(path)?;
    init_tracing(&cfg);
    cfg.apply_env()?;
    Ok(cfg)
}

fn init_tracing(cfg: &NodeConfig) {
    let default_filter = if cfg.server.log_verbose {
        "rendezvous_node=debug,rendezvous_protocol=debug"
    } else {
        "rendezvous_node=info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    if cfg.server.log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn run_server(cfg: NodeConfig) -> anyhow::Result<()> {
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        listen = %cfg.server.listen_addr,
        keepalive_secs = cfg.server.keepalive_interval_secs,
        max_payload = cfg.server.max_payload,
        "starting rendezvous-node"
    );

    let server = Arc::new(SignalingServer::from_config(&cfg));
    let listener = tokio::net::TcpListener::bind(cfg.listen_socket_addr()?).await?;

    // Shutdown broadcast channel
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    let server_handle = {
        let shutdown = shutdown_tx.subscribe();
        let server = server.clone();
        tokio::spawn(async move {
            if let Err(e) = server.serve(listener, shutdown).await {
                tracing::error!("server error: {e}");
            }
        })
    };

    tracing::info!("server running, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down...");
    let _ = shutdown_tx.send(());

    let _ = server_handle.await;
    server.wait_drained(SHUTDOWN_GRACE).await;
    tracing::info!("shutdown complete");
    Ok(())
}
