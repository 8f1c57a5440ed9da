mod auth;
mod config;
mod sandbox;
mod server;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::auth::AccessGate;
use crate::config::Config;
use crate::sandbox::Sandbox;

fn print_help() {
    println!(
        "\
allybox v{}

A key-gated HTTP service that runs untrusted scripts in an embedded sandbox.

USAGE:
    allybox [OPTIONS] [CONFIG_PATH]

ARGUMENTS:
    CONFIG_PATH    Path to TOML configuration file [default: config/allybox.toml]
                   The file is optional; built-in defaults are used when absent.

OPTIONS:
    -h, --help       Print this help message and exit
    -V, --version    Print version and exit

ENVIRONMENT VARIABLES:
    Variables are referenced in the config file via ${{VAR_NAME}} syntax.

    RUST_LOG     Log level filter for tracing
                 (e.g. debug, allybox=debug,warn)
    ALLY_KEY     Shared secret required in the x-ally-key request header.
                 When unset, every request is denied (fail-closed).

EXAMPLES:
    ALLY_KEY=secret allybox                  # uses config/allybox.toml if present
    ALLY_KEY=secret allybox /etc/allybox.toml
    RUST_LOG=debug ALLY_KEY=secret allybox   # with debug logging",
        env!("CARGO_PKG_VERSION"),
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    // Handle --help / --version before anything else
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("allybox v{}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            _ => {}
        }
    }

    // Initialize logging (RUST_LOG=debug for debug mode)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("allybox=info")),
        )
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/allybox.toml".to_string());

    info!("Loading configuration from {config_path}");
    let config = Config::load(&config_path)?;

    info!("Allowed origin: {}", config.server.allowed_origin);
    info!(
        "Sandbox limits: {} ms deadline, {} max operations",
        config.sandbox.timeout_ms, config.sandbox.max_operations
    );

    let gate = AccessGate::from_env();
    let sandbox = Sandbox::new(config.sandbox.clone());
    let app = server::router(&config.server, gate, sandbox)?;

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("✓ allybox server is running on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received, exiting");
        })
        .await?;

    Ok(())
}
