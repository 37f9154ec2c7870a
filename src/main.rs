// ABOUTME: Entry point for the ptu CLI application.
// ABOUTME: Resolves the tunnel definition, prints settings and runs the forwarding loop.

mod cli;

use clap::Parser;
use cli::Cli;
use ptu::config::{Settings, TunnelConfig};
use ptu::error::Result;
use ptu::output;
use ptu::tunnel::ForwardingLoop;
use std::env;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // RUST_LOG wins; otherwise warn for dependencies, info (or debug) for ptu
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("warn,ptu=info")
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    let config = match resolve_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    if cli.ssh_password.is_some() {
        tracing::warn!("Passing the SSH password on the command line exposes it to other users");
    }

    output::print_banner(&config);

    ForwardingLoop::from_config(config)
        .run_until(shutdown_signal())
        .await;
}

/// Config file (explicit or discovered in the working directory) overlaid with flags.
fn resolve_config(cli: &Cli) -> Result<TunnelConfig> {
    let base = match &cli.config {
        Some(path) => Settings::load(path)?,
        None => {
            let cwd = env::current_dir()?;
            Settings::discover(&cwd)?.unwrap_or_default()
        }
    };
    base.merge(cli.settings()).resolve()
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Cannot listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
