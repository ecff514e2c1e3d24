//! toolgate - federated tool hub with sandboxed script execution.
//!
//! Two modes share one binary:
//!
//! - `toolgate [--config PATH]` runs the hub: connects every configured
//!   backend, generates typed bindings, ensures the sandbox, and serves
//!   the four meta-operations to the chat loop over stdio (plus HTTP
//!   when a port is configured).
//! - `toolgate proxy-serve [--config PATH]` runs the in-container
//!   federation proxy. Exposes the full namespaced catalog over HTTP to
//!   scripts running in the sandbox.

mod bootstrap;
mod config;

use std::path::PathBuf;

use anyhow::{bail, Result};
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::HubConfig;

const DEFAULT_CONFIG_PATH: &str = "toolgate.json";

enum Mode {
    Serve,
    ProxyServe,
}

struct CliArgs {
    mode: Mode,
    config_path: PathBuf,
}

fn parse_args() -> Result<CliArgs> {
    let mut mode = Mode::Serve;
    let mut config_path = PathBuf::from(DEFAULT_CONFIG_PATH);

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "proxy-serve" => mode = Mode::ProxyServe,
            "--config" => {
                let Some(path) = args.next() else {
                    bail!("--config requires a path");
                };
                config_path = PathBuf::from(path);
            }
            "--help" | "-h" => {
                eprintln!("Usage: toolgate [proxy-serve] [--config PATH]");
                std::process::exit(0);
            }
            other => bail!("unknown argument: {other}"),
        }
    }

    Ok(CliArgs { mode, config_path })
}

#[tokio::main]
async fn main() -> Result<()> {
    // Diagnostics go to stderr; stdout belongs to the protocol.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    let args = parse_args()?;
    let config = HubConfig::load(&args.config_path)?;

    match args.mode {
        Mode::Serve => {
            info!(
                "starting toolgate v{} with {} backend(s)",
                env!("CARGO_PKG_VERSION"),
                config.servers.len()
            );
            bootstrap::run(config).await
        }
        Mode::ProxyServe => {
            info!("starting in-container proxy");
            bootstrap::run_proxy(config).await
        }
    }
}
