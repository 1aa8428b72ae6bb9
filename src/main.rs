use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;
use trellis::{Router, Server, ServerConfig, ServerError};

mod handlers;

/// Serve the echo, user-agent and file routes.
#[derive(Debug, Parser)]
#[command(name = "trellis", version, about)]
struct Cli {
    /// Directory the /files routes read from and write to
    #[arg(long)]
    directory: Option<PathBuf>,

    /// Address to bind
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(long)]
    port: Option<u16>,
}

fn main() -> Result<(), ServerError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("trellis=info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = ServerConfig::new()?;
    if let Some(directory) = cli.directory {
        config.directory = directory;
    }
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }

    log::info!("serving directory {}", config.directory.display());

    let mut router = Router::new();
    handlers::register(&mut router, config.directory.clone())?;

    Server::from_config(&config)?.serve(router)
}
