//! `hh`: development HTTP server.
//!
//! ```text
//!   Client ──▶ net::Listener ──▶ http::HttpServer ──▶ pipeline stages ──▶ handler::FileHandler
//!                (bounded)         (hyper HTTP/1.1)     (logger, ttfb,        (file bytes or
//!                                                        bandwidth, etag…)     directory listing)
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use http_helper::config::Settings;
use http_helper::lifecycle::{assemble_config, load_env_file, wait_for_signal, Shutdown};
use http_helper::net::Listener;
use http_helper::observability::init_tracing;
use http_helper::platforms::s3::Presigner;
use http_helper::{HttpServer, Platform};

#[derive(Debug, Parser)]
#[command(name = "hh", version, about = "Serve a directory while imitating other HTTP servers")]
struct Cli {
    /// Address to bind.
    #[arg(long)]
    bind: Option<String>,

    /// Port to listen on.
    #[arg(long, short)]
    port: Option<u16>,

    /// Directory to serve.
    #[arg(long, short)]
    directory: Option<PathBuf>,

    /// Server to imitate.
    #[arg(long, value_enum)]
    platform: Option<Platform>,

    /// TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Path answering readiness checks.
    #[arg(long)]
    health_path: Option<String>,

    /// Env file to load instead of a discovered `.env`.
    #[arg(long)]
    env_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print a presigned object storage URL.
    Presign {
        /// HTTP method the URL is valid for.
        method: String,
        /// Object key.
        object: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let env_file = load_env_file(cli.env_file.as_deref())?;
    let settings = Settings::from_env();

    if let Some(Command::Presign { method, object }) = &cli.command {
        let presigner = Presigner::from_settings(&settings)?;
        println!("{}", presigner.sign(method, object)?);
        return Ok(());
    }

    let config = assemble_config(cli.config.as_deref(), &settings, |config| {
        if let Some(bind) = cli.bind {
            config.listener.bind = bind;
        }
        if let Some(port) = cli.port {
            config.listener.port = port;
        }
        if let Some(directory) = cli.directory {
            config.directory = directory;
        }
        if let Some(platform) = cli.platform {
            config.platform = platform;
        }
        if let Some(path) = cli.health_path {
            config.health_path = Some(path);
        }
    })?;

    init_tracing(&config.log_level)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "hh starting");
    if let Some(path) = &env_file {
        tracing::debug!(path = %path.display(), "Environment file loaded");
    }
    tracing::debug!(
        address = %config.listener.address(),
        directory = %config.directory.display(),
        platform = %config.platform,
        "Configuration loaded"
    );

    let listener = Listener::bind(&config.listener).await?;
    let local_addr = listener.local_addr()?;
    println!(
        "Serving HTTP on {} port {} (http://{}/)",
        local_addr.ip(),
        local_addr.port(),
        local_addr
    );

    let shutdown = Shutdown::new();
    let signalled = shutdown.signalled();
    tokio::spawn(async move {
        wait_for_signal().await;
        shutdown.trigger();
    });

    HttpServer::new(config, settings).run(listener, signalled).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
