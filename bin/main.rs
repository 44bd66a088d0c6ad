#![deny(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

use std::{net::IpAddr, path::PathBuf, sync::Arc, time::Duration};

use clap::Parser;
use mxroute::{
    Signal, config::Config, dns::DnsMx, internal, logging, router::Router, server::Server,
};
use tokio::sync::broadcast;
use tracing_subscriber::filter::LevelFilter;

#[cfg(not(any(target_os = "macos", unix)))]
compile_error!("Only macos and unix are currently supported");

/// A weighted MX-based transport map responder for Postfix.
#[derive(Parser)]
#[command(version, about)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Host to bind to, overriding the configuration
    #[arg(short = 'H', long)]
    host: Option<IpAddr>,

    /// Port to listen on, overriding the configuration
    #[arg(short, long)]
    port: Option<u16>,

    /// MX cache TTL in seconds, overriding the configuration (0 disables)
    #[arg(long)]
    cache_ttl: Option<u64>,

    /// Client inactivity timeout in seconds, overriding the configuration
    /// (0 disables)
    #[arg(long)]
    timeout: Option<u64>,

    /// Log debug detail
    #[arg(short, long)]
    verbose: bool,

    /// Log errors only
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    logging::init(if args.quiet {
        LevelFilter::ERROR
    } else if args.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    });

    let path = find_config_file(args.config)?;
    let mut config = Config::from_path(&path)
        .map_err(|err| anyhow::anyhow!("Failed to load {}: {err}", path.display()))?;

    if let Some(host) = args.host {
        config.listen.set_ip(host);
    }
    if let Some(port) = args.port {
        config.listen.set_port(port);
    }
    if let Some(cache_ttl) = args.cache_ttl {
        config.cache_ttl_secs = cache_ttl;
    }
    if let Some(timeout) = args.timeout {
        config.client_timeout_secs = timeout;
    }

    let lookup = Arc::new(DnsMx::new(Duration::from_secs(config.dns_timeout_secs))?);
    let router = Arc::new(Router::from_config(&config, lookup)?);

    let client_timeout =
        (config.client_timeout_secs > 0).then(|| Duration::from_secs(config.client_timeout_secs));
    let server = Server::bind(
        config.listen,
        Arc::clone(&router),
        client_timeout,
        Duration::from_secs(config.gc_interval_secs),
    )
    .await?;

    let (shutdown_tx, _) = broadcast::channel(16);
    let mut serve = tokio::spawn({
        let shutdown = shutdown_tx.subscribe();
        async move { server.serve(shutdown).await }
    });

    tokio::select! {
        result = &mut serve => result??,
        result = shutdown_signal() => {
            result?;
            shutdown_tx
                .send(Signal::Shutdown)
                .map_err(|err| anyhow::anyhow!("Failed to broadcast shutdown: {err}"))?;
            serve.await??;
        }
    }

    // The operator report: what each server actually carried.
    println!("{}", router.registry().snapshot());

    Ok(())
}

async fn shutdown_signal() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            internal!("CTRL+C received, shutting down");
        }
        _ = terminate.recv() => {
            internal!("Terminate signal received, shutting down");
        }
    }

    Ok(())
}

/// Find the configuration file using the following precedence:
/// 1. `--config` on the command line
/// 2. `MXROUTE_CONFIG` environment variable
/// 3. ./mxroute.config.ron (current working directory)
/// 4. /etc/mxroute/mxroute.config.ron (system-wide config)
fn find_config_file(cli: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    if let Some(path) = cli {
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!("--config points to non-existent file: {}", path.display());
    }

    if let Ok(env_path) = std::env::var("MXROUTE_CONFIG") {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!(
            "MXROUTE_CONFIG points to non-existent file: {}",
            path.display()
        );
    }

    let default_paths = [
        PathBuf::from("./mxroute.config.ron"),
        PathBuf::from("/etc/mxroute/mxroute.config.ron"),
    ];

    for path in &default_paths {
        if path.exists() {
            return Ok(path.clone());
        }
    }

    let paths_tried = default_paths
        .iter()
        .map(|path| format!("  - {}", path.display()))
        .collect::<Vec<_>>()
        .join("\n");

    anyhow::bail!(
        "No configuration file found. Tried:\n  - --config\n  - MXROUTE_CONFIG environment variable\n{paths_tried}"
    )
}
