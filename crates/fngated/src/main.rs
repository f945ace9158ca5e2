//! fngated — the fngate daemon.
//!
//! Single binary that assembles the call gate:
//! - State store (redb)
//! - Function / tenant registry with per-function scaling workers
//! - Dispatcher (rate limits, quota, endpoint selection, invocation)
//! - Gate metrics
//! - HTTP API (calls, admin hooks, Prometheus)
//!
//! # Usage
//!
//! ```text
//! fngated serve --listen 0.0.0.0:8686 --data-dir /var/lib/fngate \
//!     --config fngate.toml --orchestrator-url http://orchestrator:9000
//! ```

mod client;
mod invoker;
mod orchestrator;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use fngate_balancer::{Dispatcher, GateConfig, Registry};
use fngate_metrics::GateMetrics;
use fngate_state::StateStore;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::invoker::HttpInvoker;
use crate::orchestrator::HttpOrchestrator;

const DEFAULT_LOG_FILTER: &str = "info,fngated=debug,fngate=debug";

#[derive(Parser)]
#[command(name = "fngated", about = "fngate function gateway daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve calls and admin hooks.
    Serve {
        /// Address to listen on.
        #[arg(long, default_value = "0.0.0.0:8686")]
        listen: SocketAddr,

        /// Data directory for persistent state.
        #[arg(long, default_value = "/var/lib/fngate")]
        data_dir: PathBuf,

        /// Gate configuration file. Defaults apply if it does not exist.
        #[arg(long, default_value = "fngate.toml")]
        config: PathBuf,

        /// Base URL of the orchestrator replica API.
        #[arg(long)]
        orchestrator_url: String,

        /// Emit logs as JSON lines.
        #[arg(long)]
        log_json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            listen,
            data_dir,
            config,
            orchestrator_url,
            log_json,
        } => {
            init_tracing(log_json);
            serve(listen, data_dir, &config, &orchestrator_url).await
        }
    }
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: &Path) -> anyhow::Result<GateConfig> {
    if !path.exists() {
        info!(path = ?path, "config file not found, using defaults");
        return Ok(GateConfig::default());
    }
    let config = GateConfig::from_file(path)
        .with_context(|| format!("loading config from {}", path.display()))?;
    info!(path = ?path, "config loaded");
    Ok(config)
}

async fn serve(
    listen: SocketAddr,
    data_dir: PathBuf,
    config_path: &Path,
    orchestrator_url: &str,
) -> anyhow::Result<()> {
    info!("fngate daemon starting");

    let config = load_config(config_path)?;

    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("creating data dir {}", data_dir.display()))?;
    let db_path = data_dir.join("fngate.redb");

    // ── Initialize subsystems ──────────────────────────────────

    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let orchestrator = Arc::new(HttpOrchestrator::new(orchestrator_url)?);
    info!(url = orchestrator_url, "orchestrator client initialized");

    let registry = Arc::new(Registry::new(store, orchestrator, config));
    let metrics = Arc::new(GateMetrics::new());
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&registry),
        Arc::new(HttpInvoker::new()),
        metrics,
    ));

    match registry.resume_scaling().await {
        Ok(n) => info!(workers = n, "scaling state resumed"),
        Err(e) => warn!(error = %e, "cannot resume scaling state"),
    }

    // ── Start background tasks ─────────────────────────────────

    let flusher = {
        let registry = Arc::clone(&registry);
        let shutdown = registry.shutdown_signal();
        tokio::spawn(async move {
            registry.run_stats_flusher(shutdown).await;
        })
    };

    // ── Start API server ───────────────────────────────────────

    let router = fngate_api::build_router(dispatcher);
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("binding {listen}"))?;
    info!(addr = %listen, "API server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // ── Shutdown ───────────────────────────────────────────────

    if let Err(e) = registry.shutdown().await {
        error!(error = %e, "registry shutdown failed");
    }
    if let Err(e) = flusher.await {
        error!(error = %e, "stats flusher task failed");
    }

    info!("fngate daemon stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "cannot listen for ctrl-c, running until killed");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults() {
        let cli = Cli::try_parse_from(["fngated", "serve", "--orchestrator-url", "http://o:9000"]).unwrap();
        let Command::Serve {
            listen,
            data_dir,
            config,
            orchestrator_url,
            log_json,
        } = cli.command;
        assert_eq!(listen, "0.0.0.0:8686".parse::<SocketAddr>().unwrap());
        assert_eq!(data_dir, PathBuf::from("/var/lib/fngate"));
        assert_eq!(config, PathBuf::from("fngate.toml"));
        assert_eq!(orchestrator_url, "http://o:9000");
        assert!(!log_json);
    }

    #[test]
    fn orchestrator_url_is_required() {
        assert!(Cli::try_parse_from(["fngated", "serve"]).is_err());
    }

    #[test]
    fn missing_config_file_uses_defaults() {
        let config = load_config(Path::new("/nonexistent/fngate.toml")).unwrap();
        assert_eq!(config.scaling.max_replicas, GateConfig::default().scaling.max_replicas);
    }
}
