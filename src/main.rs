mod cache;
mod config;
mod health;
mod http;
mod metrics;
mod origin;
mod refresh;
#[cfg(test)]
mod test_support;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::cache::PathResolver;
use crate::config::{Config, Mode};
use crate::metrics::MetricsRegistry;
use crate::origin::OriginClient;

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "lazymirror", version, about = "Lazily-populated local mirror of a static-asset origin")]
struct Cli {
    /// Path to an optional YAML configuration file.
    #[arg(short, long)]
    config: Option<String>,
    /// Override the configured mode (which site to mirror).
    #[arg(short, long, value_enum)]
    mode: Option<Mode>,
    /// Override the listen port (binds all interfaces).
    #[arg(short, long)]
    port: Option<u16>,
    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Json)]
    log_format: LogFormat,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve assets, filling the cache from origin on demand (default).
    Serve,
    /// Re-fetch every cached file and overwrite the ones that changed.
    Refresh {
        /// Origin fetches in flight at once.
        #[arg(long, default_value_t = refresh::DEFAULT_CONCURRENCY)]
        concurrency: usize,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Json,
    Pretty,
}

// ---------------------------------------------------------------------------
// Shared application state
// ---------------------------------------------------------------------------

/// State shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// Maps request paths into the active site's cache root.
    pub resolver: PathResolver,
    /// Client for the active site's origin prefix.
    pub origin: OriginClient,
    pub metrics: MetricsRegistry,
}

impl AppState {
    /// Build handler state for the site selected by `config.mode`.
    fn from_config(config: Arc<Config>) -> Result<Self> {
        let site = config.active_site();
        let resolver = PathResolver::new(&site.local_root)?;
        let origin = OriginClient::new(&site.origin_prefix, &config.origin)?;
        Ok(Self {
            resolver,
            origin,
            metrics: MetricsRegistry::new(),
            config,
        })
    }
}

// ---------------------------------------------------------------------------
// Tracing
// ---------------------------------------------------------------------------

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

// ---------------------------------------------------------------------------
// HTTP server (axum)
// ---------------------------------------------------------------------------

async fn run_http_server(state: AppState) -> Result<()> {
    let listen_addr: std::net::SocketAddr = state
        .config
        .listen
        .parse()
        .context("invalid listen address")?;

    let app = http::handler::create_router(Arc::new(state));

    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind HTTP listener on {listen_addr}"))?;

    tracing::info!(%listen_addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Graceful shutdown
// ---------------------------------------------------------------------------

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received SIGINT"),
        () = terminate => tracing::info!("received SIGTERM"),
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // ---- CLI ----
    let cli = Cli::parse();

    // ---- Tracing ----
    init_tracing(cli.log_format);

    // ---- Config ----
    let mut config = match &cli.config {
        Some(path) => config::load_config(path)?,
        None => Config::default(),
    };
    if let Some(mode) = cli.mode {
        config.mode = mode;
    }
    if let Some(port) = cli.port {
        config.set_port(port);
    }
    config::validate_config(&config)?;
    let config = Arc::new(config);

    let site = config.active_site();
    tracing::info!(
        mode = ?config.mode,
        local_root = %site.local_root,
        origin_prefix = %site.origin_prefix,
        "starting lazymirror"
    );

    // ---- App state ----
    let state = AppState::from_config(Arc::clone(&config))?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            run_http_server(state).await?;
            tracing::info!("lazymirror shut down cleanly");
        }
        Command::Refresh { concurrency } => {
            let report =
                refresh::run_refresh(state.resolver.root(), &state.origin, concurrency).await?;
            println!(
                "checked {}, unchanged {}, updated {}, failed {}",
                report.checked, report.unchanged, report.updated, report.failed
            );
        }
    }

    Ok(())
}
