//! Unified intelligence search server.
//!
//! Loads `config.toml` (or the file given with `--config`), opens the stores
//! and serves the HTTP API until Ctrl-C.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};
use unified_intel::{AppContext, IntelConfig};

const DEFAULT_FILTER: &str = "unified_intel=info,unified_search=info";

#[derive(Parser)]
#[command(name = "unified-intel-server", version, about = "Unified intelligence search server")]
struct Cli {
    /// Path to a TOML config file. Defaults to the platform config directory.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override `server.host`.
    #[arg(long)]
    host: Option<String>,

    /// Override `server.port`.
    #[arg(long)]
    port: Option<u16>,
}

fn load_config(cli: &Cli) -> anyhow::Result<IntelConfig> {
    let mut config = match &cli.config {
        Some(path) => IntelConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => {
            let path = IntelConfig::default_config_path();
            if path.exists() {
                IntelConfig::from_file(&path)
                    .with_context(|| format!("loading config from {}", path.display()))?
            } else {
                IntelConfig::default()
            }
        }
    };
    if let Some(host) = &cli.host {
        config.server.host.clone_from(host);
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    Ok(config)
}

/// Stderr logging, plus a daily rolling file when `logging.log_dir` is set.
/// The returned guard flushes the file writer on drop.
fn init_tracing(config: &IntelConfig) -> Option<WorkerGuard> {
    let filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(config.logging.filter.as_deref().unwrap_or(DEFAULT_FILTER))
        })
    };

    let stderr = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(filter());

    match &config.logging.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "unified-intel.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(filter());
            tracing_subscriber::registry().with(stderr).with(file).init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry().with(stderr).init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let _log_guard = init_tracing(&config);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "unified-intel-server starting");

    let ctx = Arc::new(AppContext::build(config).context("building service context")?);
    let tools = ctx.orchestrator().registry().discover_tools().await;
    tracing::info!(available = tools.len(), "remote tools discovered");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;

    unified_intel::server::serve(listener, Arc::clone(&ctx), async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "ctrl-c handler failed; shutting down");
        }
    })
    .await?;

    ctx.shutdown().await;
    tracing::info!("unified-intel-server stopped");
    Ok(())
}
