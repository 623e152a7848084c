#![deny(unsafe_code)]
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use fg_gateway::{build_app, AppState};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "fg-gateway", version, about = "Request-forwarding gateway")]
struct Args {
    /// Bind address.
    #[arg(long, default_value = "127.0.0.1:8080")]
    bind: String,

    /// Path to a TOML config file. Defaults are used when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable verbose request/response debug logging.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.debug {
        EnvFilter::new("fg_gateway=debug,fg_core=debug,fg_retry=debug,fg_http_executor=debug,fg_shell_executor=debug")
    } else {
        EnvFilter::new("fg_gateway=info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = fg_config::load_config(args.config.as_deref()).context("load config")?;
    let warnings = fg_config::validate_config(&config).context("validate config")?;
    for w in warnings {
        warn!(%w, "config warning");
    }

    let state = Arc::new(AppState::new(config));
    let app = build_app(state);

    let listener = tokio::net::TcpListener::bind(&args.bind)
        .await
        .with_context(|| format!("bind {}", args.bind))?;
    info!(bind = %args.bind, "fg-gateway listening");

    axum::serve(listener, app).await.context("serve")
}
