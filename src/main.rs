//! Keyway - SSH public keys by username over HTTP

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use keyway::{config::Args, server, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("keyway={},info", args.log_level).into());
    let registry = tracing_subscriber::registry().with(filter);
    if args.log_json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  Keyway {}", env!("CARGO_PKG_VERSION"));
    info!(
        "  commit {} built {}",
        env!("KEYWAY_GIT_COMMIT"),
        env!("KEYWAY_BUILD_TIMESTAMP")
    );
    info!("======================================");
    info!("Listen: {}", args.listen);
    info!("GitHub API: {}", args.github_api_url);
    if args.token.is_none() {
        warn!("No GitHub token configured, API requests are heavily rate limited");
    }
    info!(
        "Cache: {} bytes, max age {}s",
        args.cache_size, args.cache_age_secs
    );
    match &args.akpath {
        Some(path) => info!("Key files: {}", path.display()),
        None => info!("Key files: disabled"),
    }
    info!(
        "Uploads: {}",
        if args.uploads_enabled() { "enabled" } else { "disabled" }
    );
    let blocked = args.blocklist();
    if !blocked.is_empty() {
        info!("Blocklist: {} user(s)", blocked.len());
    }
    if let Some(path) = &args.serve {
        info!("Serving {} under /_/", path.display());
    }
    info!("======================================");

    let state = AppState::from_args(&args)?;
    server::run(Arc::new(state), args.listen).await?;

    Ok(())
}
