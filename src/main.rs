use std::{str::FromStr, sync::Arc};

use clap::Parser as _;
use tracing_subscriber::{
    EnvFilter, Layer as _, filter::Directive, layer::SubscriberExt,
    util::SubscriberInitExt as _,
};

use self::{config::AppConfig, prelude::*};

mod backends;
mod batch;
mod config;
mod health;
mod pages;
mod prelude;
mod server;

/// Our entry point, which can return an error. [`anyhow::Result`] will
/// automatically print a nice error message with optional backtrace.
#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing.
    let directive =
        Directive::from_str("info").expect("built-in directive should be valid");
    let env_filter = EnvFilter::builder()
        .with_default_directive(directive)
        .from_env_lossy();

    let subscriber = tracing_subscriber::fmt::layer().with_filter(env_filter);

    // We can stack multiple layers here if we need to.
    tracing_subscriber::registry().with(subscriber).init();

    // Call our real `main` function now that logging is set up.
    real_main().await
}

/// Our real entry point.
#[instrument(level = "debug", name = "main", skip_all)]
async fn real_main() -> Result<()> {
    // Load environment variables from a `.env` file, if it exists. Must
    // happen before parsing, because options fall back to the environment.
    dotenvy::dotenv().ok();

    // Build our immutable configuration.
    let config = Arc::new(AppConfig::parse());
    debug!("Parsed configuration: {:?}", config);

    let backend = backends::backend_for_config(&config)?;
    let state = server::AppState {
        config: config.clone(),
        backend,
        temp_root: std::env::temp_dir().join("ocrstream"),
    };
    let app = server::router(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("failed to bind port {}", config.port))?;
    info!(
        port = config.port,
        backend = ?config.backend,
        host = %config.backend_host,
        model = %config.model,
        pdf_dpi = config.pdf_dpi,
        ocr_timeout_secs = config.ocr_timeout_secs,
        max_file_size_mib = config.max_file_size_mib,
        num_ctx = config.num_ctx,
        "OCR server listening"
    );
    axum::serve(listener, app)
        .await
        .context("server exited with an error")
}
