use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use sampleapp::{
    AppConfig, AppState, HttpGreetingService, build_router,
    config::GREETING_SERVICE_URL_KEY, fruits::InMemoryFruitRepository,
};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "sampleapp")]
#[command(about = "Sample REST service with an outbound greeting client")]
struct Cli {
    /// Overrides APP_HOST
    #[arg(long)]
    host: Option<String>,
    /// Overrides APP_PORT
    #[arg(long)]
    port: Option<u16>,
    /// Overrides GREETING_SERVICE_URL
    #[arg(long)]
    greeting_url: Option<String>,
    /// Log filter, takes precedence over RUST_LOG
    #[arg(long)]
    log: Option<String>,
}

impl Cli {
    fn overrides(&self) -> HashMap<String, String> {
        let mut overrides = HashMap::new();
        if let Some(host) = &self.host {
            overrides.insert("APP_HOST".to_string(), host.clone());
        }
        if let Some(port) = self.port {
            overrides.insert("APP_PORT".to_string(), port.to_string());
        }
        if let Some(url) = &self.greeting_url {
            overrides.insert(GREETING_SERVICE_URL_KEY.to_string(), url.clone());
        }
        overrides
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log.as_deref());

    let config = AppConfig::from_env_with_overrides(&cli.overrides())
        .context("failed to load application configuration")?;

    let client = reqwest::Client::builder()
        .build()
        .context("failed to build HTTP client")?;
    let greeting = HttpGreetingService::new(client, config.greeting_service_url.clone());
    info!(url = %greeting.base_url(), "greeting service configured");

    let state = AppState::new(
        Arc::new(greeting),
        Arc::new(InMemoryFruitRepository::seeded()),
    );
    let app = build_router(state);

    let addr = config.address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;

    info!(address = %addr, "sampleapp started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    Ok(())
}

const DEFAULT_LOG_FILTER: &str = "sampleapp=debug,tower_http=info";

/// `--log` wins over `RUST_LOG`, which wins over [`DEFAULT_LOG_FILTER`].
/// An unparsable `--log` falls back the same way and is reported once the
/// subscriber is up.
fn init_tracing(cli_filter: Option<&str>) {
    let from_cli = cli_filter.map(EnvFilter::try_new);
    let rejected = matches!(from_cli, Some(Err(_)));
    let filter = match from_cli {
        Some(Ok(filter)) => filter,
        _ => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    if rejected {
        error!(filter = ?cli_filter, "ignoring invalid --log filter");
    }
}

/// Waits for Ctrl+C or SIGTERM and logs which one arrived.
async fn shutdown_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => "ctrl-c",
            Err(err) => {
                error!(error = %err, "Ctrl+C handler unavailable");
                std::future::pending().await
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                "SIGTERM"
            }
            Err(err) => {
                error!(error = %err, "SIGTERM handler unavailable");
                std::future::pending().await
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<&str>();

    let received = tokio::select! {
        name = ctrl_c => name,
        name = terminate => name,
    };
    info!(signal = received, "shutting down sampleapp");
}
