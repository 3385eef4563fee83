//! Chat relay server
//!
//! HTTP service relaying tutoring conversations to Gemini

use anyhow::{Context, Result};
use chatrelay::{create_router, version_info, AccountsFile, Settings};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Load settings from environment (and .env)
    let settings = Settings::new().context("Failed to load server settings")?;

    // Initialize logging
    init_logging(&settings)?;
    info!("Starting {}", version_info());

    let accounts = load_accounts(&settings)?;

    // Create router
    let app = create_router(settings.clone(), accounts)?;

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("🚀 Chat relay server started!");
    info!("📝 Health check: http://{}/health", addr);
    info!("💬 Chat endpoints: http://{}/api/v1/chat/*", addr);

    axum::serve(listener, app)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to start server: {}", e))?;

    Ok(())
}

/// Accounts from `ACCOUNTS_FILE`, else the default locations, else empty
fn load_accounts(settings: &Settings) -> Result<AccountsFile> {
    if let Some(path) = &settings.accounts_file {
        return AccountsFile::load(path);
    }

    match AccountsFile::load_default()? {
        Some(accounts) => Ok(accounts),
        None => {
            warn!("No accounts file found, starting with empty account stores");
            Ok(AccountsFile::default())
        }
    }
}

/// Initialize logging system
fn init_logging(settings: &Settings) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_new(&settings.logging.level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let subscriber: Box<dyn tracing::Subscriber + Send + Sync> = if settings.logging.format == "json" {
        // JSON format logs (production environment)
        Box::new(
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .json()
                .with_current_span(true)
                .with_span_list(false)
                .finish(),
        )
    } else {
        // Human readable format (development environment)
        Box::new(
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .finish(),
        )
    };

    tracing::subscriber::set_global_default(subscriber).context("Failed to set tracing subscriber")?;

    info!("Logging system initialized");
    Ok(())
}
