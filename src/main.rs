mod auth;
mod config;
mod error;
mod limit;
mod models;
mod registry;
mod routes;
mod sanitize;
mod scraper;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::limit::ClientRateLimiter;
use crate::registry::ScrapeRegistry;
use crate::scraper::orchestrator::Orchestrator;
use crate::scraper::pacing::Pacer;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Arc::new(Config::parse());

    let default_filter = if config.debug {
        "jobscout=debug,tower_http=debug"
    } else {
        "jobscout=info,tower_http=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let pacer = Arc::new(Pacer::default());
    let registry = Arc::new(ScrapeRegistry::default());
    let limiter = Arc::new(ClientRateLimiter::new());
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&registry),
        Arc::clone(&pacer),
        config.webdriver_url.clone(),
    )?);

    let state = AppState {
        config: Arc::clone(&config),
        registry,
        limiter,
        pacer,
        orchestrator,
    };
    let app = routes::router(state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    tracing::info!("Listening on {}", config.listen_addr);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
