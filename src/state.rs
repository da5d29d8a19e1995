use std::sync::Arc;

use crate::config::Config;
use crate::limit::ClientRateLimiter;
use crate::registry::ScrapeRegistry;
use crate::scraper::orchestrator::Orchestrator;
use crate::scraper::pacing::Pacer;

/// Shared handles passed into every route and middleware.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<ScrapeRegistry>,
    pub limiter: Arc<ClientRateLimiter>,
    pub pacer: Arc<Pacer>,
    pub orchestrator: Arc<Orchestrator>,
}
