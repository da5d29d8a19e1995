use std::net::SocketAddr;

use axum::Json;
use axum::extract::{ConnectInfo, Path, State};
use axum::http::HeaderMap;
use axum::http::header::USER_AGENT;
use axum::Extension;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::auth::AuthClaims;
use crate::error::AppError;
use crate::limit;
use crate::models::run::{RunSummary, ScrapeRun};
use crate::models::spec::FilterSpec;
use crate::routes::request_client_key;
use crate::scraper::orchestrator::QuickScrapeResult;
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartResponse {
    pub run_id: Uuid,
    pub status: &'static str,
}

fn header_user_agent(headers: &HeaderMap) -> Option<&str> {
    headers.get(USER_AGENT).and_then(|v| v.to_str().ok())
}

fn enforce_limit(
    state: &AppState,
    addr: &SocketAddr,
    headers: &HeaderMap,
    claims: Option<&AuthClaims>,
    limit: u32,
) -> Result<(), AppError> {
    let key = request_client_key(addr, header_user_agent(headers), claims);
    state
        .limiter
        .hit(&key, limit)
        .map(|_| ())
        .map_err(AppError::RateLimited)
}

/// POST /scraper/start
///
/// Register a scrape run for the caller and return immediately; the
/// pipeline itself runs as a background task.
pub async fn start(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Extension(claims): Extension<AuthClaims>,
    headers: HeaderMap,
    Json(spec): Json<FilterSpec>,
) -> Result<Json<StartResponse>, AppError> {
    enforce_limit(&state, &addr, &headers, Some(&claims), limit::SCRAPER_LIMIT)?;
    let spec = spec.sanitized()?;
    let run_id = state.orchestrator.start_scrape(spec, claims.sub);
    Ok(Json(StartResponse {
        run_id,
        status: "queued",
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuickRequest {
    pub keywords: String,
    #[serde(default)]
    pub location: String,
    #[serde(default = "default_quick_results")]
    pub max_results: u32,
    #[serde(default = "default_quick_days")]
    pub posted_within_days: u32,
}

fn default_quick_results() -> u32 {
    10
}

fn default_quick_days() -> u32 {
    7
}

/// Snap the quick window to the supported day buckets.
fn snap_quick_days(days: u32) -> u32 {
    match days {
        0..=1 => 1,
        2..=7 => 7,
        _ => 30,
    }
}

/// POST /scraper/quick
///
/// Synchronous discovery without validation tiers beyond the fallback
/// path's tier 2; auth optional.
pub async fn quick(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    claims: Option<Extension<AuthClaims>>,
    headers: HeaderMap,
    Json(request): Json<QuickRequest>,
) -> Result<Json<QuickScrapeResult>, AppError> {
    let claims = claims.map(|Extension(c)| c);
    enforce_limit(&state, &addr, &headers, claims.as_ref(), limit::DEFAULT_LIMIT)?;

    let spec: FilterSpec = serde_json::from_value(json!({
        "keywords": request.keywords,
        "location": request.location,
        "maxResults": request.max_results.clamp(1, 50),
        "postedWithinDays": snap_quick_days(request.posted_within_days),
    }))
    .map_err(|e| AppError::Internal(e.to_string()))?;
    let spec = spec.sanitized()?;

    Ok(Json(state.orchestrator.quick_scrape(spec).await))
}

/// GET /scraper/status/{run_id}
///
/// Owner-scoped run state; cross-owner lookups read as not found.
pub async fn status(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Extension(claims): Extension<AuthClaims>,
    headers: HeaderMap,
    Path(run_id): Path<Uuid>,
) -> Result<Json<ScrapeRun>, AppError> {
    enforce_limit(&state, &addr, &headers, Some(&claims), limit::DEFAULT_LIMIT)?;
    state
        .registry
        .get(run_id, &claims.sub)
        .map(Json)
        .ok_or(AppError::NotFound)
}

/// GET /scraper/runs
pub async fn runs(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Extension(claims): Extension<AuthClaims>,
    headers: HeaderMap,
) -> Result<Json<Vec<RunSummary>>, AppError> {
    enforce_limit(&state, &addr, &headers, Some(&claims), limit::DEFAULT_LIMIT)?;
    Ok(Json(state.registry.list(&claims.sub)))
}

/// POST /scraper/cancel/{run_id}
pub async fn cancel(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Extension(claims): Extension<AuthClaims>,
    headers: HeaderMap,
    Path(run_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    enforce_limit(&state, &addr, &headers, Some(&claims), limit::DEFAULT_LIMIT)?;
    if !state.registry.cancel(run_id, &claims.sub) {
        return Err(AppError::NotFound);
    }
    Ok(Json(json!({
        "message": "Scrape cancelled",
        "runId": run_id,
    })))
}

/// GET /scraper/quota
///
/// Unauthenticated view of the outbound budget.
pub async fn quota(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "requestsRemaining": state.pacer.requests_remaining().await,
        "monthlyLimit": state.config.monthly_quota,
        "apiConfigured": state.config.enrichment_api_key.is_some(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quick_days_snap_to_buckets() {
        assert_eq!(snap_quick_days(0), 1);
        assert_eq!(snap_quick_days(1), 1);
        assert_eq!(snap_quick_days(3), 7);
        assert_eq!(snap_quick_days(7), 7);
        assert_eq!(snap_quick_days(14), 30);
    }
}
