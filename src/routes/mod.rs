pub mod scraper;

use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use axum::http::{HeaderName, HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::auth::{AuthClaims, optional_auth, require_auth};
use crate::limit;
use crate::state::AppState;

async fn health() -> impl IntoResponse {
    (
        StatusCode::OK,
        axum::Json(json!({
            "status": "healthy",
            "service": "jobscout",
        })),
    )
}

/// Rate-limit key for this request: the auth subject when present,
/// otherwise peer address plus user agent.
pub fn request_client_key(
    addr: &SocketAddr,
    request_user_agent: Option<&str>,
    claims: Option<&AuthClaims>,
) -> String {
    limit::client_key(
        &addr.ip().to_string(),
        request_user_agent.unwrap_or(""),
        claims.map(|c| c.sub.as_str()),
    )
}

/// Ceiling in force for a request path, mirroring the per-endpoint
/// enforcement in the handlers.
fn route_limit(path: &str) -> u32 {
    if path == "/scraper/start" {
        limit::SCRAPER_LIMIT
    } else {
        limit::DEFAULT_LIMIT
    }
}

/// Hardening headers on every response, plus the remaining-budget hint.
///
/// Layered inside the auth middleware so validated claims are already in
/// request extensions: the hint is computed against the same client key
/// and per-route ceiling the handlers enforce.
async fn security_headers(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    let user_agent = request
        .headers()
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let claims = request.extensions().get::<AuthClaims>().cloned();
    let key = request_client_key(&addr, user_agent.as_deref(), claims.as_ref());
    let ceiling = route_limit(request.uri().path());

    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));
    headers.insert("X-Content-Type-Options", HeaderValue::from_static("nosniff"));
    headers.insert(
        "Referrer-Policy",
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    let remaining = state.limiter.remaining(&key, ceiling);
    if let Ok(value) = HeaderValue::from_str(&remaining.to_string()) {
        headers.insert("X-RateLimit-Remaining", value);
    }
    response
}

fn cors_layer(state: &AppState) -> CorsLayer {
    let origins: Vec<HeaderValue> = state
        .config
        .origins()
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            AUTHORIZATION,
            CONTENT_TYPE,
            HeaderName::from_static("x-requested-with"),
        ])
        .max_age(Duration::from_secs(600))
}

pub fn router(state: AppState) -> Router {
    // Layers apply bottom-up: the auth middleware must wrap
    // security_headers so claims are in extensions before the header
    // middleware reads them.
    let authed = Router::new()
        .route("/scraper/start", post(scraper::start))
        .route("/scraper/status/{run_id}", get(scraper::status))
        .route("/scraper/runs", get(scraper::runs))
        .route("/scraper/cancel/{run_id}", post(scraper::cancel))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            security_headers,
        ))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    let quick = Router::new()
        .route("/scraper/quick", post(scraper::quick))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            security_headers,
        ))
        .layer(middleware::from_fn_with_state(state.clone(), optional_auth));

    let open = Router::new()
        .route("/scraper/quota", get(scraper::quota))
        .route("/", get(health))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            security_headers,
        ));

    Router::new()
        .merge(authed)
        .merge(quick)
        .merge(open)
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&state))
        .with_state(state)
}
