//! Bearer-token validation. Tokens are issued by an external identity
//! provider; this module only checks the claims contract and hands the
//! validated subject to the handlers.

use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, errors::ErrorKind};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::state::AppState;

/// Tokens older than this are rejected even when unexpired.
const MAX_TOKEN_AGE_SECS: i64 = 24 * 3600;

/// Clock-skew allowance on `iat`.
const IAT_SKEW_SECS: i64 = 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthClaims {
    pub sub: String,
    pub aud: String,
    pub iss: String,
    pub exp: i64,
    pub iat: i64,
    #[serde(default)]
    pub email_confirmed: bool,
}

/// Validate a bearer token against the configured issuer and shared key.
///
/// Required: `sub` present, `aud = "authenticated"`, matching issuer,
/// unexpired, issued within the last 24 hours, confirmed email. The
/// `none` algorithm is never accepted: only HS256 is in the validation
/// set and an absent shared key fails closed.
pub fn verify_token(token: &str, issuer: &str, secret: Option<&str>) -> Result<AuthClaims, AppError> {
    let secret = secret.ok_or_else(|| AppError::Unauthorized("auth_not_configured".into()))?;

    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_audience(&["authenticated"]);
    if !issuer.is_empty() {
        validation.set_issuer(&[issuer]);
    }
    validation.set_required_spec_claims(&["sub", "aud", "exp", "iat"]);

    let data = decode::<AuthClaims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)
        .map_err(|e| {
            let reason = match e.kind() {
                ErrorKind::ExpiredSignature => "token_expired",
                ErrorKind::InvalidAudience => "invalid_audience",
                ErrorKind::InvalidIssuer => "invalid_issuer",
                ErrorKind::InvalidSignature => "invalid_signature",
                _ => "invalid_token",
            };
            AppError::Unauthorized(reason.into())
        })?;

    let claims = data.claims;
    if claims.sub.is_empty() {
        return Err(AppError::Unauthorized("missing_subject".into()));
    }

    let now = Utc::now().timestamp();
    if claims.iat > now + IAT_SKEW_SECS {
        return Err(AppError::Unauthorized("token_from_future".into()));
    }
    if now - claims.iat > MAX_TOKEN_AGE_SECS {
        return Err(AppError::Unauthorized("token_too_old".into()));
    }
    if !claims.email_confirmed {
        return Err(AppError::Unauthorized("email_not_confirmed".into()));
    }

    Ok(claims)
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// Middleware for endpoints that require a caller identity. Validated
/// claims land in request extensions.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(request.headers())
        .ok_or_else(|| AppError::Unauthorized("missing_bearer_token".into()))?;
    let claims = verify_token(
        token,
        &state.config.auth_issuer,
        state.config.auth_secret.as_deref(),
    )?;
    request.extensions_mut().insert(claims);
    Ok(next.run(request).await)
}

/// Middleware for endpoints where identity is optional: a valid token
/// attaches claims, anything else passes through anonymous.
pub async fn optional_auth(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    if let Some(token) = bearer_token(request.headers())
        && let Ok(claims) = verify_token(
            token,
            &state.config.auth_issuer,
            state.config.auth_secret.as_deref(),
        )
    {
        request.extensions_mut().insert(claims);
    }
    next.run(request).await
}
