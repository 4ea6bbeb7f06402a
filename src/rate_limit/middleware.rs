use super::service::RateLimiterService;
use super::types::RateLimitResult;
use crate::error::QuotaError;
use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Header carrying the client's API key
pub const API_KEY_HEADER: &str = "X-API-Key";

/// Paths that bypass rate limiting
const UNLIMITED_PATHS: &[&str] = &["/health"];

/// Mask an API key for logging, keeping two characters at each end
pub fn mask_api_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 4 {
        return "****".to_string();
    }

    let head: String = chars[..2].iter().collect();
    let tail: String = chars[chars.len() - 2..].iter().collect();
    format!("{}****{}", head, tail)
}

/// Axum middleware enforcing the per-key quota
pub async fn rate_limit_middleware(
    State(service): State<Arc<RateLimiterService>>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    if UNLIMITED_PATHS.contains(&path.as_str()) {
        return next.run(request).await;
    }

    let start = Instant::now();
    let method = request.method().clone();

    let api_key = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(str::to_string);

    let Some(api_key) = api_key else {
        let response = QuotaError::MissingApiKey.into_response();
        info!(
            method = %method,
            path = %path,
            api_key = "missing",
            allowed = false,
            status = response.status().as_u16(),
            elapsed_us = start.elapsed().as_micros() as u64,
            "Rejected request"
        );
        return response;
    };

    let result = service.check(&api_key).await;

    let response = if result.allowed {
        let mut response = next.run(request).await;
        add_rate_limit_headers(response.headers_mut(), &result);
        response
    } else {
        create_rate_limit_response(&result, service.now())
    };

    info!(
        method = %method,
        path = %path,
        api_key = %mask_api_key(&api_key),
        allowed = result.allowed,
        status = response.status().as_u16(),
        remaining = result.remaining,
        elapsed_us = start.elapsed().as_micros() as u64,
        "Rate limit decision"
    );

    response
}

/// Set `X-RateLimit-*` headers from a decision
pub fn add_rate_limit_headers(headers: &mut HeaderMap, result: &RateLimitResult) {
    headers.insert("X-RateLimit-Limit", HeaderValue::from(result.limit));
    headers.insert("X-RateLimit-Remaining", HeaderValue::from(result.remaining));
    headers.insert(
        "X-RateLimit-Reset",
        HeaderValue::from(result.reset_at.timestamp()),
    );
}

/// Whole seconds from `now` until the quota improves, rounded up and at least one
fn retry_after_secs(result: &RateLimitResult, now: DateTime<Utc>) -> u64 {
    let wait = result.retry_after(now);
    let secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
    secs.max(1)
}

/// Create a 429 Too Many Requests response with rate limit headers
fn create_rate_limit_response(result: &RateLimitResult, now: DateTime<Utc>) -> Response {
    let retry_after = retry_after_secs(result, now);

    let mut headers = HeaderMap::new();
    add_rate_limit_headers(&mut headers, result);
    headers.insert("Retry-After", HeaderValue::from(retry_after));

    let body = serde_json::json!({
        "error": "rate limit exceeded",
        "status": 429,
        "limit": result.limit,
        "remaining": result.remaining,
        "reset_at": result.reset_at.timestamp(),
        "retry_after": retry_after,
    });

    (StatusCode::TOO_MANY_REQUESTS, headers, body.to_string()).into_response()
}
