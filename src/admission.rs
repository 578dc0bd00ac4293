// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Admission middleware.
//!
//! Every request is fingerprinted, counted, and either passed to the wrapped
//! handler or answered with 429. Requests whose key cannot be computed are
//! rejected as malformed before the store is consulted, so they never spend
//! window budget.

use crate::error::ApiError;
use crate::key::KeyFunc;
use crate::store::{CountingStore, Decision};
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const RATE_LIMIT_LIMIT: &str = "x-ratelimit-limit";
pub const RATE_LIMIT_REMAINING: &str = "x-ratelimit-remaining";
pub const RATE_LIMIT_RESET: &str = "x-ratelimit-reset";

/// Middleware state: how to fingerprint requests and where to count them.
#[derive(Debug, Clone)]
pub struct Admission {
    key_fn: Arc<dyn KeyFunc>,
    store: Arc<dyn CountingStore>,
}

impl Admission {
    pub fn new(key_fn: Arc<dyn KeyFunc>, store: Arc<dyn CountingStore>) -> Self {
        Self { key_fn, store }
    }
}

/// Admission-control middleware, installed with
/// `axum::middleware::from_fn_with_state`.
pub async fn admission_middleware(
    State(admission): State<Admission>,
    req: Request,
    next: Next,
) -> Response {
    let path = req.uri().path().to_string();

    let (key, req) = match admission.key_fn.key(req).await {
        Ok(pair) => pair,
        Err(err) => {
            info!(%path, error = %err, "Rejecting request without a computable key");
            return ApiError::from(err).into_response();
        }
    };

    let decision = match admission.store.take(&key).await {
        Ok(decision) => decision,
        Err(err) => {
            warn!(%key, error = %err, "Admission decision unavailable");
            return ApiError::from(err).into_response();
        }
    };

    let mut response = if decision.allowed {
        debug!(%key, remaining = decision.remaining, "Request admitted");
        next.run(req).await
    } else {
        let retry_after = retry_after_secs(&decision);
        info!(%key, retry_after_secs = retry_after, "Request rate limited");
        let mut response = ApiError::RateLimited.into_response();
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
        response
    };

    insert_quota_headers(response.headers_mut(), &decision);
    response
}

/// Whole seconds until the window resets, never less than one.
fn retry_after_secs(decision: &Decision) -> u64 {
    let reset = decision.reset_in;
    (reset.as_secs() + u64::from(reset.subsec_nanos() > 0)).max(1)
}

fn insert_quota_headers(headers: &mut HeaderMap, decision: &Decision) {
    headers.insert(RATE_LIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(RATE_LIMIT_REMAINING, HeaderValue::from(decision.remaining));

    let reset_at = chrono::Duration::from_std(decision.reset_in)
        .ok()
        .and_then(|d| Utc::now().checked_add_signed(d));
    if let Some(reset_at) = reset_at {
        let http_date = reset_at.format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        if let Ok(value) = HeaderValue::from_str(&http_date) {
            headers.insert(RATE_LIMIT_RESET, value);
        }
    }
}
