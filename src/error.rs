// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Error types for the ingestion gateway.
//!
//! Request-level failures convert into JSON error responses through
//! [`ApiError`]. Listener failures are [`ServerError`]s and never reach a
//! client.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::net::SocketAddr;
use thiserror::Error;

/// Failure to compute a fingerprint for a request.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("Failed to read request body: {0}")]
    BodyRead(String),

    #[error("Request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    #[error("Malformed event record: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Path {path:?} is outside {prefix:?}")]
    MalformedPath { path: String, prefix: &'static str },
}

/// The counting store could not make a decision.
#[derive(Debug, Error)]
#[error("Counting store unavailable: {0}")]
pub struct StoreError(pub String);

/// The business collaborator refused accepted work.
#[derive(Debug, Error)]
#[error("Forwarding failed: {0}")]
pub struct ForwardError(pub String);

/// Listener lifecycle errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Invalid bind address {addr:?}: {source}")]
    InvalidAddr {
        addr: String,
        #[source]
        source: std::net::AddrParseError,
    },

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("{server} crashed: {reason}")]
    Crashed { server: &'static str, reason: String },
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
}

/// Request failures surfaced to HTTP clients.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Key(#[from] KeyError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Forward(#[from] ForwardError),

    #[error("Rate limit exceeded")]
    RateLimited,
}

impl ApiError {
    /// Status code and machine-readable code for this error.
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Key(KeyError::PayloadTooLarge { .. }) => {
                (StatusCode::PAYLOAD_TOO_LARGE, "PAYLOAD_TOO_LARGE")
            }
            ApiError::Key(KeyError::MalformedPath { .. }) => (StatusCode::BAD_REQUEST, "INVALID_PATH"),
            ApiError::Key(_) => (StatusCode::BAD_REQUEST, "INVALID_PAYLOAD"),
            ApiError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORE_UNAVAILABLE"),
            ApiError::Forward(_) => (StatusCode::INTERNAL_SERVER_ERROR, "FORWARD_FAILED"),
            ApiError::RateLimited => (StatusCode::TOO_MANY_REQUESTS, "RATE_LIMITED"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            tracing::error!(error = %self, code, "Request failed");
        }

        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
                code,
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_errors_are_client_errors() {
        let decode = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let cases = [
            ApiError::Key(KeyError::Decode(decode)),
            ApiError::Key(KeyError::BodyRead("reset".into())),
            ApiError::Key(KeyError::PayloadTooLarge { limit: 1 }),
            ApiError::Key(KeyError::MalformedPath {
                path: "/x".into(),
                prefix: "/hook/",
            }),
            ApiError::RateLimited,
        ];
        for err in cases {
            assert!(err.status_and_code().0.is_client_error(), "{err}");
        }
    }

    #[test]
    fn test_store_error_is_server_error() {
        let err = ApiError::from(StoreError("backend down".into()));
        assert_eq!(
            err.status_and_code(),
            (StatusCode::INTERNAL_SERVER_ERROR, "STORE_UNAVAILABLE")
        );
    }
}
