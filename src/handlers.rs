// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Business handlers run after admission.
//!
//! Accepted work is handed to a [`Forwarder`], the gateway's handle on the
//! downstream consumer. The handlers themselves only decode and dispatch.

use crate::error::{ApiError, ForwardError};
use crate::event::Event;
use async_trait::async_trait;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{post, MethodRouter},
};
use std::fmt::Debug;
use std::sync::Arc;
use tracing::info;

/// Downstream consumer of admitted requests.
#[async_trait]
pub trait Forwarder: Send + Sync + Debug {
    async fn forward_event(&self, event: Event) -> Result<(), ForwardError>;

    async fn forward_payload(
        &self,
        receiver: &str,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<(), ForwardError>;
}

/// Forwarder that records accepted work in the log and drops it.
#[derive(Debug, Clone, Default)]
pub struct LogForwarder;

#[async_trait]
impl Forwarder for LogForwarder {
    async fn forward_event(&self, event: Event) -> Result<(), ForwardError> {
        info!(
            object = %event.involved_object,
            severity = %event.severity,
            reason = %event.reason,
            controller = %event.reporting_controller,
            "Event accepted"
        );
        Ok(())
    }

    async fn forward_payload(
        &self,
        receiver: &str,
        _headers: &HeaderMap,
        body: Bytes,
    ) -> Result<(), ForwardError> {
        info!(receiver, bytes = body.len(), "Webhook payload accepted");
        Ok(())
    }
}

/// `POST /` handler decoding an event record and forwarding it.
pub fn event_handler(forwarder: Arc<dyn Forwarder>) -> MethodRouter {
    post(handle_event).with_state(forwarder)
}

/// `POST /hook/{receiver}` handler forwarding the raw payload.
pub fn payload_handler(forwarder: Arc<dyn Forwarder>) -> MethodRouter {
    post(handle_payload).with_state(forwarder)
}

async fn handle_event(
    State(forwarder): State<Arc<dyn Forwarder>>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let event: Event = serde_json::from_slice(&body).map_err(crate::error::KeyError::from)?;
    forwarder.forward_event(event).await?;
    Ok(StatusCode::OK)
}

async fn handle_payload(
    State(forwarder): State<Arc<dyn Forwarder>>,
    Path(receiver): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    forwarder.forward_payload(&receiver, &headers, body).await?;
    Ok(StatusCode::OK)
}
