// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Fingerprint functions deciding which requests share an admission bucket.
//!
//! Keys are `<namespace>/<discriminator>`. The namespace keeps the event and
//! receiver servers from colliding when they share a counting store.

use crate::error::KeyError;
use crate::event::Event;
use async_trait::async_trait;
use axum::{
    body::{self, Body},
    extract::Request,
    http::header,
};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::fmt::Debug;

/// Path prefix served by the receiver.
pub const HOOK_PREFIX: &str = "/hook/";

/// Characters left unescaped in a path segment. Everything else, `/`
/// included, is percent-encoded.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'$')
    .remove(b'&')
    .remove(b'+')
    .remove(b'=')
    .remove(b':')
    .remove(b'@');

fn segment(raw: &str) -> String {
    utf8_percent_encode(raw, PATH_SEGMENT).to_string()
}

/// Rejects a request whose declared `Content-Length` exceeds `limit`.
fn check_declared_length(req: &Request, limit: usize) -> Result<(), KeyError> {
    let declared = req
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared.is_some_and(|len| len > limit) {
        return Err(KeyError::PayloadTooLarge { limit });
    }
    Ok(())
}

/// Computes the admission key for a request.
///
/// The request is handed back so that whatever the key function buffered
/// remains readable by the business handler.
#[async_trait]
pub trait KeyFunc: Send + Sync + Debug {
    /// Namespace prefixed to every key this function produces.
    fn namespace(&self) -> &'static str;

    async fn key(&self, req: Request) -> Result<(String, Request), KeyError>;
}

/// Keys events by involved object and severity.
#[derive(Debug, Clone)]
pub struct EventKey {
    max_body_bytes: usize,
}

impl EventKey {
    pub fn new(max_body_bytes: usize) -> Self {
        Self { max_body_bytes }
    }
}

#[async_trait]
impl KeyFunc for EventKey {
    fn namespace(&self) -> &'static str {
        "event"
    }

    async fn key(&self, req: Request) -> Result<(String, Request), KeyError> {
        check_declared_length(&req, self.max_body_bytes)?;

        let (parts, body) = req.into_parts();
        let bytes = body::to_bytes(body, self.max_body_bytes)
            .await
            .map_err(|e| KeyError::BodyRead(e.to_string()))?;

        let event: Event = serde_json::from_slice(&bytes)?;
        // Each component is escaped so a `/` inside one cannot shift the others.
        let object = &event.involved_object;
        let key = format!(
            "{}/{}/{}/{}/{}",
            self.namespace(),
            segment(&object.kind),
            segment(&object.namespace),
            segment(&object.name),
            segment(event.severity.as_str())
        );

        Ok((key, Request::from_parts(parts, Body::from(bytes))))
    }
}

/// Keys webhook payloads by the receiver path after [`HOOK_PREFIX`].
///
/// Never reads the body. A declared `Content-Length` over the cap is
/// rejected up front so oversized payloads spend no budget.
#[derive(Debug, Clone)]
pub struct ReceiverKey {
    max_body_bytes: usize,
}

impl ReceiverKey {
    pub fn new(max_body_bytes: usize) -> Self {
        Self { max_body_bytes }
    }

    /// The suffix is decoded first, so every spelling of a receiver id
    /// lands in the bucket its handler sees.
    fn digest(path: &str) -> Result<String, KeyError> {
        let malformed = || KeyError::MalformedPath {
            path: path.to_string(),
            prefix: HOOK_PREFIX,
        };
        let suffix = match path.strip_prefix(HOOK_PREFIX) {
            Some(suffix) if !suffix.is_empty() => suffix,
            _ => return Err(malformed()),
        };
        let decoded = percent_decode_str(suffix)
            .decode_utf8()
            .map_err(|_| malformed())?;
        Ok(segment(&decoded))
    }
}

#[async_trait]
impl KeyFunc for ReceiverKey {
    fn namespace(&self) -> &'static str {
        "receiver"
    }

    async fn key(&self, req: Request) -> Result<(String, Request), KeyError> {
        let digest = Self::digest(req.uri().path())?;
        check_declared_length(&req, self.max_body_bytes)?;
        Ok((format!("{}/{}", self.namespace(), digest), req))
    }
}
