// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Ingestion Gateway
//!
//! This crate provides admission-controlled HTTP ingestion for two kinds of
//! traffic:
//!
//! - Event notifications posted to `/`, fingerprinted by involved object
//!   and severity
//! - Webhook payloads posted to `/hook/<id>`, fingerprinted by receiver id
//!
//! Each request is counted against a per-fingerprint quota in a shared
//! [`CountingStore`] before it reaches business logic. Listeners shut down
//! gracefully on an external stop signal with a bounded drain window.

pub mod admission;
pub mod config;
pub mod error;
pub mod event;
pub mod handlers;
pub mod key;
pub mod server;
pub mod store;

pub use config::Config;
pub use error::{ApiError, KeyError, ServerError, StoreError};
pub use event::{Event, ObjectReference, Severity};
pub use handlers::{Forwarder, LogForwarder};
pub use key::{EventKey, KeyFunc, ReceiverKey};
pub use server::{IngestServer, Lifecycle, RunningServer, ShutdownOutcome};
pub use store::{CountingStore, Decision, MemoryStore};
