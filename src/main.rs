// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Ingestion Gateway Service
//!
//! Runs the event server and the webhook receiver side by side over one
//! shared counting store. SIGINT or SIGTERM stops both.
//!
//! ## Configuration
//!
//! Configuration is loaded from environment variables:
//!
//! - `EVENTS_ADDR`: Event server bind address (default: 0.0.0.0:9090)
//! - `RECEIVER_ADDR`: Receiver bind address (default: 0.0.0.0:9292)
//! - `RATE_LIMIT_TOKENS`: Requests per key per window (default: 1)
//! - `RATE_LIMIT_INTERVAL_SECS`: Window length (default: 300)
//! - `RATE_LIMIT_SWEEP_SECS`: Expired counter sweep interval (default: 60)
//! - `MAX_BODY_BYTES`: Largest accepted event or webhook body (default: 3 MiB)
//! - `SHUTDOWN_GRACE_MS`: Drain window on shutdown (default: 5000)
//! - `LOG_FORMAT`: `json` or `text` (default: json)

use anyhow::Context;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use ingestion_gateway::{
    config::Config,
    handlers::{Forwarder, LogForwarder},
    server::IngestServer,
    store::{CountingStore, MemoryStore},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("invalid configuration")?;
    init_tracing(&config.log_format);

    info!(
        events_addr = %config.event.bind_addr,
        receiver_addr = %config.receiver.bind_addr,
        tokens = config.rate_limit.tokens,
        interval_secs = config.rate_limit.interval_secs,
        "Starting ingestion gateway"
    );

    let store = Arc::new(MemoryStore::new(
        config.rate_limit.tokens,
        config.rate_limit.interval(),
    ));

    // Spawn sweep task
    let sweep_store = store.clone();
    let sweep_interval = config.rate_limit.sweep_interval();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(sweep_interval);
        loop {
            interval.tick().await;
            sweep_store.sweep().await;
        }
    });

    let (stop_tx, stop_rx) = watch::channel(false);
    let stop_tx = Arc::new(stop_tx);
    let signal_tx = stop_tx.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received");
        signal_tx.send_replace(true);
    });

    let forwarder: Arc<dyn Forwarder> = Arc::new(LogForwarder);
    let store: Arc<dyn CountingStore> = store;

    // A listener that fails takes its sibling down with it.
    let run = |server: IngestServer| {
        let stop_tx = stop_tx.clone();
        let stop_rx = stop_rx.clone();
        let store = store.clone();
        async move {
            let result = server.listen_and_serve(stopped(stop_rx), store).await;
            if result.is_err() {
                stop_tx.send_replace(true);
            }
            result
        }
    };

    let (events_result, receiver_result) = tokio::join!(
        run(IngestServer::event(
            config.event.clone(),
            config.max_body_bytes,
            forwarder.clone(),
        )),
        run(IngestServer::receiver(
            config.receiver.clone(),
            config.max_body_bytes,
            forwarder,
        )),
    );

    let mut failed = false;
    for result in [events_result, receiver_result] {
        match result {
            Ok(outcome) => info!(?outcome, "Listener finished"),
            Err(err) => {
                error!(error = %err, "Listener failed");
                failed = true;
            }
        }
    }

    if failed {
        anyhow::bail!("ingestion gateway terminated abnormally");
    }
    Ok(())
}

fn init_tracing(format: &str) {
    let filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    if format == "text" {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    }
}

/// Resolves once the fan-out channel flips to `true` or its sender is gone.
async fn stopped(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!(error = %err, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
