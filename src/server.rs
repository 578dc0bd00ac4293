// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Listener lifecycle shared by the event and receiver servers.
//!
//! A server moves through `Idle -> Serving -> Draining -> Stopped`, or ends
//! in `Crashed` when its accept loop dies on its own. A crash is reported
//! as [`ServerError::Crashed`]; deciding to exit the process is left to the
//! caller.

use crate::admission::{admission_middleware, Admission};
use crate::config::ListenerConfig;
use crate::error::ServerError;
use crate::handlers::{event_handler, payload_handler, Forwarder};
use crate::key::{EventKey, KeyFunc, ReceiverKey};
use crate::store::CountingStore;
use axum::{extract::DefaultBodyLimit, middleware, routing::MethodRouter, Router};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info, info_span, warn, Instrument, Span};

/// Lifecycle state of one server instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Idle,
    Serving,
    Draining,
    Stopped,
    Crashed,
}

/// How a graceful shutdown ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Every in-flight request completed
    Drained,
    /// The grace period elapsed and remaining requests were abandoned
    TimedOut,
}

/// An admission-controlled HTTP listener serving one route.
pub struct IngestServer {
    name: &'static str,
    listener: ListenerConfig,
    path: String,
    key_fn: Arc<dyn KeyFunc>,
    handler: MethodRouter,
    state: watch::Sender<Lifecycle>,
}

impl IngestServer {
    pub fn new(
        name: &'static str,
        listener: ListenerConfig,
        path: impl Into<String>,
        key_fn: Arc<dyn KeyFunc>,
        handler: MethodRouter,
    ) -> Self {
        let (state, _) = watch::channel(Lifecycle::Idle);
        Self {
            name,
            listener,
            path: path.into(),
            key_fn,
            handler,
            state,
        }
    }

    /// Server accepting event records on `/`.
    ///
    /// The handler's body limit matches the key function's read cap, so a
    /// body the key function accepted is never rejected after admission.
    pub fn event(
        listener: ListenerConfig,
        max_body_bytes: usize,
        forwarder: Arc<dyn Forwarder>,
    ) -> Self {
        Self::new(
            "event-server",
            listener,
            "/",
            Arc::new(EventKey::new(max_body_bytes)),
            event_handler(forwarder).layer(DefaultBodyLimit::max(max_body_bytes)),
        )
    }

    /// Server accepting webhook payloads on `/hook/{receiver}`.
    pub fn receiver(
        listener: ListenerConfig,
        max_body_bytes: usize,
        forwarder: Arc<dyn Forwarder>,
    ) -> Self {
        Self::new(
            "receiver-server",
            listener,
            "/hook/{*receiver}",
            Arc::new(ReceiverKey::new(max_body_bytes)),
            payload_handler(forwarder).layer(DefaultBodyLimit::max(max_body_bytes)),
        )
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn state(&self) -> Lifecycle {
        *self.state.borrow()
    }

    /// Watch lifecycle transitions.
    pub fn subscribe(&self) -> watch::Receiver<Lifecycle> {
        self.state.subscribe()
    }

    fn router(&self, store: Arc<dyn CountingStore>) -> Router {
        Router::new()
            .route(&self.path, self.handler.clone())
            .route_layer(middleware::from_fn_with_state(
                Admission::new(self.key_fn.clone(), store),
                admission_middleware,
            ))
            .layer(TraceLayer::new_for_http())
    }

    /// Bind the listener and start serving on a background task.
    ///
    /// Returns once the socket is bound; bind failures are returned here.
    pub async fn start(self, store: Arc<dyn CountingStore>) -> Result<RunningServer, ServerError> {
        let span = info_span!("ingest", server = self.name);

        let addr: SocketAddr =
            self.listener
                .bind_addr
                .parse()
                .map_err(|source| ServerError::InvalidAddr {
                    addr: self.listener.bind_addr.clone(),
                    source,
                })?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ServerError::Bind { addr, source })?;

        let app = self.router(store);
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(
            async move {
                axum::serve(listener, app)
                    .with_graceful_shutdown(async move {
                        let _ = stop_rx.await;
                    })
                    .await
            }
            .instrument(span.clone()),
        );

        self.state.send_replace(Lifecycle::Serving);
        info!(parent: &span, addr = %local_addr, path = %self.path, "Server listening");

        Ok(RunningServer {
            name: self.name,
            local_addr,
            grace: self.listener.shutdown_grace(),
            grace_ms: self.listener.shutdown_grace_ms,
            state: self.state,
            stop: Some(stop_tx),
            task,
            span,
        })
    }

    /// Serve until `stop` resolves, then shut down gracefully.
    ///
    /// Returns `Err(ServerError::Crashed)` if the accept loop dies first.
    pub async fn listen_and_serve<F>(
        self,
        stop: F,
        store: Arc<dyn CountingStore>,
    ) -> Result<ShutdownOutcome, ServerError>
    where
        F: Future<Output = ()> + Send,
    {
        let mut running = self.start(store).await?;

        let crash = tokio::select! {
            () = stop => None,
            err = running.crashed() => Some(err),
        };

        match crash {
            None => running.shutdown().await,
            Some(err) => Err(err),
        }
    }
}

/// Handle on a serving listener.
pub struct RunningServer {
    name: &'static str,
    local_addr: SocketAddr,
    grace: Duration,
    grace_ms: u64,
    state: watch::Sender<Lifecycle>,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<io::Result<()>>,
    span: Span,
}

impl RunningServer {
    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> Lifecycle {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<Lifecycle> {
        self.state.subscribe()
    }

    /// Resolves only if the accept loop ends without a stop request.
    async fn crashed(&mut self) -> ServerError {
        let reason = match (&mut self.task).await {
            Ok(Ok(())) => "listener closed unexpectedly".to_string(),
            Ok(Err(err)) => err.to_string(),
            Err(err) => err.to_string(),
        };
        self.fail(reason)
    }

    /// Stop accepting connections and wait up to the grace period for
    /// in-flight requests.
    pub async fn shutdown(mut self) -> Result<ShutdownOutcome, ServerError> {
        self.state.send_replace(Lifecycle::Draining);
        info!(parent: &self.span, grace_ms = self.grace_ms, "Draining connections");
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }

        match tokio::time::timeout(self.grace, &mut self.task).await {
            Ok(Ok(Ok(()))) => {
                self.state.send_replace(Lifecycle::Stopped);
                info!(parent: &self.span, "Server stopped");
                Ok(ShutdownOutcome::Drained)
            }
            Ok(Ok(Err(err))) => Err(self.fail(err.to_string())),
            Ok(Err(err)) => Err(self.fail(err.to_string())),
            Err(_) => {
                self.task.abort();
                self.state.send_replace(Lifecycle::Stopped);
                warn!(
                    parent: &self.span,
                    grace_ms = self.grace_ms,
                    "Graceful shutdown timed out, abandoning in-flight requests"
                );
                Ok(ShutdownOutcome::TimedOut)
            }
        }
    }

    fn fail(&self, reason: String) -> ServerError {
        self.state.send_replace(Lifecycle::Crashed);
        error!(parent: &self.span, %reason, "Server crashed");
        ServerError::Crashed {
            server: self.name,
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::LogForwarder;
    use crate::store::MemoryStore;

    fn store() -> Arc<dyn CountingStore> {
        Arc::new(MemoryStore::new(5, Duration::from_secs(60)))
    }

    fn loopback() -> ListenerConfig {
        ListenerConfig::new("127.0.0.1:0")
    }

    #[tokio::test]
    async fn test_lifecycle_transitions() {
        let server = IngestServer::receiver(loopback(), 1024, Arc::new(LogForwarder));
        assert_eq!(server.state(), Lifecycle::Idle);
        let states = server.subscribe();

        let running = server.start(store()).await.unwrap();
        assert_eq!(running.state(), Lifecycle::Serving);
        assert_ne!(running.local_addr().port(), 0);

        let outcome = running.shutdown().await.unwrap();
        assert_eq!(outcome, ShutdownOutcome::Drained);
        assert_eq!(*states.borrow(), Lifecycle::Stopped);
    }

    #[tokio::test]
    async fn test_invalid_address_fails_start() {
        let server = IngestServer::receiver(
            ListenerConfig::new("not-an-address"),
            1024,
            Arc::new(LogForwarder),
        );
        let err = server.start(store()).await.err().unwrap();
        assert!(matches!(err, ServerError::InvalidAddr { .. }));
    }

    #[tokio::test]
    async fn test_bind_conflict_fails_start() {
        let first = IngestServer::event(loopback(), 1024, Arc::new(LogForwarder))
            .start(store())
            .await
            .unwrap();

        let taken = ListenerConfig::new(first.local_addr().to_string());
        let err = IngestServer::event(taken, 1024, Arc::new(LogForwarder))
            .start(store())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ServerError::Bind { .. }));

        first.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_listen_and_serve_returns_on_stop() {
        let server = IngestServer::event(loopback(), 1024, Arc::new(LogForwarder));
        let (tx, rx) = oneshot::channel::<()>();

        let serving = tokio::spawn(server.listen_and_serve(
            async move {
                let _ = rx.await;
            },
            store(),
        ));

        tx.send(()).unwrap();
        let outcome = serving.await.unwrap().unwrap();
        assert_eq!(outcome, ShutdownOutcome::Drained);
    }
}
