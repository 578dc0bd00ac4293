// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Graceful shutdown and drain-window tests.

use axum::{http::StatusCode, routing::post};
use ingestion_gateway::{
    config::ListenerConfig,
    handlers::LogForwarder,
    key::ReceiverKey,
    server::{IngestServer, Lifecycle, ShutdownOutcome},
    store::MemoryStore,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, Notify};

/// Receiver whose handler signals `entered` and then takes `work` to finish.
fn slow_receiver(grace_ms: u64, work: Duration, entered: Arc<Notify>) -> IngestServer {
    let handler = post(move || {
        let entered = entered.clone();
        async move {
            entered.notify_one();
            tokio::time::sleep(work).await;
            StatusCode::OK
        }
    });

    let listener = ListenerConfig {
        bind_addr: "127.0.0.1:0".to_string(),
        shutdown_grace_ms: grace_ms,
    };
    IngestServer::new(
        "receiver-server",
        listener,
        "/hook/{*receiver}",
        Arc::new(ReceiverKey::new(1024)),
        handler,
    )
}

fn store() -> Arc<MemoryStore> {
    Arc::new(MemoryStore::new(10, Duration::from_secs(60)))
}

#[tokio::test]
async fn test_in_flight_request_completes_during_drain() {
    let entered = Arc::new(Notify::new());
    let server = slow_receiver(
        5000,
        Duration::from_millis(300),
        entered.clone(),
    )
    .start(store())
    .await
    .unwrap();
    let url = format!("http://{}/hook/slow", server.local_addr());

    let request = tokio::spawn(async move { reqwest::Client::new().post(url).send().await });
    entered.notified().await;

    let outcome = server.shutdown().await.unwrap();
    assert_eq!(outcome, ShutdownOutcome::Drained);

    let response = request.await.unwrap().unwrap();
    assert_eq!(response.status().as_u16(), 200);
}

#[tokio::test]
async fn test_request_exceeding_grace_is_abandoned() {
    let entered = Arc::new(Notify::new());
    let server = slow_receiver(
        200,
        Duration::from_secs(30),
        entered.clone(),
    )
    .start(store())
    .await
    .unwrap();
    let url = format!("http://{}/hook/stuck", server.local_addr());

    let request = tokio::spawn(async move { reqwest::Client::new().post(url).send().await });
    entered.notified().await;

    let states = server.subscribe();
    let started = Instant::now();
    let outcome = server.shutdown().await.unwrap();

    assert_eq!(outcome, ShutdownOutcome::TimedOut);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(*states.borrow(), Lifecycle::Stopped);

    request.abort();
}

#[tokio::test]
async fn test_stopped_server_refuses_connections() {
    let server = IngestServer::receiver(
        ListenerConfig::new("127.0.0.1:0"),
        4096,
        Arc::new(LogForwarder),
    )
    .start(store())
    .await
    .unwrap();
    let url = format!("http://{}/hook/abc", server.local_addr());

    assert_eq!(server.shutdown().await.unwrap(), ShutdownOutcome::Drained);

    let result = reqwest::Client::new().post(url).send().await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_instances_stop_independently() {
    let events = IngestServer::event(
        ListenerConfig::new("127.0.0.1:0"),
        4096,
        Arc::new(LogForwarder),
    );
    let receiver = IngestServer::receiver(
        ListenerConfig::new("127.0.0.1:0"),
        4096,
        Arc::new(LogForwarder),
    );
    let receiver_states = receiver.subscribe();

    let (stop_events, events_stop) = oneshot::channel::<()>();
    let (stop_receiver, receiver_stop) = oneshot::channel::<()>();

    let events_task = tokio::spawn(events.listen_and_serve(
        async move {
            let _ = events_stop.await;
        },
        store(),
    ));
    let receiver_task = tokio::spawn(receiver.listen_and_serve(
        async move {
            let _ = receiver_stop.await;
        },
        store(),
    ));

    stop_events.send(()).unwrap();
    let outcome = events_task.await.unwrap().unwrap();
    assert_eq!(outcome, ShutdownOutcome::Drained);
    assert_ne!(*receiver_states.borrow(), Lifecycle::Stopped);

    stop_receiver.send(()).unwrap();
    let outcome = receiver_task.await.unwrap().unwrap();
    assert_eq!(outcome, ShutdownOutcome::Drained);
    assert_eq!(*receiver_states.borrow(), Lifecycle::Stopped);
}
