// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Counting stores backing admission control.
//!
//! A store records one observation per call and answers whether the key is
//! still within its quota for the current window. The increment and the
//! check happen under a single lock acquisition, so concurrent requests for
//! the same key can never be admitted past the limit.

use crate::error::StoreError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

/// Outcome of recording one observation for a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Requests admitted per window
    pub limit: u64,
    /// Requests left in the current window
    pub remaining: u64,
    /// Time until the current window resets
    pub reset_in: Duration,
}

/// Atomic increment-and-check over per-key counters.
#[async_trait]
pub trait CountingStore: Send + Sync + Debug {
    /// Record one observation of `key` and decide admission.
    async fn take(&self, key: &str) -> Result<Decision, StoreError>;
}

/// Source of time for window bookkeeping.
pub trait Clock: Send + Sync + Debug {
    fn now(&self) -> Instant;
}

/// Wall clock backed by `Instant::now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Counter for one key within one window.
#[derive(Debug)]
struct Window {
    count: u64,
    resets_at: Instant,
}

/// In-memory fixed-window counting store.
#[derive(Debug)]
pub struct MemoryStore {
    tokens: u64,
    interval: Duration,
    clock: Arc<dyn Clock>,
    windows: RwLock<HashMap<String, Window>>,
}

impl MemoryStore {
    /// Store admitting `tokens` requests per key every `interval`.
    pub fn new(tokens: u64, interval: Duration) -> Self {
        Self::with_clock(tokens, interval, Arc::new(SystemClock))
    }

    pub fn with_clock(tokens: u64, interval: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            tokens,
            interval,
            clock,
            windows: RwLock::new(HashMap::new()),
        }
    }

    /// Number of keys currently tracked.
    pub async fn len(&self) -> usize {
        self.windows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop counters whose window has elapsed. Returns how many were removed.
    pub async fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut windows = self.windows.write().await;
        let before = windows.len();
        windows.retain(|_, window| now < window.resets_at);
        let removed = before - windows.len();
        if removed > 0 {
            debug!(removed, remaining = windows.len(), "Swept expired counters");
        }
        removed
    }
}

#[async_trait]
impl CountingStore for MemoryStore {
    async fn take(&self, key: &str) -> Result<Decision, StoreError> {
        let now = self.clock.now();
        let mut windows = self.windows.write().await;

        let window = windows.entry(key.to_string()).or_insert_with(|| Window {
            count: 0,
            resets_at: now + self.interval,
        });
        if now >= window.resets_at {
            window.count = 0;
            window.resets_at = now + self.interval;
        }

        let allowed = window.count < self.tokens;
        if allowed {
            window.count += 1;
        }

        Ok(Decision {
            allowed,
            limit: self.tokens,
            remaining: self.tokens.saturating_sub(window.count),
            reset_in: window.resets_at.saturating_duration_since(now),
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Clock that only moves when told to.
    #[derive(Debug)]
    pub(crate) struct ManualClock(Mutex<Instant>);

    impl ManualClock {
        pub(crate) fn new() -> Self {
            Self(Mutex::new(Instant::now()))
        }

        pub(crate) fn advance(&self, by: Duration) {
            *self.0.lock().unwrap() += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            *self.0.lock().unwrap()
        }
    }

    #[tokio::test]
    async fn test_limit_per_window() {
        let store = MemoryStore::new(3, Duration::from_secs(60));

        for expected_remaining in [2, 1, 0] {
            let decision = store.take("event/a").await.unwrap();
            assert!(decision.allowed);
            assert_eq!(decision.remaining, expected_remaining);
            assert_eq!(decision.limit, 3);
        }

        let decision = store.take("event/a").await.unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let store = MemoryStore::new(1, Duration::from_secs(60));

        assert!(store.take("event/a").await.unwrap().allowed);
        assert!(!store.take("event/a").await.unwrap().allowed);
        assert!(store.take("event/b").await.unwrap().allowed);
        assert!(store.take("receiver/a").await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_window_resets_after_interval() {
        let clock = Arc::new(ManualClock::new());
        let store = MemoryStore::with_clock(1, Duration::from_secs(10), clock.clone());

        assert!(store.take("k").await.unwrap().allowed);
        clock.advance(Duration::from_secs(4));
        let denied = store.take("k").await.unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.reset_in, Duration::from_secs(6));

        // Denied observations do not extend the window.
        clock.advance(Duration::from_secs(6));
        let decision = store.take("k").await.unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.reset_in, Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_sweep_removes_expired_windows() {
        let clock = Arc::new(ManualClock::new());
        let store = MemoryStore::with_clock(5, Duration::from_secs(10), clock.clone());

        store.take("old").await.unwrap();
        clock.advance(Duration::from_secs(8));
        store.take("fresh").await.unwrap();
        assert_eq!(store.len().await, 2);

        clock.advance(Duration::from_secs(3));
        assert_eq!(store.sweep().await, 1);
        assert_eq!(store.len().await, 1);
        assert!(!store.is_empty().await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_takes_never_exceed_limit() {
        let store = Arc::new(MemoryStore::new(10, Duration::from_secs(60)));

        let tasks: Vec<_> = (0..50)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.take("event/shared").await.unwrap() })
            })
            .collect();

        let mut admitted = 0;
        for task in tasks {
            if task.await.unwrap().allowed {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 10);
    }
}
