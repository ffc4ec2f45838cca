//! Request coalescing ("single-flight") keyed by device.
//!
//! When several requests need a fresh reading for the same key at the same time,
//! only the first one starts a fetch. The others subscribe to it and receive the
//! same result, success or failure.
//!
//! ```text
//! request A ─┐
//! request B ─┼──► SingleFlight ──► one fetch task ──► ChannelExecutorPool
//! request C ─┘         ▲                  │
//!                      └──── broadcast ◄──┘
//! ```
//!
//! The fetch runs as its own task, so it completes (and whatever it writes, such as
//! the cache, gets written) even if every caller has gone away. The in-flight record
//! is removed before the result is broadcast; a caller arriving after that point
//! starts the next fetch.

use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tracing::debug;

use super::error::MeterError;

type Outcome<V> = Result<V, MeterError>;

/// Counters for monitoring how much coalescing actually happens.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlightStats {
    /// Every call to `run`.
    pub total: u64,
    /// Calls that joined a fetch already in progress.
    pub coalesced: u64,
    /// Calls that started a fetch.
    pub leaders: u64,
    /// Calls answered by `reuse` without joining or starting a fetch.
    pub reused: u64,
}

struct Inner<K, V> {
    flights: HashMap<K, broadcast::Sender<Outcome<V>>>,
    stats: FlightStats,
}

pub struct SingleFlight<K, V> {
    inner: Arc<Mutex<Inner<K, V>>>,
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + 'static,
    V: Clone + Send + 'static,
{
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                flights: HashMap::new(),
                stats: FlightStats::default(),
            })),
        }
    }

    /// Returns the result of the fetch in flight for `key`, starting one with
    /// `make_fetch` if there is none.
    pub async fn run<F, Fut>(&self, key: K, make_fetch: F) -> Outcome<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Outcome<V>> + Send + 'static,
    {
        self.run_or_reuse(key, || None, make_fetch).await
    }

    /// Like `run`, but `reuse` is asked first, under the registry lock. A value it
    /// returns is handed back without joining or starting a fetch.
    ///
    /// A fetch's own side effects happen before its record is removed, so a `reuse`
    /// that reads what the previous fetch wrote never misses a value that fetch
    /// produced.
    pub async fn run_or_reuse<R, F, Fut>(&self, key: K, reuse: R, make_fetch: F) -> Outcome<V>
    where
        R: FnOnce() -> Option<V>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Outcome<V>> + Send + 'static,
    {
        let mut rx = {
            let mut inner = self.inner.lock().expect("single-flight lock poisoned");
            inner.stats.total += 1;

            if let Some(value) = reuse() {
                inner.stats.reused += 1;
                return Ok(value);
            }

            if let Some(tx) = inner.flights.get(&key) {
                let rx = tx.subscribe();
                inner.stats.coalesced += 1;
                debug!(key = ?key, "Joining in-flight fetch");
                rx
            } else {
                // One message per flight; every receiver subscribed before the send sees it.
                let (tx, rx) = broadcast::channel(1);
                inner.flights.insert(key.clone(), tx);
                inner.stats.leaders += 1;
                debug!(key = ?key, in_flight = inner.flights.len(), "Starting fetch");

                let fetch = tokio::spawn(make_fetch());
                let registry = Arc::clone(&self.inner);
                tokio::spawn(async move {
                    let outcome = match fetch.await {
                        Ok(outcome) => outcome,
                        Err(e) => Err(MeterError::Channel(format!("fetch task failed: {}", e))),
                    };
                    let tx = registry
                        .lock()
                        .expect("single-flight lock poisoned")
                        .flights
                        .remove(&key);
                    if let Some(tx) = tx {
                        let waiters = tx.receiver_count();
                        // Receivers may all have been dropped; the fetch still counted.
                        let _ = tx.send(outcome);
                        debug!(key = ?key, waiters, "Fetch complete");
                    }
                });
                rx
            }
        };

        rx.recv()
            .await
            .map_err(|e| MeterError::Channel(format!("in-flight fetch lost: {}", e)))?
    }

    pub fn stats(&self) -> FlightStats {
        self.inner.lock().expect("single-flight lock poisoned").stats
    }

    pub fn in_flight(&self) -> usize {
        self.inner
            .lock()
            .expect("single-flight lock poisoned")
            .flights
            .len()
    }
}

impl<K, V> Default for SingleFlight<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + 'static,
    V: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
