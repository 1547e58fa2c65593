//! Per-key request coalescing.
//!
//! [`SingleFlight::execute_once`] guarantees at most one in-flight producer
//! per key in this process. The first caller for a key becomes the leader and
//! spawns the producer onto the runtime; every caller, the leader included,
//! then waits on a watch channel for a clone of the outcome, success or
//! error.
//!
//! The producer task owns the flight, so a caller that times out or is
//! dropped only detaches. The work keeps running and its outcome still
//! reaches the remaining callers.
//!
//! The registry lock is only held to look up or register a flight, never
//! across an `.await`, so a producer may freely call `execute_once` for a
//! different key.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;

type Flights<V> = Mutex<HashMap<String, (u64, watch::Receiver<Option<V>>)>>;

/// Coalesces concurrent computations of the same key.
pub struct SingleFlight<V> {
    inflight: Arc<Flights<V>>,
    next_generation: AtomicU64,
}

impl<V> std::fmt::Debug for SingleFlight<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleFlight")
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

impl<V> Default for SingleFlight<V> {
    fn default() -> Self {
        Self {
            inflight: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(0),
        }
    }
}

impl<V> SingleFlight<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently being produced.
    pub fn in_flight(&self) -> usize {
        self.inflight.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}

enum Joined<V> {
    Leader(Flight<V>, watch::Receiver<Option<V>>),
    Waiter(watch::Receiver<Option<V>>),
}

/// A registered flight, owned by its producer task.
///
/// Dropping it unregisters the key before the sender closes, so a waiter that
/// observes the closed channel never finds the dead flight still registered.
struct Flight<V> {
    registry: Arc<Flights<V>>,
    key: String,
    generation: u64,
    tx: watch::Sender<Option<V>>,
}

impl<V> Drop for Flight<V> {
    fn drop(&mut self) {
        let mut map = self.registry.lock().unwrap_or_else(|p| p.into_inner());
        if map
            .get(&self.key)
            .is_some_and(|(generation, _)| *generation == self.generation)
        {
            map.remove(&self.key);
        }
    }
}

impl<V> SingleFlight<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn join(&self, key: &str) -> Joined<V> {
        let mut map = self.inflight.lock().unwrap_or_else(|p| p.into_inner());
        if let Some((_, rx)) = map.get(key) {
            return Joined::Waiter(rx.clone());
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = watch::channel(None);
        map.insert(key.to_string(), (generation, rx.clone()));
        Joined::Leader(
            Flight {
                registry: Arc::clone(&self.inflight),
                key: key.to_string(),
                generation,
                tx,
            },
            rx,
        )
    }

    /// Run `producer` unless a computation for `key` is already in flight,
    /// in which case wait for and return its outcome.
    ///
    /// Returns `None` only if the producer task died (panicked or its runtime
    /// shut down) before publishing.
    pub async fn execute_once<F, Fut>(&self, key: &str, producer: F) -> Option<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V> + Send + 'static,
    {
        let mut producer = Some(producer);
        loop {
            let mut rx = match self.join(key) {
                Joined::Waiter(rx) => rx,
                Joined::Leader(flight, rx) => {
                    // Our own producer already ran and died.
                    let Some(produce) = producer.take() else {
                        return None;
                    };
                    let work = produce();
                    tokio::spawn(async move {
                        let value = work.await;
                        flight.tx.send_replace(Some(value));
                        drop(flight);
                    });
                    rx
                }
            };

            loop {
                let published = rx.borrow_and_update().clone();
                if let Some(value) = published {
                    return Some(value);
                }
                if rx.changed().await.is_err() {
                    let published = rx.borrow().clone();
                    if let Some(value) = published {
                        return Some(value);
                    }
                    tracing::debug!(key, "Single-flight producer died, retrying");
                    break;
                }
            }
        }
    }

    /// Like [`execute_once`](Self::execute_once), but give up after `wait`.
    ///
    /// A caller that gives up detaches, leader or not. The producer keeps
    /// running and publishes to whoever is still waiting.
    pub async fn execute_once_within<F, Fut>(
        &self,
        key: &str,
        wait: Duration,
        producer: F,
    ) -> Option<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V> + Send + 'static,
    {
        tokio::time::timeout(wait, self.execute_once(key, producer))
            .await
            .ok()
            .flatten()
    }
}
