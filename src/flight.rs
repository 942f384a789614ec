use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, PoisonError};
use tokio::sync::watch;

/// Per-key registry of in-progress computations.
///
/// The first caller for a key becomes the leader and runs the work; callers
/// arriving while it runs wait for and share the leader's result. If the
/// leader's future is dropped before finishing (client went away), its slot
/// is released and one waiting caller takes over.
pub struct InFlight<T> {
    flights: Mutex<HashMap<String, watch::Receiver<Option<T>>>>,
}

enum Role<T> {
    Leader(watch::Sender<Option<T>>),
    Follower(watch::Receiver<Option<T>>),
}

// Removes the key even when the leader is cancelled mid-flight.
struct LeaderGuard<'a, T> {
    flights: &'a Mutex<HashMap<String, watch::Receiver<Option<T>>>>,
    key: &'a str,
    tx: watch::Sender<Option<T>>,
}

impl<T> Drop for LeaderGuard<'_, T> {
    fn drop(&mut self) {
        self.flights
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(self.key);
    }
}

/// Outcome of [`InFlight::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shared<T> {
    pub value: T,
    /// True when the value came from another caller's computation.
    pub joined: bool,
}

impl<T: Clone + Send + Sync> InFlight<T> {
    pub fn new() -> Self {
        Self { flights: Mutex::new(HashMap::new()) }
    }

    pub fn len(&self) -> usize {
        self.flights.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn join(&self, key: &str) -> Role<T> {
        let mut map = self.flights.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = map.get(key) {
            return Role::Follower(existing.clone());
        }
        let (tx, rx) = watch::channel(None);
        map.insert(key.to_string(), rx);
        Role::Leader(tx)
    }

    /// Runs `work` unless an identical `key` is already being computed, in
    /// which case that computation's result is awaited and returned.
    pub async fn run<F, Fut>(&self, key: &str, work: F) -> Shared<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        loop {
            match self.join(key) {
                Role::Leader(tx) => {
                    let guard = LeaderGuard { flights: &self.flights, key, tx };
                    let value = work().await;
                    guard.tx.send_replace(Some(value.clone()));
                    drop(guard);
                    return Shared { value, joined: false };
                }
                Role::Follower(mut rx) => {
                    let shared = match rx.wait_for(Option::is_some).await {
                        Ok(slot) => (*slot).clone(),
                        Err(_) => None,
                    };
                    if let Some(value) = shared {
                        return Shared { value, joined: true };
                    }
                    // leader abandoned the flight; race to take it over
                    tokio::task::yield_now().await;
                }
            }
        }
    }
}

impl<T: Clone + Send + Sync> Default for InFlight<T> {
    fn default() -> Self {
        Self::new()
    }
}
