//! Cache-aside with absolute expiry and single-flight computation per key.
//!
//! Reads of ready entries go through an [`ArcSwap`] snapshot and never take a lock. A miss
//! elects one leader per key; later callers for the same key subscribe to the leader's result
//! instead of computing their own. If the leader is dropped before finishing, its waiters
//! re-contend and one of them takes over.

use crate::clock::{Clock, MonotonicClock};
use crate::Result;
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

struct CacheEntry<V> {
    value: Arc<V>,
    expires_at_millis: u64,
}

impl<V> Clone for CacheEntry<V> {
    fn clone(&self) -> Self {
        Self { value: Arc::clone(&self.value), expires_at_millis: self.expires_at_millis }
    }
}

type InFlightMap<V> = HashMap<String, broadcast::Sender<Result<Arc<V>>>>;

/// Removes the in-flight registration if the leader goes away without completing.
struct LeaderGuard<'a, V> {
    in_flight: &'a Mutex<InFlightMap<V>>,
    key: &'a str,
    armed: bool,
}

impl<V> Drop for LeaderGuard<'_, V> {
    fn drop(&mut self) {
        if self.armed {
            tracing::debug!(key = self.key, "cache leader dropped before completing");
            self.in_flight.lock().remove(self.key);
        }
    }
}

enum Role<V> {
    Leader,
    Waiter(broadcast::Receiver<Result<Arc<V>>>),
}

/// Keyed read-through cache.
pub struct CacheAside<V> {
    entries: ArcSwap<HashMap<String, CacheEntry<V>>>,
    in_flight: Mutex<InFlightMap<V>>,
    clock: Arc<dyn Clock>,
}

impl<V> std::fmt::Debug for CacheAside<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheAside")
            .field("entries", &self.entries.load().len())
            .field("in_flight", &self.in_flight.lock().len())
            .finish()
    }
}

impl<V> Default for CacheAside<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> CacheAside<V> {
    pub fn new() -> Self {
        Self::with_clock(MonotonicClock::default())
    }

    pub fn with_clock<C: Clock + 'static>(clock: C) -> Self {
        Self {
            entries: ArcSwap::from_pointee(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
            clock: Arc::new(clock),
        }
    }

    /// The cached value for `key`, if present and unexpired.
    pub fn get(&self, key: &str) -> Option<Arc<V>> {
        let now = self.clock.now_millis();
        self.entries
            .load()
            .get(key)
            .filter(|entry| entry.expires_at_millis > now)
            .map(|entry| Arc::clone(&entry.value))
    }

    /// Store `value` under `key` for `ttl` from now, dropping any expired entries.
    pub fn insert(&self, key: &str, value: Arc<V>, ttl: Duration) {
        let now = self.clock.now_millis();
        let ttl_millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        let entry = CacheEntry { value, expires_at_millis: now.saturating_add(ttl_millis) };
        self.entries.rcu(|current| {
            let mut next: HashMap<_, _> = current
                .iter()
                .filter(|(_, e)| e.expires_at_millis > now)
                .map(|(k, e)| (k.clone(), e.clone()))
                .collect();
            next.insert(key.to_owned(), entry.clone());
            next
        });
    }

    pub fn invalidate(&self, key: &str) {
        self.entries.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.remove(key);
            next
        });
    }

    pub fn clear(&self) {
        self.entries.store(Arc::new(HashMap::new()));
    }

    /// Return the cached value for `key`, or compute it.
    ///
    /// At most one `compute` runs per key at a time; concurrent callers share its outcome. A
    /// success is cached for `ttl` measured from completion. A failure is handed to every
    /// waiting caller and nothing is cached.
    pub async fn get_or_compute<F, Fut>(&self, key: &str, ttl: Duration, compute: F) -> Result<Arc<V>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        loop {
            if let Some(value) = self.get(key) {
                tracing::debug!(key, "cache hit");
                return Ok(value);
            }

            let role = {
                let mut in_flight = self.in_flight.lock();
                // A leader may have finished between the read above and taking the lock.
                if let Some(value) = self.get(key) {
                    return Ok(value);
                }
                match in_flight.get(key) {
                    Some(sender) => Role::Waiter(sender.subscribe()),
                    None => {
                        let (sender, _) = broadcast::channel(1);
                        in_flight.insert(key.to_owned(), sender);
                        Role::Leader
                    }
                }
            };

            match role {
                Role::Waiter(mut receiver) => {
                    tracing::debug!(key, "cache miss, waiting for in-flight computation");
                    match receiver.recv().await {
                        Ok(result) => return result,
                        Err(_) => continue,
                    }
                }
                Role::Leader => {
                    tracing::debug!(key, "cache miss, computing");
                    let mut guard = LeaderGuard { in_flight: &self.in_flight, key, armed: true };

                    let result = compute().await.map(Arc::new);
                    if let Ok(value) = &result {
                        self.insert(key, Arc::clone(value), ttl);
                    }

                    guard.armed = false;
                    if let Some(sender) = self.in_flight.lock().remove(key) {
                        let _ = sender.send(result.clone());
                    }
                    return result;
                }
            }
        }
    }
}
