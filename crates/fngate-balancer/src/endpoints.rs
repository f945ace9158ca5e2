//! Endpoint table — the pods backing a function's running version.
//!
//! The table is filled lazily from the store on the first selection after
//! it was found empty, then shared by every caller until flushed. Selection
//! is round-robin over an atomic cursor; a second counter tracks completed
//! calls so the difference is the number of calls currently in flight.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use fngate_state::{Cookie, Endpoint, StateStore};
use tracing::debug;

use crate::error::{BalancerError, BalancerResult};

/// Store refills attempted per selection before giving up.
const FILL_ATTEMPTS: usize = 3;

#[derive(Default)]
pub struct EndpointTable {
    endpoints: RwLock<Arc<Vec<Endpoint>>>,
    /// Selections made (round-robin cursor).
    selected: AtomicU32,
    /// Selections whose call has finished.
    completed: AtomicU32,
}

/// A selected endpoint. Dropping it marks the call as completed.
pub struct Selection {
    pub endpoint: Endpoint,
    /// Calls in flight on this table, this one included.
    pub in_flight: u32,
    table: Arc<EndpointTable>,
}

impl Drop for Selection {
    fn drop(&mut self) {
        self.table.completed.fetch_add(1, Ordering::Relaxed);
    }
}

impl EndpointTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn current(&self) -> Arc<Vec<Endpoint>> {
        self.endpoints
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Pick the next endpoint if the table is populated.
    pub fn try_select(self: &Arc<Self>) -> Option<Selection> {
        let endpoints = self.current();
        if endpoints.is_empty() {
            return None;
        }

        let n = self.selected.fetch_add(1, Ordering::Relaxed);
        let in_flight = n
            .wrapping_add(1)
            .wrapping_sub(self.completed.load(Ordering::Relaxed));

        Some(Selection {
            endpoint: endpoints[n as usize % endpoints.len()].clone(),
            in_flight,
            table: Arc::clone(self),
        })
    }

    /// Pick the next endpoint, filling an empty table from the store
    /// with the endpoints of `cookie` running `version`.
    ///
    /// Fails with [`BalancerError::NoCapacity`] when the store has none;
    /// the orchestrator is not consulted.
    pub fn select(
        self: &Arc<Self>,
        store: &StateStore,
        cookie: &Cookie,
        version: &str,
    ) -> BalancerResult<Selection> {
        for _ in 0..FILL_ATTEMPTS {
            if let Some(selection) = self.try_select() {
                return Ok(selection);
            }

            let endpoints: Vec<Endpoint> = store
                .list_endpoints(cookie)?
                .into_iter()
                .filter(|e| e.version == version)
                .collect();
            if endpoints.is_empty() {
                return Err(BalancerError::NoCapacity(cookie.clone()));
            }

            let count = endpoints.len();
            if self.fill_if_empty(endpoints) {
                debug!(%cookie, count, "endpoint table filled from store");
            }
        }
        // Flushed between every fill and selection.
        Err(BalancerError::NoCapacity(cookie.clone()))
    }

    /// Install `endpoints` unless another caller already populated the
    /// table, in which case the existing contents win.
    pub fn fill_if_empty(&self, endpoints: Vec<Endpoint>) -> bool {
        let mut slot = self
            .endpoints
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if !slot.is_empty() {
            return false;
        }
        *slot = Arc::new(endpoints);
        true
    }

    /// Empty the table. The next selection refills it from the store.
    pub fn flush(&self) {
        *self
            .endpoints
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(Vec::new());
    }

    pub fn len(&self) -> usize {
        self.current().len()
    }

    pub fn is_empty(&self) -> bool {
        self.current().is_empty()
    }

    /// `(selected, completed)` counters.
    pub fn counters(&self) -> (u32, u32) {
        (
            self.selected.load(Ordering::Relaxed),
            self.completed.load(Ordering::Relaxed),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn endpoint(cookie: &Cookie, pod: &str, version: &str) -> Endpoint {
        Endpoint {
            cookie: cookie.clone(),
            pod: pod.to_string(),
            address: "10.0.0.1".to_string(),
            port: 8080,
            version: version.to_string(),
        }
    }

    fn seeded_store(cookie: &Cookie, pods: &[&str]) -> StateStore {
        let store = StateStore::open_in_memory().unwrap();
        for pod in pods {
            store.add_endpoint(&endpoint(cookie, pod, "1")).unwrap();
        }
        store
    }

    #[test]
    fn empty_store_is_no_capacity() {
        let cookie = Cookie::new("acme", "p", "f");
        let store = StateStore::open_in_memory().unwrap();
        let table = Arc::new(EndpointTable::new());

        let err = table.select(&store, &cookie, "1").err().unwrap();
        assert!(matches!(err, BalancerError::NoCapacity(_)));
        assert!(table.is_empty());
        assert_eq!(table.counters(), (0, 0));
    }

    #[test]
    fn fills_lazily_and_filters_version() {
        let cookie = Cookie::new("acme", "p", "f");
        let store = seeded_store(&cookie, &["a", "b"]);
        store.add_endpoint(&endpoint(&cookie, "old", "0")).unwrap();
        let table = Arc::new(EndpointTable::new());

        let sel = table.select(&store, &cookie, "1").unwrap();
        assert_eq!(table.len(), 2);
        assert_ne!(sel.endpoint.pod, "old");
    }

    #[test]
    fn round_robin_visits_each_endpoint_once_per_cycle() {
        let cookie = Cookie::new("acme", "p", "f");
        let store = seeded_store(&cookie, &["a", "b", "c", "d"]);
        let table = Arc::new(EndpointTable::new());

        let mut order = Vec::new();
        for _ in 0..8 {
            order.push(table.select(&store, &cookie, "1").unwrap().endpoint.pod.clone());
        }

        // Any 4 consecutive selections cover the whole table.
        for window in order.windows(4) {
            let set: HashSet<&String> = window.iter().collect();
            assert_eq!(set.len(), 4, "window {window:?}");
        }
        // Fixed cyclic order.
        assert_eq!(order[..4], order[4..]);
    }

    #[tokio::test]
    async fn round_robin_is_fair_under_concurrency() {
        let cookie = Cookie::new("acme", "p", "f");
        let store = seeded_store(&cookie, &["a", "b", "c"]);
        let table = Arc::new(EndpointTable::new());
        table.select(&store, &cookie, "1").unwrap();

        let mut handles = Vec::new();
        for _ in 0..30 {
            let table = table.clone();
            handles.push(tokio::spawn(async move {
                table.try_select().unwrap().endpoint.pod.clone()
            }));
        }
        let mut counts = std::collections::HashMap::new();
        for h in handles {
            *counts.entry(h.await.unwrap()).or_insert(0) += 1;
        }
        assert_eq!(counts.values().copied().collect::<HashSet<i32>>(), HashSet::from([10]));
    }

    #[test]
    fn in_flight_tracks_outstanding_selections() {
        let cookie = Cookie::new("acme", "p", "f");
        let store = seeded_store(&cookie, &["a"]);
        let table = Arc::new(EndpointTable::new());

        let first = table.select(&store, &cookie, "1").unwrap();
        let second = table.select(&store, &cookie, "1").unwrap();
        assert_eq!(first.in_flight, 1);
        assert_eq!(second.in_flight, 2);

        drop(first);
        drop(second);
        let third = table.select(&store, &cookie, "1").unwrap();
        assert_eq!(third.in_flight, 1);
        assert_eq!(table.counters(), (3, 2));
    }

    #[test]
    fn existing_contents_win_over_concurrent_fill() {
        let cookie = Cookie::new("acme", "p", "f");
        let table = EndpointTable::new();
        assert!(table.fill_if_empty(vec![endpoint(&cookie, "a", "1")]));
        assert!(!table.fill_if_empty(vec![
            endpoint(&cookie, "b", "1"),
            endpoint(&cookie, "c", "1"),
        ]));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn flush_is_idempotent_and_table_refills() {
        let cookie = Cookie::new("acme", "p", "f");
        let store = seeded_store(&cookie, &["a", "b"]);
        let table = Arc::new(EndpointTable::new());

        table.flush();
        table.flush();
        assert!(table.is_empty());

        table.select(&store, &cookie, "1").unwrap();
        assert_eq!(table.len(), 2);

        table.flush();
        table.flush();
        assert!(table.is_empty());

        store.add_endpoint(&endpoint(&cookie, "c", "1")).unwrap();
        table.select(&store, &cookie, "1").unwrap();
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn populated_table_does_not_reread_store() {
        let cookie = Cookie::new("acme", "p", "f");
        let store = seeded_store(&cookie, &["a"]);
        let table = Arc::new(EndpointTable::new());
        table.select(&store, &cookie, "1").unwrap();

        // Store changes are invisible until a flush.
        store.add_endpoint(&endpoint(&cookie, "b", "1")).unwrap();
        for _ in 0..3 {
            assert_eq!(table.select(&store, &cookie, "1").unwrap().endpoint.pod, "a");
        }
    }
}
