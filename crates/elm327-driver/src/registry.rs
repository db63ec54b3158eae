//! Pending-query registry
//!
//! Queries in flight are kept per (mode, PID) key in submission order. A
//! waiter owns its descriptor and its completion sender, so whichever path
//! removes it first (response, timeout or transport failure) is the only one
//! able to complete it.

use crate::error::DriverError;
use obd_protocol::{QueryDescriptor, QueryId, QueryKey};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tokio::task::AbortHandle;

/// Final outcome of a query
pub type QueryResult = Result<QueryDescriptor, DriverError>;

/// A registered query waiting for its response
#[derive(Debug)]
pub(crate) struct Waiter {
    descriptor: QueryDescriptor,
    reply: oneshot::Sender<QueryResult>,
    watchdog: Option<AbortHandle>,
}

impl Waiter {
    pub(crate) fn new(descriptor: QueryDescriptor, reply: oneshot::Sender<QueryResult>) -> Self {
        Self {
            descriptor,
            reply,
            watchdog: None,
        }
    }

    pub(crate) fn descriptor_mut(&mut self) -> &mut QueryDescriptor {
        &mut self.descriptor
    }

    /// Forget the watchdog without cancelling it (used by the watchdog itself)
    pub(crate) fn detach_watchdog(&mut self) {
        self.watchdog = None;
    }

    /// Resolve with the descriptor
    pub(crate) fn complete(mut self) {
        self.cancel_watchdog();
        let _ = self.reply.send(Ok(self.descriptor));
    }

    /// Resolve with an error
    pub(crate) fn fail(mut self, err: DriverError) {
        self.cancel_watchdog();
        let _ = self.reply.send(Err(err));
    }

    fn cancel_watchdog(&mut self) {
        if let Some(watchdog) = self.watchdog.take() {
            watchdog.abort();
        }
    }
}

/// Pending queries keyed by (mode, PID), FIFO per key
#[derive(Debug, Default)]
pub struct PendingRegistry {
    waiters: Mutex<HashMap<QueryKey, VecDeque<Waiter>>>,
}

impl PendingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<QueryKey, VecDeque<Waiter>>> {
        self.waiters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn insert(&self, waiter: Waiter) {
        self.lock()
            .entry(waiter.descriptor.key())
            .or_default()
            .push_back(waiter);
    }

    /// Take the oldest waiter for a key
    pub(crate) fn pop_oldest(&self, key: QueryKey) -> Option<Waiter> {
        let mut waiters = self.lock();
        let queue = waiters.get_mut(&key)?;
        let waiter = queue.pop_front();
        if queue.is_empty() {
            waiters.remove(&key);
        }
        waiter
    }

    /// Take a specific waiter
    pub(crate) fn remove(&self, key: QueryKey, id: QueryId) -> Option<Waiter> {
        let mut waiters = self.lock();
        let queue = waiters.get_mut(&key)?;
        let index = queue.iter().position(|w| w.descriptor.id() == id)?;
        let waiter = queue.remove(index);
        if queue.is_empty() {
            waiters.remove(&key);
        }
        waiter
    }

    pub fn contains(&self, key: QueryKey, id: QueryId) -> bool {
        self.lock()
            .get(&key)
            .map_or(false, |queue| queue.iter().any(|w| w.descriptor.id() == id))
    }

    /// Stamp the send time of a registered query
    pub(crate) fn mark_sent(&self, key: QueryKey, id: QueryId, at_ms: u64) {
        if let Some(waiter) = self
            .lock()
            .get_mut(&key)
            .and_then(|queue| queue.iter_mut().find(|w| w.descriptor.id() == id))
        {
            waiter.descriptor.mark_sent(at_ms);
        }
    }

    /// Hand the watchdog of a query to its waiter. Returns false when the
    /// query already resolved, in which case the caller cancels the watchdog.
    pub(crate) fn attach_watchdog(&self, key: QueryKey, id: QueryId, watchdog: AbortHandle) -> bool {
        match self
            .lock()
            .get_mut(&key)
            .and_then(|queue| queue.iter_mut().find(|w| w.descriptor.id() == id))
        {
            Some(waiter) => {
                waiter.watchdog = Some(watchdog);
                true
            }
            None => false,
        }
    }

    /// Remove every waiter across all keys
    pub(crate) fn drain(&self) -> Vec<Waiter> {
        self.lock().drain().flat_map(|(_, queue)| queue).collect()
    }

    /// Number of queries in flight
    pub fn len(&self) -> usize {
        self.lock().values().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Future resolving to the outcome of a submitted query
#[derive(Debug)]
pub struct QueryHandle {
    id: QueryId,
    key: QueryKey,
    reply: oneshot::Receiver<QueryResult>,
}

impl QueryHandle {
    pub fn new(id: QueryId, key: QueryKey, reply: oneshot::Receiver<QueryResult>) -> Self {
        Self { id, key, reply }
    }

    pub fn id(&self) -> QueryId {
        self.id
    }

    pub fn key(&self) -> QueryKey {
        self.key
    }
}

impl Future for QueryHandle {
    type Output = QueryResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.reply)
            .poll(cx)
            .map(|result| result.unwrap_or(Err(DriverError::TransportClosed)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn register(registry: &PendingRegistry, mode: u8, pid: u8) -> (QueryId, QueryHandle) {
        let descriptor = QueryDescriptor::new(mode, pid).unwrap();
        let (id, key) = (descriptor.id(), descriptor.key());
        let (tx, rx) = oneshot::channel();
        registry.insert(Waiter::new(descriptor, tx));
        (id, QueryHandle::new(id, key, rx))
    }

    #[tokio::test]
    async fn test_fifo_per_key() {
        let registry = PendingRegistry::new();
        let (first, _h1) = register(&registry, 0x01, 0x0C);
        let (second, _h2) = register(&registry, 0x01, 0x0C);
        let (_other, _h3) = register(&registry, 0x01, 0x0D);
        assert_eq!(registry.len(), 3);

        let key = QueryKey::new(0x01, 0x0C);
        assert_eq!(registry.pop_oldest(key).unwrap().descriptor.id(), first);
        assert_eq!(registry.pop_oldest(key).unwrap().descriptor.id(), second);
        assert!(registry.pop_oldest(key).is_none());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_specific_waiter() {
        let registry = PendingRegistry::new();
        let (first, _h1) = register(&registry, 0x01, 0x0C);
        let (second, _h2) = register(&registry, 0x01, 0x0C);
        let key = QueryKey::new(0x01, 0x0C);

        assert!(registry.remove(key, second).is_some());
        assert!(registry.remove(key, second).is_none());
        assert!(registry.contains(key, first));
        assert!(!registry.contains(key, second));
    }

    #[tokio::test]
    async fn test_completion_reaches_handle() {
        let registry = PendingRegistry::new();
        let (_, handle) = register(&registry, 0x01, 0x0D);
        let mut waiter = registry.pop_oldest(QueryKey::new(0x01, 0x0D)).unwrap();
        waiter.descriptor_mut().attach_response(vec![0x32], 1);
        waiter.complete();

        let descriptor = handle.await.unwrap();
        assert_eq!(descriptor.raw_bytes(), Some(&[0x32][..]));
    }

    #[tokio::test]
    async fn test_drain_fails_every_key() {
        let registry = PendingRegistry::new();
        let (_, h1) = register(&registry, 0x01, 0x0C);
        let (_, h2) = register(&registry, 0x09, 0x02);
        for waiter in registry.drain() {
            waiter.fail(DriverError::TransportWrite("broken pipe".to_string()));
        }
        assert!(registry.is_empty());
        assert!(matches!(h1.await, Err(DriverError::TransportWrite(_))));
        assert!(matches!(h2.await, Err(DriverError::TransportWrite(_))));
    }

    #[tokio::test]
    async fn test_dropped_waiter_reports_closed() {
        let registry = PendingRegistry::new();
        let (_, handle) = register(&registry, 0x01, 0x0C);
        drop(registry);
        assert_eq!(handle.await.unwrap_err(), DriverError::TransportClosed);
    }

    #[test]
    fn test_racing_removals_resolve_once() {
        for _ in 0..200 {
            let registry = Arc::new(PendingRegistry::new());
            let descriptor = QueryDescriptor::new(0x01, 0x0C).unwrap();
            let (id, key) = (descriptor.id(), descriptor.key());
            let (tx, _rx) = oneshot::channel();
            registry.insert(Waiter::new(descriptor, tx));

            let timer = {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.remove(key, id).is_some())
            };
            let response = {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.pop_oldest(key).is_some())
            };
            let removed = [timer.join().unwrap(), response.join().unwrap()];
            assert_eq!(removed.iter().filter(|r| **r).count(), 1);
        }
    }
}
