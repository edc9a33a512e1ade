use futures::future::{LocalBoxFuture, Shared};
use std::collections::HashMap;

use crate::domain::errors::ChartResult;

pub type SharedRequest<T> = Shared<LocalBoxFuture<'static, ChartResult<T>>>;

struct CacheEntry<T: Clone> {
    request: SharedRequest<T>,
    expires_at_ms: u64,
}

/// Short-lived de-duplication of identical requests.
///
/// Keyed by the canonical request string. Identical requests issued within
/// the TTL share one in-flight future and its result. Entries expire on their
/// own; a failed request must be removed by the caller so it is not replayed.
pub struct RequestCache<T: Clone> {
    entries: HashMap<String, CacheEntry<T>>,
    ttl_ms: u64,
}

impl<T: Clone + 'static> RequestCache<T> {
    pub fn new(ttl_ms: u64) -> Self {
        Self { entries: HashMap::new(), ttl_ms }
    }

    pub fn ttl_ms(&self) -> u64 {
        self.ttl_ms
    }

    pub fn set_ttl_ms(&mut self, ttl_ms: u64) {
        self.ttl_ms = ttl_ms;
    }

    /// Live request for `key`, or a new one from `start` registered under it.
    pub fn get_or_start<F>(&mut self, key: &str, now_ms: u64, start: F) -> SharedRequest<T>
    where
        F: FnOnce() -> LocalBoxFuture<'static, ChartResult<T>>,
    {
        self.evict_expired(now_ms);
        if let Some(entry) = self.entries.get(key) {
            return entry.request.clone();
        }

        let request = futures::FutureExt::shared(start());
        self.entries.insert(
            key.to_string(),
            CacheEntry { request: request.clone(), expires_at_ms: now_ms.saturating_add(self.ttl_ms) },
        );
        request
    }

    pub fn remove(&mut self, key: &str) {
        self.entries.remove(key);
    }

    pub fn evict_expired(&mut self, now_ms: u64) {
        self.entries.retain(|_, entry| entry.expires_at_ms > now_ms);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
