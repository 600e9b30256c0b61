//! Bounded LRU of parsed source maps.
//!
//! Lookups pin their entry for as long as the returned [`MapLease`] lives;
//! pinned entries are never evicted. When every entry is pinned a new map is
//! handed back to the caller but not cached. Concurrent loads for one bundle
//! share a single in-flight [`OnceCell`].

use std::collections::HashMap;
use std::future::Future;
use std::ops::Deref;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::OnceCell;

use super::parse::SourceMap;

type InFlight = Arc<OnceCell<Option<Arc<SourceMap>>>>;

/// A cached, parsed source map.
#[derive(Debug, Clone)]
pub struct SourceMapEntry {
    pub bundle: String,
    pub map: Arc<SourceMap>,
    /// Logical clock value of the last lookup.
    pub last_used: u64,
}

#[derive(Default)]
struct CacheState {
    tick: u64,
    entries: HashMap<String, SourceMapEntry>,
    in_flight: HashMap<String, InFlight>,
    /// Active resolutions per bundle.
    pins: HashMap<String, usize>,
}

impl CacheState {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn is_pinned(&self, bundle: &str) -> bool {
        self.pins.get(bundle).is_some_and(|n| *n > 0)
    }

    /// Insert, evicting the least recently used unpinned entry if full.
    /// Returns false when the cache is full of pinned entries.
    fn insert(&mut self, bundle: &str, map: Arc<SourceMap>, capacity: usize) -> bool {
        if self.entries.len() >= capacity {
            let victim = self
                .entries
                .values()
                .filter(|e| !self.is_pinned(&e.bundle))
                .min_by_key(|e| e.last_used)
                .map(|e| e.bundle.clone());
            match victim {
                Some(victim) => {
                    tracing::debug!(bundle = %victim, "evicting source map");
                    self.entries.remove(&victim);
                }
                None => return false,
            }
        }
        let last_used = self.next_tick();
        self.entries.insert(
            bundle.to_string(),
            SourceMapEntry {
                bundle: bundle.to_string(),
                map,
                last_used,
            },
        );
        true
    }
}

pub struct SourceMapCache {
    capacity: usize,
    state: Mutex<CacheState>,
}

impl SourceMapCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(CacheState::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, bundle: &str) -> bool {
        self.state.lock().entries.contains_key(bundle)
    }

    pub fn is_pinned(&self, bundle: &str) -> bool {
        self.state.lock().is_pinned(bundle)
    }

    /// Cached entries, least recently used first.
    pub fn entries(&self) -> Vec<SourceMapEntry> {
        let mut entries: Vec<_> = self.state.lock().entries.values().cloned().collect();
        entries.sort_by_key(|e| e.last_used);
        entries
    }

    /// Return the map for `bundle`, running `load` on a miss.
    ///
    /// Callers racing on the same bundle await one shared `load`. A `None`
    /// result is shared with those callers but not cached, so a later
    /// lookup tries again.
    pub async fn get_or_load<F, Fut>(&self, bundle: &str, load: F) -> Option<MapLease<'_>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Option<SourceMap>>,
    {
        let (pin, cell) = {
            let mut state = self.state.lock();
            let tick = state.next_tick();
            let pin = self.pin(&mut state, bundle);
            if let Some(entry) = state.entries.get_mut(bundle) {
                entry.last_used = tick;
                tracing::debug!(bundle, "source map cache hit");
                return Some(MapLease {
                    map: entry.map.clone(),
                    _pin: pin,
                });
            }
            let cell = state
                .in_flight
                .entry(bundle.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone();
            (pin, cell)
        };

        let loaded = cell
            .get_or_init(|| async { load().await.map(Arc::new) })
            .await
            .clone();

        let mut state = self.state.lock();
        if state
            .in_flight
            .get(bundle)
            .is_some_and(|current| Arc::ptr_eq(current, &cell))
        {
            state.in_flight.remove(bundle);
        }
        let map = loaded?;
        if !state.entries.contains_key(bundle) && !state.insert(bundle, map.clone(), self.capacity)
        {
            tracing::debug!(bundle, "source map cache full of active entries, not caching");
        }
        Some(MapLease { map, _pin: pin })
    }

    fn pin(&self, state: &mut CacheState, bundle: &str) -> Pin<'_> {
        *state.pins.entry(bundle.to_string()).or_insert(0) += 1;
        Pin {
            cache: self,
            bundle: bundle.to_string(),
        }
    }
}

/// Marks one active resolution; released on drop, including when the
/// awaiting future is cancelled.
struct Pin<'a> {
    cache: &'a SourceMapCache,
    bundle: String,
}

impl Drop for Pin<'_> {
    fn drop(&mut self) {
        let mut state = self.cache.state.lock();
        if let Some(count) = state.pins.get_mut(&self.bundle) {
            *count -= 1;
            if *count == 0 {
                state.pins.remove(&self.bundle);
            }
        }
    }
}

/// A source map held for the duration of one resolution.
pub struct MapLease<'a> {
    map: Arc<SourceMap>,
    _pin: Pin<'a>,
}

impl MapLease<'_> {
    pub fn map(&self) -> &Arc<SourceMap> {
        &self.map
    }
}

impl Deref for MapLease<'_> {
    type Target = SourceMap;

    fn deref(&self) -> &SourceMap {
        &self.map
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn empty_map() -> Option<SourceMap> {
        Some(SourceMap::default())
    }

    #[tokio::test]
    async fn test_hit_after_load() {
        let cache = SourceMapCache::new(2);
        let loads = AtomicUsize::new(0);
        let counter = &loads;
        for _ in 0..3 {
            let lease = cache
                .get_or_load("a.js", move || async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    empty_map()
                })
                .await;
            assert!(lease.is_some());
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert!(!cache.is_pinned("a.js"));
    }

    #[tokio::test]
    async fn test_concurrent_loads_are_deduplicated() {
        let cache = SourceMapCache::new(4);
        let loads = AtomicUsize::new(0);
        let counter = &loads;
        let load = move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            empty_map()
        };
        let (a, b, c) = tokio::join!(
            cache.get_or_load("app.js", load),
            cache.get_or_load("app.js", load),
            cache.get_or_load("app.js", load),
        );
        assert!(a.is_some() && b.is_some() && c.is_some());
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(a.unwrap().map(), b.unwrap().map()));
    }

    #[tokio::test]
    async fn test_evicts_least_recently_used() {
        let cache = SourceMapCache::new(2);
        cache.get_or_load("a.js", || async { empty_map() }).await;
        cache.get_or_load("b.js", || async { empty_map() }).await;
        // Touch a.js so b.js becomes the LRU entry.
        cache.get_or_load("a.js", || async { empty_map() }).await;
        cache.get_or_load("c.js", || async { empty_map() }).await;

        assert_eq!(cache.len(), 2);
        assert!(cache.contains("a.js"));
        assert!(!cache.contains("b.js"));
        assert!(cache.contains("c.js"));
    }

    #[tokio::test]
    async fn test_pinned_entry_survives_eviction() {
        let cache = SourceMapCache::new(2);
        let held = cache.get_or_load("a.js", || async { empty_map() }).await;
        assert!(cache.is_pinned("a.js"));
        cache.get_or_load("b.js", || async { empty_map() }).await;
        cache.get_or_load("c.js", || async { empty_map() }).await;

        assert!(cache.len() <= cache.capacity());
        assert!(cache.contains("a.js"));
        assert!(cache.contains("c.js"));
        drop(held);
        assert!(!cache.is_pinned("a.js"));
    }

    #[tokio::test]
    async fn test_declines_insert_when_all_pinned() {
        let cache = SourceMapCache::new(1);
        let _held = cache.get_or_load("a.js", || async { empty_map() }).await;
        let other = cache.get_or_load("b.js", || async { empty_map() }).await;

        // The caller still gets its map; the cache does not grow past capacity.
        assert!(other.is_some());
        assert_eq!(cache.len(), 1);
        assert!(cache.contains("a.js"));
        assert!(!cache.contains("b.js"));
    }

    #[tokio::test]
    async fn test_failed_load_is_not_cached() {
        let cache = SourceMapCache::new(2);
        let missing = cache.get_or_load("a.js", || async { None }).await;
        assert!(missing.is_none());
        assert!(cache.is_empty());
        assert!(!cache.is_pinned("a.js"));

        let retry = cache.get_or_load("a.js", || async { empty_map() }).await;
        assert!(retry.is_some());
    }
}
