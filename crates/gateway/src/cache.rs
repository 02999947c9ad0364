use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::{BoxFuture, FutureExt, Shared};
use indexmap::IndexMap;
use tokio::sync::Mutex;

/// Failure from a cache fetch, flattened to text so that every waiter on a
/// coalesced fetch can receive a clone of it.
#[derive(Debug, Clone)]
pub struct FetchError(pub String);

impl FetchError {
    pub fn new(err: impl fmt::Display) -> Self {
        Self(err.to_string())
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for FetchError {}

type SharedFetch<T> = Shared<BoxFuture<'static, Result<T, FetchError>>>;

struct TtlInner<T> {
    value: Option<T>,
    inserted_at: Option<Instant>,
    inflight: Option<(u64, SharedFetch<T>)>,
    next_id: u64,
}

/// A single-value TTL cache with singleflight coalescing: concurrent misses
/// share one in-flight fetch, and a failed fetch clears the in-flight handle
/// so the next caller retries. The value is only stored on success, and the
/// timestamp is only bumped when the value is written.
pub struct TtlCache<T> {
    ttl: Duration,
    inner: Mutex<TtlInner<T>>,
}

impl<T: Clone + Send + Sync + 'static> TtlCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: Mutex::new(TtlInner {
                value: None,
                inserted_at: None,
                inflight: None,
                next_id: 0,
            }),
        }
    }

    /// The cached value regardless of freshness, without triggering a fetch.
    pub async fn peek(&self) -> Option<T> {
        self.inner.lock().await.value.clone()
    }

    /// Return the fresh cached value, or fetch. Concurrent callers coalesce
    /// onto one fetch.
    pub async fn get<Fut>(&self, fetch: Fut) -> Result<T, FetchError>
    where
        Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    {
        self.get_inner(fetch, false).await
    }

    /// Fetch unconditionally, still coalescing with concurrent callers.
    /// Pollers use this so every iteration refreshes even while readers see
    /// the previous value as fresh.
    pub async fn refresh<Fut>(&self, fetch: Fut) -> Result<T, FetchError>
    where
        Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    {
        self.get_inner(fetch, true).await
    }

    async fn get_inner<Fut>(&self, fetch: Fut, force: bool) -> Result<T, FetchError>
    where
        Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    {
        let (id, shared) = {
            let mut inner = self.inner.lock().await;
            if !force {
                if let (Some(value), Some(at)) = (&inner.value, inner.inserted_at) {
                    if at.elapsed() < self.ttl {
                        return Ok(value.clone());
                    }
                }
            }
            match &inner.inflight {
                Some((id, shared)) => (*id, shared.clone()),
                None => {
                    let id = inner.next_id;
                    inner.next_id += 1;
                    let shared = fetch.boxed().shared();
                    inner.inflight = Some((id, shared.clone()));
                    (id, shared)
                }
            }
        };

        let result = shared.await;

        let mut inner = self.inner.lock().await;
        let is_current = matches!(&inner.inflight, Some((current, _)) if *current == id);
        match result {
            Ok(value) => {
                if is_current {
                    inner.value = Some(value.clone());
                    inner.inserted_at = Some(Instant::now());
                    inner.inflight = None;
                }
                Ok(value)
            }
            Err(why) => {
                if is_current {
                    inner.inflight = None;
                }
                Err(why)
            }
        }
    }
}

/// Freshness of a value returned by the stale-while-revalidate cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    Seed,
    Fresh,
    Stale,
    SeedFailed,
}

struct SwrInner<T> {
    value: Option<T>,
    inserted_at: Option<Instant>,
    seed: Option<(u64, SharedFetch<T>)>,
    refreshing: bool,
    next_id: u64,
}

/// A stale-while-revalidate cache. Cold reads await a shared seeding fetch
/// (and report `SeedFailed` with a default value when it errors); warm reads
/// return immediately, kicking a background refresh when the value has
/// expired. A failed refresh keeps the previous value.
pub struct SwrCache<T> {
    ttl: Duration,
    inner: Arc<Mutex<SwrInner<T>>>,
}

enum SwrPath<T> {
    Cold {
        id: u64,
        shared: SharedFetch<T>,
    },
    Warm {
        value: T,
        fresh: bool,
        start_refresh: bool,
    },
}

impl<T: Clone + Default + Send + Sync + 'static> SwrCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: Arc::new(Mutex::new(SwrInner {
                value: None,
                inserted_at: None,
                seed: None,
                refreshing: false,
                next_id: 0,
            })),
        }
    }

    pub async fn get<Fut>(&self, fetch: Fut) -> (T, CacheState)
    where
        Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    {
        let mut fetch = Some(fetch);
        let path = {
            let mut inner = self.inner.lock().await;
            if let Some(value) = inner.value.clone() {
                let fresh = inner
                    .inserted_at
                    .map_or(false, |at| at.elapsed() < self.ttl);
                let start_refresh = !fresh && !inner.refreshing;
                if start_refresh {
                    inner.refreshing = true;
                }
                SwrPath::Warm {
                    value,
                    fresh,
                    start_refresh,
                }
            } else {
                match &inner.seed {
                    Some((id, shared)) => SwrPath::Cold {
                        id: *id,
                        shared: shared.clone(),
                    },
                    None => {
                        let id = inner.next_id;
                        inner.next_id += 1;
                        let shared = match fetch.take() {
                            Some(fut) => fut.boxed().shared(),
                            None => unreachable!("fetch consumed twice"),
                        };
                        inner.seed = Some((id, shared.clone()));
                        SwrPath::Cold { id, shared }
                    }
                }
            }
        };

        match path {
            SwrPath::Cold { id, shared } => self.await_seed(id, shared).await,
            SwrPath::Warm {
                value,
                fresh,
                start_refresh,
            } => {
                if start_refresh {
                    if let Some(fut) = fetch.take() {
                        let handle = self.inner.clone();
                        tokio::spawn(async move {
                            match fut.await {
                                Ok(data) => {
                                    let mut inner = handle.lock().await;
                                    inner.value = Some(data);
                                    inner.inserted_at = Some(Instant::now());
                                    inner.refreshing = false;
                                }
                                Err(why) => {
                                    log::warn!("[cache] refresh failed: {why}");
                                    handle.lock().await.refreshing = false;
                                }
                            }
                        });
                    }
                }
                let state = if fresh {
                    CacheState::Fresh
                } else {
                    CacheState::Stale
                };
                (value, state)
            }
        }
    }

    async fn await_seed(&self, id: u64, shared: SharedFetch<T>) -> (T, CacheState) {
        let result = shared.await;
        let mut inner = self.inner.lock().await;
        let is_current = matches!(&inner.seed, Some((current, _)) if *current == id);
        match result {
            Ok(data) => {
                if inner.value.is_none() {
                    inner.value = Some(data);
                    inner.inserted_at = Some(Instant::now());
                }
                if is_current {
                    inner.seed = None;
                }
                let value = inner.value.clone().unwrap_or_default();
                (value, CacheState::Seed)
            }
            Err(why) => {
                if is_current {
                    inner.seed = None;
                }
                log::warn!("[cache] seed failed: {why}");
                (T::default(), CacheState::SeedFailed)
            }
        }
    }
}

/// A per-key LRU of SWR caches. Touching a key (hit or miss) moves it to the
/// most-recently-used position; inserting past `max_keys` evicts the
/// least-recently-used entry along with any in-flight handle it held.
pub struct PerKeySwrCache<K, T> {
    ttl: Duration,
    max_keys: usize,
    inner: Mutex<IndexMap<K, Arc<SwrCache<T>>>>,
}

impl<K, T> PerKeySwrCache<K, T>
where
    K: Eq + Hash + Clone,
    T: Clone + Default + Send + Sync + 'static,
{
    pub fn new(ttl: Duration, max_keys: usize) -> Self {
        Self {
            ttl,
            max_keys: max_keys.max(1),
            inner: Mutex::new(IndexMap::new()),
        }
    }

    pub async fn get<Fut>(&self, key: K, fetch: Fut) -> (T, CacheState)
    where
        Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    {
        let cache = {
            let mut map = self.inner.lock().await;
            match map.shift_remove(&key) {
                Some(cache) => {
                    map.insert(key, cache.clone());
                    cache
                }
                None => {
                    while map.len() >= self.max_keys {
                        map.shift_remove_index(0);
                    }
                    let cache = Arc::new(SwrCache::new(self.ttl));
                    map.insert(key, cache.clone());
                    cache
                }
            }
        };
        cache.get(fetch).await
    }

    pub async fn contains(&self, key: &K) -> bool {
        self.inner.lock().await.contains_key(key)
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn slow_fetcher(
        counter: Arc<AtomicUsize>,
    ) -> impl Future<Output = Result<HashMap<String, String>, FetchError>> + Send + 'static {
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(100)).await;
            let mut map = HashMap::new();
            map.insert("data".to_owned(), "value".to_owned());
            Ok(map)
        }
    }

    fn failing_fetcher(
    ) -> impl Future<Output = Result<HashMap<String, String>, FetchError>> + Send + 'static {
        async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Err(FetchError::new("fetch failed"))
        }
    }

    #[tokio::test]
    async fn ttl_cache_singleflight() {
        let cache = Arc::new(TtlCache::new(Duration::from_secs(10)));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache.get(slow_fetcher(calls)).await
            }));
        }

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| r == &results[0]));
    }

    #[tokio::test]
    async fn ttl_cache_retries_after_failure() {
        let cache = TtlCache::new(Duration::from_secs(10));
        let calls = Arc::new(AtomicUsize::new(0));

        assert!(cache.get(failing_fetcher()).await.is_err());
        // The failed in-flight handle is cleared, so the next get fetches.
        let value = cache.get(slow_fetcher(calls.clone())).await.unwrap();
        assert_eq!(value.get("data").map(String::as_str), Some("value"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn ttl_cache_serves_fresh_value_without_fetching() {
        let cache = TtlCache::new(Duration::from_secs(10));
        let calls = Arc::new(AtomicUsize::new(0));

        cache.get(slow_fetcher(calls.clone())).await.unwrap();
        cache.get(slow_fetcher(calls.clone())).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // refresh() bypasses the freshness check.
        cache.refresh(slow_fetcher(calls.clone())).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn swr_cold_cache_never_returns_empty_handed() {
        let cache = Arc::new(SwrCache::new(Duration::from_secs(10)));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache.get(slow_fetcher(calls)).await
            }));
        }

        for handle in handles {
            let (value, state) = handle.await.unwrap();
            assert!(state == CacheState::Seed || state == CacheState::Fresh);
            assert_eq!(value.get("data").map(String::as_str), Some("value"));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn swr_seed_failure_yields_default() {
        let cache: SwrCache<HashMap<String, String>> = SwrCache::new(Duration::from_secs(10));
        let (value, state) = cache.get(failing_fetcher()).await;
        assert_eq!(state, CacheState::SeedFailed);
        assert!(value.is_empty());
    }

    #[tokio::test]
    async fn per_key_cache_evicts_least_recently_used() {
        let cache: PerKeySwrCache<&str, HashMap<String, String>> =
            PerKeySwrCache::new(Duration::from_secs(10), 3);
        let calls = Arc::new(AtomicUsize::new(0));

        for key in ["a", "b", "c", "d"] {
            cache.get(key, slow_fetcher(calls.clone())).await;
        }

        assert_eq!(cache.len().await, 3);
        assert!(!cache.contains(&"a").await);
        for key in ["b", "c", "d"] {
            assert!(cache.contains(&key).await);
        }
    }

    #[tokio::test]
    async fn per_key_cache_touch_updates_access_order() {
        let cache: PerKeySwrCache<&str, HashMap<String, String>> =
            PerKeySwrCache::new(Duration::from_secs(10), 3);
        let calls = Arc::new(AtomicUsize::new(0));

        for key in ["a", "b", "c"] {
            cache.get(key, slow_fetcher(calls.clone())).await;
        }
        // Touch "a" so "b" becomes the eviction candidate.
        cache.get("a", slow_fetcher(calls.clone())).await;
        cache.get("d", slow_fetcher(calls.clone())).await;

        assert_eq!(cache.len().await, 3);
        assert!(!cache.contains(&"b").await);
        for key in ["a", "c", "d"] {
            assert!(cache.contains(&key).await);
        }
    }
}
