//! Query cache that orchestrates deduplication, staleness, retry,
//! invalidation and garbage collection around caller-supplied fetchers.

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::key::{KeyFilter, QueryKey};
use super::observer::QueryObserver;
use super::retry::RetryPolicy;
use super::traits::{EntryStatus, QueryResult};
use crate::error::ApiError;

pub(crate) type Payload = Arc<dyn Any + Send + Sync>;
type PayloadFuture = BoxFuture<'static, Result<Payload, ApiError>>;
type Fetcher = Arc<dyn Fn() -> PayloadFuture + Send + Sync>;
type InFlight = Shared<PayloadFuture>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
  /// How long fetched data is served without a refetch
  pub stale_time: Duration,
  /// How long an unobserved entry survives
  pub gc_time: Duration,
  pub retry: RetryPolicy,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      stale_time: Duration::from_secs(5 * 60),
      gc_time: Duration::from_secs(30 * 60),
      retry: RetryPolicy::default(),
    }
  }
}

struct Entry {
  payload: Option<Payload>,
  fetched_at: Option<Instant>,
  updated_at: Option<DateTime<Utc>>,
  error: Option<ApiError>,
  invalidated: bool,
  in_flight: Option<InFlight>,
  /// Identifies this entry across `clear` and re-creation of the key
  generation: u64,
  /// Cache-wide id of the current fetch; a completion only applies to it
  fetch_seq: u64,
  fetcher: Fetcher,
  stale_time: Duration,
  observers: usize,
  gc_deadline: Option<Instant>,
  version: watch::Sender<u64>,
}

impl Entry {
  fn new(generation: u64, fetcher: Fetcher, stale_time: Duration) -> Self {
    let (version, _) = watch::channel(0);
    Self {
      payload: None,
      fetched_at: None,
      updated_at: None,
      error: None,
      invalidated: false,
      in_flight: None,
      generation,
      fetch_seq: 0,
      fetcher,
      stale_time,
      observers: 0,
      gc_deadline: None,
      version,
    }
  }

  fn is_stale(&self, now: Instant) -> bool {
    if self.invalidated {
      return true;
    }
    match self.fetched_at {
      Some(at) => now.duration_since(at) >= self.stale_time,
      None => true,
    }
  }

  fn status(&self, now: Instant) -> EntryStatus {
    if self.error.is_some() && self.in_flight.is_none() {
      EntryStatus::Error
    } else if self.payload.is_none() {
      EntryStatus::Pending
    } else if self.is_stale(now) {
      EntryStatus::Stale
    } else {
      EntryStatus::Fresh
    }
  }

  fn notify(&self) {
    self.version.send_modify(|v| *v = v.wrapping_add(1));
  }
}

/// Point-in-time view of an entry, before the payload is downcast.
pub(crate) struct EntryView {
  pub payload: Option<Payload>,
  pub error: Option<ApiError>,
  pub status: EntryStatus,
  pub is_fetching: bool,
  pub updated_at: Option<DateTime<Utc>>,
}

/// Process-wide query cache.
///
/// Constructed explicitly by the application root and shared by cloning;
/// every clone refers to the same entries. Methods that may start a fetch
/// spawn it on the current Tokio runtime.
#[derive(Clone)]
pub struct QueryCache {
  inner: Arc<Inner>,
}

struct Inner {
  entries: Mutex<HashMap<QueryKey, Entry>>,
  config: CacheConfig,
  /// Source of entry generations and fetch ids
  seq: AtomicU64,
}

enum Plan {
  Ready {
    payload: Payload,
    updated_at: Option<DateTime<Utc>>,
    stale: bool,
  },
  Join(InFlight),
}

impl QueryCache {
  pub fn new(config: CacheConfig) -> Self {
    Self {
      inner: Arc::new(Inner {
        entries: Mutex::new(HashMap::new()),
        config,
        seq: AtomicU64::new(0),
      }),
    }
  }

  pub fn config(&self) -> &CacheConfig {
    &self.inner.config
  }

  /// Read `key`, fetching it if needed.
  ///
  /// - fresh data is returned without a network call
  /// - stale data is returned immediately while a background refetch runs
  /// - with no data, the caller joins the in-flight fetch or starts one
  pub async fn fetch<T, F, Fut>(&self, key: QueryKey, fetcher: F) -> Result<QueryResult<T>, ApiError>
  where
    T: Send + Sync + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
  {
    let fetcher = erase(fetcher);
    let plan = {
      let mut entries = self.inner.lock("fetch");
      let now = Instant::now();
      let entry = entries
        .entry(key.clone())
        .or_insert_with(|| self.inner.new_entry(fetcher.clone()));
      entry.fetcher = fetcher;
      if entry.observers == 0 {
        entry.gc_deadline = Some(now + self.inner.config.gc_time);
      }

      match (entry.payload.clone(), entry.in_flight.clone()) {
        (Some(payload), in_flight) => {
          let stale = entry.is_stale(now);
          if stale && in_flight.is_none() {
            self.inner.start_fetch(&key, entry);
          }
          Plan::Ready {
            payload,
            updated_at: entry.updated_at,
            stale,
          }
        }
        (None, Some(in_flight)) => {
          debug!(query = %key, "joining in-flight fetch");
          Plan::Join(in_flight)
        }
        (None, None) => Plan::Join(self.inner.start_fetch(&key, entry)),
      }
    };

    match plan {
      Plan::Ready {
        payload,
        updated_at,
        stale,
      } => Ok(QueryResult::from_cache(
        downcast(&key, payload)?,
        updated_at,
        stale,
      )),
      Plan::Join(in_flight) => {
        let payload = in_flight.await?;
        let updated_at = self.view(&key).and_then(|v| v.updated_at);
        Ok(QueryResult::from_network(downcast(&key, payload)?, updated_at))
      }
    }
  }

  /// Subscribe to `key`, starting a fetch if there is no fresh data.
  ///
  /// The entry is kept alive (exempt from GC) while the observer exists.
  pub fn observe<T, F, Fut>(&self, key: QueryKey, fetcher: F) -> QueryObserver<T>
  where
    T: Send + Sync + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
  {
    let fetcher = erase(fetcher);
    let (generation, receiver) = {
      let mut entries = self.inner.lock("observe");
      let now = Instant::now();
      let entry = entries
        .entry(key.clone())
        .or_insert_with(|| self.inner.new_entry(fetcher.clone()));
      entry.fetcher = fetcher;
      entry.observers += 1;
      entry.gc_deadline = None;
      if entry.in_flight.is_none() && (entry.payload.is_none() || entry.is_stale(now)) {
        self.inner.start_fetch(&key, entry);
      }
      (entry.generation, entry.version.subscribe())
    };
    QueryObserver::new(self.clone(), key, generation, receiver)
  }

  /// Run a server-side mutation with the retry policy, then invalidate the
  /// keys it affects. Nothing is invalidated when the mutation fails.
  pub async fn mutate<T, F, Fut>(
    &self,
    label: &str,
    mutation: F,
    invalidates: &[KeyFilter],
  ) -> Result<T, ApiError>
  where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
  {
    let result = self.inner.config.retry.run(label, mutation).await;
    if result.is_ok() {
      for filter in invalidates {
        self.invalidate(filter);
      }
    }
    result
  }

  /// Mark every matching entry invalid. Observed entries refetch right away;
  /// the rest refetch on their next read. Returns the number of entries
  /// touched; matching nothing is a no-op.
  pub fn invalidate(&self, filter: &KeyFilter) -> usize {
    let mut entries = self.inner.lock("invalidate");
    let mut count = 0;
    for (key, entry) in entries.iter_mut() {
      if !filter.matches(key) {
        continue;
      }
      count += 1;
      entry.invalidated = true;
      if entry.observers > 0 && entry.in_flight.is_none() {
        self.inner.start_fetch(key, entry);
      } else {
        entry.notify();
      }
    }
    debug!(?filter, count, "invalidated queries");
    count
  }

  /// Force a refetch of `key` regardless of freshness. Returns false if
  /// the key is not cached.
  pub fn refetch(&self, key: &QueryKey) -> bool {
    let mut entries = self.inner.lock("refetch");
    match entries.get_mut(key) {
      Some(entry) => {
        entry.invalidated = true;
        if entry.in_flight.is_none() {
          self.inner.start_fetch(key, entry);
        }
        true
      }
      None => false,
    }
  }

  pub fn status(&self, key: &QueryKey) -> Option<EntryStatus> {
    let entries = self.inner.lock("status");
    entries.get(key).map(|e| e.status(Instant::now()))
  }

  pub fn contains(&self, key: &QueryKey) -> bool {
    self.inner.lock("contains").contains_key(key)
  }

  pub fn len(&self) -> usize {
    self.inner.lock("len").len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Evict unobserved, idle entries whose GC deadline has passed.
  pub fn collect_garbage(&self) -> usize {
    self.inner.collect_garbage()
  }

  /// Run [`collect_garbage`](Self::collect_garbage) every `every` until the
  /// cache is dropped or the handle is aborted.
  pub fn spawn_gc(&self, every: Duration) -> JoinHandle<()> {
    let inner = Arc::downgrade(&self.inner);
    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(every);
      ticker.tick().await;
      loop {
        ticker.tick().await;
        match inner.upgrade() {
          Some(inner) => {
            inner.collect_garbage();
          }
          None => break,
        }
      }
    })
  }

  /// Drop every entry. Observers of dropped entries see their channel close
  /// and fetches still running for them are discarded when they finish.
  pub fn clear(&self) {
    self.inner.lock("clear").clear();
  }

  pub(crate) fn view(&self, key: &QueryKey) -> Option<EntryView> {
    let entries = self.inner.lock("view");
    entries.get(key).map(|e| EntryView {
      payload: e.payload.clone(),
      error: e.error.clone(),
      status: e.status(Instant::now()),
      is_fetching: e.in_flight.is_some(),
      updated_at: e.updated_at,
    })
  }

  /// Drop one observer of the entry created as `generation`. A later entry
  /// for the same key is left alone.
  pub(crate) fn release(&self, key: &QueryKey, generation: u64) {
    let mut entries = self.inner.lock("release");
    if let Some(entry) = entries.get_mut(key).filter(|e| e.generation == generation) {
      entry.observers = entry.observers.saturating_sub(1);
      if entry.observers == 0 {
        entry.gc_deadline = Some(Instant::now() + self.inner.config.gc_time);
      }
    }
  }
}

impl Inner {
  fn lock(&self, op: &'static str) -> MutexGuard<'_, HashMap<QueryKey, Entry>> {
    match self.entries.lock() {
      Ok(guard) => guard,
      Err(poisoned) => {
        warn!(op, "recovered from poisoned query cache lock");
        poisoned.into_inner()
      }
    }
  }

  fn next_seq(&self) -> u64 {
    self.seq.fetch_add(1, Ordering::Relaxed) + 1
  }

  fn new_entry(&self, fetcher: Fetcher) -> Entry {
    Entry::new(self.next_seq(), fetcher, self.config.stale_time)
  }

  /// Start a fetch for `entry` and record it as in flight.
  ///
  /// The fetch is spawned so it completes and updates the entry even if
  /// every caller awaiting it goes away.
  fn start_fetch(self: &Arc<Self>, key: &QueryKey, entry: &mut Entry) -> InFlight {
    let seq = self.next_seq();
    entry.fetch_seq = seq;
    let fetcher = entry.fetcher.clone();
    let retry = self.config.retry;
    let inner: Weak<Inner> = Arc::downgrade(self);
    let owned_key = key.clone();

    let fetch: PayloadFuture = async move {
      let label = owned_key.to_string();
      let result = retry.run(&label, || fetcher()).await;
      if let Some(inner) = inner.upgrade() {
        inner.complete(&owned_key, seq, &result);
      }
      result
    }
    .boxed();

    let shared = fetch.shared();
    entry.in_flight = Some(shared.clone());
    entry.invalidated = false;
    entry.notify();
    debug!(query = %key, "fetch started");
    tokio::spawn(shared.clone());
    shared
  }

  fn complete(self: &Arc<Self>, key: &QueryKey, seq: u64, result: &Result<Payload, ApiError>) {
    let mut entries = self.lock("complete");
    let entry = match entries.get_mut(key) {
      Some(entry) if entry.fetch_seq == seq => entry,
      _ => {
        debug!(query = %key, "discarding result of superseded fetch");
        return;
      }
    };

    entry.in_flight = None;
    let now = Instant::now();
    match result {
      Ok(payload) => {
        entry.payload = Some(payload.clone());
        entry.fetched_at = Some(now);
        entry.updated_at = Some(Utc::now());
        entry.error = None;
        debug!(query = %key, "fetch succeeded");
      }
      Err(error) => {
        warn!(query = %key, error = %error, kind = ?error.kind(), "query failed");
        entry.error = Some(error.clone());
      }
    }
    if entry.observers == 0 {
      entry.gc_deadline = Some(now + self.config.gc_time);
    }

    // Invalidated while this fetch was running: the data may predate the
    // change, so observed entries go round once more.
    if result.is_ok() && entry.invalidated && entry.observers > 0 {
      self.start_fetch(key, entry);
    } else {
      entry.notify();
    }
  }

  fn collect_garbage(&self) -> usize {
    let mut entries = self.lock("collect_garbage");
    let now = Instant::now();
    let before = entries.len();
    entries.retain(|key, entry| {
      let expired = entry.observers == 0
        && entry.in_flight.is_none()
        && entry.gc_deadline.is_some_and(|deadline| deadline <= now);
      if expired {
        debug!(query = %key, "evicting unused query");
      }
      !expired
    });
    before - entries.len()
  }
}

fn erase<T, F, Fut>(fetcher: F) -> Fetcher
where
  T: Send + Sync + 'static,
  F: Fn() -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
{
  Arc::new(move || {
    let fut = fetcher();
    async move { fut.await.map(|value| Arc::new(value) as Payload) }.boxed()
  })
}

pub(crate) fn downcast<T: Send + Sync + 'static>(
  key: &QueryKey,
  payload: Payload,
) -> Result<Arc<T>, ApiError> {
  payload
    .downcast::<T>()
    .map_err(|_| ApiError::other(format!("cached value for {} has an unexpected type", key)))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::traits::CacheSource;
  use std::sync::atomic::{AtomicU32, Ordering};

  fn counting_fetcher(
    calls: &Arc<AtomicU32>,
    delay: Duration,
  ) -> impl Fn() -> BoxFuture<'static, Result<u32, ApiError>> + Send + Sync + 'static {
    let calls = calls.clone();
    move || {
      let calls = calls.clone();
      async move {
        tokio::time::sleep(delay).await;
        Ok(calls.fetch_add(1, Ordering::SeqCst) + 1)
      }
      .boxed()
    }
  }

  #[tokio::test(start_paused = true)]
  async fn test_concurrent_reads_share_one_fetch() {
    let cache = QueryCache::new(CacheConfig::default());
    let calls = Arc::new(AtomicU32::new(0));
    let key = QueryKey::new("summary", "period=week");

    let reads = (0..8).map(|_| {
      cache.fetch(
        key.clone(),
        counting_fetcher(&calls, Duration::from_millis(100)),
      )
    });
    let results = futures::future::join_all(reads).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    for result in results {
      let result = result.unwrap();
      assert_eq!(*result.data, 1);
      assert_eq!(result.source, CacheSource::Network);
    }
  }

  #[tokio::test(start_paused = true)]
  async fn test_fresh_read_skips_network() {
    let cache = QueryCache::new(CacheConfig::default());
    let calls = Arc::new(AtomicU32::new(0));
    let key = QueryKey::new("summary", "period=week");

    cache
      .fetch(key.clone(), counting_fetcher(&calls, Duration::ZERO))
      .await
      .unwrap();
    tokio::time::advance(Duration::from_secs(60)).await;
    let second = cache
      .fetch(key.clone(), counting_fetcher(&calls, Duration::ZERO))
      .await
      .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(second.source, CacheSource::CacheFresh);
    assert_eq!(cache.status(&key), Some(EntryStatus::Fresh));
  }

  #[tokio::test(start_paused = true)]
  async fn test_stale_read_revalidates_in_background() {
    let cache = QueryCache::new(CacheConfig::default());
    let calls = Arc::new(AtomicU32::new(0));
    let key = QueryKey::new("summary", "");

    cache
      .fetch(key.clone(), counting_fetcher(&calls, Duration::ZERO))
      .await
      .unwrap();
    tokio::time::advance(Duration::from_secs(5 * 60 + 1)).await;
    assert_eq!(cache.status(&key), Some(EntryStatus::Stale));

    let stale = cache
      .fetch(key.clone(), counting_fetcher(&calls, Duration::from_millis(10)))
      .await
      .unwrap();
    assert_eq!(stale.source, CacheSource::CacheStale);
    assert_eq!(*stale.data, 1);

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    let fresh = cache
      .fetch(key.clone(), counting_fetcher(&calls, Duration::ZERO))
      .await
      .unwrap();
    assert_eq!(fresh.source, CacheSource::CacheFresh);
    assert_eq!(*fresh.data, 2);
  }

  #[tokio::test(start_paused = true)]
  async fn test_invalidate_missing_key_is_noop() {
    let cache = QueryCache::new(CacheConfig::default());
    let key = QueryKey::new("goals", "salesType=fbo");

    assert_eq!(cache.invalidate(&KeyFilter::Exact(key.clone())), 0);
    assert_eq!(cache.invalidate(&KeyFilter::operation("goals")), 0);
    assert!(!cache.contains(&key));
    assert!(cache.is_empty());
  }

  #[tokio::test(start_paused = true)]
  async fn test_invalidated_entry_refetches_on_next_read() {
    let cache = QueryCache::new(CacheConfig::default());
    let calls = Arc::new(AtomicU32::new(0));
    let key = QueryKey::new("goals", "salesType=fbo");

    cache
      .fetch(key.clone(), counting_fetcher(&calls, Duration::ZERO))
      .await
      .unwrap();
    assert_eq!(cache.invalidate(&KeyFilter::operation("goals")), 1);
    assert_eq!(cache.status(&key), Some(EntryStatus::Stale));
    // Unobserved entries wait for the next read.
    tokio::task::yield_now().await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let result = cache
      .fetch(key.clone(), counting_fetcher(&calls, Duration::ZERO))
      .await
      .unwrap();
    assert_eq!(result.source, CacheSource::CacheStale);
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(cache.status(&key), Some(EntryStatus::Fresh));
  }

  #[tokio::test(start_paused = true)]
  async fn test_client_error_fails_without_retry() {
    let cache = QueryCache::new(CacheConfig::default());
    let calls = Arc::new(AtomicU32::new(0));
    let key = QueryKey::new("summary", "bad=param");

    let calls_clone = calls.clone();
    let result = cache
      .fetch(key.clone(), move || {
        calls_clone.fetch_add(1, Ordering::SeqCst);
        async { Err::<u32, _>(ApiError::from_status(400, "Bad Request")) }
      })
      .await;

    assert_eq!(result.unwrap_err().status(), Some(400));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.status(&key), Some(EntryStatus::Error));
  }

  #[tokio::test(start_paused = true)]
  async fn test_server_error_exhausts_retries() {
    let cache = QueryCache::new(CacheConfig::default());
    let calls = Arc::new(AtomicU32::new(0));
    let key = QueryKey::new("summary", "");
    let start = Instant::now();

    let calls_clone = calls.clone();
    let result = cache
      .fetch(key.clone(), move || {
        calls_clone.fetch_add(1, Ordering::SeqCst);
        async { Err::<u32, _>(ApiError::from_status(503, "Service Unavailable")) }
      })
      .await;

    assert_eq!(result.unwrap_err().status(), Some(503));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(start.elapsed() >= Duration::from_secs(3));
  }

  #[tokio::test(start_paused = true)]
  async fn test_observed_entry_refetches_on_invalidate() {
    let cache = QueryCache::new(CacheConfig::default());
    let calls = Arc::new(AtomicU32::new(0));
    let key = QueryKey::new("summary", "");

    let mut observer =
      cache.observe::<u32, _, _>(key.clone(), counting_fetcher(&calls, Duration::ZERO));
    assert!(observer.changed().await);
    while observer.snapshot().data.is_none() {
      assert!(observer.changed().await);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    cache.invalidate(&KeyFilter::operation("summary"));
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(observer.snapshot().data.as_deref(), Some(&2));
  }

  #[tokio::test(start_paused = true)]
  async fn test_gc_evicts_only_unobserved_entries() {
    let cache = QueryCache::new(CacheConfig::default());
    let calls = Arc::new(AtomicU32::new(0));
    let unused = QueryKey::new("summary", "");
    let watched = QueryKey::new("goals", "");

    cache
      .fetch(unused.clone(), counting_fetcher(&calls, Duration::ZERO))
      .await
      .unwrap();
    let observer = cache.observe::<u32, _, _>(watched.clone(), counting_fetcher(&calls, Duration::ZERO));
    tokio::time::sleep(Duration::from_millis(1)).await;

    tokio::time::advance(Duration::from_secs(29 * 60)).await;
    assert_eq!(cache.collect_garbage(), 0);

    tokio::time::advance(Duration::from_secs(2 * 60)).await;
    assert_eq!(cache.collect_garbage(), 1);
    assert!(!cache.contains(&unused));
    assert!(cache.contains(&watched));

    drop(observer);
    assert_eq!(cache.collect_garbage(), 0);
    tokio::time::advance(Duration::from_secs(30 * 60)).await;
    assert_eq!(cache.collect_garbage(), 1);
    assert!(cache.is_empty());
  }

  fn fixed_fetcher(
    calls: &Arc<AtomicU32>,
    delay: Duration,
    value: u32,
  ) -> impl Fn() -> BoxFuture<'static, Result<u32, ApiError>> + Send + Sync + 'static {
    let calls = calls.clone();
    move || {
      calls.fetch_add(1, Ordering::SeqCst);
      async move {
        tokio::time::sleep(delay).await;
        Ok(value)
      }
      .boxed()
    }
  }

  #[tokio::test(start_paused = true)]
  async fn test_fetch_from_before_clear_is_discarded() {
    let cache = QueryCache::new(CacheConfig::default());
    let calls = Arc::new(AtomicU32::new(0));
    let key = QueryKey::new("summary", "period=week");

    let before = tokio::spawn({
      let (cache, key) = (cache.clone(), key.clone());
      let fetcher = fixed_fetcher(&calls, Duration::from_millis(100), 100);
      async move { cache.fetch(key, fetcher).await }
    });
    tokio::task::yield_now().await;
    assert!(cache.contains(&key));

    cache.clear();
    let after = tokio::spawn({
      let (cache, key) = (cache.clone(), key.clone());
      let fetcher = fixed_fetcher(&calls, Duration::from_millis(500), 500);
      async move { cache.fetch(key, fetcher).await }
    });
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(*before.await.unwrap().unwrap().data, 100);
    let view = cache.view(&key).unwrap();
    assert!(view.is_fetching);
    assert!(view.payload.is_none());
    assert_eq!(view.status, EntryStatus::Pending);

    // Still one request in flight for the key
    assert!(cache.refetch(&key));
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    assert_eq!(*after.await.unwrap().unwrap().data, 500);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(cache.status(&key), Some(EntryStatus::Fresh));
  }

  #[tokio::test(start_paused = true)]
  async fn test_observer_from_before_clear_does_not_release_new_entry() {
    let cache = QueryCache::new(CacheConfig::default());
    let calls = Arc::new(AtomicU32::new(0));
    let key = QueryKey::new("goals", "");

    let stale_observer = cache.observe::<u32, _, _>(key.clone(), counting_fetcher(&calls, Duration::ZERO));
    tokio::time::sleep(Duration::from_millis(1)).await;
    cache.clear();

    let observer = cache.observe::<u32, _, _>(key.clone(), counting_fetcher(&calls, Duration::ZERO));
    tokio::time::sleep(Duration::from_millis(1)).await;
    drop(stale_observer);

    tokio::time::advance(Duration::from_secs(31 * 60)).await;
    assert_eq!(cache.collect_garbage(), 0);
    assert!(cache.contains(&key));

    drop(observer);
    tokio::time::advance(Duration::from_secs(31 * 60)).await;
    assert_eq!(cache.collect_garbage(), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_mutation_invalidates_only_listed_keys() {
    let cache = QueryCache::new(CacheConfig::default());
    let calls = Arc::new(AtomicU32::new(0));
    let fbo = QueryKey::new("goals", "salesType=fbo");
    let fbs = QueryKey::new("goals", "salesType=fbs");

    for key in [&fbo, &fbs] {
      cache
        .fetch(key.clone(), counting_fetcher(&calls, Duration::ZERO))
        .await
        .unwrap();
    }

    let value = cache
      .mutate(
        "set goal",
        || async { Ok::<_, ApiError>("saved") },
        &[KeyFilter::param("goals", "salesType", "fbo")],
      )
      .await
      .unwrap();

    assert_eq!(value, "saved");
    assert_eq!(cache.status(&fbo), Some(EntryStatus::Stale));
    assert_eq!(cache.status(&fbs), Some(EntryStatus::Fresh));
  }

  #[tokio::test(start_paused = true)]
  async fn test_failed_mutation_retries_and_invalidates_nothing() {
    let cache = QueryCache::new(CacheConfig::default());
    let calls = Arc::new(AtomicU32::new(0));
    let goals = QueryKey::new("goals", "");
    cache
      .fetch(goals.clone(), counting_fetcher(&calls, Duration::ZERO))
      .await
      .unwrap();

    let attempts = Arc::new(AtomicU32::new(0));
    let result: Result<(), ApiError> = cache
      .mutate(
        "set goal",
        || {
          let attempts = attempts.clone();
          async move {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(ApiError::from_status(503, ""))
          }
        },
        &[KeyFilter::operation("goals")],
      )
      .await;

    assert_eq!(result.unwrap_err().status(), Some(503));
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(cache.status(&goals), Some(EntryStatus::Fresh));
  }
}
