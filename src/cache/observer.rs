//! Subscriptions to cache entries.
//!
//! A `QueryObserver<T>` keeps its entry alive, reports its state and wakes
//! the owner whenever the entry changes.
//!
//! # Example
//!
//! ```ignore
//! let mut summary = cache.observe(key, move || {
//!     let client = client.clone();
//!     async move { client.summary("period=week").await }
//! });
//!
//! while summary.changed().await {
//!     match summary.state() {
//!         QueryState::Loading => render_spinner(),
//!         QueryState::Success(data) => render_data(&data),
//!         QueryState::Error(e) => render_error(&e, || summary.refetch()),
//!         QueryState::Idle => {}
//!     }
//! }
//! ```

use chrono::{DateTime, Utc};
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::watch;

use super::key::QueryKey;
use super::layer::{downcast, QueryCache};
use super::traits::EntryStatus;
use crate::error::ApiError;

/// The state of a query
#[derive(Debug, Clone)]
pub enum QueryState<T> {
  /// Query has not been started, or its entry was dropped
  Idle,
  /// First fetch in progress, no data yet
  Loading,
  /// Data is available (possibly stale, possibly being refetched)
  Success(Arc<T>),
  /// The last fetch failed and there is no data to show
  Error(ApiError),
}

impl<T> QueryState<T> {
  pub fn is_loading(&self) -> bool {
    matches!(self, QueryState::Loading)
  }

  pub fn is_success(&self) -> bool {
    matches!(self, QueryState::Success(_))
  }

  pub fn is_error(&self) -> bool {
    matches!(self, QueryState::Error(_))
  }

  pub fn data(&self) -> Option<&T> {
    match self {
      QueryState::Success(data) => Some(data),
      _ => None,
    }
  }

  pub fn error(&self) -> Option<&ApiError> {
    match self {
      QueryState::Error(e) => Some(e),
      _ => None,
    }
  }
}

/// Everything known about an entry at one instant.
#[derive(Debug, Clone)]
pub struct QuerySnapshot<T> {
  pub data: Option<Arc<T>>,
  /// Error from the most recent fetch, kept alongside older data
  pub error: Option<ApiError>,
  pub status: Option<EntryStatus>,
  pub is_fetching: bool,
  pub updated_at: Option<DateTime<Utc>>,
}

impl<T> QuerySnapshot<T> {
  fn empty() -> Self {
    Self {
      data: None,
      error: None,
      status: None,
      is_fetching: false,
      updated_at: None,
    }
  }

  pub fn state(&self) -> QueryState<T> {
    match (&self.data, &self.error) {
      (Some(data), _) => QueryState::Success(data.clone()),
      (None, Some(error)) if !self.is_fetching => QueryState::Error(error.clone()),
      (None, _) if self.is_fetching => QueryState::Loading,
      _ => QueryState::Idle,
    }
  }
}

/// Live subscription to one cache entry. Dropping it releases the entry
/// for garbage collection.
pub struct QueryObserver<T> {
  cache: QueryCache,
  key: QueryKey,
  generation: u64,
  receiver: watch::Receiver<u64>,
  _marker: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> QueryObserver<T> {
  pub(crate) fn new(
    cache: QueryCache,
    key: QueryKey,
    generation: u64,
    receiver: watch::Receiver<u64>,
  ) -> Self {
    Self {
      cache,
      key,
      generation,
      receiver,
      _marker: PhantomData,
    }
  }

  pub fn key(&self) -> &QueryKey {
    &self.key
  }

  pub fn snapshot(&self) -> QuerySnapshot<T> {
    let Some(view) = self.cache.view(&self.key) else {
      return QuerySnapshot::empty();
    };
    let (data, error) = match view.payload.map(|p| downcast::<T>(&self.key, p)) {
      Some(Ok(data)) => (Some(data), view.error),
      Some(Err(mismatch)) => (None, Some(mismatch)),
      None => (None, view.error),
    };
    QuerySnapshot {
      data,
      error,
      status: Some(view.status),
      is_fetching: view.is_fetching,
      updated_at: view.updated_at,
    }
  }

  pub fn state(&self) -> QueryState<T> {
    self.snapshot().state()
  }

  /// Wait for the entry to change. Returns false once the entry has been
  /// removed from the cache.
  pub async fn changed(&mut self) -> bool {
    self.receiver.changed().await.is_ok()
  }

  /// Retry trigger: refetch now, whatever the entry's freshness.
  pub fn refetch(&self) -> bool {
    self.cache.refetch(&self.key)
  }
}

impl<T> Drop for QueryObserver<T> {
  fn drop(&mut self) {
    self.cache.release(&self.key, self.generation);
  }
}

impl<T> std::fmt::Debug for QueryObserver<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("QueryObserver")
      .field("key", &self.key)
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::CacheConfig;
  use std::sync::atomic::{AtomicU32, Ordering};
  use std::time::Duration;

  #[tokio::test(start_paused = true)]
  async fn test_observer_success() {
    let cache = QueryCache::new(CacheConfig::default());
    let mut query = cache.observe(QueryKey::new("summary", ""), || async {
      Ok::<_, ApiError>(vec![1, 2, 3])
    });

    assert!(query.state().is_loading());
    assert!(query.changed().await);

    assert!(query.state().is_success());
    assert_eq!(query.state().data(), Some(&vec![1, 2, 3]));
    assert_eq!(query.snapshot().status, Some(EntryStatus::Fresh));
  }

  #[tokio::test(start_paused = true)]
  async fn test_observer_error_then_manual_retry() {
    let cache = QueryCache::new(CacheConfig::default());
    let calls = Arc::new(AtomicU32::new(0));
    let calls_clone = calls.clone();
    let mut query = cache.observe(QueryKey::new("goals", ""), move || {
      let attempt = calls_clone.fetch_add(1, Ordering::SeqCst);
      async move {
        if attempt == 0 {
          Err(ApiError::from_status(403, "Forbidden"))
        } else {
          Ok(10u32)
        }
      }
    });

    assert!(query.changed().await);
    let state = query.state();
    assert!(state.is_error());
    assert_eq!(state.error().and_then(ApiError::status), Some(403));

    assert!(query.refetch());
    assert!(query.changed().await);
    assert!(query.state().is_loading());
    assert!(query.changed().await);
    assert_eq!(query.state().data(), Some(&10));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn test_second_observer_shares_entry() {
    let cache = QueryCache::new(CacheConfig::default());
    let calls = Arc::new(AtomicU32::new(0));
    let fetcher = {
      let calls = calls.clone();
      move || {
        let calls = calls.clone();
        async move {
          tokio::time::sleep(Duration::from_millis(50)).await;
          Ok::<_, ApiError>(calls.fetch_add(1, Ordering::SeqCst))
        }
      }
    };

    let mut first = cache.observe::<u32, _, _>(QueryKey::new("summary", ""), fetcher.clone());
    let second = cache.observe::<u32, _, _>(QueryKey::new("summary", ""), fetcher);
    assert!(first.changed().await);

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(first.state().data(), Some(&0));
    assert_eq!(second.state().data(), Some(&0));
  }

  #[tokio::test(start_paused = true)]
  async fn test_cleared_entry_closes_observer() {
    let cache = QueryCache::new(CacheConfig::default());
    let mut query = cache.observe(QueryKey::new("summary", ""), || async {
      Ok::<_, ApiError>(1u8)
    });
    assert!(query.changed().await);

    cache.clear();
    assert!(!query.changed().await);
    assert!(matches!(query.state(), QueryState::Idle));
  }
}
