//! Result and status types shared by the cache and its callers.

use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Result from a cache read, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct QueryResult<T> {
  /// The actual data
  pub data: Arc<T>,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was fetched from the network
  pub updated_at: Option<DateTime<Utc>>,
}

impl<T> QueryResult<T> {
  pub fn from_network(data: Arc<T>, updated_at: Option<DateTime<Utc>>) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      updated_at,
    }
  }

  pub fn from_cache(data: Arc<T>, updated_at: Option<DateTime<Utc>>, is_stale: bool) -> Self {
    Self {
      data,
      source: if is_stale {
        CacheSource::CacheStale
      } else {
        CacheSource::CacheFresh
      },
      updated_at,
    }
  }
}

/// Indicates where returned data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fetched for this call (or joined an in-flight fetch)
  Network,
  /// Served from cache within the staleness window
  CacheFresh,
  /// Served from cache while a background refetch runs
  CacheStale,
}

/// Lifecycle status of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
  /// No data yet
  Pending,
  Fresh,
  /// Data is older than the staleness window, or was invalidated
  Stale,
  /// The last fetch failed terminally
  Error,
}
