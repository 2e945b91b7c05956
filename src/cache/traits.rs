//! Result and status types for the query cache.

use std::time::Duration;

/// Result from a cache lookup, including where the data came from.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// Age of the cached value (zero for network data)
  pub age: Duration,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      age: Duration::ZERO,
    }
  }

  /// Create a new cache result from a cached value that is still fresh.
  pub fn from_cache(data: T, age: Duration) -> Self {
    Self {
      data,
      source: CacheSource::Cache,
      age,
    }
  }

  pub fn is_cached(&self) -> bool {
    self.source == CacheSource::Cache
  }
}

/// Indicates where cached data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fetched just now
  Network,
  /// Served from cache within its staleness window
  Cache,
}

/// Per-key fetch status, mirrored to whatever renders the data.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum QueryStatus {
  /// Never fetched, or invalidated since
  #[default]
  Idle,
  /// A fetch is in flight
  Loading,
  /// Last fetch succeeded
  Success,
  /// Last fetch failed with this message
  Error(String),
}

impl QueryStatus {
  pub fn is_loading(&self) -> bool {
    matches!(self, QueryStatus::Loading)
  }

  pub fn error(&self) -> Option<&str> {
    match self {
      QueryStatus::Error(e) => Some(e),
      _ => None,
    }
  }
}
