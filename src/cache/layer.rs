//! In-memory query cache with staleness windows and prefix invalidation.

use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

use super::key::QueryKey;
use super::traits::{CacheResult, QueryStatus};

struct Entry<V> {
  value: Option<V>,
  fetched_at: Option<Instant>,
  /// Generation of the most recent fetch issued for this key
  generation: u64,
  status: QueryStatus,
}

impl<V> Default for Entry<V> {
  fn default() -> Self {
    Self {
      value: None,
      fetched_at: None,
      generation: 0,
      status: QueryStatus::Idle,
    }
  }
}

struct Inner<V> {
  entries: HashMap<QueryKey, Entry<V>>,
  /// Monotonic across the whole cache, so a generation is never reused after a key is dropped
  next_generation: u64,
}

/// Keyed cache sitting between the domain services and the ERP client.
///
/// Each fetch takes a fresh generation number. When it completes, its value is stored only
/// if no newer fetch was issued for the key and the key was not invalidated meanwhile, so a
/// slow response can never overwrite a fresher one.
pub struct QueryCache<V> {
  inner: Arc<Mutex<Inner<V>>>,
  default_stale_time: Duration,
}

impl<V> Clone for QueryCache<V> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
      default_stale_time: self.default_stale_time,
    }
  }
}

impl<V: Clone + Send + 'static> QueryCache<V> {
  pub fn new(default_stale_time: Duration) -> Self {
    Self {
      inner: Arc::new(Mutex::new(Inner {
        entries: HashMap::new(),
        next_generation: 1,
      })),
      default_stale_time,
    }
  }

  pub fn default_stale_time(&self) -> Duration {
    self.default_stale_time
  }

  fn lock(&self) -> MutexGuard<'_, Inner<V>> {
    self.inner.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Return the cached value if younger than `stale_time`, otherwise fetch and store.
  pub async fn get<F, Fut, E>(
    &self,
    key: &QueryKey,
    stale_time: Duration,
    fetcher: F,
  ) -> Result<CacheResult<V>, E>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<V, E>>,
    E: Display,
  {
    if let Some(hit) = self.fresh(key, stale_time) {
      return Ok(hit);
    }
    self.refetch(key, fetcher).await
  }

  /// Fetch regardless of staleness and store the result.
  pub async fn refetch<F, Fut, E>(&self, key: &QueryKey, fetcher: F) -> Result<CacheResult<V>, E>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<V, E>>,
    E: Display,
  {
    let generation = self.begin_fetch(key);
    let outcome = fetcher().await;
    self.finish_fetch(key, generation, &outcome);
    outcome.map(CacheResult::from_network)
  }

  fn fresh(&self, key: &QueryKey, stale_time: Duration) -> Option<CacheResult<V>> {
    let inner = self.lock();
    let entry = inner.entries.get(key)?;
    let value = entry.value.as_ref()?;
    let age = entry.fetched_at?.elapsed();

    (age <= stale_time).then(|| CacheResult::from_cache(value.clone(), age))
  }

  fn begin_fetch(&self, key: &QueryKey) -> u64 {
    let mut inner = self.lock();
    let generation = inner.next_generation;
    inner.next_generation += 1;

    let entry = inner.entries.entry(key.clone()).or_default();
    entry.generation = generation;
    entry.status = QueryStatus::Loading;
    generation
  }

  fn finish_fetch<E: Display>(&self, key: &QueryKey, generation: u64, outcome: &Result<V, E>) {
    let mut inner = self.lock();
    let Some(entry) = inner
      .entries
      .get_mut(key)
      .filter(|entry| entry.generation == generation)
    else {
      debug!(key = %key, generation, "Discarding superseded fetch result");
      return;
    };

    match outcome {
      Ok(value) => {
        entry.value = Some(value.clone());
        entry.fetched_at = Some(Instant::now());
        entry.status = QueryStatus::Success;
      }
      Err(e) => {
        // Keep the previous value; only the status reports the failure
        entry.status = QueryStatus::Error(e.to_string());
      }
    }
  }

  /// Drop every entry whose key starts with `prefix`. Returns how many were dropped.
  pub fn invalidate(&self, prefix: &QueryKey) -> usize {
    let mut inner = self.lock();
    let before = inner.entries.len();
    inner.entries.retain(|key, _| !key.starts_with(prefix));
    let dropped = before - inner.entries.len();
    debug!(prefix = %prefix, dropped, "Invalidated queries");
    dropped
  }

  /// Drop everything.
  pub fn clear(&self) {
    self.lock().entries.clear();
  }

  /// The cached value, fresh or not.
  pub fn peek(&self, key: &QueryKey) -> Option<V> {
    self.lock().entries.get(key).and_then(|e| e.value.clone())
  }

  pub fn status(&self, key: &QueryKey) -> QueryStatus {
    self
      .lock()
      .entries
      .get(key)
      .map(|e| e.status.clone())
      .unwrap_or_default()
  }

  /// Refetch `key` every `period` regardless of staleness, publishing each outcome.
  ///
  /// The first fetch happens immediately. Dropping the returned handle stops the timer.
  pub fn refetch_on_interval<F, Fut, E>(
    &self,
    key: QueryKey,
    period: Duration,
    fetcher: F,
  ) -> IntervalRefetch<V>
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<V, E>> + Send + 'static,
    E: Display + Send + 'static,
  {
    let (tx, rx) = mpsc::unbounded_channel();
    let cache = self.clone();

    let handle = tokio::spawn(async move {
      let mut ticker = tokio::time::interval(period);
      ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

      loop {
        ticker.tick().await;
        let outcome = cache
          .refetch(&key, &fetcher)
          .await
          .map(|result| result.data)
          .map_err(|e| e.to_string());

        // Receiver gone: nobody is watching any more
        if tx.send(outcome).is_err() {
          break;
        }
      }
    });

    IntervalRefetch { rx, handle }
  }
}

/// Handle to a running interval refetch. Dropping it stops the background task.
pub struct IntervalRefetch<V> {
  rx: mpsc::UnboundedReceiver<Result<V, String>>,
  handle: JoinHandle<()>,
}

impl<V> IntervalRefetch<V> {
  /// Wait for the next refetch outcome.
  pub async fn next(&mut self) -> Option<Result<V, String>> {
    self.rx.recv().await
  }
}

impl<V> Drop for IntervalRefetch<V> {
  fn drop(&mut self) {
    self.handle.abort();
  }
}
