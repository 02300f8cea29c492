//! Batched, cache-backed entity loader.
//!
//! Concurrent `load` calls for one entity type that miss the cache within a
//! short window are coalesced into a single `find_by_ids` call. Results are
//! written to the TTL cache before any waiter is resolved.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use futures::future::join_all;
use metrics::{counter, histogram};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::application::repos::{EntityStore, StoreError};
use crate::domain::{Entity, PrimaryKey};

use super::config::CacheConfig;
use super::lock::mutex_lock;
use super::store::{CacheEpoch, TtlCache};

const SOURCE: &str = "cache::loader";

const METRIC_CACHE_HIT: &str = "entity_loader_cache_hit_total";
const METRIC_CACHE_MISS: &str = "entity_loader_cache_miss_total";
const METRIC_BATCH_SIZE: &str = "entity_loader_batch_size";
const METRIC_FETCH_MS: &str = "entity_loader_fetch_ms";

type LoadResult<E> = Result<Option<E>, StoreError>;

struct PendingBatch<E> {
    generation: u64,
    /// Distinct keys in arrival order.
    order: Vec<PrimaryKey>,
    waiters: HashMap<PrimaryKey, Vec<oneshot::Sender<LoadResult<E>>>>,
}

impl<E> PendingBatch<E> {
    fn new(generation: u64) -> Self {
        Self {
            generation,
            order: Vec::new(),
            waiters: HashMap::new(),
        }
    }

    fn push(&mut self, key: PrimaryKey, waiter: oneshot::Sender<LoadResult<E>>) {
        match self.waiters.get_mut(&key) {
            Some(waiters) => waiters.push(waiter),
            None => {
                self.order.push(key.clone());
                self.waiters.insert(key, vec![waiter]);
            }
        }
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}

struct LoaderInner<E: Entity> {
    config: CacheConfig,
    cache: Arc<TtlCache>,
    store: Arc<dyn EntityStore<E>>,
    pending: Mutex<Option<PendingBatch<E>>>,
    generation: AtomicU64,
}

/// Per-entity-type batching loader backed by the shared TTL cache.
pub struct BatchedLoader<E: Entity> {
    inner: Arc<LoaderInner<E>>,
}

impl<E: Entity> Clone for BatchedLoader<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: Entity> BatchedLoader<E> {
    pub fn new(config: CacheConfig, cache: Arc<TtlCache>, store: Arc<dyn EntityStore<E>>) -> Self {
        Self {
            inner: Arc::new(LoaderInner {
                config,
                cache,
                store,
                pending: Mutex::new(None),
                generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn segment(&self) -> &'static str {
        E::SEGMENT
    }

    pub fn store(&self) -> &Arc<dyn EntityStore<E>> {
        &self.inner.store
    }

    pub fn cache(&self) -> &Arc<TtlCache> {
        &self.inner.cache
    }

    /// Load one entity, from cache when possible, otherwise through the next batch.
    pub async fn load(&self, key: impl Into<PrimaryKey>) -> Result<Option<E>, StoreError> {
        let key = key.into();
        if self.inner.config.enabled {
            if let Some(cached) = self.inner.cache.get::<Option<E>>(E::SEGMENT, &key) {
                counter!(METRIC_CACHE_HIT, "segment" => E::SEGMENT).increment(1);
                return Ok(cached);
            }
            counter!(METRIC_CACHE_MISS, "segment" => E::SEGMENT).increment(1);
        }

        let receiver = self.enqueue(key);
        receiver.await.map_err(|_| StoreError::Aborted)?
    }

    /// Load many entities concurrently, keeping input order and omitting misses.
    pub async fn load_many<I, K>(&self, keys: I) -> Result<Vec<E>, StoreError>
    where
        I: IntoIterator<Item = K>,
        K: Into<PrimaryKey>,
    {
        let loads = keys.into_iter().map(|key| self.load(key));
        join_all(loads)
            .await
            .into_iter()
            .filter_map(Result::transpose)
            .collect()
    }

    /// Seed the cache with an entity fetched by another path.
    pub fn prime(&self, entity: E) {
        if !self.inner.config.enabled {
            return;
        }
        let key = entity.primary_key();
        self.inner.cache.set(E::SEGMENT, key, Some(entity));
    }

    /// Seed the cache unless the segment was invalidated since `epoch`.
    pub fn prime_if_current(&self, entity: E, epoch: CacheEpoch) -> bool {
        if !self.inner.config.enabled {
            return false;
        }
        let key = entity.primary_key();
        self.inner
            .cache
            .set_if_current(E::SEGMENT, key, Some(entity), epoch)
    }

    /// Invalidation snapshot for this loader's segment.
    pub fn epoch(&self) -> CacheEpoch {
        self.inner.cache.epoch(E::SEGMENT)
    }

    pub fn clear(&self, key: &PrimaryKey) {
        self.inner.cache.delete(E::SEGMENT, key);
    }

    pub fn clear_all(&self) {
        self.inner.cache.clear(Some(E::SEGMENT));
    }

    fn enqueue(&self, key: PrimaryKey) -> oneshot::Receiver<LoadResult<E>> {
        let (sender, receiver) = oneshot::channel();
        let threshold = self.inner.config.max_batch_size_non_zero().get();

        let full_batch = {
            let mut pending = mutex_lock(&self.inner.pending, SOURCE, "enqueue");
            let batch = pending.get_or_insert_with(|| {
                let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed);
                tokio::spawn(LoaderInner::flush_after_delay(
                    Arc::clone(&self.inner),
                    generation,
                ));
                PendingBatch::new(generation)
            });
            batch.push(key, sender);
            if batch.len() >= threshold {
                pending.take()
            } else {
                None
            }
        };

        if let Some(batch) = full_batch {
            debug!(
                segment = E::SEGMENT,
                batch_size = batch.len(),
                "Flushing loader batch at size threshold"
            );
            tokio::spawn(LoaderInner::dispatch(Arc::clone(&self.inner), batch));
        }

        receiver
    }
}

impl<E: Entity> LoaderInner<E> {
    async fn flush_after_delay(inner: Arc<Self>, generation: u64) {
        tokio::time::sleep(inner.config.batch_delay()).await;

        let batch = {
            let mut pending = mutex_lock(&inner.pending, SOURCE, "flush");
            match pending.as_ref() {
                Some(batch) if batch.generation == generation => pending.take(),
                // Already flushed at the size threshold.
                _ => None,
            }
        };

        if let Some(batch) = batch {
            Self::dispatch(inner, batch).await;
        }
    }

    async fn dispatch(inner: Arc<Self>, batch: PendingBatch<E>) {
        let PendingBatch { order, waiters, .. } = batch;
        let epoch = inner.cache.epoch(E::SEGMENT);

        histogram!(METRIC_BATCH_SIZE, "segment" => E::SEGMENT).record(order.len() as f64);
        let started = Instant::now();
        let result = inner.fetch(&order).await;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        histogram!(METRIC_FETCH_MS, "segment" => E::SEGMENT).record(elapsed_ms);

        match result {
            Ok(entities) => {
                let mut found: HashMap<PrimaryKey, E> = entities
                    .into_iter()
                    .map(|entity| (entity.primary_key(), entity))
                    .collect();
                let resolved: Vec<(PrimaryKey, Option<E>)> = order
                    .into_iter()
                    .map(|key| {
                        let value = found.remove(&key);
                        (key, value)
                    })
                    .collect();

                if inner.config.enabled {
                    for (key, value) in &resolved {
                        inner
                            .cache
                            .set_if_current(E::SEGMENT, key.clone(), value.clone(), epoch);
                    }
                }
                debug!(
                    segment = E::SEGMENT,
                    batch_size = resolved.len(),
                    elapsed_ms,
                    "Loader batch fetched"
                );

                let mut waiters = waiters;
                for (key, value) in resolved {
                    for waiter in waiters.remove(&key).unwrap_or_default() {
                        let _ = waiter.send(Ok(value.clone()));
                    }
                }
            }
            Err(err) => {
                warn!(
                    segment = E::SEGMENT,
                    batch_size = order.len(),
                    error = %err,
                    "Loader batch fetch failed"
                );
                for waiter in waiters.into_values().flatten() {
                    let _ = waiter.send(Err(err.clone()));
                }
            }
        }
    }

    async fn fetch(&self, keys: &[PrimaryKey]) -> Result<Vec<E>, StoreError> {
        let fetch = self.store.find_by_ids(keys);
        match self.config.fetch_timeout() {
            Some(limit) => tokio::time::timeout(limit, fetch)
                .await
                .map_err(|_| StoreError::Timeout)?,
            None => fetch.await,
        }
    }
}
