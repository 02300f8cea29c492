//! Process-wide wiring of the cache, loaders and invalidation.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::application::pagination::QueryLimits;
use crate::application::query::QueryEngine;
use crate::application::repos::{CategoryResolver, EntityStore};
use crate::cache::{
    BatchedLoader, BusError, CacheConfig, InvalidationBus, InvalidationCoordinator,
    InvalidationListener, LoaderRegistry, TtlCache,
};
use crate::config::Settings;
use crate::domain::Entity;

/// Owns everything shared between loaders of one process.
pub struct LoaderContext {
    config: CacheConfig,
    limits: QueryLimits,
    cache: Arc<TtlCache>,
    registry: Arc<LoaderRegistry>,
    coordinator: Arc<InvalidationCoordinator>,
    bus: Option<Arc<dyn InvalidationBus>>,
    categories: Option<Arc<dyn CategoryResolver>>,
}

impl LoaderContext {
    pub fn builder(settings: &Settings) -> LoaderContextBuilder {
        LoaderContextBuilder::new(settings)
    }

    pub fn loader<E: Entity>(&self) -> Option<BatchedLoader<E>> {
        self.registry.get::<E>()
    }

    /// Query engine over the registered loader for `E`.
    pub fn engine<E: Entity>(&self) -> Option<QueryEngine<E>> {
        let engine = QueryEngine::new(self.loader::<E>()?, self.limits);
        Some(match &self.categories {
            Some(resolver) => engine.with_categories(Arc::clone(resolver)),
            None => engine,
        })
    }

    pub fn coordinator(&self) -> &Arc<InvalidationCoordinator> {
        &self.coordinator
    }

    pub fn cache(&self) -> &Arc<TtlCache> {
        &self.cache
    }

    pub fn registry(&self) -> &Arc<LoaderRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn limits(&self) -> &QueryLimits {
        &self.limits
    }

    /// Start consuming remote invalidations. Returns `None` without a bus.
    pub async fn spawn_listener(&self) -> Result<Option<JoinHandle<()>>, BusError> {
        let Some(bus) = &self.bus else {
            debug!("No invalidation bus configured, remote invalidation disabled");
            return Ok(None);
        };
        let handle =
            InvalidationListener::spawn(Arc::clone(&self.coordinator), Arc::clone(bus)).await?;
        Ok(Some(handle))
    }

    /// Periodically drop expired cache entries.
    pub fn spawn_purge_task(&self, every: Duration) -> JoinHandle<()> {
        let cache = Arc::clone(&self.cache);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let purged = cache.purge_expired();
                if purged > 0 {
                    debug!(purged, remaining = cache.len(), "Purged expired cache entries");
                }
            }
        })
    }
}

pub struct LoaderContextBuilder {
    config: CacheConfig,
    limits: QueryLimits,
    cache: Arc<TtlCache>,
    registry: LoaderRegistry,
    bus: Option<Arc<dyn InvalidationBus>>,
    categories: Option<Arc<dyn CategoryResolver>>,
}

impl LoaderContextBuilder {
    pub fn new(settings: &Settings) -> Self {
        Self::with_config(
            CacheConfig::from(&settings.cache),
            QueryLimits::from(&settings.query),
        )
    }

    pub fn with_config(config: CacheConfig, limits: QueryLimits) -> Self {
        Self {
            cache: Arc::new(TtlCache::from_config(&config)),
            config,
            limits,
            registry: LoaderRegistry::new(),
            bus: None,
            categories: None,
        }
    }

    pub fn bus(mut self, bus: Arc<dyn InvalidationBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn categories(mut self, resolver: Arc<dyn CategoryResolver>) -> Self {
        self.categories = Some(resolver);
        self
    }

    /// Create and register the loader for `E`. A later call for the same type replaces it.
    pub fn register<E: Entity>(mut self, store: Arc<dyn EntityStore<E>>) -> Self {
        let loader = BatchedLoader::new(self.config.clone(), Arc::clone(&self.cache), store);
        self.registry.register(loader);
        self
    }

    pub fn build(self) -> LoaderContext {
        let coordinator = Arc::new(InvalidationCoordinator::new(
            Arc::clone(&self.cache),
            self.bus.clone(),
        ));
        info!(
            instance_id = %coordinator.instance_id(),
            segments = self.registry.len(),
            cache_enabled = self.config.enabled,
            remote = self.bus.is_some(),
            "Loader context ready"
        );
        LoaderContext {
            config: self.config,
            limits: self.limits,
            cache: self.cache,
            registry: Arc::new(self.registry),
            coordinator,
            bus: self.bus,
            categories: self.categories,
        }
    }
}
