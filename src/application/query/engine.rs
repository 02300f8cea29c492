//! Resolves request descriptors into entity lists.
//!
//! Every mode reduces the request to a list of primary keys and funnels it
//! through the entity's [`BatchedLoader`], so entities already cached are
//! never fetched again.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::application::error::QueryError;
use crate::application::pagination::{KeyCursor, PageInfo, QueryLimits};
use crate::application::repos::{CategoryResolver, Filter, FindOptions, Order};
use crate::cache::BatchedLoader;
use crate::domain::{Entity, PrimaryKey};

use super::request::{QueryRequest, ResolutionMode};
use super::sample::{ChaChaSource, RandomSource, window_start};
use super::selection::FieldSelection;

/// Entities produced for one request.
#[derive(Debug, Clone, Serialize)]
pub struct Resolution<E> {
    pub items: Vec<E>,
    /// Present for cursor pages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_info: Option<PageInfo>,
    /// Present for cursor pages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_count: Option<u64>,
}

impl<E> Resolution<E> {
    pub fn items(items: Vec<E>) -> Self {
        Self {
            items,
            page_info: None,
            total_count: None,
        }
    }

    pub fn connection(items: Vec<E>, page_info: PageInfo, total_count: u64) -> Self {
        Self {
            items,
            page_info: Some(page_info),
            total_count: Some(total_count),
        }
    }

    fn empty_for(mode: &ResolutionMode) -> Self {
        match mode {
            ResolutionMode::Cursor { .. } => Self::connection(Vec::new(), PageInfo::default(), 0),
            _ => Self::items(Vec::new()),
        }
    }
}

pub struct QueryEngine<E: Entity> {
    loader: BatchedLoader<E>,
    limits: QueryLimits,
    categories: Option<Arc<dyn CategoryResolver>>,
    random: Arc<dyn RandomSource>,
}

impl<E: Entity> Clone for QueryEngine<E> {
    fn clone(&self) -> Self {
        Self {
            loader: self.loader.clone(),
            limits: self.limits,
            categories: self.categories.clone(),
            random: Arc::clone(&self.random),
        }
    }
}

impl<E: Entity> QueryEngine<E> {
    pub fn new(loader: BatchedLoader<E>, limits: QueryLimits) -> Self {
        Self {
            loader,
            limits,
            categories: None,
            random: Arc::new(ChaChaSource::from_entropy()),
        }
    }

    pub fn with_categories(mut self, resolver: Arc<dyn CategoryResolver>) -> Self {
        self.categories = Some(resolver);
        self
    }

    pub fn with_random_source(mut self, random: Arc<dyn RandomSource>) -> Self {
        self.random = random;
        self
    }

    pub fn loader(&self) -> &BatchedLoader<E> {
        &self.loader
    }

    pub fn limits(&self) -> &QueryLimits {
        &self.limits
    }

    #[instrument(skip(self, request), fields(segment = E::SEGMENT))]
    pub async fn resolve(&self, request: &QueryRequest) -> Result<Resolution<E>, QueryError> {
        let mode = request.mode()?;
        let fields = request.fields.as_deref().unwrap_or_default();
        let selection = FieldSelection::from_fields::<E>(fields);

        // Explicit ids bypass category filtering.
        let filter = if matches!(mode, ResolutionMode::Ids(_)) {
            Filter::new()
        } else {
            match self.base_filter(request.category.as_deref()).await? {
                Some(filter) => filter,
                None => return Ok(Resolution::empty_for(&mode)),
            }
        };

        match mode {
            ResolutionMode::Ids(ids) => {
                let items = self.loader.load_many(ids).await?;
                Ok(Resolution::items(items))
            }
            ResolutionMode::Random(n) => self.resolve_random(filter, n).await,
            ResolutionMode::Offset { page, size } => {
                self.resolve_offset(filter, request, &selection, page, size)
                    .await
            }
            ResolutionMode::Cursor { after, first } => {
                if request.order_by.is_some() {
                    debug!("order_by is ignored for cursor pages");
                }
                self.resolve_cursor(filter, &selection, after.as_deref(), first)
                    .await
            }
        }
    }

    /// Base filter for the request, or `None` when the named category does not exist.
    async fn base_filter(&self, category: Option<&str>) -> Result<Option<Filter>, QueryError> {
        let Some(name) = category else {
            return Ok(Some(Filter::new()));
        };
        let Some(column) = E::CATEGORY_COLUMN else {
            return Err(QueryError::malformed(format!(
                "`{}` cannot be filtered by category",
                E::SEGMENT
            )));
        };
        let Some(resolver) = &self.categories else {
            return Err(QueryError::malformed(format!(
                "no category resolver configured for `{}`",
                E::SEGMENT
            )));
        };

        match resolver.resolve(name).await? {
            Some(key) => Ok(Some(Filter::new().eq(column, key))),
            None => {
                debug!(category = name, "Unknown category, returning empty result");
                Ok(None)
            }
        }
    }

    async fn resolve_random(&self, filter: Filter, n: u32) -> Result<Resolution<E>, QueryError> {
        let n = u64::from(n.min(self.limits.max_page_size.max(1)));
        let store = self.loader.store();

        let total = store.count(&filter).await?;
        let skip = window_start(total, n, self.random.next_unit());
        let options = FindOptions {
            filter,
            order: vec![Order::natural::<E>()],
            skip,
            take: Some(n),
            ..FindOptions::default()
        };
        let mut keys = store.find_keys(&options).await?;
        self.random.shuffle(&mut keys);
        keys.truncate(n as usize);
        debug!(total, skip, sample = keys.len(), "Random window selected");

        let items = self.loader.load_many(keys).await?;
        Ok(Resolution::items(items))
    }

    async fn resolve_offset(
        &self,
        filter: Filter,
        request: &QueryRequest,
        selection: &FieldSelection,
        page: u32,
        size: Option<u32>,
    ) -> Result<Resolution<E>, QueryError> {
        let window = self.limits.offset_window(page, size)?;

        let mut order = Vec::new();
        if let Some(order_by) = &request.order_by {
            if !E::has_column(&order_by.column) {
                return Err(QueryError::malformed(format!(
                    "cannot order `{}` by unknown column `{}`",
                    E::SEGMENT,
                    order_by.column
                )));
            }
            order.push(Order::from(order_by));
        }
        if order.iter().all(|o| o.column != E::KEY_COLUMN) {
            order.push(Order::natural::<E>());
        }

        let options = FindOptions {
            filter,
            order,
            skip: window.skip,
            take: Some(window.take),
            relations: selection.relations.clone(),
            select: selection.select::<E>(),
        };
        let items = self.fetch_window(&options, selection).await?;
        Ok(Resolution::items(items))
    }

    async fn resolve_cursor(
        &self,
        filter: Filter,
        selection: &FieldSelection,
        after: Option<&str>,
        first: Option<u32>,
    ) -> Result<Resolution<E>, QueryError> {
        let first = self.limits.clamp_first(first);
        let total = self.loader.store().count(&filter).await?;

        let start = match after {
            Some(cursor) => self.cursor_start(cursor).await?,
            None => None,
        };
        let page_filter = match start {
            Some(key) => filter.gt(E::KEY_COLUMN, key),
            None => filter,
        };

        let options = FindOptions {
            filter: page_filter,
            order: vec![Order::natural::<E>()],
            skip: 0,
            take: Some(u64::from(first)),
            relations: selection.relations.clone(),
            select: selection.select::<E>(),
        };
        let items = self.fetch_window(&options, selection).await?;

        // Compares against the unfiltered total, not the rows left after the cursor.
        let page_info = PageInfo {
            has_next_page: u64::from(first) < total,
            end_cursor: items
                .last()
                .map(|entity| KeyCursor::new(entity.primary_key()).encode()),
        };
        Ok(Resolution::connection(items, page_info, total))
    }

    /// Decode `cursor` into a start key; undecodable or stale cursors restart the scan.
    async fn cursor_start(&self, cursor: &str) -> Result<Option<PrimaryKey>, QueryError> {
        let key = match KeyCursor::decode(cursor) {
            Ok(cursor) => cursor.into_key(),
            Err(err) => {
                warn!(error = %err, "Malformed cursor, starting from the beginning");
                return Ok(None);
            }
        };

        if self.loader.load(key.clone()).await?.is_none() {
            warn!(key = %key, "Cursor references a missing entity, starting from the beginning");
            return Ok(None);
        }
        Ok(Some(key))
    }

    /// Run a windowed query, hydrating relations when requested.
    async fn fetch_window(
        &self,
        options: &FindOptions,
        selection: &FieldSelection,
    ) -> Result<Vec<E>, QueryError> {
        let store = self.loader.store();
        if selection.has_relations() {
            let epoch = self.loader.epoch();
            let entities = store.find_many(options).await?;
            for entity in &entities {
                self.loader.prime_if_current(entity.clone(), epoch);
            }
            return Ok(entities);
        }

        let keys = store.find_keys(options).await?;
        Ok(self.loader.load_many(keys).await?)
    }
}
