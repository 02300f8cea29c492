//! In-memory entity store.
//!
//! Evaluates filters and orderings through [`Entity::column_value`]. Writes
//! go through `insert`/`update`/`remove`, which notify every attached
//! [`MutationObserver`] after the change is applied.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;

use crate::application::repos::{
    EntityStore, Filter, FindOptions, MutationObserver, Order, SortDirection, StoreError,
};
use crate::domain::{Entity, PrimaryKey};

pub struct MemoryStore<E: Entity> {
    rows: RwLock<BTreeMap<PrimaryKey, E>>,
    observers: RwLock<Vec<Arc<dyn MutationObserver>>>,
}

impl<E: Entity> Default for MemoryStore<E> {
    fn default() -> Self {
        Self {
            rows: RwLock::new(BTreeMap::new()),
            observers: RwLock::new(Vec::new()),
        }
    }
}

impl<E: Entity> MemoryStore<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store pre-populated with `rows`; no observer is notified.
    pub fn from_rows(rows: impl IntoIterator<Item = E>) -> Self {
        let store = Self::default();
        {
            let mut map = store.rows.write().unwrap_or_else(PoisonError::into_inner);
            for row in rows {
                map.insert(row.primary_key(), row);
            }
        }
        store
    }

    pub fn add_observer(&self, observer: Arc<dyn MutationObserver>) {
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    pub fn len(&self) -> usize {
        self.read_rows().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, key: &PrimaryKey) -> Option<E> {
        self.read_rows().get(key).cloned()
    }

    pub async fn insert(&self, entity: E) -> Result<(), StoreError> {
        let key = entity.primary_key();
        {
            let mut rows = self.write_rows();
            if rows.contains_key(&key) {
                return Err(StoreError::invalid_input(format!(
                    "`{}` with key {key} already exists",
                    E::SEGMENT
                )));
            }
            rows.insert(key.clone(), entity);
        }
        for observer in self.observers() {
            observer.after_insert(E::SEGMENT, &key).await;
        }
        Ok(())
    }

    pub async fn update(&self, entity: E) -> Result<(), StoreError> {
        let key = entity.primary_key();
        {
            let mut rows = self.write_rows();
            let Some(slot) = rows.get_mut(&key) else {
                return Err(StoreError::NotFound);
            };
            *slot = entity;
        }
        for observer in self.observers() {
            observer.after_update(E::SEGMENT, &key).await;
        }
        Ok(())
    }

    pub async fn remove(&self, key: &PrimaryKey) -> Result<Option<E>, StoreError> {
        let removed = self.write_rows().remove(key);
        if removed.is_some() {
            for observer in self.observers() {
                observer.after_remove(E::SEGMENT, key).await;
            }
        }
        Ok(removed)
    }

    fn observers(&self) -> Vec<Arc<dyn MutationObserver>> {
        self.observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn read_rows(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<PrimaryKey, E>> {
        self.rows.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_rows(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<PrimaryKey, E>> {
        self.rows.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn window(&self, options: &FindOptions) -> Result<Vec<E>, StoreError> {
        options.ensure_known_columns::<E>()?;

        let mut matched: Vec<E> = self
            .read_rows()
            .values()
            .filter(|entity| options.filter.matches(*entity))
            .cloned()
            .collect();
        matched.sort_by(|a, b| compare(a, b, &options.order));

        let skip = usize::try_from(options.skip).unwrap_or(usize::MAX);
        let take = options
            .take
            .map(|take| usize::try_from(take).unwrap_or(usize::MAX))
            .unwrap_or(usize::MAX);
        Ok(matched.into_iter().skip(skip).take(take).collect())
    }
}

fn compare<E: Entity>(a: &E, b: &E, order: &[Order]) -> Ordering {
    for entry in order {
        let ordering = a
            .column_value(&entry.column)
            .cmp(&b.column_value(&entry.column));
        let ordering = match entry.direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    a.primary_key().cmp(&b.primary_key())
}

#[async_trait]
impl<E: Entity> EntityStore<E> for MemoryStore<E> {
    async fn find_by_ids(&self, ids: &[PrimaryKey]) -> Result<Vec<E>, StoreError> {
        let rows = self.read_rows();
        Ok(ids.iter().filter_map(|id| rows.get(id).cloned()).collect())
    }

    async fn count(&self, filter: &Filter) -> Result<u64, StoreError> {
        FindOptions::new(filter.clone()).ensure_known_columns::<E>()?;
        let count = self
            .read_rows()
            .values()
            .filter(|entity| filter.matches(*entity))
            .count();
        Ok(count as u64)
    }

    async fn find_many(&self, options: &FindOptions) -> Result<Vec<E>, StoreError> {
        self.window(options)
    }

    async fn find_keys(&self, options: &FindOptions) -> Result<Vec<PrimaryKey>, StoreError> {
        Ok(self
            .window(options)?
            .iter()
            .map(Entity::primary_key)
            .collect())
    }
}
