use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;

use crate::application::repos::{CategoryResolver, EntityStore, Filter, FindOptions, Order, StoreError};
use crate::domain::{Entity, PrimaryKey};

/// Resolves a category name through the store of the category entity.
pub struct StoreCategoryResolver<C: Entity> {
    store: Arc<dyn EntityStore<C>>,
    name_column: &'static str,
    _entity: PhantomData<fn() -> C>,
}

impl<C: Entity> StoreCategoryResolver<C> {
    pub fn new(store: Arc<dyn EntityStore<C>>, name_column: &'static str) -> Self {
        Self {
            store,
            name_column,
            _entity: PhantomData,
        }
    }
}

#[async_trait]
impl<C: Entity> CategoryResolver for StoreCategoryResolver<C> {
    async fn resolve(&self, name: &str) -> Result<Option<PrimaryKey>, StoreError> {
        let options = FindOptions {
            filter: Filter::new().eq(self.name_column, name),
            order: vec![Order::natural::<C>()],
            take: Some(1),
            ..FindOptions::default()
        };
        let keys = self.store.find_keys(&options).await?;
        Ok(keys.into_iter().next())
    }
}
