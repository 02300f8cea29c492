#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use entity_loader::application::repos::{EntityStore, Filter, FindOptions, StoreError};
use entity_loader::cache::{BusError, CacheConfig, InvalidationBus, PayloadStream};
use entity_loader::domain::{Entity, PrimaryKey, Value};
use entity_loader::infra::memory::MemoryStore;

#[derive(Debug, Clone, PartialEq)]
pub struct Article {
    pub id: i64,
    pub title: String,
    pub category_id: i64,
    pub views: i64,
}

impl Entity for Article {
    const SEGMENT: &'static str = "Article";
    const COLUMNS: &'static [&'static str] = &["title", "category_id", "views"];
    const RELATIONS: &'static [&'static str] = &["category"];
    const CATEGORY_COLUMN: Option<&'static str> = Some("category_id");

    fn primary_key(&self) -> PrimaryKey {
        PrimaryKey::Int(self.id)
    }

    fn column_value(&self, column: &str) -> Option<Value> {
        match column {
            "id" => Some(Value::Int(self.id)),
            "title" => Some(Value::Text(self.title.clone())),
            "category_id" => Some(Value::Int(self.category_id)),
            "views" => Some(Value::Int(self.views)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Category {
    pub id: i64,
    pub name: String,
}

impl Entity for Category {
    const SEGMENT: &'static str = "Category";
    const COLUMNS: &'static [&'static str] = &["name"];

    fn primary_key(&self) -> PrimaryKey {
        PrimaryKey::Int(self.id)
    }

    fn column_value(&self, column: &str) -> Option<Value> {
        match column {
            "id" => Some(Value::Int(self.id)),
            "name" => Some(Value::Text(self.name.clone())),
            _ => None,
        }
    }
}

pub fn article(id: i64, category_id: i64, views: i64) -> Article {
    Article {
        id,
        title: format!("Article {id}"),
        category_id,
        views,
    }
}

/// Articles 1..=count, alternating between categories 1 and 2.
pub fn articles(count: i64) -> Vec<Article> {
    (1..=count)
        .map(|id| article(id, if id % 2 == 0 { 2 } else { 1 }, id * 10 % 7))
        .collect()
}

pub fn categories() -> Vec<Category> {
    vec![
        Category {
            id: 1,
            name: "news".to_string(),
        },
        Category {
            id: 2,
            name: "sports".to_string(),
        },
    ]
}

pub fn fast_config() -> CacheConfig {
    CacheConfig {
        batch_delay_ms: 5,
        ..CacheConfig::default()
    }
}

/// Store wrapper that records every bulk fetch and can fail or stall on demand.
pub struct RecordingStore<E: Entity> {
    inner: MemoryStore<E>,
    calls: Mutex<Vec<Vec<PrimaryKey>>>,
    fail_with: Mutex<Option<StoreError>>,
    delay: Mutex<Option<Duration>>,
}

impl<E: Entity> RecordingStore<E> {
    pub fn new(rows: impl IntoIterator<Item = E>) -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryStore::from_rows(rows),
            calls: Mutex::new(Vec::new()),
            fail_with: Mutex::new(None),
            delay: Mutex::new(None),
        })
    }

    pub fn fail_with(&self, error: StoreError) {
        *self.fail_with.lock().unwrap() = Some(error);
    }

    pub fn delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn calls(&self) -> Vec<Vec<PrimaryKey>> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn memory(&self) -> &MemoryStore<E> {
        &self.inner
    }
}

#[async_trait]
impl<E: Entity> EntityStore<E> for RecordingStore<E> {
    async fn find_by_ids(&self, ids: &[PrimaryKey]) -> Result<Vec<E>, StoreError> {
        self.calls.lock().unwrap().push(ids.to_vec());
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let failure = self.fail_with.lock().unwrap().clone();
        if let Some(error) = failure {
            return Err(error);
        }
        self.inner.find_by_ids(ids).await
    }

    async fn count(&self, filter: &Filter) -> Result<u64, StoreError> {
        self.inner.count(filter).await
    }

    async fn find_many(&self, options: &FindOptions) -> Result<Vec<E>, StoreError> {
        self.inner.find_many(options).await
    }

    async fn find_keys(&self, options: &FindOptions) -> Result<Vec<PrimaryKey>, StoreError> {
        self.inner.find_keys(options).await
    }
}

pub fn keys(ids: &[i64]) -> Vec<PrimaryKey> {
    ids.iter().copied().map(PrimaryKey::Int).collect()
}

pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met in time");
}

/// Bus whose transport is down: every publish fails and subscriptions yield nothing.
pub struct FailingBus;

#[async_trait]
impl InvalidationBus for FailingBus {
    async fn publish(&self, _payload: String) -> Result<(), BusError> {
        Err(BusError::transport("down"))
    }

    async fn subscribe(&self) -> Result<PayloadStream, BusError> {
        Ok(Box::pin(futures::stream::empty()))
    }
}
