//! Store adapter traits describing persistence collaborators.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{Entity, PrimaryKey, Value};

/// Failures surfaced by an entity store.
///
/// `Clone` so a single failed bulk fetch can be delivered to every caller
/// waiting on the same batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("resource not found")]
    NotFound,
    #[error("database timeout")]
    Timeout,
    #[error("batch dispatch aborted before completion")]
    Aborted,
}

impl StoreError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    #[serde(alias = "ASC")]
    Asc,
    #[serde(alias = "DESC")]
    Desc,
}

impl SortDirection {
    pub fn as_sql(self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub column: String,
    pub direction: SortDirection,
}

impl Order {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: SortDirection::Desc,
        }
    }

    /// Primary key ascending, the natural order of every entity.
    pub fn natural<E: Entity>() -> Self {
        Self::asc(E::KEY_COLUMN)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Gt,
}

impl Comparison {
    pub fn as_sql(self) -> &'static str {
        match self {
            Comparison::Eq => "=",
            Comparison::Gt => ">",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    pub column: String,
    pub comparison: Comparison,
    pub value: Value,
}

/// Conjunction of column conditions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    pub conditions: Vec<Condition>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push(Condition {
            column: column.into(),
            comparison: Comparison::Eq,
            value: value.into(),
        });
        self
    }

    pub fn gt(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push(Condition {
            column: column.into(),
            comparison: Comparison::Gt,
            value: value.into(),
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Evaluate the filter against an in-memory entity.
    pub fn matches<E: Entity>(&self, entity: &E) -> bool {
        self.conditions.iter().all(|condition| {
            let Some(actual) = entity.column_value(&condition.column) else {
                return false;
            };
            match condition.comparison {
                Comparison::Eq => actual == condition.value,
                Comparison::Gt => actual > condition.value,
            }
        })
    }
}

/// Options for a filtered, ordered, windowed store query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FindOptions {
    pub filter: Filter,
    pub order: Vec<Order>,
    pub skip: u64,
    pub take: Option<u64>,
    /// Relations the adapter should hydrate on returned entities.
    pub relations: Vec<String>,
    /// Projection hint; adapters may return wider rows.
    pub select: Option<Vec<String>>,
}

impl FindOptions {
    pub fn new(filter: Filter) -> Self {
        Self {
            filter,
            ..Self::default()
        }
    }

    /// Reject columns the entity does not declare.
    ///
    /// Adapters interpolate column names into queries, so only names taken from
    /// the entity's static metadata may pass.
    pub fn ensure_known_columns<E: Entity>(&self) -> Result<(), StoreError> {
        let filter_columns = self.filter.conditions.iter().map(|c| c.column.as_str());
        let order_columns = self.order.iter().map(|o| o.column.as_str());
        for column in filter_columns.chain(order_columns) {
            if !E::has_column(column) {
                return Err(StoreError::invalid_input(format!(
                    "unknown column `{column}` for `{}`",
                    E::SEGMENT
                )));
            }
        }
        for relation in &self.relations {
            if !E::has_relation(relation) {
                return Err(StoreError::invalid_input(format!(
                    "unknown relation `{relation}` for `{}`",
                    E::SEGMENT
                )));
            }
        }
        Ok(())
    }
}

/// Query capabilities of the persistent store for one entity type.
#[async_trait]
pub trait EntityStore<E: Entity>: Send + Sync {
    /// Bulk fetch by primary key. Missing ids are simply absent from the result.
    async fn find_by_ids(&self, ids: &[PrimaryKey]) -> Result<Vec<E>, StoreError>;

    async fn count(&self, filter: &Filter) -> Result<u64, StoreError>;

    async fn find_many(&self, options: &FindOptions) -> Result<Vec<E>, StoreError>;

    /// Same window as [`EntityStore::find_many`], projected to primary keys.
    async fn find_keys(&self, options: &FindOptions) -> Result<Vec<PrimaryKey>, StoreError>;
}

/// Change hooks invoked by the persistence layer after a committed mutation.
#[async_trait]
pub trait MutationObserver: Send + Sync {
    async fn after_insert(&self, segment: &str, key: &PrimaryKey);

    async fn after_update(&self, segment: &str, key: &PrimaryKey);

    async fn after_remove(&self, segment: &str, key: &PrimaryKey);
}

/// Looks up a category entity by name and yields its key.
#[async_trait]
pub trait CategoryResolver: Send + Sync {
    async fn resolve(&self, name: &str) -> Result<Option<PrimaryKey>, StoreError>;
}
