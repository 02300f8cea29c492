//! Postgres-backed entity store.

mod util;

pub use util::map_sqlx_error;

use std::marker::PhantomData;

use async_trait::async_trait;
use sqlx::{
    FromRow, Postgres, QueryBuilder, Row,
    postgres::{PgPool, PgPoolOptions, PgRow},
    query,
};

use crate::application::repos::{EntityStore, Filter, FindOptions, Order, StoreError};
use crate::config::DatabaseSettings;
use crate::domain::{Entity, PrimaryKey, Value};
use crate::infra::error::InfraError;

/// SQL type of an entity's primary key column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    Int,
    Text,
}

/// Table mapping for an entity stored in Postgres.
///
/// Queries alias the table as `t`; relation expressions may refer to it.
pub trait PgEntity: Entity + for<'r> FromRow<'r, PgRow> + Unpin {
    const TABLE: &'static str;
    const KEY_KIND: KeyKind = KeyKind::Int;

    /// SQL expression hydrating `relation`, selected under the relation's name.
    fn relation_sql(relation: &str) -> Option<&'static str> {
        let _ = relation;
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Projection {
    Rows,
    Keys,
}

pub struct PostgresStore<E: PgEntity> {
    pool: PgPool,
    _entity: PhantomData<fn() -> E>,
}

impl<E: PgEntity> Clone for PostgresStore<E> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            _entity: PhantomData,
        }
    }
}

impl<E: PgEntity> PostgresStore<E> {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            _entity: PhantomData,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

pub async fn connect(settings: &DatabaseSettings) -> Result<PgPool, InfraError> {
    let url = settings
        .url
        .as_deref()
        .ok_or_else(|| InfraError::database("database.url is not configured"))?;
    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections.get())
        .connect(url)
        .await?;
    Ok(pool)
}

pub async fn health_check(pool: &PgPool) -> Result<(), sqlx::Error> {
    query("SELECT 1").execute(pool).await.map(|_| ())
}

#[async_trait]
impl<E: PgEntity> EntityStore<E> for PostgresStore<E> {
    async fn find_by_ids(&self, ids: &[PrimaryKey]) -> Result<Vec<E>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut qb = select_by_ids_query::<E>(ids);
        qb.build_query_as::<E>()
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)
    }

    async fn count(&self, filter: &Filter) -> Result<u64, StoreError> {
        let mut qb = count_query::<E>(filter)?;
        let count: i64 = qb
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn find_many(&self, options: &FindOptions) -> Result<Vec<E>, StoreError> {
        let mut qb = find_query::<E>(options, Projection::Rows)?;
        qb.build_query_as::<E>()
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)
    }

    async fn find_keys(&self, options: &FindOptions) -> Result<Vec<PrimaryKey>, StoreError> {
        let mut qb = find_query::<E>(options, Projection::Keys)?;
        let rows = qb
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        rows.iter().map(decode_key::<E>).collect()
    }
}

fn decode_key<E: PgEntity>(row: &PgRow) -> Result<PrimaryKey, StoreError> {
    let key = match E::KEY_KIND {
        KeyKind::Int => row.try_get::<i64, _>("key").map(PrimaryKey::Int),
        KeyKind::Text => row.try_get::<String, _>("key").map(PrimaryKey::Text),
    };
    key.map_err(map_sqlx_error)
}

fn select_by_ids_query<E: PgEntity>(ids: &[PrimaryKey]) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new("SELECT t.* FROM ");
    qb.push(E::TABLE);
    qb.push(" t WHERE t.");
    qb.push(E::KEY_COLUMN);
    qb.push(" = ANY(");
    // Keys of the wrong kind cannot match any row.
    match E::KEY_KIND {
        KeyKind::Int => {
            let ints: Vec<i64> = ids.iter().filter_map(PrimaryKey::as_int).collect();
            qb.push_bind(ints);
        }
        KeyKind::Text => {
            let texts: Vec<String> = ids
                .iter()
                .filter_map(|key| key.as_text().map(str::to_string))
                .collect();
            qb.push_bind(texts);
        }
    }
    qb.push(")");
    qb
}

fn count_query<E: PgEntity>(filter: &Filter) -> Result<QueryBuilder<'static, Postgres>, StoreError> {
    FindOptions::new(filter.clone()).ensure_known_columns::<E>()?;

    let mut qb = QueryBuilder::new("SELECT COUNT(*) FROM ");
    qb.push(E::TABLE);
    qb.push(" t WHERE 1 = 1");
    push_filter(&mut qb, filter);
    Ok(qb)
}

fn find_query<E: PgEntity>(
    options: &FindOptions,
    projection: Projection,
) -> Result<QueryBuilder<'static, Postgres>, StoreError> {
    options.ensure_known_columns::<E>()?;

    let mut qb = QueryBuilder::new("SELECT ");
    match projection {
        Projection::Keys => {
            qb.push("t.");
            qb.push(E::KEY_COLUMN);
            qb.push(" AS key");
        }
        Projection::Rows => {
            // Rows are decoded whole, so the column projection is not applied here.
            qb.push("t.*");
            for relation in &options.relations {
                let expr = E::relation_sql(relation).ok_or_else(|| {
                    StoreError::invalid_input(format!(
                        "relation `{relation}` has no SQL mapping for `{}`",
                        E::SEGMENT
                    ))
                })?;
                qb.push(", (");
                qb.push(expr);
                qb.push(") AS ");
                qb.push(relation);
            }
        }
    }
    qb.push(" FROM ");
    qb.push(E::TABLE);
    qb.push(" t WHERE 1 = 1");
    push_filter(&mut qb, &options.filter);
    push_order::<E>(&mut qb, &options.order);

    if let Some(take) = options.take {
        qb.push(" LIMIT ");
        qb.push_bind(clamp_i64(take));
    }
    if options.skip > 0 {
        qb.push(" OFFSET ");
        qb.push_bind(clamp_i64(options.skip));
    }
    Ok(qb)
}

fn push_filter(qb: &mut QueryBuilder<'static, Postgres>, filter: &Filter) {
    for condition in &filter.conditions {
        qb.push(" AND t.");
        qb.push(&condition.column);
        qb.push(" ");
        qb.push(condition.comparison.as_sql());
        qb.push(" ");
        push_value(qb, &condition.value);
    }
}

fn push_order<E: Entity>(qb: &mut QueryBuilder<'static, Postgres>, order: &[Order]) {
    let tiebreak = Order::natural::<E>();
    let needs_tiebreak = order.iter().all(|o| o.column != E::KEY_COLUMN);

    qb.push(" ORDER BY ");
    let mut first = true;
    for entry in order.iter().chain(needs_tiebreak.then_some(&tiebreak)) {
        if !first {
            qb.push(", ");
        }
        first = false;
        qb.push("t.");
        qb.push(&entry.column);
        qb.push(" ");
        qb.push(entry.direction.as_sql());
    }
}

fn push_value(qb: &mut QueryBuilder<'static, Postgres>, value: &Value) {
    match value {
        Value::Int(v) => qb.push_bind(*v),
        Value::Text(v) => qb.push_bind(v.clone()),
        Value::Bool(v) => qb.push_bind(*v),
    };
}

fn clamp_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
