//! Entity metadata consumed by the loader, the stores and the query engine.

use super::types::{PrimaryKey, Value};

/// A persisted entity type addressable by primary key.
///
/// The associated constants replace runtime type-name lookups: every entity
/// declares its segment, its key column and the columns callers may filter or
/// order by, once, at compile time.
pub trait Entity: Clone + Send + Sync + 'static {
    /// Cache namespace and invalidation target for this entity type.
    const SEGMENT: &'static str;

    /// Column holding the primary key; defines the natural order.
    const KEY_COLUMN: &'static str = "id";

    /// Columns that may appear in filters, orderings and field selections.
    const COLUMNS: &'static [&'static str];

    /// Relations the store adapter knows how to hydrate.
    const RELATIONS: &'static [&'static str] = &[];

    /// Column referencing the category entity, when the type is categorised.
    const CATEGORY_COLUMN: Option<&'static str> = None;

    fn primary_key(&self) -> PrimaryKey;

    /// Value of a declared column, used by in-memory filtering and ordering.
    fn column_value(&self, column: &str) -> Option<Value>;

    fn has_column(column: &str) -> bool {
        column == Self::KEY_COLUMN || Self::COLUMNS.contains(&column)
    }

    fn has_relation(relation: &str) -> bool {
        Self::RELATIONS.contains(&relation)
    }
}
