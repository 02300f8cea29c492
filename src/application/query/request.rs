//! Request descriptors accepted by the query engine.

use serde::{Deserialize, Serialize};

use crate::application::error::QueryError;
use crate::application::pagination::PageDescriptor;
use crate::application::repos::{Order, SortDirection};
use crate::domain::PrimaryKey;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub column: String,
    #[serde(default)]
    pub direction: SortDirection,
}

impl From<&OrderBy> for Order {
    fn from(order_by: &OrderBy) -> Self {
        Order {
            column: order_by.column.clone(),
            direction: order_by.direction,
        }
    }
}

/// Abstract query over one entity type.
///
/// ```json
/// {"category": "news", "page": {"page": 2, "size": 10}, "fields": ["title", "author.name"]}
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<PrimaryKey>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub random: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<PageDescriptor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_by: Option<OrderBy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<String>>,
}

/// How a request is resolved, in precedence order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionMode {
    Ids(Vec<PrimaryKey>),
    Random(u32),
    Offset { page: u32, size: Option<u32> },
    Cursor { after: Option<String>, first: Option<u32> },
}

impl QueryRequest {
    pub fn by_ids<I, K>(ids: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<PrimaryKey>,
    {
        Self {
            ids: Some(ids.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    pub fn random(n: u32) -> Self {
        Self {
            random: Some(n),
            ..Self::default()
        }
    }

    pub fn offset(page: u32, size: u32) -> Self {
        Self {
            page: Some(PageDescriptor::Offset {
                page,
                size: Some(size),
            }),
            ..Self::default()
        }
    }

    pub fn cursor(after: Option<String>, first: Option<u32>) -> Self {
        Self {
            page: Some(PageDescriptor::Cursor { after, first }),
            ..Self::default()
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_order_by(mut self, column: impl Into<String>, direction: SortDirection) -> Self {
        self.order_by = Some(OrderBy {
            column: column.into(),
            direction,
        });
        self
    }

    pub fn with_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Parse a JSON request descriptor; any shape error is a malformed request.
    pub fn from_json(payload: &str) -> Result<Self, QueryError> {
        serde_json::from_str(payload)
            .map_err(|err| QueryError::malformed(format!("invalid request descriptor: {err}")))
    }

    pub fn mode(&self) -> Result<ResolutionMode, QueryError> {
        let ids = self.ids.as_ref().filter(|ids| !ids.is_empty());
        let random = self.random.filter(|n| *n > 0);

        match (ids, random) {
            (Some(_), Some(_)) => Err(QueryError::malformed(
                "`ids` and `random` cannot be combined",
            )),
            (Some(ids), None) => Ok(ResolutionMode::Ids(ids.clone())),
            (None, Some(n)) => Ok(ResolutionMode::Random(n)),
            (None, None) => Ok(match &self.page {
                None => ResolutionMode::Offset {
                    page: 1,
                    size: None,
                },
                Some(PageDescriptor::Offset { page, size }) => ResolutionMode::Offset {
                    page: *page,
                    size: *size,
                },
                Some(PageDescriptor::Cursor { after, first }) => ResolutionMode::Cursor {
                    after: after.clone(),
                    first: *first,
                },
            }),
        }
    }
}
