//! Shared pagination helpers: offset windows, key cursors and page metadata.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::PrimaryKey;

const DEFAULT_MAX_PAGE_SIZE: u32 = 200;
const DEFAULT_PAGE_SIZE: u32 = 20;
const DEFAULT_FIRST: u32 = 10;
const DEFAULT_MAX_FIRST: u32 = 20;

/// Bounds applied to every page descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryLimits {
    pub max_page_size: u32,
    pub default_page_size: u32,
    pub default_first: u32,
    pub max_first: u32,
}

impl Default for QueryLimits {
    fn default() -> Self {
        Self {
            max_page_size: DEFAULT_MAX_PAGE_SIZE,
            default_page_size: DEFAULT_PAGE_SIZE,
            default_first: DEFAULT_FIRST,
            max_first: DEFAULT_MAX_FIRST,
        }
    }
}

impl From<&crate::config::QuerySettings> for QueryLimits {
    fn from(settings: &crate::config::QuerySettings) -> Self {
        Self {
            max_page_size: settings.max_page_size.get(),
            default_page_size: settings.default_page_size.get(),
            default_first: settings.default_first.get(),
            max_first: settings.max_first.get(),
        }
    }
}

impl QueryLimits {
    /// Translate a 1-based page and optional size into a store window.
    pub fn offset_window(
        &self,
        page: u32,
        size: Option<u32>,
    ) -> Result<OffsetWindow, PaginationError> {
        if page == 0 {
            return Err(PaginationError::InvalidPage(page));
        }
        let size = size
            .unwrap_or(self.default_page_size)
            .clamp(1, self.max_page_size.max(1));
        Ok(OffsetWindow {
            skip: u64::from(page - 1) * u64::from(size),
            take: u64::from(size),
        })
    }

    pub fn clamp_first(&self, first: Option<u32>) -> u32 {
        first
            .unwrap_or(self.default_first)
            .clamp(1, self.max_first.max(1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffsetWindow {
    pub skip: u64,
    pub take: u64,
}

/// Offset (`{page, size}`) or cursor (`{after, first}`) page request.
///
/// Deserialization rejects descriptors mixing offset and cursor fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum PageDescriptor {
    Offset {
        page: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        size: Option<u32>,
    },
    Cursor {
        #[serde(skip_serializing_if = "Option::is_none")]
        after: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        first: Option<u32>,
    },
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawPageDescriptor {
    page: Option<u32>,
    size: Option<u32>,
    after: Option<String>,
    first: Option<u32>,
}

impl TryFrom<RawPageDescriptor> for PageDescriptor {
    type Error = PaginationError;

    fn try_from(raw: RawPageDescriptor) -> Result<Self, Self::Error> {
        let offset = raw.page.is_some() || raw.size.is_some();
        let cursor = raw.after.is_some() || raw.first.is_some();
        match (offset, cursor) {
            (true, true) => Err(PaginationError::MixedDescriptor),
            (true, false) => Ok(PageDescriptor::Offset {
                page: raw.page.unwrap_or(1),
                size: raw.size,
            }),
            (false, _) => Ok(PageDescriptor::Cursor {
                after: raw.after,
                first: raw.first,
            }),
        }
    }
}

impl<'de> Deserialize<'de> for PageDescriptor {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = RawPageDescriptor::deserialize(deserializer)?;
        PageDescriptor::try_from(raw).map_err(serde::de::Error::custom)
    }
}

/// Opaque cursor wrapping the primary key of the last item on a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyCursor {
    key: PrimaryKey,
}

impl KeyCursor {
    pub fn new(key: PrimaryKey) -> Self {
        Self { key }
    }

    pub fn key(&self) -> &PrimaryKey {
        &self.key
    }

    pub fn into_key(self) -> PrimaryKey {
        self.key
    }

    pub fn encode(&self) -> String {
        let bytes =
            serde_json::to_vec(&self.key).expect("serializing key cursor payload should succeed");
        URL_SAFE_NO_PAD.encode(bytes)
    }

    pub fn decode(cursor: &str) -> Result<Self, PaginationError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(cursor)
            .map_err(|err| PaginationError::InvalidCursor(err.to_string()))?;
        let key: PrimaryKey = serde_json::from_slice(&bytes)
            .map_err(|err| PaginationError::InvalidCursor(err.to_string()))?;
        Ok(Self { key })
    }
}

/// Cursor-mode page metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PageInfo {
    pub has_next_page: bool,
    pub end_cursor: Option<String>,
}

#[derive(Debug, Error)]
pub enum PaginationError {
    #[error("invalid cursor: {0}")]
    InvalidCursor(String),
    #[error("page must be at least 1, got {0}")]
    InvalidPage(u32),
    #[error("offset fields (page, size) and cursor fields (after, first) cannot be combined")]
    MixedDescriptor,
}
