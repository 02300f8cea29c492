//! Invalidation message contract.
//!
//! Messages travel as UTF-8 JSON on the `cache-invalidation` channel:
//! `{"action":"clear"|"delete","segment":"Post","id":5}`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::bus::BusError;
use crate::domain::PrimaryKey;

/// Default channel/topic carrying invalidation messages.
pub const INVALIDATION_CHANNEL: &str = "cache-invalidation";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvalidationAction {
    /// An entity was inserted or updated.
    Clear,
    /// An entity was removed.
    Delete,
}

impl InvalidationAction {
    pub fn as_str(self) -> &'static str {
        match self {
            InvalidationAction::Clear => "clear",
            InvalidationAction::Delete => "delete",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationMessage {
    pub action: InvalidationAction,
    pub segment: String,
    /// Absent means every entry of the segment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<PrimaryKey>,
    /// Instance that published the message, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<Uuid>,
}

impl InvalidationMessage {
    pub fn new(action: InvalidationAction, segment: impl Into<String>, id: Option<PrimaryKey>) -> Self {
        Self {
            action,
            segment: segment.into(),
            id,
            origin: None,
        }
    }

    pub fn with_origin(mut self, origin: Uuid) -> Self {
        self.origin = Some(origin);
        self
    }

    pub fn encode(&self) -> Result<String, BusError> {
        serde_json::to_string(self).map_err(|err| BusError::Encode(err.to_string()))
    }

    pub fn decode(payload: &str) -> Result<Self, BusError> {
        serde_json::from_str(payload).map_err(|err| BusError::Decode(err.to_string()))
    }
}
