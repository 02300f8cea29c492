//! Cache invalidation coordinator.
//!
//! Clears local entries on mutation and notifies peer processes through the
//! invalidation bus. Remote messages are applied locally and never re-published.

use std::sync::Arc;

use async_trait::async_trait;
use metrics::counter;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::application::repos::MutationObserver;
use crate::domain::PrimaryKey;

use super::bus::InvalidationBus;
use super::events::{InvalidationAction, InvalidationMessage};
use super::store::TtlCache;

const METRIC_PUBLISHED: &str = "entity_loader_invalidation_published_total";
const METRIC_PUBLISH_FAILED: &str = "entity_loader_invalidation_publish_failed_total";
const METRIC_RECEIVED: &str = "entity_loader_invalidation_received_total";

/// Outcome of handling one remote payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteOutcome {
    Applied(InvalidationMessage),
    /// Published by this instance and already applied locally.
    SkippedOwn,
    Rejected,
}

pub struct InvalidationCoordinator {
    instance_id: Uuid,
    cache: Arc<TtlCache>,
    bus: Option<Arc<dyn InvalidationBus>>,
}

impl InvalidationCoordinator {
    pub fn new(cache: Arc<TtlCache>, bus: Option<Arc<dyn InvalidationBus>>) -> Self {
        Self {
            instance_id: Uuid::new_v4(),
            cache,
            bus,
        }
    }

    /// Coordinator that only clears the local cache.
    pub fn local(cache: Arc<TtlCache>) -> Self {
        Self::new(cache, None)
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    pub fn cache(&self) -> &Arc<TtlCache> {
        &self.cache
    }

    pub fn bus(&self) -> Option<&Arc<dyn InvalidationBus>> {
        self.bus.as_ref()
    }

    /// Remove the entry for `id`, or the whole segment when `id` is `None`.
    pub fn clear_local(&self, segment: &str, id: Option<&PrimaryKey>) {
        match id {
            Some(id) => {
                self.cache.delete(segment, id);
            }
            None => self.cache.clear(Some(segment)),
        }
    }

    pub fn clear_all_local(&self) {
        self.cache.clear(None);
    }

    pub fn publish_and_clear(&self, segment: &str, id: Option<&PrimaryKey>) {
        self.apply_and_publish(InvalidationAction::Clear, segment, id);
    }

    pub fn publish_and_delete(&self, segment: &str, id: Option<&PrimaryKey>) {
        self.apply_and_publish(InvalidationAction::Delete, segment, id);
    }

    fn apply_and_publish(&self, action: InvalidationAction, segment: &str, id: Option<&PrimaryKey>) {
        self.clear_local(segment, id);

        let Some(bus) = self.bus.clone() else {
            debug!(segment, action = action.as_str(), "Invalidation applied locally only");
            return;
        };

        let message = InvalidationMessage::new(action, segment, id.cloned())
            .with_origin(self.instance_id);
        let payload = match message.encode() {
            Ok(payload) => payload,
            Err(err) => {
                counter!(METRIC_PUBLISH_FAILED, "segment" => segment.to_string()).increment(1);
                warn!(segment, error = %err, "Invalidation not published");
                return;
            }
        };

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            counter!(METRIC_PUBLISH_FAILED, "segment" => segment.to_string()).increment(1);
            warn!(segment, "No async runtime available, invalidation not published");
            return;
        };

        let segment = segment.to_string();
        runtime.spawn(async move {
            match bus.publish(payload).await {
                Ok(()) => {
                    counter!(METRIC_PUBLISHED, "segment" => segment.clone()).increment(1);
                    debug!(
                        segment = %segment,
                        action = message.action.as_str(),
                        id = ?message.id,
                        "Invalidation published"
                    );
                }
                Err(err) => {
                    counter!(METRIC_PUBLISH_FAILED, "segment" => segment.clone()).increment(1);
                    warn!(segment = %segment, error = %err, "Failed to publish invalidation");
                }
            }
        });
    }

    /// Apply a payload received from the bus.
    pub fn on_remote_message(&self, payload: &str) -> RemoteOutcome {
        let message = match InvalidationMessage::decode(payload) {
            Ok(message) => message,
            Err(err) => {
                warn!(error = %err, payload, "Ignoring malformed invalidation message");
                return RemoteOutcome::Rejected;
            }
        };

        if message.origin == Some(self.instance_id) {
            return RemoteOutcome::SkippedOwn;
        }

        counter!(METRIC_RECEIVED, "segment" => message.segment.clone()).increment(1);
        self.clear_local(&message.segment, message.id.as_ref());
        info!(
            segment = %message.segment,
            action = message.action.as_str(),
            id = ?message.id,
            origin = ?message.origin,
            "Remote invalidation applied"
        );
        RemoteOutcome::Applied(message)
    }
}

#[async_trait]
impl MutationObserver for InvalidationCoordinator {
    async fn after_insert(&self, segment: &str, key: &PrimaryKey) {
        self.publish_and_clear(segment, Some(key));
    }

    async fn after_update(&self, segment: &str, key: &PrimaryKey) {
        self.publish_and_clear(segment, Some(key));
    }

    async fn after_remove(&self, segment: &str, key: &PrimaryKey) {
        self.publish_and_delete(segment, Some(key));
    }
}
