//! Publish/subscribe transport for invalidation payloads.

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

const DEFAULT_MEMORY_CAPACITY: usize = 1024;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus transport error: {0}")]
    Transport(String),
    #[error("failed to encode invalidation message: {0}")]
    Encode(String),
    #[error("failed to decode invalidation message: {0}")]
    Decode(String),
    #[error("subscriber lagged behind, {0} messages skipped")]
    Lagged(u64),
    #[error("bus connection lost")]
    Disconnected,
}

impl BusError {
    pub fn transport(err: impl std::fmt::Display) -> Self {
        Self::Transport(err.to_string())
    }

    /// Whether the subscriber may have missed messages.
    pub fn may_have_dropped_messages(&self) -> bool {
        matches!(self, BusError::Lagged(_) | BusError::Disconnected)
    }
}

/// Stream of raw payloads received from the bus.
pub type PayloadStream = BoxStream<'static, Result<String, BusError>>;

#[async_trait]
pub trait InvalidationBus: Send + Sync {
    async fn publish(&self, payload: String) -> Result<(), BusError>;

    async fn subscribe(&self) -> Result<PayloadStream, BusError>;
}

/// In-process bus backed by a tokio broadcast channel.
///
/// Every subscriber sees every payload, including its own publications.
#[derive(Clone)]
pub struct MemoryBus {
    sender: broadcast::Sender<String>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MEMORY_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InvalidationBus for MemoryBus {
    async fn publish(&self, payload: String) -> Result<(), BusError> {
        // No subscribers is not a failure: nobody needs to hear it.
        let _ = self.sender.send(payload);
        Ok(())
    }

    async fn subscribe(&self) -> Result<PayloadStream, BusError> {
        let mut receiver = self.sender.subscribe();
        let stream = async_stream::stream! {
            loop {
                match receiver.recv().await {
                    Ok(payload) => yield Ok(payload),
                    Err(RecvError::Lagged(skipped)) => yield Err(BusError::Lagged(skipped)),
                    Err(RecvError::Closed) => break,
                }
            }
        };
        Ok(Box::pin(stream))
    }
}
