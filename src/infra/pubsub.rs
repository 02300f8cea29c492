//! Postgres `LISTEN`/`NOTIFY` invalidation bus.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgListener, PgPool};
use tracing::{debug, warn};

use crate::cache::{BusError, INVALIDATION_CHANNEL, InvalidationBus, PayloadStream};
use crate::config::InvalidationSettings;

const RECEIVE_RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Clone)]
pub struct PgNotifyBus {
    pool: PgPool,
    channel: String,
}

impl PgNotifyBus {
    pub fn new(pool: PgPool) -> Self {
        Self::with_channel(pool, INVALIDATION_CHANNEL)
    }

    pub fn with_channel(pool: PgPool, channel: impl Into<String>) -> Self {
        Self {
            pool,
            channel: channel.into(),
        }
    }

    pub fn from_settings(pool: PgPool, settings: &InvalidationSettings) -> Self {
        Self::with_channel(pool, settings.channel.clone())
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }
}

#[async_trait]
impl InvalidationBus for PgNotifyBus {
    async fn publish(&self, payload: String) -> Result<(), BusError> {
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(&self.channel)
            .bind(payload)
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(BusError::transport)
    }

    async fn subscribe(&self) -> Result<PayloadStream, BusError> {
        let mut listener = PgListener::connect_with(&self.pool)
            .await
            .map_err(BusError::transport)?;
        listener
            .listen(&self.channel)
            .await
            .map_err(BusError::transport)?;
        debug!(channel = %self.channel, "Listening for invalidation notifications");

        let stream = async_stream::stream! {
            loop {
                match listener.try_recv().await {
                    Ok(Some(notification)) => yield Ok(notification.payload().to_string()),
                    // Connection lost; the next call reconnects and re-listens.
                    Ok(None) => yield Err(BusError::Disconnected),
                    Err(err) => {
                        warn!(error = %err, "Invalidation listener receive failed");
                        yield Err(BusError::transport(err));
                        tokio::time::sleep(RECEIVE_RETRY_DELAY).await;
                    }
                }
            }
        };
        Ok(Box::pin(stream))
    }
}
