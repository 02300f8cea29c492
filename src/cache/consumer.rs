//! Background consumer applying remote invalidation messages.

use std::sync::Arc;

use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use super::bus::{BusError, InvalidationBus};
use super::trigger::InvalidationCoordinator;

pub struct InvalidationListener;

impl InvalidationListener {
    /// Subscribe to `bus` and spawn a task feeding every payload to `coordinator`.
    ///
    /// The subscription is established before this returns, so messages
    /// published afterwards are never missed. If the receiver lags or the
    /// connection drops, the whole local cache is cleared.
    #[instrument(skip_all, fields(instance_id = %coordinator.instance_id()))]
    pub async fn spawn(
        coordinator: Arc<InvalidationCoordinator>,
        bus: Arc<dyn InvalidationBus>,
    ) -> Result<JoinHandle<()>, BusError> {
        let mut stream = bus.subscribe().await?;
        info!("Invalidation listener subscribed");

        Ok(tokio::spawn(async move {
            while let Some(item) = stream.next().await {
                match item {
                    Ok(payload) => {
                        coordinator.on_remote_message(&payload);
                    }
                    Err(err) if err.may_have_dropped_messages() => {
                        warn!(error = %err, "Invalidation messages may have been missed, clearing local cache");
                        coordinator.clear_all_local();
                    }
                    Err(err) => {
                        warn!(error = %err, "Invalidation listener receive error");
                    }
                }
            }
            info!("Invalidation listener stopped");
        }))
    }
}
