use std::sync::Arc;
use std::time::Duration;

use shared::{MessageBus, StoreError};
use tokio::sync::Notify;
use tokio::time;
use tracing::{error, info, warn};

use crate::models::{OutboxEvent, OutboxStatus};
use crate::store::OutboxStore;

#[derive(Debug, Clone, Copy)]
pub struct OutboxConfig {
    pub poll_interval: Duration,
    pub batch_size: i64,
    /// Failed publish attempts after which a row is marked `failed`.
    pub max_retries: i32,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            batch_size: 100,
            max_retries: 5,
        }
    }
}

/// Relays committed outbox rows to the bus.
pub struct OutboxDispatcher {
    store: Arc<dyn OutboxStore>,
    bus: Arc<dyn MessageBus>,
    wakeup: Arc<Notify>,
    config: OutboxConfig,
}

impl OutboxDispatcher {
    pub fn new(
        store: Arc<dyn OutboxStore>,
        bus: Arc<dyn MessageBus>,
        wakeup: Arc<Notify>,
        config: OutboxConfig,
    ) -> Self {
        Self {
            store,
            bus,
            wakeup,
            config,
        }
    }

    /// Dispatches on every poll tick and whenever woken.
    pub async fn run(&self) {
        // `interval` panics on a zero period.
        let mut interval = time::interval(self.config.poll_interval.max(Duration::from_millis(1)));

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = self.wakeup.notified() => {}
            }

            if let Err(e) = self.dispatch_pending().await {
                error!("Error processing outbox events: {}", e);
            }
        }
    }

    /// Publishes one batch of pending rows. Returns how many were published.
    pub async fn dispatch_pending(&self) -> Result<usize, StoreError> {
        let pending = self.store.pending_events(self.config.batch_size).await?;

        let mut published = 0;
        for event in pending {
            match self.publish(&event).await {
                Ok(()) => {
                    self.store.mark_processed(event.id).await?;
                    published += 1;
                    info!(outbox_id = event.id, order_id = event.aggregate_id, routing_key = %event.routing_key, "Published outbox event");
                }
                Err(reason) => self.record_failure(&event, &reason).await?,
            }
        }

        Ok(published)
    }

    async fn publish(&self, event: &OutboxEvent) -> Result<(), String> {
        let key = event.aggregate_id.to_string();
        self.bus
            .publish_raw(&event.routing_key, Some(&key), &event.payload)
            .await
            .map_err(|e| e.to_string())
    }

    async fn record_failure(&self, event: &OutboxEvent, reason: &str) -> Result<(), StoreError> {
        let retry_count = event.retry_count + 1;
        let status = if retry_count >= self.config.max_retries {
            error!(outbox_id = event.id, order_id = event.aggregate_id, retry_count, "Giving up on outbox event: {}", reason);
            OutboxStatus::Failed
        } else {
            warn!(outbox_id = event.id, order_id = event.aggregate_id, retry_count, "Failed to publish outbox event: {}", reason);
            OutboxStatus::Pending
        };
        self.store.mark_retry(event.id, retry_count, reason, status).await
    }
}
