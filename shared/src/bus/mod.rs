//! Topic-exchange message bus.
//!
//! Services publish [`Event`]s under a dotted routing key and subscribe with
//! a [`TopicPattern`]. Each subscription is bound to a queue: either a named
//! queue shared by every instance of a service (competing consumers) or an
//! exclusive queue per instance (fan-out).

mod kafka;
mod memory;
mod pattern;

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use std::{fmt, str::FromStr};

use async_trait::async_trait;
use futures::FutureExt;
use thiserror::Error;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{error, warn};

use crate::events::{EnvelopeError, Event};

pub use kafka::{BusConfig, KafkaBus};
pub use memory::{InMemoryBus, PublishedMessage};
pub use pattern::TopicPattern;

pub const CONTENT_TYPE: &str = "application/json";
pub const DEFAULT_EXCHANGE: &str = "minishop";

#[derive(Debug, Error)]
pub enum BusError {
    #[error("failed to connect to message bus: {0}")]
    Connection(String),

    #[error("failed to publish to '{routing_key}': {reason}")]
    Publish { routing_key: String, reason: String },

    #[error("failed to subscribe with '{pattern}': {reason}")]
    Subscribe { pattern: String, reason: String },

    #[error("invalid topic pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    #[error("message bus is closed")]
    Closed,
}

/// When a delivered message is acknowledged relative to its handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Delivery {
    /// Acknowledge as soon as the message leaves the queue. A handler that
    /// fails or panics loses the message.
    AtMostOnce,
    /// Acknowledge only once the handler has returned. Handlers must be
    /// idempotent because an unacknowledged message is delivered again.
    #[default]
    AtLeastOnce,
}

impl fmt::Display for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Delivery::AtMostOnce => f.write_str("at-most-once"),
            Delivery::AtLeastOnce => f.write_str("at-least-once"),
        }
    }
}

impl FromStr for Delivery {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "at-most-once" => Ok(Delivery::AtMostOnce),
            "at-least-once" => Ok(Delivery::AtLeastOnce),
            other => Err(format!(
                "unknown delivery mode '{other}', expected 'at-most-once' or 'at-least-once'"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Queue {
    /// Durable queue with a stable name. Every consumer bound to the same
    /// name competes for its messages.
    Shared(String),
    /// Server-named queue owned by one consumer and dropped with it.
    Exclusive,
}

#[derive(Debug, Clone)]
pub struct QueueBinding {
    pub pattern: TopicPattern,
    pub queue: Queue,
    pub delivery: Delivery,
}

impl QueueBinding {
    /// Named queue `<consumer>.<pattern>`, shared by all instances of `consumer`.
    pub fn shared(consumer: &str, pattern: &str) -> Result<Self, BusError> {
        let pattern = TopicPattern::parse(pattern)?;
        Ok(Self {
            queue: Queue::Shared(format!("{consumer}.{pattern}")),
            pattern,
            delivery: Delivery::default(),
        })
    }

    pub fn exclusive(pattern: &str) -> Result<Self, BusError> {
        Ok(Self {
            pattern: TopicPattern::parse(pattern)?,
            queue: Queue::Exclusive,
            delivery: Delivery::default(),
        })
    }

    pub fn with_delivery(mut self, delivery: Delivery) -> Self {
        self.delivery = delivery;
        self
    }
}

/// Outcome of a handler that did not succeed.
#[derive(Debug, Error)]
pub enum HandleError {
    /// The message can never succeed (bad schema, unknown type, business
    /// rule). It is acknowledged and dropped.
    #[error("message rejected: {0}")]
    Rejected(String),

    /// Infrastructure failure; trying again later may succeed.
    #[error("transient failure: {0}")]
    Transient(anyhow::Error),
}

impl From<EnvelopeError> for HandleError {
    fn from(err: EnvelopeError) -> Self {
        HandleError::Rejected(err.to_string())
    }
}

#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, body: &[u8]) -> Result<(), HandleError>;
}

/// Backoff applied to `Transient` failures under [`Delivery::AtLeastOnce`].
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// A running consumer bound to one queue.
pub struct Subscription {
    queue: String,
    task: JoinHandle<()>,
}

impl Subscription {
    pub(crate) fn new(queue: String, task: JoinHandle<()>) -> Self {
        Self { queue, task }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub(crate) fn abort_handle(&self) -> AbortHandle {
        self.task.abort_handle()
    }

    /// Stops consuming. Messages already taken from the queue are not returned.
    pub fn cancel(&self) {
        self.task.abort();
    }
}

#[async_trait]
pub trait MessageBus: Send + Sync {
    fn exchange(&self) -> &str;

    /// Publishes an already encoded envelope. `partition_key` groups related
    /// messages where the transport supports ordering by key.
    async fn publish_raw(
        &self,
        routing_key: &str,
        partition_key: Option<&str>,
        body: &[u8],
    ) -> Result<(), BusError>;

    async fn subscribe(
        &self,
        binding: QueueBinding,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Subscription, BusError>;

    async fn close(&self) -> Result<(), BusError>;

    async fn publish(&self, routing_key: &str, event: &Event) -> Result<(), BusError> {
        let body = event.encode()?;
        let key = event.order_id().to_string();
        self.publish_raw(routing_key, Some(&key), &body).await
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

/// Runs `handler` for one delivered message according to the delivery mode.
/// Returns once the message may be acknowledged. A panicking handler loses
/// only the message it was handling.
pub(crate) async fn deliver(
    handler: &dyn MessageHandler,
    queue: &str,
    body: &[u8],
    delivery: Delivery,
    retry: RetryPolicy,
) {
    let mut attempt = 1;
    loop {
        let outcome = match AssertUnwindSafe(handler.handle(body)).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(panic) => {
                error!(queue, panic = panic_message(panic.as_ref()), "handler panicked, message dropped");
                return;
            }
        };

        match outcome {
            Ok(()) => return,
            Err(HandleError::Rejected(reason)) => {
                warn!(queue, %reason, "message rejected and dropped");
                return;
            }
            Err(HandleError::Transient(err)) => {
                if delivery == Delivery::AtMostOnce {
                    error!(queue, error = %err, "handler failed, message dropped");
                    return;
                }
                if attempt >= retry.max_attempts {
                    error!(queue, attempt, error = %err, "handler failed, giving up on message");
                    return;
                }
                let backoff = retry.backoff(attempt);
                warn!(queue, attempt, ?backoff, error = %err, "handler failed, retrying");
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Flaky {
        calls: AtomicU32,
        succeed_on: u32,
    }

    #[async_trait]
    impl MessageHandler for Flaky {
        async fn handle(&self, _body: &[u8]) -> Result<(), HandleError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call >= self.succeed_on {
                Ok(())
            } else {
                Err(HandleError::Transient(anyhow::anyhow!("store unavailable")))
            }
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        }
    }

    #[test]
    fn shared_queue_is_named_after_consumer_and_pattern() {
        let binding = QueueBinding::shared("order-service", "payment.*").unwrap();
        assert_eq!(binding.queue, Queue::Shared("order-service.payment.*".to_string()));
        assert_eq!(binding.delivery, Delivery::AtLeastOnce);
    }

    #[test]
    fn parses_delivery_modes() {
        assert_eq!("at-most-once".parse::<Delivery>(), Ok(Delivery::AtMostOnce));
        assert_eq!("at-least-once".parse::<Delivery>(), Ok(Delivery::AtLeastOnce));
        assert!("exactly-once".parse::<Delivery>().is_err());
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(350),
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(350));
    }

    #[tokio::test]
    async fn at_least_once_retries_transient_failures() {
        let handler = Flaky {
            calls: AtomicU32::new(0),
            succeed_on: 3,
        };
        deliver(&handler, "q", b"{}", Delivery::AtLeastOnce, fast_retry()).await;
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn at_least_once_gives_up_after_max_attempts() {
        let handler = Flaky {
            calls: AtomicU32::new(0),
            succeed_on: u32::MAX,
        };
        deliver(&handler, "q", b"{}", Delivery::AtLeastOnce, fast_retry()).await;
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
    }

    struct Panics;

    #[async_trait]
    impl MessageHandler for Panics {
        async fn handle(&self, _body: &[u8]) -> Result<(), HandleError> {
            panic!("handler bug");
        }
    }

    #[tokio::test]
    async fn panicking_handler_returns_control() {
        deliver(&Panics, "q", b"{}", Delivery::AtLeastOnce, fast_retry()).await;
    }

    #[tokio::test]
    async fn at_most_once_never_retries() {
        let handler = Flaky {
            calls: AtomicU32::new(0),
            succeed_on: 2,
        };
        deliver(&handler, "q", b"{}", Delivery::AtMostOnce, fast_retry()).await;
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }
}
