use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::AbortHandle;
use tracing::debug;
use uuid::Uuid;

use super::{
    deliver, BusError, MessageBus, MessageHandler, Queue, QueueBinding, RetryPolicy, Subscription,
    TopicPattern, DEFAULT_EXCHANGE,
};

#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub routing_key: String,
    pub partition_key: Option<String>,
    pub body: Vec<u8>,
    pub published_at: DateTime<Utc>,
}

struct BoundQueue {
    patterns: Vec<TopicPattern>,
    sender: UnboundedSender<Vec<u8>>,
    receiver: Arc<tokio::sync::Mutex<UnboundedReceiver<Vec<u8>>>>,
}

#[derive(Default)]
struct State {
    queues: HashMap<String, BoundQueue>,
    published: Vec<PublishedMessage>,
    consumers: Vec<AbortHandle>,
}

struct Inner {
    exchange: String,
    retry: RetryPolicy,
    state: Mutex<State>,
    closed: AtomicBool,
}

/// In-process topic exchange with the same routing, queue and
/// acknowledgement semantics as [`super::KafkaBus`]. Keeps a log of every
/// published message.
#[derive(Clone)]
pub struct InMemoryBus {
    inner: Arc<Inner>,
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new(DEFAULT_EXCHANGE)
    }
}

impl InMemoryBus {
    pub fn new(exchange: impl Into<String>) -> Self {
        Self::with_retry(exchange, RetryPolicy::default())
    }

    pub fn with_retry(exchange: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            inner: Arc::new(Inner {
                exchange: exchange.into(),
                retry,
                state: Mutex::new(State::default()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // A poisoned lock only means a panicking test thread held it.
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.state().published.clone()
    }

    pub fn published_to(&self, routing_key: &str) -> Vec<PublishedMessage> {
        self.state()
            .published
            .iter()
            .filter(|m| m.routing_key == routing_key)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    fn exchange(&self) -> &str {
        &self.inner.exchange
    }

    async fn publish_raw(
        &self,
        routing_key: &str,
        partition_key: Option<&str>,
        body: &[u8],
    ) -> Result<(), BusError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(BusError::Closed);
        }

        let mut state = self.state();
        state.published.push(PublishedMessage {
            routing_key: routing_key.to_string(),
            partition_key: partition_key.map(str::to_string),
            body: body.to_vec(),
            published_at: Utc::now(),
        });

        for (name, queue) in &state.queues {
            if queue.patterns.iter().any(|p| p.matches(routing_key)) {
                debug!(queue = %name, routing_key, "routing message");
                let _ = queue.sender.send(body.to_vec());
            }
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        binding: QueueBinding,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Subscription, BusError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(BusError::Closed);
        }

        let name = match &binding.queue {
            Queue::Shared(name) => name.clone(),
            Queue::Exclusive => format!("amq.gen-{}", Uuid::new_v4()),
        };

        let receiver = {
            let mut state = self.state();
            let queue = state.queues.entry(name.clone()).or_insert_with(|| {
                let (sender, receiver) = mpsc::unbounded_channel();
                BoundQueue {
                    patterns: Vec::new(),
                    sender,
                    receiver: Arc::new(tokio::sync::Mutex::new(receiver)),
                }
            });
            if !queue.patterns.contains(&binding.pattern) {
                queue.patterns.push(binding.pattern.clone());
            }
            queue.receiver.clone()
        };

        let delivery = binding.delivery;
        let retry = self.inner.retry;
        let queue = name.clone();
        let task = tokio::spawn(async move {
            loop {
                // Competing consumers take turns on the receiver; the lock is
                // released before the handler runs.
                let next = receiver.lock().await.recv().await;
                let Some(body) = next else { break };
                deliver(handler.as_ref(), &queue, &body, delivery, retry).await;
            }
        });

        let subscription = Subscription::new(name, task);
        self.state().consumers.push(subscription.abort_handle());
        Ok(subscription)
    }

    async fn close(&self) -> Result<(), BusError> {
        self.inner.closed.store(true, Ordering::SeqCst);
        let mut state = self.state();
        for consumer in state.consumers.drain(..) {
            consumer.abort();
        }
        state.queues.clear();
        Ok(())
    }
}
