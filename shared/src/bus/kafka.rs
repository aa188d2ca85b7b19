use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::Message;
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::pattern::is_word;
use super::{
    deliver, BusError, Delivery, MessageBus, MessageHandler, Queue, QueueBinding, RetryPolicy,
    Subscription,
};
use crate::events::EventType;

#[derive(Debug, Clone)]
pub struct BusConfig {
    pub brokers: String,
    pub exchange: String,
    pub partitions: i32,
    pub replication: i32,
    pub connect_timeout: Duration,
    pub publish_timeout: Duration,
    pub retry: RetryPolicy,
}

impl BusConfig {
    pub fn new(brokers: impl Into<String>, exchange: impl Into<String>) -> Self {
        Self {
            brokers: brokers.into(),
            exchange: exchange.into(),
            partitions: 1,
            replication: 1,
            connect_timeout: Duration::from_secs(10),
            publish_timeout: Duration::from_secs(5),
            retry: RetryPolicy::default(),
        }
    }
}

/// Topic exchange on top of Kafka.
///
/// Routing key `k` on exchange `x` lives in Kafka topic `x.k`. A named queue
/// is a consumer group; an exclusive queue is a consumer group nobody else
/// joins.
pub struct KafkaBus {
    config: BusConfig,
    producer: FutureProducer,
    consumers: Mutex<Vec<AbortHandle>>,
    closed: AtomicBool,
}

impl KafkaBus {
    /// Connects to the brokers and declares the exchange.
    pub async fn connect(config: BusConfig) -> Result<Self, BusError> {
        if !is_word(&config.exchange) {
            return Err(BusError::Connection(format!(
                "invalid exchange name '{}'",
                config.exchange
            )));
        }

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("message.timeout.ms", config.publish_timeout.as_millis().to_string())
            .create()
            .map_err(|e| BusError::Connection(e.to_string()))?;

        let probe = producer.clone();
        let timeout = config.connect_timeout;
        tokio::task::spawn_blocking(move || probe.client().fetch_metadata(None, timeout).map(|_| ()))
            .await
            .map_err(|e| BusError::Connection(e.to_string()))?
            .map_err(|e| BusError::Connection(e.to_string()))?;

        let bus = Self {
            config,
            producer,
            consumers: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        };
        bus.declare_exchange().await?;

        info!(brokers = %bus.config.brokers, exchange = %bus.config.exchange, "connected to message bus");
        Ok(bus)
    }

    fn topic_for(&self, routing_key: &str) -> String {
        format!("{}.{}", self.config.exchange, routing_key)
    }

    /// Creates the topic behind every known routing key. Topics that already
    /// exist are left untouched.
    async fn declare_exchange(&self) -> Result<(), BusError> {
        let admin: AdminClient<DefaultClientContext> = ClientConfig::new()
            .set("bootstrap.servers", &self.config.brokers)
            .create()
            .map_err(|e| BusError::Connection(e.to_string()))?;

        let names: Vec<String> = EventType::ALL
            .iter()
            .map(|t| self.topic_for(t.routing_key()))
            .collect();
        let topics: Vec<NewTopic> = names
            .iter()
            .map(|name| {
                NewTopic::new(
                    name,
                    self.config.partitions,
                    TopicReplication::Fixed(self.config.replication),
                )
            })
            .collect();

        let results = admin
            .create_topics(&topics, &AdminOptions::new())
            .await
            .map_err(|e| BusError::Connection(e.to_string()))?;

        for result in results {
            match result {
                Ok(topic) => debug!(%topic, "declared topic"),
                Err((_, RDKafkaErrorCode::TopicAlreadyExists)) => {}
                Err((topic, code)) => {
                    return Err(BusError::Connection(format!(
                        "failed to declare topic {topic}: {code}"
                    )))
                }
            }
        }
        Ok(())
    }

    fn consumer_for(&self, binding: &QueueBinding) -> Result<(String, StreamConsumer), BusError> {
        let (group_id, offset_reset) = match &binding.queue {
            Queue::Shared(name) => (name.clone(), "earliest"),
            Queue::Exclusive => (
                format!("{}.gen-{}", self.config.exchange, Uuid::new_v4()),
                "latest",
            ),
        };

        let consumer: StreamConsumer = ClientConfig::new()
            .set("group.id", &group_id)
            .set("bootstrap.servers", &self.config.brokers)
            .set("enable.partition.eof", "false")
            .set("session.timeout.ms", "6000")
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", offset_reset)
            .set("topic.metadata.refresh.interval.ms", "10000")
            .create()
            .map_err(|e| BusError::Subscribe {
                pattern: binding.pattern.to_string(),
                reason: e.to_string(),
            })?;

        Ok((group_id, consumer))
    }
}

#[async_trait]
impl MessageBus for KafkaBus {
    fn exchange(&self) -> &str {
        &self.config.exchange
    }

    async fn publish_raw(
        &self,
        routing_key: &str,
        partition_key: Option<&str>,
        body: &[u8],
    ) -> Result<(), BusError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BusError::Closed);
        }

        let topic = self.topic_for(routing_key);
        let headers = OwnedHeaders::new().insert(Header {
            key: "content-type",
            value: Some(super::CONTENT_TYPE),
        });
        let mut record = FutureRecord::<str, [u8]>::to(&topic)
            .payload(body)
            .headers(headers)
            .timestamp(Utc::now().timestamp_millis());
        if let Some(key) = partition_key {
            record = record.key(key);
        }

        self.producer
            .send(record, self.config.publish_timeout)
            .await
            .map_err(|(e, _)| BusError::Publish {
                routing_key: routing_key.to_string(),
                reason: e.to_string(),
            })?;

        debug!(%topic, "published message");
        Ok(())
    }

    async fn subscribe(
        &self,
        binding: QueueBinding,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Subscription, BusError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BusError::Closed);
        }

        let (queue, consumer) = self.consumer_for(&binding)?;
        let regex = binding.pattern.to_topic_regex(&self.config.exchange);
        consumer
            .subscribe(&[regex.as_str()])
            .map_err(|e| BusError::Subscribe {
                pattern: binding.pattern.to_string(),
                reason: e.to_string(),
            })?;

        info!(%queue, pattern = %binding.pattern, delivery = %binding.delivery, "subscribed");

        let delivery = binding.delivery;
        let retry = self.config.retry;
        let task_queue = queue.clone();
        let task = tokio::spawn(async move {
            let mut stream = consumer.stream();
            while let Some(message) = stream.next().await {
                let m = match message {
                    Ok(m) => m,
                    Err(e) => {
                        error!(queue = %task_queue, "error receiving message: {}", e);
                        continue;
                    }
                };

                if delivery == Delivery::AtMostOnce {
                    if let Err(e) = consumer.commit_message(&m, CommitMode::Async) {
                        error!(queue = %task_queue, "error committing message: {}", e);
                    }
                }

                match m.payload() {
                    Some(body) => {
                        debug!(queue = %task_queue, topic = m.topic(), offset = m.offset(), "message received");
                        deliver(handler.as_ref(), &task_queue, body, delivery, retry).await;
                    }
                    None => warn!(queue = %task_queue, topic = m.topic(), "dropping message without payload"),
                }

                if delivery == Delivery::AtLeastOnce {
                    if let Err(e) = consumer.commit_message(&m, CommitMode::Async) {
                        error!(queue = %task_queue, "error committing message: {}", e);
                    }
                }
            }
        });

        let subscription = Subscription::new(queue, task);
        if let Ok(mut consumers) = self.consumers.lock() {
            consumers.push(subscription.abort_handle());
        }
        Ok(subscription)
    }

    async fn close(&self) -> Result<(), BusError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if let Ok(mut consumers) = self.consumers.lock() {
            for consumer in consumers.drain(..) {
                consumer.abort();
            }
        }

        let producer = self.producer.clone();
        let timeout = self.config.publish_timeout;
        tokio::task::spawn_blocking(move || producer.flush(timeout))
            .await
            .map_err(|e| BusError::Connection(e.to_string()))?
            .map_err(|e| BusError::Connection(e.to_string()))?;

        info!(exchange = %self.config.exchange, "message bus closed");
        Ok(())
    }
}
