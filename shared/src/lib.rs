//! Vocabulary shared by every minishop service: the event envelope, the
//! topic-exchange bus client and process bootstrap helpers.

pub mod bus;
pub mod config;
pub mod db;
pub mod events;
pub mod money;
pub mod shutdown;
pub mod telemetry;

pub use bus::{
    BusConfig, BusError, Delivery, HandleError, InMemoryBus, KafkaBus, MessageBus,
    MessageHandler, Queue, QueueBinding, RetryPolicy, Subscription, TopicPattern,
};
pub use config::BusArgs;
pub use db::{DbPool, StoreError};
pub use events::{EnvelopeError, Event, EventType, OrderDetails};
