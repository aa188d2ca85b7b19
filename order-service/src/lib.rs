pub mod api;
pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod outbox;
pub mod schema;
pub mod service;
pub mod store;

pub use handlers::PaymentOutcomeHandler;
pub use outbox::{OutboxConfig, OutboxDispatcher};
pub use service::{CreateOrder, OrderError, OrderService, StatusChange};
pub use store::{InMemoryOrderStore, OrderStore, OutboxStore, PgOrderStore};

/// Consumer name used for this service's shared queues.
pub const SERVICE_NAME: &str = "order-service";
