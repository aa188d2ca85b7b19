pub mod api;
pub mod config;
pub mod error;
pub mod handlers;
pub mod ledger_client;
pub mod models;
pub mod schema;
pub mod service;
pub mod store;

pub use handlers::OrderCreatedHandler;
pub use ledger_client::{HttpLedgerClient, Ledger, LedgerClientConfig, LedgerError};
pub use service::{PaymentError, PaymentOutcome, PaymentService};
pub use store::{InMemoryPaymentStore, PaymentStore, PgPaymentStore};

/// Consumer name used for this service's shared queues.
pub const SERVICE_NAME: &str = "payment-service";
