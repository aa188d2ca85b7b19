pub mod api;
pub mod config;
pub mod error;
pub mod ledger;
pub mod models;
pub mod schema;
pub mod store;

pub use ledger::{Ledger, LedgerError};
pub use store::{BalanceStore, InMemoryBalanceStore, PgBalanceStore};
