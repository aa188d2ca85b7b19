use clap::Args;

use crate::bus::{BusConfig, Delivery, DEFAULT_EXCHANGE};

/// Message bus flags every service binary flattens into its own `Args`.
#[derive(Debug, Clone, Args)]
pub struct BusArgs {
    #[arg(long, env = "KAFKA_BROKERS", default_value = "localhost:9092")]
    pub kafka_brokers: String,

    #[arg(long, env = "EXCHANGE", default_value = DEFAULT_EXCHANGE)]
    pub exchange: String,

    /// `at-least-once` acknowledges after the handler, `at-most-once` before it.
    #[arg(long, env = "DELIVERY", default_value = "at-least-once")]
    pub delivery: Delivery,
}

impl BusArgs {
    pub fn bus_config(&self) -> BusConfig {
        BusConfig::new(&self.kafka_brokers, &self.exchange)
    }
}
