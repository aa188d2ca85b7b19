use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use diesel_migrations::{embed_migrations, EmbeddedMigrations};
use payment_service::api::{self, AppState};
use payment_service::config::Args;
use payment_service::{
    HttpLedgerClient, OrderCreatedHandler, PaymentService, PgPaymentStore, SERVICE_NAME,
};
use shared::events::ORDER_CREATED;
use shared::{KafkaBus, MessageBus, QueueBinding};
use tracing::info;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

#[tokio::main]
async fn main() -> Result<()> {
    shared::telemetry::init(SERVICE_NAME);
    let args = Args::parse();

    let pool = shared::db::connect(&args.database_url, MIGRATIONS).await?;
    let bus: Arc<dyn MessageBus> = Arc::new(KafkaBus::connect(args.bus.bus_config()).await?);
    let ledger = Arc::new(HttpLedgerClient::new(args.ledger_config())?);
    let payments = PaymentService::new(Arc::new(PgPaymentStore::new(pool)), ledger, bus.clone());

    let binding = QueueBinding::shared(SERVICE_NAME, ORDER_CREATED)?.with_delivery(args.bus.delivery);
    let subscription = bus
        .subscribe(binding, Arc::new(OrderCreatedHandler::new(payments.clone())))
        .await?;
    info!(queue = subscription.queue(), ledger = %args.ledger_url, "Listening for new orders");

    let app = api::create_router(AppState { payments });
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", args.port)).await?;
    info!("Payment service web server started on port {}", args.port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shared::shutdown::signal())
        .await?;

    subscription.cancel();
    bus.close().await?;
    info!("Payment service stopped");
    Ok(())
}
