use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use diesel_migrations::{embed_migrations, EmbeddedMigrations};
use order_service::api::{self, AppState};
use order_service::config::Args;
use order_service::{
    OrderService, OutboxDispatcher, PaymentOutcomeHandler, PgOrderStore, SERVICE_NAME,
};
use shared::events::PAYMENT_OUTCOMES;
use shared::{KafkaBus, MessageBus, QueueBinding};
use tokio::sync::Notify;
use tracing::info;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

#[tokio::main]
async fn main() -> Result<()> {
    shared::telemetry::init(SERVICE_NAME);
    let args = Args::parse();

    let pool = shared::db::connect(&args.database_url, MIGRATIONS).await?;
    let store = Arc::new(PgOrderStore::new(pool));
    let bus: Arc<dyn MessageBus> = Arc::new(KafkaBus::connect(args.bus.bus_config()).await?);

    let wakeup = Arc::new(Notify::new());
    let orders = OrderService::new(store.clone(), wakeup.clone());
    let dispatcher = OutboxDispatcher::new(store, bus.clone(), wakeup, args.outbox_config());

    let outbox_task = tokio::spawn(async move {
        dispatcher.run().await;
    });

    let binding = QueueBinding::shared(SERVICE_NAME, PAYMENT_OUTCOMES)?.with_delivery(args.bus.delivery);
    let subscription = bus
        .subscribe(binding, Arc::new(PaymentOutcomeHandler::new(orders.clone())))
        .await?;
    info!(queue = subscription.queue(), "Listening for payment outcomes");

    let app = api::create_router(AppState { orders });
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", args.port)).await?;
    info!("Order service web server started on port {}", args.port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shared::shutdown::signal())
        .await?;

    subscription.cancel();
    outbox_task.abort();
    bus.close().await?;
    info!("Order service stopped");
    Ok(())
}
