use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use notification_service::config::Args;
use notification_service::{NotificationHandler, NotificationService, SERVICE_NAME};
use shared::events::PAYMENT_OUTCOMES;
use shared::{KafkaBus, MessageBus, QueueBinding};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    shared::telemetry::init(SERVICE_NAME);
    let args = Args::parse();

    let mail_config = args.mail_config();
    let mailer = mail_config.mailer()?;
    let notifications = NotificationService::new(mailer, args.locale);

    let bus = KafkaBus::connect(args.bus.bus_config()).await?;
    let binding = QueueBinding::shared(SERVICE_NAME, PAYMENT_OUTCOMES)?.with_delivery(args.bus.delivery);
    let subscription = bus
        .subscribe(binding, Arc::new(NotificationHandler::new(notifications)))
        .await?;
    info!(
        queue = subscription.queue(),
        locale = %args.locale,
        relay = mail_config.relay_url.as_deref().unwrap_or("log"),
        "Notification service started"
    );

    shared::shutdown::signal().await;

    subscription.cancel();
    bus.close().await?;
    info!("Notification service stopped");
    Ok(())
}
