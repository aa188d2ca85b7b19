use std::sync::Arc;

use shared::Event;
use tracing::info;

use crate::mailer::{MailError, Mailer};
use crate::templates::{self, Locale, Notification};

#[derive(Clone)]
pub struct NotificationService {
    mailer: Arc<dyn Mailer>,
    locale: Locale,
}

impl NotificationService {
    pub fn new(mailer: Arc<dyn Mailer>, locale: Locale) -> Self {
        Self { mailer, locale }
    }

    /// Emails the customer about a payment outcome. Returns the message
    /// sent, or `None` when the event needs no notification.
    pub async fn notify(&self, event: &Event) -> Result<Option<Notification>, MailError> {
        let Some(notification) = templates::render(event, self.locale) else {
            return Ok(None);
        };

        self.mailer
            .send_email(&notification.to, &notification.subject, &notification.body)
            .await?;
        info!(order_id = event.order_id(), event_type = %event.event_type(), "customer notified");
        Ok(Some(notification))
    }
}
