use async_trait::async_trait;
use shared::{Event, HandleError, MessageHandler};
use tracing::{error, warn};

use crate::service::NotificationService;

/// Consumes `payment.*` and emails the customer.
pub struct NotificationHandler {
    notifications: NotificationService,
}

impl NotificationHandler {
    pub fn new(notifications: NotificationService) -> Self {
        Self { notifications }
    }
}

#[async_trait]
impl MessageHandler for NotificationHandler {
    async fn handle(&self, body: &[u8]) -> Result<(), HandleError> {
        let event = match Event::decode(body) {
            Ok(event) => event,
            Err(e) if e.is_unknown_type() => {
                warn!("Ignoring event: {}", e);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        match self.notifications.notify(&event).await {
            Ok(Some(_)) => {}
            Ok(None) => warn!(event_type = %event.event_type(), "No notification for event"),
            // Mail failures are not retried.
            Err(e) => error!(order_id = event.order_id(), "Error sending email: {}", e),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailer::{InMemoryMailer, MailError, Mailer};
    use crate::templates::Locale;
    use std::sync::Arc;

    struct BrokenMailer;

    #[async_trait]
    impl Mailer for BrokenMailer {
        async fn send_email(&self, _to: &str, _subject: &str, _body: &str) -> Result<(), MailError> {
            Err(MailError::Transport("connection refused".to_string()))
        }
    }

    fn handler(mailer: Arc<dyn Mailer>) -> NotificationHandler {
        NotificationHandler::new(NotificationService::new(mailer, Locale::Ru))
    }

    #[tokio::test]
    async fn completed_payment_sends_success_email() {
        let mailer = InMemoryMailer::new();
        let body = br#"{"type":"PaymentCompleted","orderID":5,"userID":7,"email":"buyer@example.com","amount":100}"#;

        handler(Arc::new(mailer.clone())).handle(body).await.unwrap();

        let sent = mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "buyer@example.com");
        assert_eq!(sent[0].subject, "Оплата заказа 5 успешна");
    }

    #[tokio::test]
    async fn unknown_type_sends_nothing() {
        let mailer = InMemoryMailer::new();
        let body = br#"{"type":"Bogus","orderID":5,"userID":7,"email":"buyer@example.com","amount":100}"#;

        handler(Arc::new(mailer.clone())).handle(body).await.unwrap();
        assert!(mailer.sent().is_empty());
    }

    #[tokio::test]
    async fn malformed_envelope_is_rejected() {
        let mailer = InMemoryMailer::new();
        let body = br#"{"type":"PaymentFailed","userID":7,"email":"buyer@example.com","amount":100}"#;

        let result = handler(Arc::new(mailer.clone())).handle(body).await;
        assert!(matches!(result, Err(HandleError::Rejected(_))));
        assert!(mailer.sent().is_empty());
    }

    #[tokio::test]
    async fn mail_failure_is_dropped() {
        let body = br#"{"type":"PaymentFailed","orderID":5,"userID":7,"email":"buyer@example.com","amount":100}"#;
        assert!(handler(Arc::new(BrokenMailer)).handle(body).await.is_ok());
    }
}
