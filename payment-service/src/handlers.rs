use async_trait::async_trait;
use shared::{Event, HandleError, MessageHandler};
use tracing::{error, warn};

use crate::service::{PaymentError, PaymentOutcome, PaymentService};

/// Consumes `order.created` and charges the order.
pub struct OrderCreatedHandler {
    payments: PaymentService,
}

impl OrderCreatedHandler {
    pub fn new(payments: PaymentService) -> Self {
        Self { payments }
    }
}

#[async_trait]
impl MessageHandler for OrderCreatedHandler {
    async fn handle(&self, body: &[u8]) -> Result<(), HandleError> {
        let event = match Event::decode(body) {
            Ok(event) => event,
            Err(e) if e.is_unknown_type() => {
                warn!("Ignoring event: {}", e);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let Event::OrderCreated(details) = &event else {
            return Err(HandleError::Rejected(format!(
                "expected OrderCreated, got {}",
                event.event_type()
            )));
        };

        match self.payments.process_order(details).await {
            Ok(PaymentOutcome::Failed(payment)) => {
                warn!(order_id = payment.order_id, "Payment failed: {}", payment.error.unwrap_or_default());
                Ok(())
            }
            Ok(_) => Ok(()),
            Err(e @ (PaymentError::Store(_) | PaymentError::Bus(_))) => {
                error!(order_id = details.order_id, "Error processing payment: {}", e);
                Err(HandleError::Transient(e.into()))
            }
            Err(e) => Err(HandleError::Rejected(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger_client::{HttpLedgerClient, LedgerClientConfig};
    use crate::store::InMemoryPaymentStore;
    use shared::InMemoryBus;
    use std::sync::Arc;
    use std::time::Duration;

    fn handler() -> (OrderCreatedHandler, Arc<InMemoryPaymentStore>, InMemoryBus) {
        let store = Arc::new(InMemoryPaymentStore::new());
        let bus = InMemoryBus::default();
        let ledger = HttpLedgerClient::new(LedgerClientConfig {
            base_url: "http://127.0.0.1:9/api/v1".to_string(),
            timeout: Duration::from_millis(200),
        })
        .unwrap();
        let payments = PaymentService::new(store.clone(), Arc::new(ledger), Arc::new(bus.clone()));
        (OrderCreatedHandler::new(payments), store, bus)
    }

    #[tokio::test]
    async fn unknown_type_is_ignored() {
        let (handler, store, bus) = handler();
        let body = br#"{"type":"Bogus","orderID":1,"userID":7,"email":"buyer@example.com","amount":100}"#;

        handler.handle(body).await.unwrap();
        assert!(store.all().is_empty());
        assert!(bus.published().is_empty());
    }

    #[tokio::test]
    async fn missing_order_id_is_rejected() {
        let (handler, store, _) = handler();
        let body = br#"{"type":"OrderCreated","userID":7,"email":"buyer@example.com","amount":100}"#;

        assert!(matches!(handler.handle(body).await, Err(HandleError::Rejected(_))));
        assert!(store.all().is_empty());
    }

    #[tokio::test]
    async fn payment_event_is_rejected() {
        let (handler, store, _) = handler();
        let body = br#"{"type":"PaymentCompleted","orderID":1,"userID":7,"email":"buyer@example.com","amount":100}"#;

        assert!(matches!(handler.handle(body).await, Err(HandleError::Rejected(_))));
        assert!(store.all().is_empty());
    }

    #[tokio::test]
    async fn unreachable_ledger_fails_the_payment() {
        let (handler, store, bus) = handler();
        let body = br#"{"type":"OrderCreated","orderID":1,"userID":7,"email":"buyer@example.com","amount":100}"#;

        handler.handle(body).await.unwrap();
        assert_eq!(store.all()[0].status, "failed");
        assert_eq!(bus.published_to("payment.failed").len(), 1);
    }
}
