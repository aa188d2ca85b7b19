use async_trait::async_trait;
use shared::{Event, HandleError, MessageHandler};
use tracing::{error, warn};

use crate::service::{OrderError, OrderService};

/// Consumes `payment.*` and records the outcome on the order.
pub struct PaymentOutcomeHandler {
    orders: OrderService,
}

impl PaymentOutcomeHandler {
    pub fn new(orders: OrderService) -> Self {
        Self { orders }
    }
}

#[async_trait]
impl MessageHandler for PaymentOutcomeHandler {
    async fn handle(&self, body: &[u8]) -> Result<(), HandleError> {
        let event = match Event::decode(body) {
            Ok(event) => event,
            Err(e) if e.is_unknown_type() => {
                warn!("Ignoring event: {}", e);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        match self.orders.apply_payment_outcome(&event).await {
            Ok(_) => Ok(()),
            Err(OrderError::Store(e)) => {
                error!(order_id = event.order_id(), "Error updating order status: {}", e);
                Err(HandleError::Transient(e.into()))
            }
            Err(e) => Err(HandleError::Rejected(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OrderStatus;
    use crate::service::CreateOrder;
    use crate::store::InMemoryOrderStore;
    use bigdecimal::BigDecimal;
    use std::sync::Arc;
    use tokio::sync::Notify;

    async fn setup() -> (PaymentOutcomeHandler, OrderService, i64) {
        let orders = OrderService::new(Arc::new(InMemoryOrderStore::new()), Arc::new(Notify::new()));
        let order = orders
            .create_order(CreateOrder {
                user_id: 7,
                email: "buyer@example.com".to_string(),
                amount: BigDecimal::from(100),
            })
            .await
            .unwrap();
        (PaymentOutcomeHandler::new(orders.clone()), orders, order.id)
    }

    #[tokio::test]
    async fn applies_completed_payment() {
        let (handler, orders, id) = setup().await;
        let body = format!(
            r#"{{"type":"PaymentCompleted","orderID":{id},"userID":7,"email":"buyer@example.com","amount":100}}"#
        );

        handler.handle(body.as_bytes()).await.unwrap();
        assert_eq!(orders.get_order(id).await.unwrap().status(), Some(OrderStatus::Completed));
    }

    #[tokio::test]
    async fn unknown_type_is_ignored_without_mutation() {
        let (handler, orders, id) = setup().await;
        let body = format!(
            r#"{{"type":"Bogus","orderID":{id},"userID":7,"email":"buyer@example.com","amount":100}}"#
        );

        handler.handle(body.as_bytes()).await.unwrap();
        assert_eq!(orders.get_order(id).await.unwrap().status(), Some(OrderStatus::Created));
    }

    #[tokio::test]
    async fn malformed_envelope_is_rejected() {
        let (handler, orders, id) = setup().await;
        let body = br#"{"type":"PaymentCompleted","userID":7,"email":"buyer@example.com","amount":100}"#;

        assert!(matches!(handler.handle(body).await, Err(HandleError::Rejected(_))));
        assert_eq!(orders.get_order(id).await.unwrap().status(), Some(OrderStatus::Created));
    }

    #[tokio::test]
    async fn order_created_on_payment_queue_is_rejected() {
        let (handler, _, id) = setup().await;
        let body = format!(
            r#"{{"type":"OrderCreated","orderID":{id},"userID":7,"email":"buyer@example.com","amount":100}}"#
        );
        assert!(matches!(handler.handle(body.as_bytes()).await, Err(HandleError::Rejected(_))));
    }

    #[tokio::test]
    async fn missing_order_is_rejected_not_retried() {
        let (handler, _, _) = setup().await;
        let body = br#"{"type":"PaymentFailed","orderID":999,"userID":7,"email":"buyer@example.com","amount":100}"#;
        assert!(matches!(handler.handle(body).await, Err(HandleError::Rejected(_))));
    }
}
