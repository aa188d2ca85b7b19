use std::sync::Arc;

use bigdecimal::BigDecimal;
use num_traits::Zero;
use shared::{money, Event, EventType, StoreError};
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{info, warn};

use crate::models::{NewOrder, Order, OrderStatus};
use crate::store::OrderStore;

#[derive(Debug, Error)]
pub enum OrderError {
    #[error("amount must be positive")]
    NonPositiveAmount,

    #[error("amount must be in whole cents")]
    SubCentAmount,

    #[error("email must not be empty")]
    MissingEmail,

    #[error("order {0} not found")]
    NotFound(i64),

    #[error("order {order_id} is already {current}, refusing to mark it {requested}")]
    Conflict {
        order_id: i64,
        current: String,
        requested: OrderStatus,
    },

    #[error("{0} is not a payment outcome")]
    NotAnOutcome(EventType),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What applying a payment outcome did to the order.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusChange {
    Updated(Order),
    /// Redelivery of the outcome the order already has.
    Unchanged(Order),
}

#[derive(Debug, Clone)]
pub struct CreateOrder {
    pub user_id: i64,
    pub email: String,
    pub amount: BigDecimal,
}

#[derive(Clone)]
pub struct OrderService {
    store: Arc<dyn OrderStore>,
    outbox_wakeup: Arc<Notify>,
}

impl OrderService {
    /// `outbox_wakeup` is signalled after each committed order so the
    /// dispatcher publishes without waiting for its next poll.
    pub fn new(store: Arc<dyn OrderStore>, outbox_wakeup: Arc<Notify>) -> Self {
        Self {
            store,
            outbox_wakeup,
        }
    }

    pub async fn create_order(&self, request: CreateOrder) -> Result<Order, OrderError> {
        if request.amount <= BigDecimal::zero() {
            return Err(OrderError::NonPositiveAmount);
        }
        if !money::is_whole_cents(&request.amount) {
            return Err(OrderError::SubCentAmount);
        }
        if request.email.trim().is_empty() {
            return Err(OrderError::MissingEmail);
        }

        let order = self
            .store
            .create_order(NewOrder {
                user_id: request.user_id,
                email: request.email,
                amount: request.amount,
            })
            .await?;
        self.outbox_wakeup.notify_one();

        info!(order_id = order.id, user_id = order.user_id, amount = %order.amount, "order created");
        Ok(order)
    }

    pub async fn get_order(&self, id: i64) -> Result<Order, OrderError> {
        self.store
            .get_order(id)
            .await?
            .ok_or(OrderError::NotFound(id))
    }

    pub async fn list_orders_by_user(&self, user_id: i64) -> Result<Vec<Order>, OrderError> {
        Ok(self.store.list_orders_by_user(user_id).await?)
    }

    /// Moves the order to the terminal status carried by a payment event.
    pub async fn apply_payment_outcome(&self, event: &Event) -> Result<StatusChange, OrderError> {
        let requested = match event {
            Event::PaymentCompleted(_) => OrderStatus::Completed,
            Event::PaymentFailed { .. } => OrderStatus::Failed,
            Event::OrderCreated(_) => return Err(OrderError::NotAnOutcome(event.event_type())),
        };
        let order_id = event.order_id();

        let order = self.get_order(order_id).await?;
        match order.status() {
            Some(current) if current == requested => {
                info!(order_id, status = %current, "payment outcome already applied");
                return Ok(StatusChange::Unchanged(order));
            }
            Some(OrderStatus::Created) => {}
            _ => {
                warn!(order_id, current = %order.status, %requested, "conflicting payment outcome");
                return Err(OrderError::Conflict {
                    order_id,
                    current: order.status,
                    requested,
                });
            }
        }

        let order = self
            .store
            .update_status(order_id, requested)
            .await?
            .ok_or(OrderError::NotFound(order_id))?;
        info!(order_id, status = %requested, "order status updated");
        Ok(StatusChange::Updated(order))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryOrderStore, OutboxStore};
    use shared::OrderDetails;
    use std::str::FromStr;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn setup() -> (OrderService, Arc<InMemoryOrderStore>, Arc<Notify>) {
        let store = Arc::new(InMemoryOrderStore::new());
        let notify = Arc::new(Notify::new());
        (OrderService::new(store.clone(), notify.clone()), store, notify)
    }

    fn request(amount: &str) -> CreateOrder {
        CreateOrder {
            user_id: 7,
            email: "buyer@example.com".to_string(),
            amount: dec(amount),
        }
    }

    fn details(order_id: i64) -> OrderDetails {
        OrderDetails {
            order_id,
            user_id: 7,
            email: "buyer@example.com".to_string(),
            amount: dec("100"),
        }
    }

    #[tokio::test]
    async fn create_order_writes_outbox_row_and_wakes_dispatcher() {
        let (service, store, notify) = setup();

        let order = service.create_order(request("100")).await.unwrap();
        assert_eq!(order.status(), Some(OrderStatus::Created));

        let pending = store.pending_events(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].aggregate_id, order.id);
        assert_eq!(pending[0].routing_key, "order.created");
        assert_eq!(
            Event::decode(&pending[0].payload).unwrap(),
            Event::OrderCreated(OrderDetails {
                order_id: order.id,
                user_id: 7,
                email: "buyer@example.com".to_string(),
                amount: dec("100"),
            })
        );

        // The permit stored by notify_one is consumed immediately.
        tokio::time::timeout(std::time::Duration::from_millis(50), notify.notified())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn rejects_invalid_orders() {
        let (service, store, _) = setup();

        assert!(matches!(
            service.create_order(request("0")).await,
            Err(OrderError::NonPositiveAmount)
        ));
        assert!(matches!(
            service.create_order(request("0.001")).await,
            Err(OrderError::SubCentAmount)
        ));
        let mut blank = request("10");
        blank.email = "  ".to_string();
        assert!(matches!(service.create_order(blank).await, Err(OrderError::MissingEmail)));
        assert!(store.outbox_events().is_empty());
    }

    #[tokio::test]
    async fn payment_outcomes_move_order_to_terminal_status() {
        let (service, _, _) = setup();
        let paid = service.create_order(request("100")).await.unwrap();
        let unpaid = service.create_order(request("100")).await.unwrap();

        service
            .apply_payment_outcome(&Event::PaymentCompleted(details(paid.id)))
            .await
            .unwrap();
        service
            .apply_payment_outcome(&Event::PaymentFailed {
                details: details(unpaid.id),
                error: Some("insufficient funds".to_string()),
            })
            .await
            .unwrap();

        assert_eq!(service.get_order(paid.id).await.unwrap().status(), Some(OrderStatus::Completed));
        assert_eq!(service.get_order(unpaid.id).await.unwrap().status(), Some(OrderStatus::Failed));
    }

    #[tokio::test]
    async fn redelivered_outcome_is_a_no_op() {
        let (service, _, _) = setup();
        let order = service.create_order(request("100")).await.unwrap();
        let event = Event::PaymentCompleted(details(order.id));

        assert!(matches!(
            service.apply_payment_outcome(&event).await.unwrap(),
            StatusChange::Updated(_)
        ));
        assert!(matches!(
            service.apply_payment_outcome(&event).await.unwrap(),
            StatusChange::Unchanged(_)
        ));
    }

    #[tokio::test]
    async fn conflicting_outcome_does_not_change_terminal_order() {
        let (service, _, _) = setup();
        let order = service.create_order(request("100")).await.unwrap();
        service
            .apply_payment_outcome(&Event::PaymentCompleted(details(order.id)))
            .await
            .unwrap();

        let err = service
            .apply_payment_outcome(&Event::PaymentFailed {
                details: details(order.id),
                error: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, OrderError::Conflict { .. }));
        assert_eq!(service.get_order(order.id).await.unwrap().status(), Some(OrderStatus::Completed));
    }

    #[tokio::test]
    async fn outcome_for_unknown_order_is_not_found() {
        let (service, _, _) = setup();
        assert!(matches!(
            service.apply_payment_outcome(&Event::PaymentCompleted(details(99))).await,
            Err(OrderError::NotFound(99))
        ));
    }

    #[tokio::test]
    async fn lists_orders_per_user() {
        let (service, _, _) = setup();
        service.create_order(request("10")).await.unwrap();
        service.create_order(request("20")).await.unwrap();
        let mut other = request("30");
        other.user_id = 8;
        service.create_order(other).await.unwrap();

        let orders = service.list_orders_by_user(7).await.unwrap();
        assert_eq!(orders.len(), 2);
        assert!(orders.iter().all(|o| o.user_id == 7));
    }
}
