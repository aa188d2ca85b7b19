use std::sync::Arc;
use std::time::Duration;

use shared::{BusError, Event, MessageBus, OrderDetails, StoreError};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::ledger_client::Ledger;
use crate::models::{Intent, NewPayment, Payment, PaymentStatus};
use crate::store::PaymentStore;

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("payment {0} not found")]
    NotFound(i64),

    /// A previous attempt recorded the intent but never learned the ledger's answer.
    #[error("payment for order {0} is still pending, ledger outcome unknown")]
    InDoubt(i64),

    #[error("user {user_id} was debited for order {order_id} but the payment was not recorded: {source}")]
    Unrecorded {
        order_id: i64,
        user_id: i64,
        source: StoreError,
    },

    /// The refusal was announced but the payment row is still `pending`.
    #[error("payment for order {order_id} failed but its status was not recorded: {source}")]
    FailureUnrecorded { order_id: i64, source: StoreError },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Bus(#[from] BusError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum PaymentOutcome {
    Completed(Payment),
    /// The ledger refused or could not be reached.
    Failed(Payment),
    /// The order was already paid for or refused; its outcome was published again.
    Replayed(Payment),
}

/// Attempts at writing a payment's final status once the ledger has answered.
const STATUS_ATTEMPTS: u32 = 3;
const STATUS_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Clone)]
pub struct PaymentService {
    store: Arc<dyn PaymentStore>,
    ledger: Arc<dyn Ledger>,
    bus: Arc<dyn MessageBus>,
}

impl PaymentService {
    pub fn new(store: Arc<dyn PaymentStore>, ledger: Arc<dyn Ledger>, bus: Arc<dyn MessageBus>) -> Self {
        Self { store, ledger, bus }
    }

    /// Charges the customer for a newly created order and announces the
    /// outcome. Never debits the same order twice.
    pub async fn process_order(&self, details: &OrderDetails) -> Result<PaymentOutcome, PaymentError> {
        let intent = self
            .store
            .create_pending(NewPayment {
                order_id: details.order_id,
                user_id: details.user_id,
                amount: details.amount.clone(),
            })
            .await?;

        let payment = match intent {
            Intent::Created(payment) => payment,
            Intent::Existing(payment) => return self.replay(details, payment).await,
        };

        match self.ledger.withdraw(details.user_id, &details.amount).await {
            Ok(balance) => {
                let payment = self
                    .record_status(payment.id, PaymentStatus::Completed, None)
                    .await
                    .map_err(|source| {
                        error!(
                            order_id = details.order_id,
                            user_id = details.user_id,
                            amount = %details.amount,
                            "Consistency error, funds withdrawn but payment not recorded: {}",
                            source
                        );
                        PaymentError::Unrecorded {
                            order_id: details.order_id,
                            user_id: details.user_id,
                            source,
                        }
                    })?;

                info!(order_id = details.order_id, user_id = details.user_id, %balance, "payment completed");
                let event = Event::PaymentCompleted(details.clone());
                self.bus.publish(event.routing_key(), &event).await?;
                Ok(PaymentOutcome::Completed(payment))
            }
            Err(e) => {
                let reason = e.reason();
                warn!(order_id = details.order_id, user_id = details.user_id, reason, "Withdrawal failed: {}", e);

                // No money moved, so the refusal is announced even when the
                // status write keeps failing.
                let recorded = self
                    .record_status(payment.id, PaymentStatus::Failed, Some(reason))
                    .await;
                let event = Event::PaymentFailed {
                    details: details.clone(),
                    error: Some(reason.to_string()),
                };
                self.bus.publish(event.routing_key(), &event).await?;

                match recorded {
                    Ok(payment) => Ok(PaymentOutcome::Failed(payment)),
                    Err(source) => {
                        error!(
                            order_id = details.order_id,
                            payment_id = payment.id,
                            "Payment failure published but not recorded: {}",
                            source
                        );
                        Err(PaymentError::FailureUnrecorded {
                            order_id: details.order_id,
                            source,
                        })
                    }
                }
            }
        }
    }

    async fn record_status(
        &self,
        id: i64,
        status: PaymentStatus,
        reason: Option<&str>,
    ) -> Result<Payment, StoreError> {
        let mut attempt = 1;
        loop {
            match self.store.set_status(id, status, reason).await {
                Ok(Some(payment)) => return Ok(payment),
                Ok(None) => return Err(StoreError::Database(diesel::result::Error::NotFound)),
                Err(e) if attempt < STATUS_ATTEMPTS => {
                    warn!(payment_id = id, attempt, "Error recording payment status, retrying: {}", e);
                    tokio::time::sleep(STATUS_BACKOFF * attempt).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn replay(&self, details: &OrderDetails, payment: Payment) -> Result<PaymentOutcome, PaymentError> {
        let event = match payment.status() {
            Some(PaymentStatus::Completed) => Event::PaymentCompleted(details.clone()),
            Some(PaymentStatus::Failed) => Event::PaymentFailed {
                details: details.clone(),
                error: payment.error.clone(),
            },
            _ => {
                error!(
                    order_id = details.order_id,
                    user_id = details.user_id,
                    payment_id = payment.id,
                    "Consistency error, payment pending with unknown ledger outcome"
                );
                return Err(PaymentError::InDoubt(details.order_id));
            }
        };

        info!(order_id = details.order_id, status = %payment.status, "order already processed, republishing outcome");
        self.bus.publish(event.routing_key(), &event).await?;
        Ok(PaymentOutcome::Replayed(payment))
    }

    pub async fn get_payment(&self, id: i64) -> Result<Payment, PaymentError> {
        self.store
            .get_payment(id)
            .await?
            .ok_or(PaymentError::NotFound(id))
    }

    pub async fn list_payments_by_user(&self, user_id: i64) -> Result<Vec<Payment>, PaymentError> {
        Ok(self.store.list_payments_by_user(user_id).await?)
    }
}
