use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use shared::{DbPool, StoreError};

use crate::models::*;
use crate::schema::payments;

#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Records a `pending` payment unless one already exists for the order.
    async fn create_pending(&self, payment: NewPayment) -> Result<Intent, StoreError>;

    /// Returns `None` when the payment does not exist.
    async fn set_status(
        &self,
        id: i64,
        status: PaymentStatus,
        error: Option<&str>,
    ) -> Result<Option<Payment>, StoreError>;

    async fn get_payment(&self, id: i64) -> Result<Option<Payment>, StoreError>;

    async fn list_payments_by_user(&self, user_id: i64) -> Result<Vec<Payment>, StoreError>;
}

pub struct PgPaymentStore {
    pool: DbPool,
}

impl PgPaymentStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PaymentStore for PgPaymentStore {
    async fn create_pending(&self, payment: NewPayment) -> Result<Intent, StoreError> {
        let mut conn = self.pool.get().await?;

        let inserted = diesel::insert_into(payments::table)
            .values(&payment)
            .on_conflict(payments::order_id)
            .do_nothing()
            .get_result::<Payment>(&mut conn)
            .await
            .optional()?;
        if let Some(created) = inserted {
            return Ok(Intent::Created(created));
        }

        let existing = payments::table
            .filter(payments::order_id.eq(payment.order_id))
            .first::<Payment>(&mut conn)
            .await?;
        Ok(Intent::Existing(existing))
    }

    async fn set_status(
        &self,
        id: i64,
        status: PaymentStatus,
        error: Option<&str>,
    ) -> Result<Option<Payment>, StoreError> {
        let mut conn = self.pool.get().await?;
        let payment = diesel::update(payments::table.find(id))
            .set((
                payments::status.eq(status.as_str()),
                payments::error.eq(error),
                payments::updated_at.eq(Utc::now()),
            ))
            .get_result::<Payment>(&mut conn)
            .await
            .optional()?;
        Ok(payment)
    }

    async fn get_payment(&self, id: i64) -> Result<Option<Payment>, StoreError> {
        let mut conn = self.pool.get().await?;
        let payment = payments::table
            .find(id)
            .first::<Payment>(&mut conn)
            .await
            .optional()?;
        Ok(payment)
    }

    async fn list_payments_by_user(&self, user_id: i64) -> Result<Vec<Payment>, StoreError> {
        let mut conn = self.pool.get().await?;
        let payments = payments::table
            .filter(payments::user_id.eq(user_id))
            .order(payments::id.asc())
            .load::<Payment>(&mut conn)
            .await?;
        Ok(payments)
    }
}

#[derive(Default)]
pub struct InMemoryPaymentStore {
    payments: Mutex<BTreeMap<i64, Payment>>,
}

impl InMemoryPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn payments(&self) -> MutexGuard<'_, BTreeMap<i64, Payment>> {
        self.payments
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn all(&self) -> Vec<Payment> {
        self.payments().values().cloned().collect()
    }
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn create_pending(&self, payment: NewPayment) -> Result<Intent, StoreError> {
        let mut payments = self.payments();
        if let Some(existing) = payments.values().find(|p| p.order_id == payment.order_id) {
            return Ok(Intent::Existing(existing.clone()));
        }

        let now = Utc::now();
        let id = payments.keys().next_back().map_or(1, |last| last + 1);
        let created = Payment {
            id,
            order_id: payment.order_id,
            user_id: payment.user_id,
            amount: payment.amount,
            status: PaymentStatus::Pending.as_str().to_string(),
            error: None,
            created_at: now,
            updated_at: now,
        };
        payments.insert(id, created.clone());
        Ok(Intent::Created(created))
    }

    async fn set_status(
        &self,
        id: i64,
        status: PaymentStatus,
        error: Option<&str>,
    ) -> Result<Option<Payment>, StoreError> {
        Ok(self.payments().get_mut(&id).map(|payment| {
            payment.status = status.as_str().to_string();
            payment.error = error.map(str::to_string);
            payment.updated_at = Utc::now();
            payment.clone()
        }))
    }

    async fn get_payment(&self, id: i64) -> Result<Option<Payment>, StoreError> {
        Ok(self.payments().get(&id).cloned())
    }

    async fn list_payments_by_user(&self, user_id: i64) -> Result<Vec<Payment>, StoreError> {
        Ok(self
            .payments()
            .values()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect())
    }
}
