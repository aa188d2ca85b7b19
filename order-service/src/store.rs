use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use diesel_async::{AsyncConnection, RunQueryDsl};
use shared::{DbPool, EnvelopeError, Event, OrderDetails, StoreError};

use crate::models::*;
use crate::schema::*;

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Persists the order together with its `OrderCreated` outbox row in
    /// one transaction.
    async fn create_order(&self, order: NewOrder) -> Result<Order, StoreError>;

    async fn get_order(&self, id: i64) -> Result<Option<Order>, StoreError>;

    async fn list_orders_by_user(&self, user_id: i64) -> Result<Vec<Order>, StoreError>;

    /// Returns `None` when the order does not exist.
    async fn update_status(&self, id: i64, status: OrderStatus) -> Result<Option<Order>, StoreError>;
}

#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Oldest pending rows first.
    async fn pending_events(&self, limit: i64) -> Result<Vec<OutboxEvent>, StoreError>;

    async fn mark_processed(&self, id: i64) -> Result<(), StoreError>;

    async fn mark_retry(
        &self,
        id: i64,
        retry_count: i32,
        error: &str,
        status: OutboxStatus,
    ) -> Result<(), StoreError>;
}

fn order_created_row(order: &Order) -> Result<NewOutboxEvent, EnvelopeError> {
    let event = Event::OrderCreated(OrderDetails {
        order_id: order.id,
        user_id: order.user_id,
        email: order.email.clone(),
        amount: order.amount.clone(),
    });
    Ok(NewOutboxEvent {
        aggregate_id: order.id,
        event_type: event.event_type().to_string(),
        routing_key: event.routing_key().to_string(),
        payload: event.encode()?,
    })
}

pub struct PgOrderStore {
    pool: DbPool,
}

impl PgOrderStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn create_order(&self, order: NewOrder) -> Result<Order, StoreError> {
        let mut conn = self.pool.get().await?;

        let order = conn
            .transaction::<_, StoreError, _>(|conn| {
                Box::pin(async move {
                    let order = diesel::insert_into(orders::table)
                        .values(&order)
                        .get_result::<Order>(conn)
                        .await?;

                    let outbox_event = order_created_row(&order)?;
                    diesel::insert_into(outbox_events::table)
                        .values(&outbox_event)
                        .execute(conn)
                        .await?;

                    Ok(order)
                })
            })
            .await?;

        Ok(order)
    }

    async fn get_order(&self, id: i64) -> Result<Option<Order>, StoreError> {
        let mut conn = self.pool.get().await?;
        let order = orders::table
            .find(id)
            .first::<Order>(&mut conn)
            .await
            .optional()?;
        Ok(order)
    }

    async fn list_orders_by_user(&self, user_id: i64) -> Result<Vec<Order>, StoreError> {
        let mut conn = self.pool.get().await?;
        let orders = orders::table
            .filter(orders::user_id.eq(user_id))
            .order(orders::id.asc())
            .load::<Order>(&mut conn)
            .await?;
        Ok(orders)
    }

    async fn update_status(&self, id: i64, status: OrderStatus) -> Result<Option<Order>, StoreError> {
        let mut conn = self.pool.get().await?;
        let order = diesel::update(orders::table.find(id))
            .set((
                orders::status.eq(status.as_str()),
                orders::updated_at.eq(Utc::now()),
            ))
            .get_result::<Order>(&mut conn)
            .await
            .optional()?;
        Ok(order)
    }
}

#[async_trait]
impl OutboxStore for PgOrderStore {
    async fn pending_events(&self, limit: i64) -> Result<Vec<OutboxEvent>, StoreError> {
        let mut conn = self.pool.get().await?;
        let events = outbox_events::table
            .filter(outbox_events::status.eq(OutboxStatus::Pending.as_str()))
            .order((outbox_events::created_at.asc(), outbox_events::id.asc()))
            .limit(limit)
            .load::<OutboxEvent>(&mut conn)
            .await?;
        Ok(events)
    }

    async fn mark_processed(&self, id: i64) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await?;
        diesel::update(outbox_events::table.find(id))
            .set((
                outbox_events::status.eq(OutboxStatus::Processed.as_str()),
                outbox_events::processed_at.eq(Some(Utc::now())),
            ))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn mark_retry(
        &self,
        id: i64,
        retry_count: i32,
        error: &str,
        status: OutboxStatus,
    ) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await?;
        diesel::update(outbox_events::table.find(id))
            .set((
                outbox_events::status.eq(status.as_str()),
                outbox_events::retry_count.eq(retry_count),
                outbox_events::error_message.eq(Some(error)),
            ))
            .execute(&mut conn)
            .await?;
        Ok(())
    }
}

#[derive(Default)]
struct MemoryState {
    orders: BTreeMap<i64, Order>,
    outbox: BTreeMap<i64, OutboxEvent>,
    last_order_id: i64,
    last_outbox_id: i64,
}

/// Order and outbox tables kept in process; both are updated under one lock.
#[derive(Default)]
pub struct InMemoryOrderStore {
    state: Mutex<MemoryState>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn outbox_events(&self) -> Vec<OutboxEvent> {
        self.state().outbox.values().cloned().collect()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn create_order(&self, order: NewOrder) -> Result<Order, StoreError> {
        let mut state = self.state();
        let now = Utc::now();
        let order = Order {
            id: state.last_order_id + 1,
            user_id: order.user_id,
            email: order.email,
            amount: order.amount,
            status: OrderStatus::Created.as_str().to_string(),
            created_at: now,
            updated_at: now,
        };
        let row = order_created_row(&order)?;

        state.last_order_id = order.id;
        state.last_outbox_id += 1;
        let outbox_id = state.last_outbox_id;
        state.outbox.insert(
            outbox_id,
            OutboxEvent {
                id: outbox_id,
                aggregate_id: row.aggregate_id,
                event_type: row.event_type,
                routing_key: row.routing_key,
                payload: row.payload,
                status: OutboxStatus::Pending.as_str().to_string(),
                retry_count: 0,
                error_message: None,
                created_at: now,
                processed_at: None,
            },
        );
        state.orders.insert(order.id, order.clone());
        Ok(order)
    }

    async fn get_order(&self, id: i64) -> Result<Option<Order>, StoreError> {
        Ok(self.state().orders.get(&id).cloned())
    }

    async fn list_orders_by_user(&self, user_id: i64) -> Result<Vec<Order>, StoreError> {
        Ok(self
            .state()
            .orders
            .values()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn update_status(&self, id: i64, status: OrderStatus) -> Result<Option<Order>, StoreError> {
        let mut state = self.state();
        Ok(state.orders.get_mut(&id).map(|order| {
            order.status = status.as_str().to_string();
            order.updated_at = Utc::now();
            order.clone()
        }))
    }
}

#[async_trait]
impl OutboxStore for InMemoryOrderStore {
    async fn pending_events(&self, limit: i64) -> Result<Vec<OutboxEvent>, StoreError> {
        let limit = usize::try_from(limit).unwrap_or(0);
        Ok(self
            .state()
            .outbox
            .values()
            .filter(|e| e.status == OutboxStatus::Pending.as_str())
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_processed(&self, id: i64) -> Result<(), StoreError> {
        if let Some(event) = self.state().outbox.get_mut(&id) {
            event.status = OutboxStatus::Processed.as_str().to_string();
            event.processed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn mark_retry(
        &self,
        id: i64,
        retry_count: i32,
        error: &str,
        status: OutboxStatus,
    ) -> Result<(), StoreError> {
        if let Some(event) = self.state().outbox.get_mut(&id) {
            event.status = status.as_str().to_string();
            event.retry_count = retry_count;
            event.error_message = Some(error.to_string());
        }
        Ok(())
    }
}
