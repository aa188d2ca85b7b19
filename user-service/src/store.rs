use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::Utc;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use shared::{DbPool, StoreError};

use crate::models::{Account, Withdrawal};
use crate::schema::balances;

#[async_trait]
pub trait BalanceStore: Send + Sync {
    async fn get(&self, user_id: i64) -> Result<Option<Account>, StoreError>;

    /// Creates the account. Returns `None` when it already exists.
    async fn open(&self, user_id: i64, initial: &BigDecimal) -> Result<Option<Account>, StoreError>;

    /// Adds `amount`, creating the account on first deposit.
    async fn deposit(&self, user_id: i64, amount: &BigDecimal) -> Result<Account, StoreError>;

    /// Debits `amount` only if the balance covers it, as one atomic step.
    async fn withdraw(&self, user_id: i64, amount: &BigDecimal) -> Result<Withdrawal, StoreError>;
}

pub struct PgBalanceStore {
    pool: DbPool,
}

impl PgBalanceStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BalanceStore for PgBalanceStore {
    async fn get(&self, user_id: i64) -> Result<Option<Account>, StoreError> {
        let mut conn = self.pool.get().await?;
        let account = balances::table
            .find(user_id)
            .first::<Account>(&mut conn)
            .await
            .optional()?;
        Ok(account)
    }

    async fn open(&self, user_id: i64, initial: &BigDecimal) -> Result<Option<Account>, StoreError> {
        let mut conn = self.pool.get().await?;
        let account = diesel::insert_into(balances::table)
            .values((
                balances::user_id.eq(user_id),
                balances::balance.eq(initial.clone()),
            ))
            .on_conflict_do_nothing()
            .get_result::<Account>(&mut conn)
            .await
            .optional()?;
        Ok(account)
    }

    async fn deposit(&self, user_id: i64, amount: &BigDecimal) -> Result<Account, StoreError> {
        let mut conn = self.pool.get().await?;
        let account = diesel::insert_into(balances::table)
            .values((
                balances::user_id.eq(user_id),
                balances::balance.eq(amount.clone()),
            ))
            .on_conflict(balances::user_id)
            .do_update()
            .set((
                balances::balance.eq(balances::balance + amount.clone()),
                balances::updated_at.eq(Utc::now()),
            ))
            .get_result::<Account>(&mut conn)
            .await?;
        Ok(account)
    }

    async fn withdraw(&self, user_id: i64, amount: &BigDecimal) -> Result<Withdrawal, StoreError> {
        let mut conn = self.pool.get().await?;

        let debited = diesel::update(
            balances::table
                .filter(balances::user_id.eq(user_id))
                .filter(balances::balance.ge(amount.clone())),
        )
        .set((
            balances::balance.eq(balances::balance - amount.clone()),
            balances::updated_at.eq(Utc::now()),
        ))
        .get_result::<Account>(&mut conn)
        .await
        .optional()?;

        if let Some(account) = debited {
            return Ok(Withdrawal::Withdrawn(account));
        }

        // Nothing matched: tell a missing account apart from a short balance.
        let current = balances::table
            .find(user_id)
            .first::<Account>(&mut conn)
            .await
            .optional()?;
        Ok(match current {
            Some(account) => Withdrawal::Insufficient {
                balance: account.balance,
            },
            None => Withdrawal::NoAccount,
        })
    }
}

#[derive(Default)]
pub struct InMemoryBalanceStore {
    accounts: Mutex<HashMap<i64, Account>>,
}

impl InMemoryBalanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn accounts(&self) -> MutexGuard<'_, HashMap<i64, Account>> {
        self.accounts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl BalanceStore for InMemoryBalanceStore {
    async fn get(&self, user_id: i64) -> Result<Option<Account>, StoreError> {
        Ok(self.accounts().get(&user_id).cloned())
    }

    async fn open(&self, user_id: i64, initial: &BigDecimal) -> Result<Option<Account>, StoreError> {
        let mut accounts = self.accounts();
        if accounts.contains_key(&user_id) {
            return Ok(None);
        }
        let account = Account::new(user_id, initial.clone());
        accounts.insert(user_id, account.clone());
        Ok(Some(account))
    }

    async fn deposit(&self, user_id: i64, amount: &BigDecimal) -> Result<Account, StoreError> {
        let mut accounts = self.accounts();
        let account = accounts
            .entry(user_id)
            .or_insert_with(|| Account::new(user_id, BigDecimal::from(0)));
        account.balance = &account.balance + amount;
        account.updated_at = Utc::now();
        Ok(account.clone())
    }

    async fn withdraw(&self, user_id: i64, amount: &BigDecimal) -> Result<Withdrawal, StoreError> {
        let mut accounts = self.accounts();
        let Some(account) = accounts.get_mut(&user_id) else {
            return Ok(Withdrawal::NoAccount);
        };
        if account.balance < *amount {
            return Ok(Withdrawal::Insufficient {
                balance: account.balance.clone(),
            });
        }
        account.balance = &account.balance - amount;
        account.updated_at = Utc::now();
        Ok(Withdrawal::Withdrawn(account.clone()))
    }
}
