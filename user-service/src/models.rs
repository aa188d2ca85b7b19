use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Queryable, Serialize)]
#[diesel(table_name = crate::schema::balances)]
pub struct Account {
    pub user_id: i64,
    #[serde(with = "shared::money::as_number")]
    pub balance: BigDecimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn new(user_id: i64, balance: BigDecimal) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            balance,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Result of a conditional debit.
#[derive(Debug, Clone, PartialEq)]
pub enum Withdrawal {
    Withdrawn(Account),
    Insufficient { balance: BigDecimal },
    NoAccount,
}
