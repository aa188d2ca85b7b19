use std::sync::Arc;

use bigdecimal::BigDecimal;
use num_traits::Zero;
use shared::{money, StoreError};
use thiserror::Error;
use tracing::{info, warn};

use crate::models::{Account, Withdrawal};
use crate::store::BalanceStore;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("amount must be positive")]
    NonPositiveAmount,

    #[error("amount must be in whole cents")]
    SubCentAmount,

    #[error("initial balance must not be negative")]
    NegativeInitialBalance,

    #[error("user {0} not found")]
    NotFound(i64),

    #[error("insufficient funds: balance {balance}, requested {requested}")]
    InsufficientFunds {
        balance: BigDecimal,
        requested: BigDecimal,
    },

    #[error("account for user {0} already exists")]
    AlreadyExists(i64),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Per-user balances. A balance never goes negative.
#[derive(Clone)]
pub struct Ledger {
    store: Arc<dyn BalanceStore>,
}

impl Ledger {
    pub fn new(store: Arc<dyn BalanceStore>) -> Self {
        Self { store }
    }

    pub async fn get_balance(&self, user_id: i64) -> Result<BigDecimal, LedgerError> {
        self.store
            .get(user_id)
            .await?
            .map(|account| account.balance)
            .ok_or(LedgerError::NotFound(user_id))
    }

    pub async fn add_balance(&self, user_id: i64, amount: &BigDecimal) -> Result<BigDecimal, LedgerError> {
        ensure_positive(amount)?;
        let account = self.store.deposit(user_id, amount).await?;
        info!(user_id, %amount, balance = %account.balance, "balance topped up");
        Ok(account.balance)
    }

    pub async fn withdraw(&self, user_id: i64, amount: &BigDecimal) -> Result<BigDecimal, LedgerError> {
        ensure_positive(amount)?;
        match self.store.withdraw(user_id, amount).await? {
            Withdrawal::Withdrawn(account) => {
                info!(user_id, %amount, balance = %account.balance, "funds withdrawn");
                Ok(account.balance)
            }
            Withdrawal::Insufficient { balance } => {
                warn!(user_id, %amount, %balance, "insufficient funds");
                Err(LedgerError::InsufficientFunds {
                    balance,
                    requested: amount.clone(),
                })
            }
            Withdrawal::NoAccount => Err(LedgerError::NotFound(user_id)),
        }
    }

    /// Opens an account, typically right after the user registers.
    pub async fn open_account(&self, user_id: i64, initial: &BigDecimal) -> Result<Account, LedgerError> {
        if *initial < BigDecimal::zero() {
            return Err(LedgerError::NegativeInitialBalance);
        }
        if !money::is_whole_cents(initial) {
            return Err(LedgerError::SubCentAmount);
        }
        let account = self
            .store
            .open(user_id, initial)
            .await?
            .ok_or(LedgerError::AlreadyExists(user_id))?;
        info!(user_id, balance = %account.balance, "account opened");
        Ok(account)
    }
}

fn ensure_positive(amount: &BigDecimal) -> Result<(), LedgerError> {
    if *amount <= BigDecimal::zero() {
        return Err(LedgerError::NonPositiveAmount);
    }
    // Balances are stored in cents; a finer amount would be rounded away.
    if !money::is_whole_cents(amount) {
        return Err(LedgerError::SubCentAmount);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryBalanceStore;
    use std::str::FromStr;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn ledger() -> Ledger {
        Ledger::new(Arc::new(InMemoryBalanceStore::new()))
    }

    #[tokio::test]
    async fn reads_opening_balance_without_side_effects() {
        let ledger = ledger();
        ledger.open_account(1, &dec("150.50")).await.unwrap();

        assert_eq!(ledger.get_balance(1).await.unwrap(), dec("150.50"));
        assert_eq!(ledger.get_balance(1).await.unwrap(), dec("150.50"));
    }

    #[tokio::test]
    async fn unknown_user_is_not_found() {
        let ledger = ledger();
        assert!(matches!(ledger.get_balance(9).await, Err(LedgerError::NotFound(9))));
        assert!(matches!(
            ledger.withdraw(9, &dec("1")).await,
            Err(LedgerError::NotFound(9))
        ));
    }

    #[tokio::test]
    async fn add_balance_opens_missing_account() {
        let ledger = ledger();
        assert_eq!(ledger.add_balance(2, &dec("10")).await.unwrap(), dec("10"));
        assert_eq!(ledger.add_balance(2, &dec("2.5")).await.unwrap(), dec("12.5"));
    }

    #[tokio::test]
    async fn rejects_non_positive_amounts() {
        let ledger = ledger();
        ledger.open_account(1, &dec("10")).await.unwrap();

        assert!(matches!(
            ledger.add_balance(1, &dec("0")).await,
            Err(LedgerError::NonPositiveAmount)
        ));
        assert!(matches!(
            ledger.withdraw(1, &dec("-5")).await,
            Err(LedgerError::NonPositiveAmount)
        ));
        assert_eq!(ledger.get_balance(1).await.unwrap(), dec("10"));
    }

    #[tokio::test]
    async fn rejects_sub_cent_amounts() {
        let ledger = ledger();
        ledger.open_account(1, &dec("1.00")).await.unwrap();

        assert!(matches!(
            ledger.withdraw(1, &dec("0.004")).await,
            Err(LedgerError::SubCentAmount)
        ));
        assert!(matches!(
            ledger.add_balance(1, &dec("2.505")).await,
            Err(LedgerError::SubCentAmount)
        ));
        assert!(matches!(
            ledger.open_account(2, &dec("0.001")).await,
            Err(LedgerError::SubCentAmount)
        ));
        assert_eq!(ledger.get_balance(1).await.unwrap(), dec("1.00"));
        assert_eq!(ledger.withdraw(1, &dec("0.50")).await.unwrap(), dec("0.50"));
    }

    #[tokio::test]
    async fn withdraw_succeeds_only_when_covered() {
        let ledger = ledger();
        ledger.open_account(1, &dec("100")).await.unwrap();

        assert_eq!(ledger.withdraw(1, &dec("100")).await.unwrap(), dec("0"));
        assert!(matches!(
            ledger.withdraw(1, &dec("0.01")).await,
            Err(LedgerError::InsufficientFunds { .. })
        ));
        assert_eq!(ledger.get_balance(1).await.unwrap(), dec("0"));
    }

    #[tokio::test]
    async fn short_balance_is_left_unchanged() {
        let ledger = ledger();
        ledger.open_account(1, &dec("50")).await.unwrap();

        let err = ledger.withdraw(1, &dec("100")).await.unwrap_err();
        match err {
            LedgerError::InsufficientFunds { balance, requested } => {
                assert_eq!(balance, dec("50"));
                assert_eq!(requested, dec("100"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(ledger.get_balance(1).await.unwrap(), dec("50"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_withdrawals_never_overdraw() {
        let ledger = ledger();
        ledger.open_account(7, &dec("100")).await.unwrap();

        let tasks: Vec<_> = (0..25)
            .map(|_| {
                let ledger = ledger.clone();
                tokio::spawn(async move { ledger.withdraw(7, &dec("10")).await })
            })
            .collect();

        let mut succeeded = 0;
        for task in tasks {
            if task.await.unwrap().is_ok() {
                succeeded += 1;
            }
        }

        assert_eq!(succeeded, 10);
        assert_eq!(ledger.get_balance(7).await.unwrap(), dec("0"));
    }

    #[tokio::test]
    async fn open_account_is_once_only() {
        let ledger = ledger();
        ledger.open_account(3, &dec("0")).await.unwrap();

        assert!(matches!(
            ledger.open_account(3, &dec("5")).await,
            Err(LedgerError::AlreadyExists(3))
        ));
        assert!(matches!(
            ledger.open_account(4, &dec("-1")).await,
            Err(LedgerError::NegativeInitialBalance)
        ));
    }
}
