use std::time::Duration;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use shared::events::failure;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum LedgerError {
    /// The ledger answered with anything but 200.
    #[error("{message}")]
    Rejected { status: u16, message: String },

    #[error("ledger did not answer within {0:?}")]
    Timeout(Duration),

    #[error("ledger unreachable: {0}")]
    Transport(String),

    #[error("unexpected ledger response: {0}")]
    InvalidResponse(String),
}

impl LedgerError {
    /// Short reason safe to show the customer. The full error only goes to logs.
    pub fn reason(&self) -> &'static str {
        match self {
            LedgerError::Rejected { status: 409, .. } => failure::INSUFFICIENT_FUNDS,
            LedgerError::Rejected { status: 404, .. } => failure::ACCOUNT_NOT_FOUND,
            LedgerError::Rejected { .. } => failure::DECLINED,
            LedgerError::Timeout(_) | LedgerError::Transport(_) | LedgerError::InvalidResponse(_) => {
                failure::UNAVAILABLE
            }
        }
    }
}

/// The balance operation payments depend on.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Debits `amount` and returns the new balance.
    async fn withdraw(&self, user_id: i64, amount: &BigDecimal) -> Result<BigDecimal, LedgerError>;
}

#[derive(Debug, Clone)]
pub struct LedgerClientConfig {
    /// Including the API prefix, e.g. `http://localhost:3003/api/v1`.
    pub base_url: String,
    pub timeout: Duration,
}

#[derive(Serialize)]
struct AmountRequest {
    #[serde(with = "shared::money::as_number")]
    amount: BigDecimal,
}

#[derive(Deserialize)]
struct BalanceResponse {
    #[serde(with = "shared::money::as_number")]
    balance: BigDecimal,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: String,
}

/// Calls the ledger's HTTP API.
pub struct HttpLedgerClient {
    client: reqwest::Client,
    config: LedgerClientConfig,
}

impl HttpLedgerClient {
    pub fn new(config: LedgerClientConfig) -> Result<Self, LedgerError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LedgerError::Transport(e.to_string()))?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn classify(&self, err: reqwest::Error) -> LedgerError {
        if err.is_timeout() {
            LedgerError::Timeout(self.config.timeout)
        } else {
            LedgerError::Transport(err.to_string())
        }
    }
}

#[async_trait]
impl Ledger for HttpLedgerClient {
    async fn withdraw(&self, user_id: i64, amount: &BigDecimal) -> Result<BigDecimal, LedgerError> {
        let url = self.url(&format!("/balance/{user_id}/withdraw"));
        debug!(%url, user_id, %amount, "requesting withdrawal");

        let response = self
            .client
            .post(&url)
            .json(&AmountRequest {
                amount: amount.clone(),
            })
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        let body = response.bytes().await.map_err(|e| self.classify(e))?;

        if status != StatusCode::OK {
            let message = serde_json::from_slice::<ErrorResponse>(&body)
                .map(|e| e.error)
                .unwrap_or_else(|_| {
                    status
                        .canonical_reason()
                        .unwrap_or("ledger request failed")
                        .to_string()
                });
            return Err(LedgerError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        serde_json::from_slice::<BalanceResponse>(&body)
            .map(|r| r.balance)
            .map_err(|e| LedgerError::InvalidResponse(e.to_string()))
    }
}
