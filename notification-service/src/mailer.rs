use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::templates::Notification;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("mail relay unreachable: {0}")]
    Transport(String),

    #[error("mail relay did not answer within {0:?}")]
    Timeout(Duration),

    #[error("mail relay rejected message ({status}): {message}")]
    Rejected { status: u16, message: String },
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_email(&self, to: &str, subject: &str, body: &str) -> Result<(), MailError>;
}

#[derive(Debug, Clone)]
pub struct MailConfig {
    /// Relay endpoint; without one messages are only logged.
    pub relay_url: Option<String>,
    pub from: String,
    pub timeout: Duration,
}

impl MailConfig {
    pub fn mailer(&self) -> Result<Arc<dyn Mailer>, MailError> {
        Ok(match &self.relay_url {
            Some(url) => Arc::new(HttpMailer::new(url.clone(), self.from.clone(), self.timeout)?),
            None => Arc::new(LogMailer),
        })
    }
}

#[derive(Serialize)]
struct RelayMessage<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    body: &'a str,
}

/// Hands messages to an HTTP mail relay as JSON.
pub struct HttpMailer {
    client: reqwest::Client,
    relay_url: String,
    from: String,
    timeout: Duration,
}

impl HttpMailer {
    pub fn new(relay_url: String, from: String, timeout: Duration) -> Result<Self, MailError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MailError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            relay_url,
            from,
            timeout,
        })
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send_email(&self, to: &str, subject: &str, body: &str) -> Result<(), MailError> {
        let response = self
            .client
            .post(&self.relay_url)
            .json(&RelayMessage {
                from: &self.from,
                to,
                subject,
                body,
            })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    MailError::Timeout(self.timeout)
                } else {
                    MailError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(MailError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        info!(to, subject, "email sent");
        Ok(())
    }
}

/// Writes messages to the log instead of delivering them.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send_email(&self, to: &str, subject: &str, body: &str) -> Result<(), MailError> {
        info!(to, subject, body, "email (log only)");
        Ok(())
    }
}

/// Keeps every message in memory.
#[derive(Clone, Default)]
pub struct InMemoryMailer {
    sent: Arc<Mutex<Vec<Notification>>>,
}

impl InMemoryMailer {
    pub fn new() -> Self {
        Self::default()
    }

    fn sent_guard(&self) -> MutexGuard<'_, Vec<Notification>> {
        self.sent.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent_guard().clone()
    }
}

#[async_trait]
impl Mailer for InMemoryMailer {
    async fn send_email(&self, to: &str, subject: &str, body: &str) -> Result<(), MailError> {
        self.sent_guard().push(Notification {
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}
