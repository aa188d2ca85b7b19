use std::time::Duration;

use clap::Parser;
use shared::BusArgs;

use crate::mailer::MailConfig;
use crate::templates::Locale;

#[derive(Debug, Parser)]
#[command(name = "notification-service", about = "Customer notifications")]
pub struct Args {
    #[command(flatten)]
    pub bus: BusArgs,

    /// HTTP mail relay; messages are only logged when unset.
    #[arg(long, env = "MAIL_RELAY_URL")]
    pub mail_relay_url: Option<String>,

    #[arg(long, env = "MAIL_FROM", default_value = "noreply@minishop.local")]
    pub mail_from: String,

    #[arg(long, env = "MAIL_TIMEOUT_MS", default_value = "5000")]
    pub mail_timeout_ms: u64,

    #[arg(long, env = "NOTIFY_LOCALE", default_value = "ru")]
    pub locale: Locale,
}

impl Args {
    pub fn mail_config(&self) -> MailConfig {
        MailConfig {
            relay_url: self.mail_relay_url.clone(),
            from: self.mail_from.clone(),
            timeout: Duration::from_millis(self.mail_timeout_ms),
        }
    }
}
