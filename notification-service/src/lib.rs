pub mod config;
pub mod handlers;
pub mod mailer;
pub mod service;
pub mod templates;

pub use handlers::NotificationHandler;
pub use mailer::{HttpMailer, InMemoryMailer, LogMailer, MailConfig, MailError, Mailer};
pub use service::NotificationService;
pub use templates::{Locale, Notification};

/// Consumer name used for this service's shared queues.
pub const SERVICE_NAME: &str = "notification-service";
