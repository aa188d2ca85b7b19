use std::fmt;
use std::str::FromStr;

use bigdecimal::BigDecimal;
use shared::events::failure;
use shared::Event;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Locale {
    #[default]
    Ru,
    En,
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locale::Ru => f.write_str("ru"),
            Locale::En => f.write_str("en"),
        }
    }
}

impl FromStr for Locale {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ru" => Ok(Locale::Ru),
            "en" => Ok(Locale::En),
            other => Err(format!("unsupported locale '{other}', expected 'ru' or 'en'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Two decimal places, as money is shown to customers.
fn money(amount: &BigDecimal) -> String {
    amount.round(2).with_scale(2).to_string()
}

/// Localized failure reason. An event without one was refused for lack of
/// funds; anything unrecognized is shown as a plain decline.
fn failure_reason(reason: Option<&str>, locale: Locale) -> &'static str {
    let reason = reason.unwrap_or(failure::INSUFFICIENT_FUNDS);
    match (locale, reason) {
        (Locale::Ru, failure::INSUFFICIENT_FUNDS) => "Недостаточно средств",
        (Locale::Ru, failure::ACCOUNT_NOT_FOUND) => "Счет не найден",
        (Locale::Ru, failure::UNAVAILABLE) => "Платежный сервис временно недоступен",
        (Locale::Ru, _) => "Платеж отклонен",
        (Locale::En, failure::INSUFFICIENT_FUNDS) => "Insufficient funds",
        (Locale::En, failure::ACCOUNT_NOT_FOUND) => "Account not found",
        (Locale::En, failure::UNAVAILABLE) => "Payment service temporarily unavailable",
        (Locale::En, _) => "Payment declined",
    }
}

/// Customer email for a payment outcome. `None` for events nobody is
/// notified about.
pub fn render(event: &Event, locale: Locale) -> Option<Notification> {
    let (subject, body) = match event {
        Event::OrderCreated(_) => return None,
        Event::PaymentCompleted(d) => match locale {
            Locale::Ru => (
                format!("Оплата заказа {} успешна", d.order_id),
                format!(
                    "Заказ {} успешно оплачен! C Вашего счета списано {} рублей",
                    d.order_id,
                    money(&d.amount)
                ),
            ),
            Locale::En => (
                format!("Payment for order {} succeeded", d.order_id),
                format!(
                    "Order {} has been paid! {} was charged to your account",
                    d.order_id,
                    money(&d.amount)
                ),
            ),
        },
        Event::PaymentFailed { details: d, error } => {
            let reason = failure_reason(error.as_deref(), locale);
            match locale {
                Locale::Ru => (
                    format!("Оплата заказа {} не удалась", d.order_id),
                    format!("Не удалось оплатить заказ {}! {}", d.order_id, reason),
                ),
                Locale::En => (
                    format!("Payment for order {} failed", d.order_id),
                    format!(
                        "We could not charge {} for order {}! {}",
                        money(&d.amount),
                        d.order_id,
                        reason
                    ),
                ),
            }
        }
    };

    Some(Notification {
        to: event.details().email.clone(),
        subject,
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::OrderDetails;
    use std::str::FromStr;

    fn details() -> OrderDetails {
        OrderDetails {
            order_id: 42,
            user_id: 7,
            email: "buyer@example.com".to_string(),
            amount: BigDecimal::from_str("100").unwrap(),
        }
    }

    #[test]
    fn russian_success_message() {
        let n = render(&Event::PaymentCompleted(details()), Locale::Ru).unwrap();
        assert_eq!(n.to, "buyer@example.com");
        assert_eq!(n.subject, "Оплата заказа 42 успешна");
        assert_eq!(n.body, "Заказ 42 успешно оплачен! C Вашего счета списано 100.00 рублей");
    }

    #[test]
    fn russian_failure_message() {
        let event = Event::PaymentFailed {
            details: details(),
            error: None,
        };
        let n = render(&event, Locale::Ru).unwrap();
        assert_eq!(n.subject, "Оплата заказа 42 не удалась");
        assert_eq!(n.body, "Не удалось оплатить заказ 42! Недостаточно средств");
    }

    fn failed(error: &str) -> Event {
        Event::PaymentFailed {
            details: details(),
            error: Some(error.to_string()),
        }
    }

    #[test]
    fn failure_reason_is_localized() {
        let n = render(&failed("insufficient funds"), Locale::Ru).unwrap();
        assert_eq!(n.body, "Не удалось оплатить заказ 42! Недостаточно средств");

        let n = render(&failed("account not found"), Locale::En).unwrap();
        assert_eq!(n.subject, "Payment for order 42 failed");
        assert_eq!(n.body, "We could not charge 100.00 for order 42! Account not found");
    }

    #[test]
    fn unknown_reason_text_is_not_forwarded() {
        let n = render(
            &failed("ledger unreachable: error sending request for url (http://ledger:3003)"),
            Locale::En,
        )
        .unwrap();
        assert_eq!(n.body, "We could not charge 100.00 for order 42! Payment declined");
    }

    #[test]
    fn amounts_are_rounded_to_cents() {
        let mut d = details();
        d.amount = BigDecimal::from_str("19.999").unwrap();
        let n = render(&Event::PaymentCompleted(d), Locale::En).unwrap();
        assert!(n.body.contains("20.00"), "{}", n.body);
    }

    #[test]
    fn order_created_is_not_notified() {
        assert!(render(&Event::OrderCreated(details()), Locale::Ru).is_none());
    }

    #[test]
    fn parses_locales() {
        assert_eq!("RU".parse::<Locale>(), Ok(Locale::Ru));
        assert_eq!("en".parse::<Locale>(), Ok(Locale::En));
        assert!("de".parse::<Locale>().is_err());
    }
}
