//! Event contracts exchanged between the services.
//!
//! Every message on the bus is a flat JSON object:
//!
//! ```json
//! {"type": "PaymentFailed", "orderID": 7, "userID": 3, "email": "a@b.c", "amount": 100, "error": "insufficient funds"}
//! ```
//!
//! The wire format is decoded exactly once, at the bus boundary, into the
//! closed [`Event`] union. Business logic never sees a raw map.

use std::fmt;
use std::str::FromStr;

use bigdecimal::BigDecimal;
use num_traits::Zero;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::money;

pub const ORDER_CREATED: &str = "order.created";
pub const PAYMENT_COMPLETED: &str = "payment.completed";
pub const PAYMENT_FAILED: &str = "payment.failed";

/// Binding pattern covering every payment outcome.
pub const PAYMENT_OUTCOMES: &str = "payment.*";

/// Values of `PaymentFailed.error`. Shown to customers, so they never carry
/// internal detail.
pub mod failure {
    pub const INSUFFICIENT_FUNDS: &str = "insufficient funds";
    pub const ACCOUNT_NOT_FOUND: &str = "account not found";
    pub const DECLINED: &str = "payment declined";
    pub const UNAVAILABLE: &str = "payment service unavailable";
}

const FIELD_TYPE: &str = "type";
const FIELD_ORDER_ID: &str = "orderID";
const FIELD_USER_ID: &str = "userID";
const FIELD_EMAIL: &str = "email";
const FIELD_AMOUNT: &str = "amount";
const FIELD_ERROR: &str = "error";

const KNOWN_FIELDS: [&str; 6] = [
    FIELD_TYPE,
    FIELD_ORDER_ID,
    FIELD_USER_ID,
    FIELD_EMAIL,
    FIELD_AMOUNT,
    FIELD_ERROR,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    OrderCreated,
    PaymentCompleted,
    PaymentFailed,
}

impl EventType {
    pub const ALL: [EventType; 3] = [
        EventType::OrderCreated,
        EventType::PaymentCompleted,
        EventType::PaymentFailed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::OrderCreated => "OrderCreated",
            EventType::PaymentCompleted => "PaymentCompleted",
            EventType::PaymentFailed => "PaymentFailed",
        }
    }

    pub fn routing_key(&self) -> &'static str {
        match self {
            EventType::OrderCreated => ORDER_CREATED,
            EventType::PaymentCompleted => PAYMENT_COMPLETED,
            EventType::PaymentFailed => PAYMENT_FAILED,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = EnvelopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| EnvelopeError::UnknownType(s.to_string()))
    }
}

/// Fields every event in the choreography carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderDetails {
    pub order_id: i64,
    pub user_id: i64,
    pub email: String,
    pub amount: BigDecimal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    OrderCreated(OrderDetails),
    PaymentCompleted(OrderDetails),
    PaymentFailed {
        details: OrderDetails,
        error: Option<String>,
    },
}

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("envelope is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("envelope must be a JSON object")]
    NotAnObject,

    #[error("unknown field '{0}' in envelope")]
    UnknownField(String),

    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("field '{field}' must be {expected}")]
    InvalidField {
        field: &'static str,
        expected: &'static str,
    },

    #[error("unknown event type '{0}'")]
    UnknownType(String),

    #[error("amount must be a positive finite number, got {0}")]
    InvalidAmount(String),
}

impl EnvelopeError {
    /// Unknown types are expected noise on a shared exchange, not corruption.
    pub fn is_unknown_type(&self) -> bool {
        matches!(self, EnvelopeError::UnknownType(_))
    }
}

impl Event {
    pub fn event_type(&self) -> EventType {
        match self {
            Event::OrderCreated(_) => EventType::OrderCreated,
            Event::PaymentCompleted(_) => EventType::PaymentCompleted,
            Event::PaymentFailed { .. } => EventType::PaymentFailed,
        }
    }

    pub fn routing_key(&self) -> &'static str {
        self.event_type().routing_key()
    }

    pub fn details(&self) -> &OrderDetails {
        match self {
            Event::OrderCreated(details)
            | Event::PaymentCompleted(details)
            | Event::PaymentFailed { details, .. } => details,
        }
    }

    pub fn order_id(&self) -> i64 {
        self.details().order_id
    }

    /// Serializes the event into its wire envelope.
    pub fn encode(&self) -> Result<Vec<u8>, EnvelopeError> {
        let details = self.details();
        let amount = money::to_number(&details.amount)
            .ok_or_else(|| EnvelopeError::InvalidAmount(details.amount.to_string()))?;

        let mut fields = Map::new();
        fields.insert(FIELD_TYPE.into(), Value::from(self.event_type().as_str()));
        fields.insert(FIELD_ORDER_ID.into(), Value::from(details.order_id));
        fields.insert(FIELD_USER_ID.into(), Value::from(details.user_id));
        fields.insert(FIELD_EMAIL.into(), Value::from(details.email.clone()));
        fields.insert(FIELD_AMOUNT.into(), Value::Number(amount));
        if let Event::PaymentFailed {
            error: Some(error), ..
        } = self
        {
            fields.insert(FIELD_ERROR.into(), Value::from(error.clone()));
        }

        Ok(serde_json::to_vec(&Value::Object(fields))?)
    }

    /// Decodes a wire envelope, failing on the first schema violation.
    pub fn decode(body: &[u8]) -> Result<Event, EnvelopeError> {
        let Value::Object(fields) = serde_json::from_slice::<Value>(body)? else {
            return Err(EnvelopeError::NotAnObject);
        };

        if let Some(unknown) = fields.keys().find(|k| !KNOWN_FIELDS.contains(&k.as_str())) {
            return Err(EnvelopeError::UnknownField(unknown.clone()));
        }

        let event_type: EventType = string_field(&fields, FIELD_TYPE)?.parse()?;
        let details = OrderDetails {
            order_id: int_field(&fields, FIELD_ORDER_ID)?,
            user_id: int_field(&fields, FIELD_USER_ID)?,
            email: string_field(&fields, FIELD_EMAIL)?.to_string(),
            amount: amount_field(&fields)?,
        };

        Ok(match event_type {
            EventType::OrderCreated => Event::OrderCreated(details),
            EventType::PaymentCompleted => Event::PaymentCompleted(details),
            EventType::PaymentFailed => Event::PaymentFailed {
                details,
                error: optional_string_field(&fields, FIELD_ERROR)?,
            },
        })
    }
}

fn string_field<'a>(
    fields: &'a Map<String, Value>,
    field: &'static str,
) -> Result<&'a str, EnvelopeError> {
    match fields.get(field) {
        None | Some(Value::Null) => Err(EnvelopeError::MissingField(field)),
        Some(Value::String(s)) => Ok(s),
        Some(_) => Err(EnvelopeError::InvalidField {
            field,
            expected: "a string",
        }),
    }
}

fn optional_string_field(
    fields: &Map<String, Value>,
    field: &'static str,
) -> Result<Option<String>, EnvelopeError> {
    match fields.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(EnvelopeError::InvalidField {
            field,
            expected: "a string",
        }),
    }
}

fn int_field(fields: &Map<String, Value>, field: &'static str) -> Result<i64, EnvelopeError> {
    match fields.get(field) {
        None | Some(Value::Null) => Err(EnvelopeError::MissingField(field)),
        Some(Value::Number(n)) => n.as_i64().ok_or(EnvelopeError::InvalidField {
            field,
            expected: "an integer",
        }),
        Some(_) => Err(EnvelopeError::InvalidField {
            field,
            expected: "an integer",
        }),
    }
}

fn amount_field(fields: &Map<String, Value>) -> Result<BigDecimal, EnvelopeError> {
    let number = match fields.get(FIELD_AMOUNT) {
        None | Some(Value::Null) => return Err(EnvelopeError::MissingField(FIELD_AMOUNT)),
        Some(Value::Number(n)) => n,
        Some(_) => {
            return Err(EnvelopeError::InvalidField {
                field: FIELD_AMOUNT,
                expected: "a number",
            })
        }
    };

    let amount =
        money::from_number(number).ok_or_else(|| EnvelopeError::InvalidAmount(number.to_string()))?;
    if amount <= BigDecimal::zero() {
        return Err(EnvelopeError::InvalidAmount(number.to_string()));
    }
    Ok(amount)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn details() -> OrderDetails {
        OrderDetails {
            order_id: 42,
            user_id: 7,
            email: "buyer@example.com".to_string(),
            amount: BigDecimal::from(100),
        }
    }

    #[test]
    fn payment_failed_carries_error_on_the_wire() {
        let event = Event::PaymentFailed {
            details: details(),
            error: Some("insufficient funds".to_string()),
        };

        let body = event.encode().unwrap();
        let value: Value = serde_json::from_slice(&body).unwrap();

        assert_eq!(value["type"], "PaymentFailed");
        assert_eq!(value["orderID"], 42);
        assert_eq!(value["userID"], 7);
        assert_eq!(value["email"], "buyer@example.com");
        assert_eq!(value["amount"].as_f64(), Some(100.0));
        assert_eq!(value["error"], "insufficient funds");
        assert_eq!(Event::decode(&body).unwrap(), event);
    }

    #[test]
    fn decodes_fractional_amounts_exactly() {
        let body = br#"{"type":"OrderCreated","orderID":1,"userID":2,"email":"x@y.z","amount":19.99}"#;
        let event = Event::decode(body).unwrap();
        assert_eq!(event.details().amount, BigDecimal::from_str("19.99").unwrap());
        assert_eq!(event.routing_key(), ORDER_CREATED);
    }

    #[test]
    fn rejects_missing_order_id() {
        let body = br#"{"type":"PaymentCompleted","userID":2,"email":"x@y.z","amount":10}"#;
        assert!(matches!(
            Event::decode(body),
            Err(EnvelopeError::MissingField("orderID"))
        ));
    }

    #[test]
    fn rejects_unknown_type() {
        let body = br#"{"type":"Bogus","orderID":1,"userID":2,"email":"x@y.z","amount":10}"#;
        let err = Event::decode(body).unwrap_err();
        assert!(err.is_unknown_type());
    }

    #[test]
    fn rejects_unknown_fields() {
        let body = br#"{"type":"OrderCreated","orderID":1,"userID":2,"email":"x@y.z","amount":10,"order_id":1}"#;
        assert!(matches!(
            Event::decode(body),
            Err(EnvelopeError::UnknownField(field)) if field == "order_id"
        ));
    }

    #[test]
    fn rejects_wrongly_typed_fields() {
        let body = br#"{"type":"OrderCreated","orderID":"1","userID":2,"email":"x@y.z","amount":10}"#;
        assert!(matches!(
            Event::decode(body),
            Err(EnvelopeError::InvalidField { field: "orderID", .. })
        ));

        let body = br#"{"type":"OrderCreated","orderID":1.5,"userID":2,"email":"x@y.z","amount":10}"#;
        assert!(matches!(
            Event::decode(body),
            Err(EnvelopeError::InvalidField { field: "orderID", .. })
        ));
    }

    #[test]
    fn rejects_non_positive_amounts() {
        let body = br#"{"type":"OrderCreated","orderID":1,"userID":2,"email":"x@y.z","amount":0}"#;
        assert!(matches!(
            Event::decode(body),
            Err(EnvelopeError::InvalidAmount(_))
        ));
    }

    #[test]
    fn rejects_non_objects() {
        assert!(matches!(Event::decode(b"[1,2]"), Err(EnvelopeError::NotAnObject)));
        assert!(matches!(Event::decode(b"not json"), Err(EnvelopeError::Json(_))));
    }
}
