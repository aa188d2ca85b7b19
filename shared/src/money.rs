//! Decimal amounts travel as plain JSON numbers but are handled as
//! `BigDecimal` everywhere else.

use std::str::FromStr;

use bigdecimal::BigDecimal;
use num_traits::ToPrimitive;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Number;

/// Fractional digits kept by every money column.
pub const SCALE: i64 = 2;

/// Whether `amount` can be stored without rounding.
pub fn is_whole_cents(amount: &BigDecimal) -> bool {
    amount.with_scale(SCALE) == *amount
}

/// Parses the number's shortest textual form, so `19.99` stays `19.99`.
pub fn from_number(n: &Number) -> Option<BigDecimal> {
    BigDecimal::from_str(&n.to_string()).ok()
}

/// JSON numbers are `f64` here, so an amount that would not survive the
/// conversion exactly is refused instead of silently rounded.
pub fn to_number(amount: &BigDecimal) -> Option<Number> {
    let n = amount.to_f64().and_then(Number::from_f64)?;
    (from_number(&n)? == *amount).then_some(n)
}

/// `#[serde(with = "shared::money::as_number")]`
pub mod as_number {
    use super::*;

    pub fn serialize<S: Serializer>(amount: &BigDecimal, serializer: S) -> Result<S::Ok, S::Error> {
        to_number(amount)
            .ok_or_else(|| serde::ser::Error::custom(format!("amount {amount} is not representable")))?
            .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BigDecimal, D::Error> {
        let n = Number::deserialize(deserializer)?;
        from_number(&n).ok_or_else(|| serde::de::Error::custom(format!("invalid amount {n}")))
    }
}
