//! Deserializers for exchange numbers.
//!
//! Exchanges send most numeric fields as JSON strings (`"27012.50"`) to
//! avoid float rounding, but not consistently. These accept either form.

use mdstream_core::{OrderBookLevel, Price, Size};
use rust_decimal::Decimal;
use serde::de::{self, Deserializer};
use serde::Deserialize;
use serde_json::Value;
use std::str::FromStr;

#[derive(Deserialize)]
#[serde(untagged)]
enum StrOrNum {
    Str(String),
    Num(serde_json::Number),
}

impl StrOrNum {
    fn into_text(self) -> String {
        match self {
            Self::Str(s) => s,
            Self::Num(n) => n.to_string(),
        }
    }
}

pub fn de_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let text = StrOrNum::deserialize(deserializer)?.into_text();
    let value: f64 = text.trim().parse().map_err(de::Error::custom)?;
    if !value.is_finite() {
        return Err(de::Error::custom(format!("non-finite number {text}")));
    }
    Ok(value)
}

pub fn de_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let text = StrOrNum::deserialize(deserializer)?.into_text();
    text.trim().parse().map_err(de::Error::custom)
}

/// Parse one `[price, quantity, ...]` level. Extra trailing fields are
/// ignored.
pub fn parse_level(value: &Value) -> Result<OrderBookLevel, String> {
    let arr = value
        .as_array()
        .ok_or_else(|| format!("level is not an array: {value}"))?;
    if arr.len() < 2 {
        return Err(format!("level needs [price, qty], got {value}"));
    }
    let price = decimal(&arr[0])?;
    let quantity = decimal(&arr[1])?;
    if price.is_sign_negative() || quantity.is_sign_negative() {
        return Err(format!("negative price or quantity in {value}"));
    }
    Ok(OrderBookLevel::new(Price::new(price), Size::new(quantity)))
}

pub fn parse_levels(value: &Value) -> Result<Vec<OrderBookLevel>, String> {
    match value {
        Value::Array(levels) => levels.iter().map(parse_level).collect(),
        Value::Null => Ok(Vec::new()),
        other => Err(format!("levels are not an array: {other}")),
    }
}

fn decimal(value: &Value) -> Result<Decimal, String> {
    let text = match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        other => return Err(format!("not a number: {other}")),
    };
    Decimal::from_str_exact(text.trim())
        .or_else(|_| Decimal::from_scientific(text.trim()))
        .or_else(|_| Decimal::from_str(text.trim()))
        .map_err(|e| format!("bad decimal {text}: {e}"))
}
