//! Amount conversion at the provider boundary
//!
//! Stripe and Conekta take integer minor units; MercadoPago and PayPal take
//! decimal major units. A fractional minor unit is never rounded away.

use std::str::FromStr;

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

use crate::error::{PaymentError, Result};

/// `232.00` -> `23200`
pub fn to_minor_units(amount: Decimal) -> Result<i64> {
    if amount.is_sign_negative() {
        return Err(PaymentError::Amount(format!("{amount} is negative")));
    }
    let minor = amount * Decimal::ONE_HUNDRED;
    if !minor.fract().is_zero() {
        return Err(PaymentError::Amount(format!(
            "{amount} is not a whole number of cents"
        )));
    }
    minor
        .to_i64()
        .ok_or_else(|| PaymentError::Amount(format!("{amount} is out of range")))
}

/// `23200` -> `232.00`
pub fn from_minor_units(minor: i64) -> Decimal {
    Decimal::new(minor, 2)
}

/// Major units with exactly two decimals, as PayPal expects (`"232.00"`)
pub fn to_major_string(amount: Decimal) -> Result<String> {
    // Validates the same way as minor units
    let minor = to_minor_units(amount)?;
    Ok(from_minor_units(minor).to_string())
}

/// Major units as a JSON number, as MercadoPago expects (`232.5`)
pub fn to_major_number(amount: Decimal) -> Result<serde_json::Value> {
    let text = to_major_string(amount)?;
    serde_json::Number::from_str(&text)
        .map(serde_json::Value::Number)
        .map_err(|e| PaymentError::Amount(format!("{amount}: {e}")))
}
