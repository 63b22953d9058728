//! Native-coin amounts: decimal strings at the edges, integer wei inside.
//!
//! Comparisons and fee math never touch floating point.

use alloy::primitives::utils::{format_ether, parse_ether};
use alloy::primitives::U256;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Decimal places of the native coin.
pub const NATIVE_DECIMALS: usize = 18;

/// Basis-point denominator (10_000 = 100%).
pub const BPS_DENOMINATOR: u32 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmountError {
    #[error("amount is empty")]
    Empty,
    #[error("amount '{0}' is not a non-negative decimal number")]
    NotNumeric(String),
    #[error("amount '{0}' has more than 18 decimal places")]
    TooPrecise(String),
}

/// Parse a decimal native-unit string (e.g. `"0.001"`) into wei.
///
/// Accepts `digits` or `digits.digits` with at most 18 fractional digits.
/// Signs, exponents and surrounding whitespace are rejected.
pub fn parse_native_amount(input: &str) -> Result<U256, AmountError> {
    if input.is_empty() {
        return Err(AmountError::Empty);
    }

    let (whole, fraction) = match input.split_once('.') {
        Some((w, f)) => (w, Some(f)),
        None => (input, None),
    };
    let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(whole) || fraction.is_some_and(|f| !all_digits(f)) {
        return Err(AmountError::NotNumeric(input.to_string()));
    }
    if fraction.is_some_and(|f| f.len() > NATIVE_DECIMALS) {
        return Err(AmountError::TooPrecise(input.to_string()));
    }

    parse_ether(input).map_err(|_| AmountError::NotNumeric(input.to_string()))
}

/// Format wei as the shortest exact decimal string (`975000000000000` → `"0.000975"`).
pub fn format_native_amount(wei: U256) -> String {
    let formatted = format_ether(wei);
    match formatted.split_once('.') {
        Some((whole, fraction)) => {
            let fraction = fraction.trim_end_matches('0');
            if fraction.is_empty() {
                whole.to_string()
            } else {
                format!("{}.{}", whole, fraction)
            }
        }
        None => formatted,
    }
}

/// Platform fee and merchant remainder of a gross payment, in wei.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSplit {
    pub gross: U256,
    pub platform_fee: U256,
    pub merchant_amount: U256,
}

impl FeeSplit {
    /// `platform_fee = gross * bps / 10_000` (floor), remainder to the merchant.
    pub fn compute(gross: U256, fee_bps: u32) -> Self {
        let bps = U256::from(fee_bps.min(BPS_DENOMINATOR));
        let denominator = U256::from(BPS_DENOMINATOR);
        let platform_fee = match gross.checked_mul(bps) {
            Some(scaled) => scaled / denominator,
            None => (gross / denominator) * bps,
        };
        Self {
            gross,
            platform_fee,
            merchant_amount: gross - platform_fee,
        }
    }

    pub fn gross_decimal(&self) -> String {
        format_native_amount(self.gross)
    }

    pub fn platform_fee_decimal(&self) -> String {
        format_native_amount(self.platform_fee)
    }

    pub fn merchant_amount_decimal(&self) -> String {
        format_native_amount(self.merchant_amount)
    }
}
