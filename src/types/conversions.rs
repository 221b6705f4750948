use ethers::types::{Address, U256};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use std::str::FromStr;

/// Significant digits a `Decimal` can hold without overflowing.
const DECIMAL_DIGITS: usize = 28;

/// Converts a raw on-chain amount into token units, dividing by `10^decimals`.
///
/// Fractional digits beyond what `Decimal` can represent are truncated, so
/// amounts with very large integer parts lose sub-unit precision instead of
/// failing.
pub fn u256_to_decimal(value: U256, decimals: u8) -> Result<Decimal, ConversionError> {
    let digits = value.to_string();
    let decimals = decimals as usize;

    let (int_part, frac_part) = if digits.len() > decimals {
        let split = digits.len() - decimals;
        (digits[..split].to_string(), digits[split..].to_string())
    } else {
        ("0".to_string(), format!("{:0>width$}", digits, width = decimals))
    };

    if int_part.len() > DECIMAL_DIGITS {
        return Err(ConversionError::Overflow);
    }

    let frac_budget = DECIMAL_DIGITS.saturating_sub(int_part.len());
    let frac: String = frac_part.chars().take(frac_budget).collect();
    let text = if frac.is_empty() {
        int_part
    } else {
        format!("{}.{}", int_part, frac)
    };

    Decimal::from_str(&text)
        .map(|d| d.normalize())
        .map_err(|e| ConversionError::InvalidDecimal(e.to_string()))
}

/// Parses a reserve given as a base-10 integer string (`"150000000000000000000"`).
pub fn parse_raw_amount(raw: &str) -> Result<U256, ConversionError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ConversionError::InvalidAmount(raw.to_string()));
    }
    U256::from_dec_str(trimmed).map_err(|_| ConversionError::Overflow)
}

/// Converts token units back into a raw on-chain amount, truncating any
/// precision below `10^-decimals`.
pub fn decimal_to_u256(value: Decimal, decimals: u8) -> Result<U256, ConversionError> {
    if value.is_sign_negative() {
        return Err(ConversionError::InvalidAmount(value.to_string()));
    }
    let truncated = value.trunc_with_scale(decimals as u32).normalize();
    let text = truncated.to_string();
    let (int_part, frac_part) = match text.split_once('.') {
        Some((i, f)) => (i.to_string(), f.to_string()),
        None => (text, String::new()),
    };
    let padded = format!("{}{:0<width$}", int_part, frac_part, width = decimals as usize);
    let digits = padded.trim_start_matches('0');
    if digits.is_empty() {
        return Ok(U256::zero());
    }
    U256::from_dec_str(digits).map_err(|_| ConversionError::Overflow)
}

/// Goes through the shortest round-trip text form so `0.1_f64` becomes
/// exactly `0.1`.
pub fn f64_to_decimal(value: f64) -> Result<Decimal, ConversionError> {
    if !value.is_finite() {
        return Err(ConversionError::InvalidDecimal(value.to_string()));
    }
    Decimal::from_str(&value.to_string())
        .ok()
        .or_else(|| Decimal::from_f64(value))
        .ok_or_else(|| ConversionError::InvalidDecimal(value.to_string()))
}

pub fn decimal_to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

pub fn string_to_address(s: &str) -> Result<Address, ConversionError> {
    Address::from_str(s.trim()).map_err(|e| ConversionError::InvalidAddress(e.to_string()))
}

#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    #[error("Invalid decimal: {0}")]
    InvalidDecimal(String),
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
    #[error("Overflow in conversion")]
    Overflow,
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scales_by_token_decimals() {
        let raw = U256::from_dec_str("1500000000000000000").unwrap();
        assert_eq!(u256_to_decimal(raw, 18).unwrap(), Decimal::new(15, 1));

        let small = U256::from(5u64);
        assert_eq!(u256_to_decimal(small, 3).unwrap(), Decimal::new(5, 3));
        assert_eq!(u256_to_decimal(U256::zero(), 18).unwrap(), Decimal::ZERO);
    }

    #[test]
    fn integer_overflow_is_reported() {
        assert!(matches!(
            u256_to_decimal(U256::MAX, 0),
            Err(ConversionError::Overflow)
        ));
    }

    #[test]
    fn raw_amount_rejects_non_digits() {
        assert!(parse_raw_amount("150").is_ok());
        assert!(parse_raw_amount("-1").is_err());
        assert!(parse_raw_amount("1.5").is_err());
        assert!(parse_raw_amount("").is_err());
    }

    #[test]
    fn decimal_back_to_raw_amount() {
        assert_eq!(
            decimal_to_u256(Decimal::new(375, 1), 18).unwrap(),
            U256::from_dec_str("37500000000000000000").unwrap()
        );
        assert_eq!(decimal_to_u256(Decimal::ZERO, 6).unwrap(), U256::zero());
        assert!(decimal_to_u256(Decimal::new(-1, 0), 6).is_err());
    }
}
