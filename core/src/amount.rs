//! Token quantities.
//!
//! The contracts speak in raw `uint256` integers; users speak in decimal
//! strings scaled by the token's `decimals()`. Input is validated strictly
//! here, and the scaling itself is done by `alloy_primitives::utils`.

use alloy_primitives::utils;
use serde::{Serialize, Serializer};
use std::fmt;
use thiserror::Error;

/// 256-bit unsigned integer, the native width of contract quantities.
pub use alloy_primitives::U256;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmountError {
    #[error("amount is empty")]
    Empty,

    #[error("`{0}` is not a decimal number")]
    InvalidFormat(String),

    #[error("at most {max} fractional digits are allowed")]
    TooManyDecimals { max: u8 },

    #[error("amount must be greater than zero")]
    NotPositive,

    #[error("amount does not fit in 256 bits")]
    Overflow,

    #[error("tokens with {0} decimals are not supported")]
    UnsupportedDecimals(u8),
}

/// Largest scale `alloy_primitives::utils::Unit` supports.
const MAX_DECIMALS: u8 = 77;

/// Parse a user-entered decimal string into raw token units.
///
/// Accepts `"12"`, `"12.5"`, `"0.000001"` and `".5"`. Rejects signs,
/// exponents, separators and anything with more than `decimals` fractional
/// digits. Zero is accepted here; use [`parse_positive_units`] for inputs
/// that must be strictly positive.
pub fn parse_units(input: &str, decimals: u8) -> Result<U256, AmountError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(AmountError::Empty);
    }

    let (int_part, frac_part) = input.split_once('.').unwrap_or((input, ""));
    let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(int_part) || !all_digits(frac_part) || (int_part.is_empty() && frac_part.is_empty())
    {
        return Err(AmountError::InvalidFormat(input.to_string()));
    }
    if frac_part.len() > decimals as usize {
        return Err(AmountError::TooManyDecimals { max: decimals });
    }
    if decimals > MAX_DECIMALS {
        return Err(AmountError::UnsupportedDecimals(decimals));
    }

    // alloy truncates excess precision and accepts signs; both are excluded above.
    let int_part = if int_part.is_empty() { "0" } else { int_part };
    let normalized = match frac_part {
        "" => int_part.to_string(),
        frac => format!("{int_part}.{frac}"),
    };
    utils::parse_units(&normalized, decimals)
        .map(|parsed| parsed.get_absolute())
        .map_err(|_| AmountError::Overflow)
}

/// Like [`parse_units`], but zero is rejected.
pub fn parse_positive_units(input: &str, decimals: u8) -> Result<U256, AmountError> {
    let raw = parse_units(input, decimals)?;
    if raw.is_zero() {
        return Err(AmountError::NotPositive);
    }
    Ok(raw)
}

/// Render raw token units as a decimal string, trimming trailing zeros.
pub fn format_units(raw: U256, decimals: u8) -> String {
    let Ok(text) = utils::format_units(raw, decimals) else {
        return raw.to_string();
    };
    match text.split_once('.') {
        Some((int_part, frac_part)) => match frac_part.trim_end_matches('0') {
            "" => int_part.to_string(),
            frac => format!("{int_part}.{frac}"),
        },
        None => text,
    }
}

/// A raw on-chain quantity together with the scale needed to display it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenAmount {
    pub raw: U256,
    pub decimals: u8,
}

impl TokenAmount {
    pub fn new(raw: U256, decimals: u8) -> Self {
        Self { raw, decimals }
    }

    pub fn zero(decimals: u8) -> Self {
        Self::new(U256::ZERO, decimals)
    }

    pub fn is_zero(&self) -> bool {
        self.raw.is_zero()
    }
}

impl fmt::Display for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_units(self.raw, self.decimals))
    }
}

impl Serialize for TokenAmount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Repr {
            raw: String,
            decimals: u8,
            formatted: String,
        }
        Repr {
            raw: self.raw.to_string(),
            decimals: self.decimals,
            formatted: self.to_string(),
        }
        .serialize(serializer)
    }
}

/// Serialize a bare `U256` as its decimal string.
pub(crate) fn serialize_u256<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}
