//! Fixed-point codec between human-facing values and ledger integers.
//!
//! Three numeric domains are scaled independently:
//! - USD amounts (collateral, margin, PnL): 10^6
//! - Prices: 10^6
//! - Position sizes (base-asset units): 10^8
//!
//! Rates travel as basis points and leverage as a plain integer.
//!
//! Encoding goes through `rust_decimal` using the shortest decimal text of the
//! float, so `1.005` encodes as `1_005_000` rather than inheriting binary
//! representation error. Ties round half-to-even.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const USD_DECIMALS: u32 = 6;
pub const PRICE_DECIMALS: u32 = 6;
pub const SIZE_DECIMALS: u32 = 8;

pub const USD_SCALE: i64 = 1_000_000;
pub const PRICE_SCALE: i64 = 1_000_000;
pub const SIZE_SCALE: i64 = 100_000_000;

/// Denominator of a basis-point rate (1 bp = 0.01%).
pub const BPS_DENOMINATOR: u64 = 10_000;

/// Numeric domain of a scaled ledger field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Domain {
    Usd,
    Price,
    Size,
}

impl Domain {
    pub fn decimals(&self) -> u32 {
        match self {
            Domain::Usd => USD_DECIMALS,
            Domain::Price => PRICE_DECIMALS,
            Domain::Size => SIZE_DECIMALS,
        }
    }

    pub fn scale(&self) -> i64 {
        match self {
            Domain::Usd => USD_SCALE,
            Domain::Price => PRICE_SCALE,
            Domain::Size => SIZE_SCALE,
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Domain::Usd => write!(f, "usd"),
            Domain::Price => write!(f, "price"),
            Domain::Size => write!(f, "size"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CodecError {
    #[error("{domain} value {value} is not a finite number")]
    NotFinite { domain: Domain, value: f64 },
    #[error("{domain} value {value} does not fit the 64-bit wire integer")]
    Overflow { domain: Domain, value: f64 },
    #[error("{domain} value {value} is negative but the wire field is unsigned")]
    Negative { domain: Domain, value: f64 },
    #[error("rate {0}% cannot be expressed in 16-bit basis points")]
    RateOutOfRange(f64),
}

/// Encode a float into the domain's signed wire integer.
pub fn encode(domain: Domain, value: f64) -> Result<i64, CodecError> {
    if !value.is_finite() {
        return Err(CodecError::NotFinite { domain, value });
    }
    let decimal = match Decimal::from_str(&value.to_string()) {
        Ok(d) => d,
        // Too many fractional digits for rust_decimal: far below every scale here.
        Err(_) if value.abs() < 1.0 => Decimal::ZERO,
        Err(_) => return Err(CodecError::Overflow { domain, value }),
    };
    encode_decimal(domain, decimal).map_err(|_| CodecError::Overflow { domain, value })
}

/// Encode a float into an unsigned wire field (amounts, prices).
pub fn encode_unsigned(domain: Domain, value: f64) -> Result<u64, CodecError> {
    if value.is_finite() && value < 0.0 {
        return Err(CodecError::Negative { domain, value });
    }
    let raw = encode(domain, value)?;
    // Rounding cannot turn a non-negative input negative.
    Ok(raw.unsigned_abs())
}

/// Encode an exact decimal into the domain's signed wire integer.
pub fn encode_decimal(domain: Domain, value: Decimal) -> Result<i64, CodecError> {
    let overflow = || CodecError::Overflow {
        domain,
        value: value.to_f64().unwrap_or(f64::INFINITY),
    };
    let scaled = value
        .checked_mul(Decimal::from(domain.scale()))
        .ok_or_else(overflow)?;
    scaled
        .round_dp_with_strategy(0, RoundingStrategy::MidpointNearestEven)
        .to_i64()
        .ok_or_else(overflow)
}

/// Decode a signed wire integer to a float by dividing by the domain scale.
pub fn decode(domain: Domain, raw: i64) -> f64 {
    raw as f64 / domain.scale() as f64
}

/// Decode an unsigned wire integer to a float.
pub fn decode_unsigned(domain: Domain, raw: u64) -> f64 {
    raw as f64 / domain.scale() as f64
}

/// Decode a wire integer without any precision loss.
pub fn decode_decimal(domain: Domain, raw: i64) -> Decimal {
    Decimal::new(raw, domain.decimals())
}

/// Basis points to percent (1000 bps -> 10.0).
pub fn bps_to_percent(bps: u16) -> f64 {
    bps as f64 / 100.0
}

/// Percent to basis points, rounding half-to-even.
pub fn percent_to_bps(percent: f64) -> Result<u16, CodecError> {
    if !percent.is_finite() || percent < 0.0 {
        return Err(CodecError::RateOutOfRange(percent));
    }
    let bps = Decimal::from_str(&percent.to_string())
        .ok()
        .and_then(|d| d.checked_mul(Decimal::ONE_HUNDRED))
        .map(|d| d.round_dp_with_strategy(0, RoundingStrategy::MidpointNearestEven))
        .and_then(|d| d.to_u16());
    bps.ok_or(CodecError::RateOutOfRange(percent))
}
