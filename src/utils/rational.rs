use crate::feed_error::{FeedError, FeedResult};
use alloy_primitives::U256;
use num_bigint::{BigInt, Sign};
use num_rational::BigRational;
use num_traits::{One, Signed, Zero};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Exact fraction of arbitrary-precision integers, always kept reduced.
pub type Rational = BigRational;

pub fn u256_to_bigint(value: U256) -> BigInt {
    BigInt::from_bytes_be(Sign::Plus, &value.to_be_bytes::<32>())
}

/// 10^decimals as a big integer.
pub fn exp10(decimals: u8) -> BigInt {
    BigInt::from(10u8).pow(decimals as u32)
}

/// Raw on-chain integer amount divided by 10^decimals.
pub fn scale_amount(raw: U256, decimals: u8) -> Rational {
    Rational::new(u256_to_bigint(raw), exp10(decimals))
}

pub fn rational_one() -> Rational {
    Rational::one()
}

/// Renders a rational with a fixed number of (truncated) decimal places.
pub fn to_decimal(value: &Rational, places: usize) -> String {
    let negative = value.is_negative();
    let abs = value.abs();
    let integer = abs.numer() / abs.denom();
    let remainder = abs.numer() % abs.denom();

    let mut out = String::new();
    if negative {
        out.push('-');
    }
    out.push_str(&integer.to_string());
    if places > 0 {
        let fraction = remainder * BigInt::from(10u8).pow(places as u32) / abs.denom();
        out.push('.');
        out.push_str(&format!("{:0>width$}", fraction.to_string(), width = places));
    }
    out
}

pub fn to_decimal_opt(value: Option<&Rational>, places: usize) -> String {
    value.map(|v| to_decimal(v, places)).unwrap_or_else(|| "n/a".to_string())
}

/// Persisted form of a rational: reduced numerator and denominator as decimal strings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RationalRecord {
    pub numer: String,
    pub denom: String,
}

impl From<&Rational> for RationalRecord {
    fn from(value: &Rational) -> Self {
        Self { numer: value.numer().to_string(), denom: value.denom().to_string() }
    }
}

impl TryFrom<&RationalRecord> for Rational {
    type Error = FeedError;

    fn try_from(record: &RationalRecord) -> FeedResult<Self> {
        let numer = BigInt::from_str(&record.numer)
            .map_err(|e| FeedError::Snapshot(format!("invalid numerator {:?}: {}", record.numer, e)))?;
        let denom = BigInt::from_str(&record.denom)
            .map_err(|e| FeedError::Snapshot(format!("invalid denominator {:?}: {}", record.denom, e)))?;
        if denom.is_zero() {
            return Err(FeedError::Snapshot("zero denominator".to_string()));
        }
        Ok(Rational::new(numer, denom))
    }
}

pub fn now_millis() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}
