use crate::utils::Rational;
use alloy_primitives::{Address, B256};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// Direction of a trade, seen from the tracked token.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SwapAction {
    /// Comparator asset went into the pool
    Buy,
    Sell,
}

impl SwapAction {
    pub fn opposite(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }
}

/// Direction and scaled amounts of one swap log, before any price is attached.
#[derive(Clone, Debug, PartialEq)]
pub struct TradeLeg {
    pub action: SwapAction,
    pub token_amount: Rational,
    pub comparator_amount: Rational,
}

/// A classified swap as stored in a token's history and published to listeners.
#[derive(Clone, Debug, PartialEq)]
pub struct SwapRecord {
    pub transaction_hash: B256,
    pub log_index: u64,
    /// Originator of the transaction
    pub sender: Address,
    pub action: SwapAction,
    pub token_amount: Rational,
    pub comparator_amount: Rational,
    /// Unavailable while the comparator has no fiat price
    pub fiat_amount: Option<Rational>,
    pub price_in_comparator: Rational,
    pub price_in_fiat: Option<Rational>,
    pub timestamp_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_action_names() {
        assert_eq!(SwapAction::Buy.to_string(), "BUY");
        assert_eq!(SwapAction::from_str("SELL").unwrap(), SwapAction::Sell);
        assert_eq!(serde_json::to_string(&SwapAction::Sell).unwrap(), "\"SELL\"");
        assert_eq!(SwapAction::Buy.opposite(), SwapAction::Sell);
    }
}
