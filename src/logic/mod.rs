/// Pricing and trade interpretation
///
/// - Price propagation along comparator chains with exact rationals
/// - Swap log classification into buy/sell records
/// - Detection of same-transaction arbitrage round trips
pub mod arbitrage_detector;
pub mod price_oracle;
pub mod swap_classifier;
pub mod types;

pub use arbitrage_detector::{ArbitrageDetector, Detection};
pub use price_oracle::{PriceOracle, price_from_reserves};
pub use swap_classifier::{classify, decode_swap, trade_leg};
pub use types::{SwapAction, SwapRecord, TradeLeg};
