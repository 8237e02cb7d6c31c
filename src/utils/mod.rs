pub mod cache;
pub mod config_loader;
pub mod rate_limiter;
pub mod rational;

pub use cache::{ArbitrageCache, ArbitrageCacheEntry, CacheStats};
pub use config_loader::*;
pub use rate_limiter::RateLimiter;
pub use rational::{Rational, RationalRecord, now_millis, scale_amount, to_decimal, to_decimal_opt};
