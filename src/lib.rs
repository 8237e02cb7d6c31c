// Layers
pub mod data_sync; // Data Layer: providers, pool subscriptions, event fan-out
pub mod graph; // Node graph: endpoints, factories, tokens and snapshots
pub mod logic; // Logic Layer: price propagation, swap classification, arbitrage detection

// Common utilities and types
pub mod constants;
pub mod feed_error;
pub mod utils;

// Re-export key components from each layer
pub use data_sync::{
    Connector, EventBus, FeedConfig, FeedEvent, FeedService, FeedServiceBuilder, MockConnector, MockProvider, PoolProvider,
    RawLog, RpcConnector, TransactionInfo,
};
pub use feed_error::{FeedError, FeedResult};
pub use graph::{NodeGraph, NodeId, NodeStore, PriceState, Snapshot};
pub use logic::{ArbitrageDetector, Detection, PriceOracle, SwapAction, SwapRecord};
pub use utils::{ArbitrageCache, CacheStats, RateLimiter, Rational, to_decimal};
