/// Data Synchronization Layer
///
/// Connects the pricing logic to the chain:
///
/// - Provider trait with a rate-limited wrapper per endpoint
/// - JSON-RPC implementation over alloy and an in-memory mock
/// - One log subscription per tracked pool feeding a single dispatcher
/// - Broadcast of swap and arbitrage events per token and globally

pub mod abi;
pub mod config;
pub mod events;
pub mod mock_provider;
pub mod provider;
pub mod rpc_provider;
pub mod service;


pub use config::FeedConfig;
pub use events::{EventBus, FeedEvent};
pub use mock_provider::{MockConnector, MockProvider};
pub use provider::{Connector, LogFilter, LogStream, PoolProvider, RateLimitedProvider, RawLog, TokenMetadata, TransactionInfo};
pub use rpc_provider::{RpcConnector, RpcProvider};
pub use service::{FeedService, FeedServiceBuilder};
