use crate::feed_error::FeedResult;
use crate::utils::RateLimiter;
use alloy_primitives::{Address, B256, Bytes, U256};
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// A log as delivered by a subscription or found in a receipt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub log_index: u64,
    pub transaction_hash: B256,
}

impl RawLog {
    pub fn topic0(&self) -> Option<B256> {
        self.topics.first().copied()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransactionInfo {
    pub hash: B256,
    pub from: Address,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct LogFilter {
    pub addresses: Vec<Address>,
    pub topic: B256,
}

impl LogFilter {
    pub fn new(addresses: Vec<Address>, topic: B256) -> Self {
        Self { addresses, topic }
    }

    pub fn matches(&self, log: &RawLog) -> bool {
        log.topic0() == Some(self.topic) && (self.addresses.is_empty() || self.addresses.contains(&log.address))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenMetadata {
    pub decimals: u8,
    pub symbol: String,
}

pub type LogStream = BoxStream<'static, RawLog>;

/// Chain access needed by the feed. Every call is a suspension point.
#[async_trait]
pub trait PoolProvider: Send + Sync {
    async fn get_reserves(&self, pool: Address) -> FeedResult<(U256, U256)>;

    /// `None` when the factory has no pool for the pair.
    async fn get_pair_address(&self, factory: Address, token_a: Address, token_b: Address) -> FeedResult<Option<Address>>;

    async fn get_pool_token0(&self, pool: Address) -> FeedResult<Address>;

    async fn get_token_metadata(&self, token: Address) -> FeedResult<TokenMetadata>;

    async fn get_transaction(&self, hash: B256) -> FeedResult<TransactionInfo>;

    async fn get_receipt(&self, transaction: &TransactionInfo) -> FeedResult<Vec<RawLog>>;

    async fn subscribe(&self, filter: &LogFilter) -> FeedResult<LogStream>;

    async fn unsubscribe(&self, filter: &LogFilter) -> FeedResult<()>;
}

/// Turns an endpoint connection key into a provider.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, connection_key: &str) -> FeedResult<Arc<dyn PoolProvider>>;
}

/// Funnels every outbound call of one endpoint through a single token bucket.
pub struct RateLimitedProvider {
    inner: Arc<dyn PoolProvider>,
    limiter: RateLimiter,
}

impl RateLimitedProvider {
    pub fn new(inner: Arc<dyn PoolProvider>, requests_per_interval: u32, interval: Duration) -> Self {
        Self { inner, limiter: RateLimiter::new(requests_per_interval, interval) }
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }
}

#[async_trait]
impl PoolProvider for RateLimitedProvider {
    async fn get_reserves(&self, pool: Address) -> FeedResult<(U256, U256)> {
        self.limiter.acquire().await;
        self.inner.get_reserves(pool).await
    }

    async fn get_pair_address(&self, factory: Address, token_a: Address, token_b: Address) -> FeedResult<Option<Address>> {
        self.limiter.acquire().await;
        self.inner.get_pair_address(factory, token_a, token_b).await
    }

    async fn get_pool_token0(&self, pool: Address) -> FeedResult<Address> {
        self.limiter.acquire().await;
        self.inner.get_pool_token0(pool).await
    }

    async fn get_token_metadata(&self, token: Address) -> FeedResult<TokenMetadata> {
        self.limiter.acquire().await;
        self.inner.get_token_metadata(token).await
    }

    async fn get_transaction(&self, hash: B256) -> FeedResult<TransactionInfo> {
        self.limiter.acquire().await;
        self.inner.get_transaction(hash).await
    }

    async fn get_receipt(&self, transaction: &TransactionInfo) -> FeedResult<Vec<RawLog>> {
        self.limiter.acquire().await;
        self.inner.get_receipt(transaction).await
    }

    async fn subscribe(&self, filter: &LogFilter) -> FeedResult<LogStream> {
        self.limiter.acquire().await;
        self.inner.subscribe(filter).await
    }

    async fn unsubscribe(&self, filter: &LogFilter) -> FeedResult<()> {
        self.limiter.acquire().await;
        self.inner.unsubscribe(filter).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::SWAP_EVENT_TOPIC;
    use crate::data_sync::mock_provider::MockProvider;

    fn log_at(address: Address, topic: B256) -> RawLog {
        RawLog { address, topics: vec![topic], data: Bytes::new(), log_index: 0, transaction_hash: B256::ZERO }
    }

    #[test]
    fn test_filter_matching() {
        let pool = Address::repeat_byte(0x01);
        let filter = LogFilter::new(vec![pool], SWAP_EVENT_TOPIC);

        assert!(filter.matches(&log_at(pool, SWAP_EVENT_TOPIC)));
        assert!(!filter.matches(&log_at(Address::repeat_byte(0x02), SWAP_EVENT_TOPIC)));
        assert!(!filter.matches(&log_at(pool, B256::repeat_byte(0x03))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_provider_throttles_calls() {
        let mock = Arc::new(MockProvider::new());
        let pool = Address::repeat_byte(0x01);
        mock.set_reserves(pool, U256::from(1), U256::from(2));

        let limited = RateLimitedProvider::new(mock.clone(), 2, Duration::from_secs(1));
        let start = tokio::time::Instant::now();
        for _ in 0..5 {
            assert_eq!(limited.get_reserves(pool).await.unwrap(), (U256::from(1), U256::from(2)));
        }
        // 2 immediately, 2 after one interval, 1 after two intervals
        assert!(start.elapsed() >= Duration::from_secs(2));
        assert_eq!(mock.call_count(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscription_calls_take_tokens() {
        let mock = Arc::new(MockProvider::new());
        let filter = LogFilter::new(vec![Address::repeat_byte(0x01)], SWAP_EVENT_TOPIC);

        let limited = RateLimitedProvider::new(mock, 2, Duration::from_secs(1));
        let _stream = limited.subscribe(&filter).await.unwrap();
        limited.unsubscribe(&filter).await.unwrap();
        assert!(!limited.limiter().try_acquire().await);
    }
}
