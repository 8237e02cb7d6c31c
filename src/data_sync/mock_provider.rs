use super::provider::{Connector, LogFilter, LogStream, PoolProvider, RawLog, TokenMetadata, TransactionInfo};
use crate::feed_error::{FeedError, FeedResult};
use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use futures::StreamExt;
use futures::channel::mpsc::{UnboundedSender, unbounded};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// In-memory chain used by tests and benches.
#[derive(Default)]
pub struct MockProvider {
    reserves: DashMap<Address, (U256, U256)>,
    // (factory, lower token, higher token) -> pool
    pairs: DashMap<(Address, Address, Address), Address>,
    token0: DashMap<Address, Address>,
    metadata: DashMap<Address, TokenMetadata>,
    transactions: DashMap<B256, (TransactionInfo, Vec<RawLog>)>,
    subscribers: DashMap<Address, Vec<(B256, UnboundedSender<RawLog>)>>,
    failing_pools: DashSet<Address>,
    subscribe_failures: AtomicU64,
    calls: AtomicU64,
    reserve_calls: AtomicU64,
}

fn sorted(token_a: Address, token_b: Address) -> (Address, Address) {
    if token_a < token_b { (token_a, token_b) } else { (token_b, token_a) }
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_token(&self, address: Address, decimals: u8, symbol: &str) {
        self.metadata.insert(address, TokenMetadata { decimals, symbol: symbol.to_string() });
    }

    /// Registers a pool; token0 follows the Uniswap V2 rule (lower address first).
    pub fn add_pair(&self, factory: Address, token_a: Address, token_b: Address, pool: Address) {
        let (low, high) = sorted(token_a, token_b);
        self.pairs.insert((factory, low, high), pool);
        self.token0.insert(pool, low);
    }

    pub fn set_reserves(&self, pool: Address, reserve0: U256, reserve1: U256) {
        self.reserves.insert(pool, (reserve0, reserve1));
    }

    pub fn fail_reserves(&self, pool: Address, failing: bool) {
        if failing {
            self.failing_pools.insert(pool);
        } else {
            self.failing_pools.remove(&pool);
        }
    }

    /// The next `count` subscriptions fail.
    pub fn fail_subscriptions(&self, count: u64) {
        self.subscribe_failures.store(count, Ordering::Relaxed);
    }

    pub fn add_transaction(&self, transaction: TransactionInfo, logs: Vec<RawLog>) {
        self.transactions.insert(transaction.hash, (transaction, logs));
    }

    /// Pushes a log to every live subscription matching its pool and topic. Returns the delivery count.
    pub fn emit(&self, log: RawLog) -> usize {
        let Some(mut subscribers) = self.subscribers.get_mut(&log.address) else {
            return 0;
        };
        subscribers.retain(|(_, sender)| !sender.is_closed());
        let mut delivered = 0;
        for (topic, sender) in subscribers.iter() {
            if log.topic0() == Some(*topic) && sender.unbounded_send(log.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    pub fn subscriber_count(&self, pool: &Address) -> usize {
        self.subscribers.get(pool).map(|s| s.iter().filter(|(_, sender)| !sender.is_closed()).count()).unwrap_or(0)
    }

    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn reserve_call_count(&self) -> u64 {
        self.reserve_calls.load(Ordering::Relaxed)
    }

    fn record_call(&self) {
        self.calls.fetch_add(1, Ordering::Relaxed);
    }
}

#[async_trait]
impl PoolProvider for MockProvider {
    async fn get_reserves(&self, pool: Address) -> FeedResult<(U256, U256)> {
        self.record_call();
        self.reserve_calls.fetch_add(1, Ordering::Relaxed);
        if self.failing_pools.contains(&pool) {
            return Err(FeedError::ProviderTransient(format!("getReserves reverted for {}", pool)));
        }
        self.reserves.get(&pool).map(|r| *r).ok_or_else(|| FeedError::ProviderTransient(format!("no reserves for {}", pool)))
    }

    async fn get_pair_address(&self, factory: Address, token_a: Address, token_b: Address) -> FeedResult<Option<Address>> {
        self.record_call();
        let (low, high) = sorted(token_a, token_b);
        Ok(self.pairs.get(&(factory, low, high)).map(|p| *p))
    }

    async fn get_pool_token0(&self, pool: Address) -> FeedResult<Address> {
        self.record_call();
        self.token0.get(&pool).map(|t| *t).ok_or_else(|| FeedError::ProviderTransient(format!("unknown pool {}", pool)))
    }

    async fn get_token_metadata(&self, token: Address) -> FeedResult<TokenMetadata> {
        self.record_call();
        self.metadata.get(&token).map(|m| m.clone()).ok_or_else(|| FeedError::ProviderTransient(format!("no metadata for {}", token)))
    }

    async fn get_transaction(&self, hash: B256) -> FeedResult<TransactionInfo> {
        self.record_call();
        self.transactions
            .get(&hash)
            .map(|entry| entry.0.clone())
            .ok_or_else(|| FeedError::ProviderTransient(format!("transaction {} not found", hash)))
    }

    async fn get_receipt(&self, transaction: &TransactionInfo) -> FeedResult<Vec<RawLog>> {
        self.record_call();
        self.transactions
            .get(&transaction.hash)
            .map(|entry| entry.1.clone())
            .ok_or_else(|| FeedError::ProviderTransient(format!("receipt {} not found", transaction.hash)))
    }

    async fn subscribe(&self, filter: &LogFilter) -> FeedResult<LogStream> {
        if self.subscribe_failures.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1)).is_ok() {
            return Err(FeedError::ProviderTransient("subscription refused".to_string()));
        }
        let (sender, receiver) = unbounded();
        for address in &filter.addresses {
            self.subscribers.entry(*address).or_default().push((filter.topic, sender.clone()));
        }
        Ok(receiver.boxed())
    }

    async fn unsubscribe(&self, filter: &LogFilter) -> FeedResult<()> {
        for address in &filter.addresses {
            if let Some(mut subscribers) = self.subscribers.get_mut(address) {
                subscribers.retain(|(topic, _)| *topic != filter.topic);
            }
        }
        Ok(())
    }
}

/// Hands out the same mock for every connection key.
pub struct MockConnector {
    provider: Arc<MockProvider>,
    connects: AtomicU64,
}

impl MockConnector {
    pub fn new(provider: Arc<MockProvider>) -> Self {
        Self { provider, connects: AtomicU64::new(0) }
    }

    pub fn connect_count(&self) -> u64 {
        self.connects.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, _connection_key: &str) -> FeedResult<Arc<dyn PoolProvider>> {
        self.connects.fetch_add(1, Ordering::Relaxed);
        Ok(self.provider.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::SWAP_EVENT_TOPIC;
    use alloy_primitives::Bytes;

    #[tokio::test]
    async fn test_pair_lookup_is_order_independent() {
        let mock = MockProvider::new();
        let factory = Address::repeat_byte(0xfa);
        let (a, b, pool) = (Address::repeat_byte(0x02), Address::repeat_byte(0x01), Address::repeat_byte(0x10));
        mock.add_pair(factory, a, b, pool);

        assert_eq!(mock.get_pair_address(factory, a, b).await.unwrap(), Some(pool));
        assert_eq!(mock.get_pair_address(factory, b, a).await.unwrap(), Some(pool));
        assert_eq!(mock.get_pool_token0(pool).await.unwrap(), b);
        assert_eq!(mock.get_pair_address(Address::ZERO, a, b).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_emit_reaches_subscribers() {
        let mock = MockProvider::new();
        let pool = Address::repeat_byte(0x10);
        let filter = LogFilter::new(vec![pool], SWAP_EVENT_TOPIC);
        let mut stream = mock.subscribe(&filter).await.unwrap();

        let log = RawLog {
            address: pool,
            topics: vec![SWAP_EVENT_TOPIC],
            data: Bytes::new(),
            log_index: 1,
            transaction_hash: B256::repeat_byte(0xaa),
        };
        assert_eq!(mock.emit(log.clone()), 1);
        assert_eq!(stream.next().await, Some(log.clone()));

        mock.unsubscribe(&filter).await.unwrap();
        assert_eq!(mock.emit(log), 0);
    }
}
