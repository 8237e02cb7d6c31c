use crate::constants::{DISPLAY_DECIMALS, SWAP_EVENT_TOPIC};
use crate::data_sync::{
    config::FeedConfig,
    events::EventBus,
    provider::{Connector, LogFilter, PoolProvider, RawLog},
    rpc_provider::RpcConnector,
};
use crate::feed_error::{FeedError, FeedResult};
use crate::graph::{NodeId, NodeStore, PriceState, Snapshot};
use crate::logic::{ArbitrageDetector, Detection, PriceOracle, SwapRecord};
use crate::utils::{to_decimal, to_decimal_opt};
use alloy_primitives::Address;
use dashmap::DashMap;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// A log forwarded from a pool subscription to the dispatcher.
#[derive(Clone, Debug)]
struct PoolLog {
    endpoint: NodeId,
    log: RawLog,
}

struct PoolWatcher {
    filter: LogFilter,
    task: JoinHandle<()>,
}

/// Per-log handling shared by the dispatcher and every handler task.
#[derive(Clone)]
struct LogHandler {
    store: Arc<NodeStore>,
    detector: ArbitrageDetector,
    events: Arc<EventBus>,
}

impl LogHandler {
    async fn handle(&self, endpoint: NodeId, log: RawLog) {
        let tokens = match self.detector.tokens_for_log(endpoint, &log).await {
            Ok(tokens) => tokens,
            Err(e) => {
                debug!("Dropping log {} of {}: {}", log.log_index, log.transaction_hash, e);
                return;
            }
        };
        for token in tokens {
            match self.detector.process_log(token, &log).await {
                Ok(Detection::Swap(record)) => self.publish_swap(token, record).await,
                Ok(Detection::Arbitrage { transaction_hash, mirror_token, .. }) => {
                    self.events.publish_arbitrage(token, mirror_token, transaction_hash);
                }
                Ok(Detection::Discarded) => {}
                Err(e) if e.is_transient() => {
                    warn!("Log {} of {} for {} skipped: {}", log.log_index, log.transaction_hash, token, e)
                }
                Err(e) => error!("Log {} of {} for {} failed: {}", log.log_index, log.transaction_hash, token, e),
            }
        }
    }

    async fn publish_swap(&self, token: NodeId, record: SwapRecord) {
        let symbol = match self.store.graph().read().await.token(token) {
            Ok(node) => node.symbol.clone(),
            Err(_) => return,
        };
        info!(
            "{} {} {} at {} in fiat ({})",
            record.action,
            to_decimal(&record.token_amount, DISPLAY_DECIMALS),
            symbol,
            to_decimal_opt(record.price_in_fiat.as_ref(), DISPLAY_DECIMALS),
            record.transaction_hash
        );
        self.events.publish_swap(token, symbol, record);
    }
}

/// Price feed service
///
/// Owns one log subscription per tracked pool. Every subscription forwards into a
/// single dispatcher, which spawns one handler task per log so a slow or failing
/// log never holds up other pools.
pub struct FeedService {
    config: FeedConfig,
    store: Arc<NodeStore>,
    oracle: PriceOracle,
    handler: LogHandler,

    // Channels for communication
    log_tx: mpsc::Sender<PoolLog>,
    log_rx: Option<mpsc::Receiver<PoolLog>>,

    watchers: DashMap<(NodeId, Address), PoolWatcher>,
    dispatcher_task: Option<JoinHandle<()>>,
}

impl FeedService {
    pub fn new(config: FeedConfig, connector: Arc<dyn Connector>) -> Self {
        let store = Arc::new(NodeStore::new(config.clone(), connector));
        Self::from_store(store)
    }

    fn from_store(store: Arc<NodeStore>) -> Self {
        let config = store.config().clone();
        let oracle = PriceOracle::new(store.clone());
        let detector = ArbitrageDetector::new(store.clone(), oracle.clone());
        let events = Arc::new(EventBus::new(config.channel_buffer_size));
        let (log_tx, log_rx) = mpsc::channel(config.channel_buffer_size);

        Self {
            config,
            handler: LogHandler { store: store.clone(), detector, events },
            store,
            oracle,
            log_tx,
            log_rx: Some(log_rx),
            watchers: DashMap::new(),
            dispatcher_task: None,
        }
    }

    /// Rebuilds the graph from a snapshot and resubscribes every tracked pool. Prices are not refreshed.
    pub async fn restore(config: FeedConfig, connector: Arc<dyn Connector>, snapshot: &Snapshot) -> FeedResult<Self> {
        let store = Arc::new(NodeStore::restore(config, connector, snapshot).await?);
        let service = Self::from_store(store);

        let pools: Vec<(NodeId, Address)> = {
            let graph = service.store.graph().read().await;
            graph.tokens().filter_map(|t| t.pool.map(|pool| (t.endpoint, pool))).collect()
        };
        for (endpoint, pool) in pools {
            service.watch_pool(endpoint, pool).await?;
        }
        Ok(service)
    }

    pub async fn snapshot(&self) -> Snapshot {
        self.store.snapshot().await
    }

    pub async fn add_endpoint(&self, connection_key: &str) -> FeedResult<NodeId> {
        Ok(self.store.get_or_create_endpoint(connection_key).await?.id)
    }

    pub async fn add_factory(&self, endpoint: NodeId, address: Address) -> FeedResult<NodeId> {
        Ok(self.store.get_or_create_factory(endpoint, address).await?.id)
    }

    /// Registers a token, reads its first price and starts watching its pool.
    ///
    /// A failed first read leaves the price unavailable until the next swap. Adding a known
    /// token again skips the read but still watches its pool, so a failed subscription can be retried.
    pub async fn add_token(&self, factory: NodeId, token: Address, comparator: Option<NodeId>) -> FeedResult<NodeId> {
        let registered = self.store.get_or_create_token_node(factory, token, comparator).await?;
        if registered.created {
            if let Err(e) = self.oracle.refresh_price(registered.id).await {
                warn!("Initial price read for {} failed: {}", registered.id, e);
            }
        }

        let (endpoint, pool) = {
            let graph = self.store.graph().read().await;
            let node = graph.token(registered.id)?;
            (node.endpoint, node.pool)
        };
        if let Some(pool) = pool {
            self.watch_pool(endpoint, pool).await?;
        }
        Ok(registered.id)
    }

    /// Subscribes to the pool's swap logs. Watching an already watched pool is a no-op.
    pub async fn watch_pool(&self, endpoint: NodeId, pool: Address) -> FeedResult<()> {
        if self.watchers.contains_key(&(endpoint, pool)) {
            return Ok(());
        }
        let provider = self.store.provider(endpoint)?;
        let filter = LogFilter::new(vec![pool], SWAP_EVENT_TOPIC);
        let mut stream = provider.subscribe(&filter).await?;

        let log_tx = self.log_tx.clone();
        let task = tokio::spawn(async move {
            while let Some(log) = stream.next().await {
                if log_tx.send(PoolLog { endpoint, log }).await.is_err() {
                    break;
                }
            }
            debug!("Subscription for pool {} ended", pool);
        });

        match self.watchers.entry((endpoint, pool)) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                // a concurrent call won, keep its subscription
                task.abort();
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(PoolWatcher { filter, task });
                info!("Watching pool {} on {}", pool, endpoint);
            }
        }
        Ok(())
    }

    pub async fn unwatch_pool(&self, endpoint: NodeId, pool: Address) -> FeedResult<()> {
        let Some((_, watcher)) = self.watchers.remove(&(endpoint, pool)) else {
            return Ok(());
        };
        watcher.task.abort();
        self.store.provider(endpoint)?.unsubscribe(&watcher.filter).await?;
        info!("Stopped watching pool {} on {}", pool, endpoint);
        Ok(())
    }

    pub fn watched_pools(&self) -> Vec<(NodeId, Address)> {
        self.watchers.iter().map(|entry| *entry.key()).collect()
    }

    /// Starts the dispatcher that hands every forwarded log to its own task.
    pub fn start(&mut self) -> FeedResult<()> {
        let mut log_rx = self.log_rx.take().ok_or(FeedError::AlreadyStarted)?;
        let handler = self.handler.clone();

        let task = tokio::spawn(async move {
            info!("Dispatcher started");
            while let Some(PoolLog { endpoint, log }) = log_rx.recv().await {
                if log.topic0() != Some(SWAP_EVENT_TOPIC) {
                    continue;
                }
                let handler = handler.clone();
                tokio::spawn(async move { handler.handle(endpoint, log).await });
            }
            info!("Dispatcher ended");
        });
        self.dispatcher_task = Some(task);
        Ok(())
    }

    /// Drops every subscription and stops the dispatcher.
    pub async fn stop(&mut self) -> FeedResult<()> {
        info!("Stopping FeedService");
        let watched = self.watched_pools();
        for (endpoint, pool) in watched {
            if let Err(e) = self.unwatch_pool(endpoint, pool).await {
                warn!("Unsubscribing pool {} failed during shutdown: {}", pool, e);
            }
        }
        if let Some(task) = self.dispatcher_task.take() {
            task.abort();
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!("Dispatcher error during shutdown: {}", e);
                }
            }
        }
        info!("FeedService stopped");
        Ok(())
    }

    /// Processes one log right away, bypassing subscriptions.
    pub async fn handle_log(&self, endpoint: NodeId, log: RawLog) {
        self.handler.handle(endpoint, log).await
    }

    /// Re-reads the price of every tracked token. A failing token keeps its last price
    /// and does not stop the others; the failures are returned.
    pub async fn refresh_all(&self) -> Vec<(NodeId, FeedError)> {
        let tokens: Vec<NodeId> = self.store.graph().read().await.tokens().map(|t| t.id).collect();
        let mut failures = Vec::new();
        for token in tokens {
            if let Err(e) = self.oracle.refresh_price(token).await {
                warn!("Price refresh for {} failed: {}", token, e);
                failures.push((token, e));
            }
        }
        failures
    }

    pub async fn price(&self, token: NodeId) -> FeedResult<PriceState> {
        self.oracle.price_state(token).await
    }

    pub async fn history(&self, token: NodeId) -> FeedResult<Vec<SwapRecord>> {
        Ok(self.store.graph().read().await.token(token)?.history.iter().cloned().collect())
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.handler.events
    }

    pub fn store(&self) -> &Arc<NodeStore> {
        &self.store
    }

    pub fn oracle(&self) -> &PriceOracle {
        &self.oracle
    }

    pub fn is_running(&self) -> bool {
        self.dispatcher_task.as_ref().is_some_and(|task| !task.is_finished())
    }

    pub fn get_config(&self) -> &FeedConfig {
        &self.config
    }
}

impl Drop for FeedService {
    fn drop(&mut self) {
        for entry in self.watchers.iter() {
            entry.value().task.abort();
        }
        if self.is_running() {
            warn!("FeedService dropped while running, dispatcher aborted");
            if let Some(task) = self.dispatcher_task.take() {
                task.abort();
            }
        }
    }
}

/// Builder for FeedService
pub struct FeedServiceBuilder {
    config: Option<FeedConfig>,
    connector: Option<Arc<dyn Connector>>,
    snapshot: Option<Snapshot>,
}

impl FeedServiceBuilder {
    pub fn new() -> Self {
        Self { config: None, connector: None, snapshot: None }
    }

    pub fn with_config(mut self, config: FeedConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn with_snapshot(mut self, snapshot: Snapshot) -> Self {
        self.snapshot = Some(snapshot);
        self
    }

    pub async fn build(self) -> FeedResult<FeedService> {
        let config = self.config.unwrap_or_else(|| FeedConfig::from_env().unwrap_or_default());
        let connector = self.connector.unwrap_or_else(|| Arc::new(RpcConnector));

        match self.snapshot {
            Some(snapshot) => FeedService::restore(config, connector, &snapshot).await,
            None => Ok(FeedService::new(config, connector)),
        }
    }
}

impl Default for FeedServiceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_sync::mock_provider::{MockConnector, MockProvider};
    use alloy_primitives::U256;

    fn mock_service() -> (Arc<MockProvider>, FeedService) {
        let mock = Arc::new(MockProvider::new());
        let config = FeedConfig { rate_limit_interval_ms: 0, ..FeedConfig::default() };
        let service = FeedService::new(config, Arc::new(MockConnector::new(mock.clone())));
        (mock, service)
    }

    #[tokio::test]
    async fn test_service_creation() {
        let (_mock, service) = mock_service();
        assert!(!service.is_running());
        assert!(service.watched_pools().is_empty());
        assert_eq!(service.get_config().arbitrage_cache_capacity, 30);
    }

    #[tokio::test]
    async fn test_builder_pattern() {
        let mock = Arc::new(MockProvider::new());
        let service = FeedServiceBuilder::new().with_connector(Arc::new(MockConnector::new(mock))).build().await;
        assert!(service.is_ok());
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let (_mock, mut service) = mock_service();
        service.start().unwrap();
        assert!(service.is_running());
        assert!(service.start().is_err());
        service.stop().await.unwrap();
        assert!(!service.is_running());
    }

    #[tokio::test]
    async fn test_watch_and_unwatch_pool() {
        let (mock, service) = mock_service();
        let endpoint = service.add_endpoint("mock").await.unwrap();
        let pool = Address::repeat_byte(0x10);

        service.watch_pool(endpoint, pool).await.unwrap();
        service.watch_pool(endpoint, pool).await.unwrap();
        assert_eq!(mock.subscriber_count(&pool), 1);
        assert_eq!(service.watched_pools(), vec![(endpoint, pool)]);

        service.unwatch_pool(endpoint, pool).await.unwrap();
        assert_eq!(mock.subscriber_count(&pool), 0);
        assert!(service.watched_pools().is_empty());
    }

    #[tokio::test]
    async fn test_add_token_again_resubscribes_after_failure() {
        let (mock, service) = mock_service();
        let factory_address = Address::repeat_byte(0xfa);
        let (usd, wftm, pool) = (Address::repeat_byte(0x01), Address::repeat_byte(0x02), Address::repeat_byte(0x10));
        mock.add_token(usd, 6, "USD");
        mock.add_token(wftm, 18, "WFTM");
        mock.add_pair(factory_address, wftm, usd, pool);
        mock.set_reserves(pool, U256::from(3_000_000u64), U256::from(2_000_000_000_000_000_000u64));

        let endpoint = service.add_endpoint("mock").await.unwrap();
        let factory = service.add_factory(endpoint, factory_address).await.unwrap();
        let usd_id = service.add_token(factory, usd, None).await.unwrap();

        mock.fail_subscriptions(1);
        assert!(service.add_token(factory, wftm, Some(usd_id)).await.is_err());
        assert!(service.watched_pools().is_empty());
        assert_eq!(mock.subscriber_count(&pool), 0);

        let reserve_calls = mock.reserve_call_count();
        let wftm_id = service.add_token(factory, wftm, Some(usd_id)).await.unwrap();
        assert_eq!(service.watched_pools(), vec![(endpoint, pool)]);
        assert_eq!(mock.subscriber_count(&pool), 1);
        // the node kept the price read by the first attempt
        assert_eq!(mock.reserve_call_count(), reserve_calls);
        assert!(service.price(wftm_id).await.unwrap().in_fiat.is_some());
    }
}
