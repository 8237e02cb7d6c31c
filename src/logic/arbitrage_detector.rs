use super::price_oracle::PriceOracle;
use super::swap_classifier::{classify, trade_leg_for};
use super::types::{SwapRecord, TradeLeg};
use crate::constants::SWAP_EVENT_TOPIC;
use crate::data_sync::provider::{PoolProvider, RawLog, TransactionInfo};
use crate::feed_error::{FeedError, FeedResult};
use crate::graph::{NodeGraph, NodeId, NodeStore};
use alloy_primitives::B256;
use std::sync::Arc;
use tracing::{debug, info};

/// What became of one incoming swap log.
#[derive(Clone, Debug, PartialEq)]
pub enum Detection {
    /// Already attributed to an arbitrage pair
    Discarded,
    /// This log and a mirror leg form one arbitrage
    Arbitrage { transaction_hash: B256, mirror_log_index: u64, mirror_token: NodeId },
    Swap(SwapRecord),
}

struct Leg {
    token: NodeId,
    trade: TradeLeg,
}

/// Both legs move the same token the opposite way by the same amount.
fn same_token_round_trip(graph: &NodeGraph, a: &Leg, b: &Leg) -> FeedResult<bool> {
    Ok(graph.token(a.token)?.address == graph.token(b.token)?.address
        && a.trade.action == b.trade.action.opposite()
        && a.trade.token_amount == b.trade.token_amount)
}

/// `b` trades `a`'s comparator in the same direction, paying the amount of token `a` moved.
fn comparator_hop(graph: &NodeGraph, a: &Leg, b: &Leg) -> FeedResult<bool> {
    let Some(comparator) = graph.token(a.token)?.comparator else {
        return Ok(false);
    };
    Ok(graph.token(b.token)?.address == graph.token(comparator)?.address
        && a.trade.action == b.trade.action
        && b.trade.comparator_amount == a.trade.token_amount)
}

fn is_mirror(graph: &NodeGraph, a: &Leg, b: &Leg) -> FeedResult<bool> {
    Ok(same_token_round_trip(graph, a, b)? || comparator_hop(graph, a, b)? || comparator_hop(graph, b, a)?)
}

/// First unconsumed log of the transaction, in log order, that mirrors `this`, with the token it matched.
fn find_mirror(
    graph: &NodeGraph,
    endpoint: NodeId,
    this: &Leg,
    log: &RawLog,
    logs: &[RawLog],
) -> FeedResult<Option<(u64, NodeId)>> {
    let cache = &graph.endpoint(endpoint)?.arbitrage_cache;
    let mut candidates: Vec<&RawLog> = logs
        .iter()
        .filter(|c| c.log_index != log.log_index && c.topic0() == Some(SWAP_EVENT_TOPIC))
        .filter(|c| !cache.is_consumed(&log.transaction_hash, c.log_index))
        .collect();
    candidates.sort_by_key(|c| c.log_index);

    for candidate in candidates {
        for token in graph.tokens_for_pool(&candidate.address) {
            if graph.token(*token)?.endpoint != endpoint {
                continue;
            }
            // undecodable neighbours are simply not mirrors
            let Ok(trade) = trade_leg_for(graph, *token, candidate) else {
                continue;
            };
            if is_mirror(graph, this, &Leg { token: *token, trade })? {
                return Ok(Some((candidate.log_index, *token)));
            }
        }
    }
    Ok(None)
}

/// Separates same-transaction arbitrage round trips from ordinary swaps.
#[derive(Clone)]
pub struct ArbitrageDetector {
    store: Arc<NodeStore>,
    oracle: PriceOracle,
}

impl ArbitrageDetector {
    pub fn new(store: Arc<NodeStore>, oracle: PriceOracle) -> Self {
        Self { store, oracle }
    }

    async fn fetch_transaction(&self, endpoint: NodeId, hash: B256) -> FeedResult<(TransactionInfo, Vec<RawLog>)> {
        let provider = self.store.provider(endpoint)?;
        let transaction = provider.get_transaction(hash).await?;
        let logs = provider.get_receipt(&transaction).await?;
        Ok((transaction, logs))
    }

    /// Classifies one swap log of the pool tracked by `token`.
    ///
    /// All provider calls happen first. The consumed check, the mirror scan and the
    /// marking then run under one write lock, so sibling logs handled concurrently
    /// yield a single arbitrage.
    pub async fn process_log(&self, token: NodeId, log: &RawLog) -> FeedResult<Detection> {
        let hash = log.transaction_hash;
        let (endpoint, cached) = {
            let graph = self.store.graph().read().await;
            let endpoint = graph.token(token)?.endpoint;
            let cache = &graph.endpoint(endpoint)?.arbitrage_cache;
            let cached = cache.get(&hash).map(|entry| (entry.is_consumed(log.log_index), entry.transaction.clone(), entry.logs.clone()));
            (endpoint, cached)
        };

        let (transaction, logs) = match cached {
            Some((true, _, _)) => {
                debug!("Log {} of {} already attributed to arbitrage", log.log_index, hash);
                return Ok(Detection::Discarded);
            }
            Some((false, transaction, logs)) => {
                self.oracle.refresh_price(token).await?;
                (transaction, logs)
            }
            None => {
                let (fetched, _) =
                    tokio::try_join!(self.fetch_transaction(endpoint, hash), self.oracle.refresh_price(token))?;
                fetched
            }
        };

        let mut graph = self.store.graph().write().await;
        if graph.endpoint(endpoint)?.arbitrage_cache.is_consumed(&hash, log.log_index) {
            return Ok(Detection::Discarded);
        }

        let this = Leg { token, trade: trade_leg_for(&graph, token, log)? };
        if let Some((mirror, mirror_token)) = find_mirror(&graph, endpoint, &this, log, &logs)? {
            graph.endpoint_mut(endpoint)?.arbitrage_cache.mark_consumed(transaction, logs, &[log.log_index, mirror]);
            info!("Arbitrage in {} (logs {} and {})", hash, log.log_index, mirror);
            return Ok(Detection::Arbitrage { transaction_hash: hash, mirror_log_index: mirror, mirror_token });
        }

        let record = classify(&mut graph, token, log, transaction.from)?;
        Ok(Detection::Swap(record))
    }

    /// Tokens whose pool emitted the log, restricted to one endpoint.
    pub async fn tokens_for_log(&self, endpoint: NodeId, log: &RawLog) -> FeedResult<Vec<NodeId>> {
        let graph = self.store.graph().read().await;
        let mut tokens = Vec::new();
        for token in graph.tokens_for_pool(&log.address) {
            if graph.token(*token)?.endpoint == endpoint {
                tokens.push(*token);
            }
        }
        if tokens.is_empty() {
            return Err(FeedError::Decode(format!("log from untracked pool {}", log.address)));
        }
        Ok(tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_sync::config::FeedConfig;
    use crate::data_sync::mock_provider::{MockConnector, MockProvider};
    use crate::logic::swap_classifier::tests::swap_log;
    use crate::logic::types::SwapAction;
    use alloy_primitives::{Address, U256};

    const FACTORY: Address = Address::repeat_byte(0xfa);
    const USD: Address = Address::repeat_byte(0x01);
    const WFTM: Address = Address::repeat_byte(0x02);
    const TOK: Address = Address::repeat_byte(0x03);
    const WFTM_USD: Address = Address::repeat_byte(0x10);
    const TOK_WFTM: Address = Address::repeat_byte(0x11);
    const TOK_USD: Address = Address::repeat_byte(0x12);
    const TX: B256 = B256::repeat_byte(0xaa);

    struct Fixture {
        mock: Arc<MockProvider>,
        store: Arc<NodeStore>,
        detector: ArbitrageDetector,
        wftm: NodeId,
        tok_wftm: NodeId,
        tok_usd: NodeId,
    }

    async fn fixture() -> Fixture {
        let mock = Arc::new(MockProvider::new());
        for (address, symbol) in [(USD, "USD"), (WFTM, "WFTM"), (TOK, "TOK")] {
            mock.add_token(address, 18, symbol);
        }
        mock.add_pair(FACTORY, WFTM, USD, WFTM_USD);
        mock.add_pair(FACTORY, TOK, WFTM, TOK_WFTM);
        mock.add_pair(FACTORY, TOK, USD, TOK_USD);
        for pool in [WFTM_USD, TOK_WFTM, TOK_USD] {
            mock.set_reserves(pool, U256::from(1_000u64), U256::from(1_000u64));
        }

        let config = FeedConfig { rate_limit_interval_ms: 0, ..FeedConfig::default() };
        let store = Arc::new(NodeStore::new(config, Arc::new(MockConnector::new(mock.clone()))));
        let endpoint = store.get_or_create_endpoint("mock").await.unwrap().id;
        let factory = store.get_or_create_factory(endpoint, FACTORY).await.unwrap().id;
        let usd = store.get_or_create_token_node(factory, USD, None).await.unwrap().id;
        let wftm = store.get_or_create_token_node(factory, WFTM, Some(usd)).await.unwrap().id;
        let tok_wftm = store.get_or_create_token_node(factory, TOK, Some(wftm)).await.unwrap().id;
        let tok_usd = store.get_or_create_token_node(factory, TOK, Some(usd)).await.unwrap().id;

        let oracle = PriceOracle::new(store.clone());
        let detector = ArbitrageDetector::new(store.clone(), oracle);
        Fixture { mock, store, detector, wftm, tok_wftm, tok_usd }
    }

    fn add_tx(mock: &MockProvider, logs: Vec<RawLog>) {
        mock.add_transaction(TransactionInfo { hash: TX, from: Address::repeat_byte(0xee) }, logs);
    }

    #[tokio::test]
    async fn test_same_token_round_trip() {
        let f = fixture().await;
        // every traded token sits at index 1: [comparator in, token in, comparator out, token out]
        let buy = swap_log(TOK_WFTM, 0, TX, [700, 0, 0, 500]);
        let sell = swap_log(TOK_USD, 1, TX, [0, 500, 900, 0]);
        add_tx(&f.mock, vec![buy.clone(), sell.clone()]);

        let first = f.detector.process_log(f.tok_wftm, &buy).await.unwrap();
        assert_eq!(first, Detection::Arbitrage { transaction_hash: TX, mirror_log_index: 1, mirror_token: f.tok_usd });
        assert_eq!(f.detector.process_log(f.tok_usd, &sell).await.unwrap(), Detection::Discarded);

        let graph = f.store.graph().read().await;
        assert!(graph.token(f.tok_wftm).unwrap().history.is_empty());
        assert!(graph.token(f.tok_usd).unwrap().history.is_empty());
    }

    #[tokio::test]
    async fn test_comparator_hop_token_leg_first() {
        let f = fixture().await;
        // TOK bought with WFTM, WFTM bought with as much USD as TOK came out
        let tok_buy = swap_log(TOK_WFTM, 2, TX, [700, 0, 0, 500]);
        let wftm_buy = swap_log(WFTM_USD, 5, TX, [500, 0, 0, 300]);
        add_tx(&f.mock, vec![tok_buy.clone(), wftm_buy.clone()]);

        let first = f.detector.process_log(f.tok_wftm, &tok_buy).await.unwrap();
        assert_eq!(first, Detection::Arbitrage { transaction_hash: TX, mirror_log_index: 5, mirror_token: f.wftm });
        assert_eq!(f.detector.process_log(f.wftm, &wftm_buy).await.unwrap(), Detection::Discarded);

        let graph = f.store.graph().read().await;
        assert!(graph.token(f.tok_wftm).unwrap().history.is_empty());
        assert!(graph.token(f.wftm).unwrap().history.is_empty());
    }

    #[tokio::test]
    async fn test_comparator_hop_comparator_leg_first() {
        let f = fixture().await;
        let tok_buy = swap_log(TOK_WFTM, 2, TX, [700, 0, 0, 500]);
        let wftm_buy = swap_log(WFTM_USD, 5, TX, [500, 0, 0, 300]);
        add_tx(&f.mock, vec![tok_buy.clone(), wftm_buy.clone()]);

        let first = f.detector.process_log(f.wftm, &wftm_buy).await.unwrap();
        assert_eq!(first, Detection::Arbitrage { transaction_hash: TX, mirror_log_index: 2, mirror_token: f.tok_wftm });
        assert_eq!(f.detector.process_log(f.tok_wftm, &tok_buy).await.unwrap(), Detection::Discarded);
    }

    #[tokio::test]
    async fn test_unmatched_log_is_a_swap() {
        let f = fixture().await;
        let buy = swap_log(TOK_WFTM, 0, TX, [700, 0, 0, 500]);
        let sell = swap_log(TOK_USD, 1, TX, [0, 499, 900, 0]);
        add_tx(&f.mock, vec![buy.clone(), sell]);

        let Detection::Swap(record) = f.detector.process_log(f.tok_wftm, &buy).await.unwrap() else {
            panic!("expected a swap");
        };
        assert_eq!(record.action, SwapAction::Buy);
        assert_eq!(record.sender, Address::repeat_byte(0xee));
        assert_eq!(f.store.graph().read().await.token(f.tok_wftm).unwrap().history.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_siblings_yield_one_arbitrage() {
        let f = fixture().await;
        let buy = swap_log(TOK_WFTM, 0, TX, [700, 0, 0, 500]);
        let sell = swap_log(TOK_USD, 1, TX, [0, 500, 900, 0]);
        add_tx(&f.mock, vec![buy.clone(), sell.clone()]);

        let (a, b) = tokio::join!(f.detector.process_log(f.tok_wftm, &buy), f.detector.process_log(f.tok_usd, &sell));
        let results = [a.unwrap(), b.unwrap()];
        assert_eq!(results.iter().filter(|d| matches!(d, Detection::Arbitrage { .. })).count(), 1);
        assert_eq!(results.iter().filter(|d| matches!(d, Detection::Discarded)).count(), 1);
    }

    #[tokio::test]
    async fn test_cached_transaction_is_not_refetched() {
        let f = fixture().await;
        let buy = swap_log(TOK_WFTM, 0, TX, [700, 0, 0, 500]);
        let sell = swap_log(TOK_USD, 1, TX, [0, 500, 900, 0]);
        let extra = swap_log(TOK_WFTM, 2, TX, [10, 0, 0, 20]);
        add_tx(&f.mock, vec![buy.clone(), sell, extra.clone()]);

        f.detector.process_log(f.tok_wftm, &buy).await.unwrap();
        let calls = f.mock.call_count();
        let reserve_calls = f.mock.reserve_call_count();

        assert!(matches!(f.detector.process_log(f.tok_wftm, &extra).await.unwrap(), Detection::Swap(_)));
        // the price refresh still reads the pool, the transaction comes from the cache
        assert_eq!(f.mock.call_count() - calls, f.mock.reserve_call_count() - reserve_calls);
    }

    #[tokio::test]
    async fn test_failed_fetch_ends_the_handler() {
        let f = fixture().await;
        let buy = swap_log(TOK_WFTM, 0, TX, [700, 0, 0, 500]);
        // no transaction registered with the provider
        let result = f.detector.process_log(f.tok_wftm, &buy).await;
        assert!(matches!(result, Err(FeedError::ProviderTransient(_))));
        assert!(f.store.graph().read().await.token(f.tok_wftm).unwrap().history.is_empty());
    }
}
