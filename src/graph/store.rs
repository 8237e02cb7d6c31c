use super::node_graph::NodeGraph;
use super::nodes::{NodeId, TokenDraft};
use crate::data_sync::config::FeedConfig;
use crate::data_sync::provider::{Connector, PoolProvider, RateLimitedProvider};
use crate::feed_error::{FeedError, FeedResult};
use alloy_primitives::Address;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Outcome of a get-or-create call.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Registered {
    pub id: NodeId,
    pub created: bool,
}

/// Node graph plus the per-endpoint capabilities that are never persisted.
pub struct NodeStore {
    graph: RwLock<NodeGraph>,
    providers: DashMap<NodeId, Arc<RateLimitedProvider>>,
    connector: Arc<dyn Connector>,
    config: FeedConfig,
}

impl NodeStore {
    pub fn new(config: FeedConfig, connector: Arc<dyn Connector>) -> Self {
        Self::with_graph(config, connector, NodeGraph::new())
    }

    pub(crate) fn with_graph(config: FeedConfig, connector: Arc<dyn Connector>, graph: NodeGraph) -> Self {
        Self { graph: RwLock::new(graph), providers: DashMap::new(), connector, config }
    }

    pub fn graph(&self) -> &RwLock<NodeGraph> {
        &self.graph
    }

    pub fn config(&self) -> &FeedConfig {
        &self.config
    }

    pub fn connector(&self) -> &Arc<dyn Connector> {
        &self.connector
    }

    /// Rate-limited provider of an endpoint.
    pub fn provider(&self, endpoint: NodeId) -> FeedResult<Arc<RateLimitedProvider>> {
        self.providers.get(&endpoint).map(|p| p.clone()).ok_or(FeedError::UnknownNode(endpoint))
    }

    /// Wraps a raw provider in the endpoint's rate limiter. An already attached provider wins.
    pub(crate) fn attach_provider(&self, endpoint: NodeId, provider: Arc<dyn PoolProvider>) -> Arc<RateLimitedProvider> {
        self.providers
            .entry(endpoint)
            .or_insert_with(|| {
                Arc::new(RateLimitedProvider::new(provider, self.config.requests_per_interval, self.config.rate_limit_interval()))
            })
            .clone()
    }

    pub async fn get_or_create_endpoint(&self, connection_key: &str) -> FeedResult<Registered> {
        if let Some(id) = self.graph.read().await.find_endpoint(connection_key) {
            return Ok(Registered { id, created: false });
        }

        let provider = self.connector.connect(connection_key).await?;

        let mut graph = self.graph.write().await;
        if let Some(id) = graph.find_endpoint(connection_key) {
            // lost the race, the fresh connection is dropped
            return Ok(Registered { id, created: false });
        }
        let id = graph.add_endpoint(connection_key, self.config.arbitrage_cache_capacity);
        self.attach_provider(id, provider);
        info!("Registered endpoint {} as {}", connection_key, id);
        Ok(Registered { id, created: true })
    }

    pub async fn get_or_create_factory(&self, endpoint: NodeId, address: Address) -> FeedResult<Registered> {
        let mut graph = self.graph.write().await;
        if let Some(id) = graph.find_factory(endpoint, address) {
            return Ok(Registered { id, created: false });
        }
        let id = graph.add_factory(endpoint, address)?;
        debug!("Registered factory {} as {}", address, id);
        Ok(Registered { id, created: true })
    }

    /// Resolves metadata, pool and asset ordering before anything is inserted, so a failure leaves no node behind.
    pub async fn get_or_create_token_node(
        &self,
        factory: NodeId,
        token: Address,
        comparator: Option<NodeId>,
    ) -> FeedResult<Registered> {
        let (factory_address, endpoint, comparator_address) = {
            let graph = self.graph.read().await;
            if let Some(id) = graph.find_token(factory, token, comparator) {
                return Ok(Registered { id, created: false });
            }
            let factory_node = graph.factory(factory).map_err(|_| FeedError::MissingParent(factory))?;
            let comparator_address = match comparator {
                Some(comparator) => Some(graph.token(comparator).map_err(|_| FeedError::MissingParent(comparator))?.address),
                None => None,
            };
            (factory_node.address, factory_node.endpoint, comparator_address)
        };
        let provider = self.provider(endpoint)?;

        let metadata = provider
            .get_token_metadata(token)
            .await
            .map_err(|e| FeedError::Resolution(format!("metadata of {}: {}", token, e)))?;

        let (pool, is_token0) = match comparator_address {
            None => (None, true),
            Some(comparator_address) => {
                let pool = provider
                    .get_pair_address(factory_address, token, comparator_address)
                    .await
                    .map_err(|e| FeedError::Resolution(format!("pair lookup {}/{}: {}", token, comparator_address, e)))?
                    .ok_or_else(|| {
                        FeedError::Resolution(format!("factory {} has no pool for {}/{}", factory_address, token, comparator_address))
                    })?;
                let token0 = provider
                    .get_pool_token0(pool)
                    .await
                    .map_err(|e| FeedError::Resolution(format!("token0 of {}: {}", pool, e)))?;
                let is_token0 = if token0 == token {
                    true
                } else if token0 == comparator_address {
                    false
                } else {
                    return Err(FeedError::Resolution(format!("pool {} token0 {} matches neither asset", pool, token0)));
                };
                (Some(pool), is_token0)
            }
        };

        let draft = TokenDraft {
            factory,
            address: token,
            decimals: metadata.decimals,
            symbol: metadata.symbol,
            pool,
            comparator,
            is_token0,
        };

        let mut graph = self.graph.write().await;
        if let Some(id) = graph.find_token(factory, token, comparator) {
            return Ok(Registered { id, created: false });
        }
        let symbol = draft.symbol.clone();
        let id = graph.add_token(draft, self.config.swap_history_capacity)?;
        info!("Registered token {} ({}) as {}", symbol, token, id);
        Ok(Registered { id, created: true })
    }
}
