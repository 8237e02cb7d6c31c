use super::node_graph::NodeGraph;
use super::nodes::{EndpointNode, FactoryNode, NodeId, PriceState, SwapHistory, TokenNode};
use super::store::NodeStore;
use crate::data_sync::config::FeedConfig;
use crate::data_sync::provider::Connector;
use crate::feed_error::{FeedError, FeedResult};
use crate::utils::{Rational, RationalRecord};
use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use tracing::info;

/// Persisted graph. Swap histories, caches and providers are not part of it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub next_id: u64,
    pub nodes: BTreeMap<NodeId, NodeRecord>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeRecord {
    Endpoint {
        connection_key: String,
    },
    Factory {
        endpoint: NodeId,
        address: Address,
    },
    Token {
        endpoint: NodeId,
        factory: NodeId,
        address: Address,
        decimals: u8,
        symbol: String,
        pool: Option<Address>,
        is_token0: bool,
        comparator: Option<NodeId>,
        price_in_comparator: Option<RationalRecord>,
        price_in_fiat: Option<RationalRecord>,
        refreshed_at_ms: Option<u64>,
    },
}

impl Snapshot {
    pub fn to_json(&self) -> FeedResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> FeedResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

impl From<&NodeGraph> for Snapshot {
    fn from(graph: &NodeGraph) -> Self {
        let mut nodes = BTreeMap::new();
        for endpoint in graph.endpoints() {
            nodes.insert(endpoint.id, NodeRecord::Endpoint { connection_key: endpoint.connection_key.clone() });
        }
        for factory in graph.factories() {
            nodes.insert(factory.id, NodeRecord::Factory { endpoint: factory.endpoint, address: factory.address });
        }
        for token in graph.tokens() {
            nodes.insert(
                token.id,
                NodeRecord::Token {
                    endpoint: token.endpoint,
                    factory: token.factory,
                    address: token.address,
                    decimals: token.decimals,
                    symbol: token.symbol.clone(),
                    pool: token.pool,
                    is_token0: token.is_token0,
                    comparator: token.comparator,
                    price_in_comparator: token.price.in_comparator.as_ref().map(RationalRecord::from),
                    price_in_fiat: token.price.in_fiat.as_ref().map(RationalRecord::from),
                    refreshed_at_ms: token.price.refreshed_at_ms,
                },
            );
        }
        Self { next_id: graph.next_id(), nodes }
    }
}

fn parse_price(record: &Option<RationalRecord>) -> FeedResult<Option<Rational>> {
    record.as_ref().map(Rational::try_from).transpose()
}

/// Rebuilds a graph: endpoints, then factories, then tokens with every comparator ahead of its dependents.
pub fn rebuild_graph(snapshot: &Snapshot, cache_capacity: usize, history_capacity: usize) -> FeedResult<NodeGraph> {
    let mut graph = NodeGraph::new();

    for (id, record) in &snapshot.nodes {
        if let NodeRecord::Endpoint { connection_key } = record {
            graph.restore_endpoint(EndpointNode::new(*id, connection_key.clone(), cache_capacity))?;
        }
    }
    for (id, record) in &snapshot.nodes {
        if let NodeRecord::Factory { endpoint, address } = record {
            graph.restore_factory(FactoryNode { id: *id, endpoint: *endpoint, address: *address, tokens: BTreeSet::new() })?;
        }
    }

    // Kahn's algorithm over comparator edges
    let tokens: BTreeMap<NodeId, &NodeRecord> =
        snapshot.nodes.iter().filter(|(_, r)| matches!(r, NodeRecord::Token { .. })).map(|(id, r)| (*id, r)).collect();
    let mut pending: BTreeMap<NodeId, usize> = BTreeMap::new();
    let mut dependents: BTreeMap<NodeId, Vec<NodeId>> = BTreeMap::new();
    let mut ready = VecDeque::new();
    for (id, record) in &tokens {
        let NodeRecord::Token { comparator, .. } = record else { continue };
        match comparator {
            Some(comparator) if tokens.contains_key(comparator) => {
                pending.insert(*id, 1);
                dependents.entry(*comparator).or_default().push(*id);
            }
            Some(comparator) => {
                return Err(FeedError::Snapshot(format!("token {} references missing comparator {}", id, comparator)));
            }
            None => ready.push_back(*id),
        }
    }

    let mut restored = 0;
    while let Some(id) = ready.pop_front() {
        let Some(NodeRecord::Token {
            endpoint,
            factory,
            address,
            decimals,
            symbol,
            pool,
            is_token0,
            comparator,
            price_in_comparator,
            price_in_fiat,
            refreshed_at_ms,
        }) = tokens.get(&id).copied()
        else {
            continue;
        };
        graph.restore_token(TokenNode {
            id,
            endpoint: *endpoint,
            factory: *factory,
            address: *address,
            decimals: *decimals,
            symbol: symbol.clone(),
            pool: *pool,
            comparator: *comparator,
            is_token0: *is_token0,
            price: PriceState {
                in_comparator: parse_price(price_in_comparator)?,
                in_fiat: parse_price(price_in_fiat)?,
                refreshed_at_ms: *refreshed_at_ms,
            },
            history: SwapHistory::new(history_capacity),
        })?;
        restored += 1;

        for dependent in dependents.remove(&id).unwrap_or_default() {
            if let Some(count) = pending.get_mut(&dependent) {
                *count -= 1;
                if *count == 0 {
                    ready.push_back(dependent);
                }
            }
        }
    }
    if restored != tokens.len() {
        return Err(FeedError::Snapshot(format!("comparator cycle among {} token(s)", tokens.len() - restored)));
    }

    graph.restore_next_id(snapshot.next_id)?;
    Ok(graph)
}

impl NodeStore {
    pub async fn snapshot(&self) -> Snapshot {
        Snapshot::from(&*self.graph().read().await)
    }

    /// Rebuilds the store and reconnects every endpoint. No price is refreshed here.
    pub async fn restore(config: FeedConfig, connector: Arc<dyn Connector>, snapshot: &Snapshot) -> FeedResult<Self> {
        let graph = rebuild_graph(snapshot, config.arbitrage_cache_capacity, config.swap_history_capacity)?;
        let endpoints: Vec<(NodeId, String)> = graph.endpoints().map(|e| (e.id, e.connection_key.clone())).collect();

        let store = NodeStore::with_graph(config, connector.clone(), graph);
        for (id, connection_key) in endpoints {
            let provider = connector.connect(&connection_key).await?;
            store.attach_provider(id, provider);
        }
        info!("Restored {} node(s) from snapshot", snapshot.nodes.len());
        Ok(store)
    }
}
