use super::nodes::{EndpointNode, FactoryNode, NodeId, PriceState, SwapHistory, TokenDraft, TokenNode};
use crate::feed_error::{FeedError, FeedResult};
use ahash::RandomState;
use alloy_primitives::Address;
use std::collections::{BTreeSet, HashMap};

pub type FastHasher = RandomState;
/// FastHashMap using ahash
pub type FastHashMap<K, V> = HashMap<K, V, FastHasher>;

/// Arena of endpoint, factory and token nodes. Relations are stored as ids.
#[derive(Debug, Default)]
pub struct NodeGraph {
    next_id: u64,
    endpoints: FastHashMap<NodeId, EndpointNode>,
    factories: FastHashMap<NodeId, FactoryNode>,
    tokens: FastHashMap<NodeId, TokenNode>,
    // connection key -> endpoint
    endpoint_index: FastHashMap<String, NodeId>,
    // (endpoint, factory address) -> factory
    factory_index: FastHashMap<(NodeId, Address), NodeId>,
    // (factory, token address, comparator) -> token
    token_index: FastHashMap<(NodeId, Address, Option<NodeId>), NodeId>,
    // pool address -> tokens priced through it
    pool_index: FastHashMap<Address, Vec<NodeId>>,
}

impl NodeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    fn allocate_id(&mut self) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        id
    }

    pub fn find_endpoint(&self, connection_key: &str) -> Option<NodeId> {
        self.endpoint_index.get(connection_key).copied()
    }

    pub fn find_factory(&self, endpoint: NodeId, address: Address) -> Option<NodeId> {
        self.factory_index.get(&(endpoint, address)).copied()
    }

    pub fn find_token(&self, factory: NodeId, address: Address, comparator: Option<NodeId>) -> Option<NodeId> {
        self.token_index.get(&(factory, address, comparator)).copied()
    }

    /// Get-or-insert of an endpoint by connection key.
    pub fn add_endpoint(&mut self, connection_key: &str, cache_capacity: usize) -> NodeId {
        if let Some(id) = self.find_endpoint(connection_key) {
            return id;
        }
        let id = self.allocate_id();
        self.endpoints.insert(id, EndpointNode::new(id, connection_key.to_string(), cache_capacity));
        self.endpoint_index.insert(connection_key.to_string(), id);
        id
    }

    /// Get-or-insert of a factory under an existing endpoint.
    pub fn add_factory(&mut self, endpoint: NodeId, address: Address) -> FeedResult<NodeId> {
        if let Some(id) = self.find_factory(endpoint, address) {
            return Ok(id);
        }
        if !self.endpoints.contains_key(&endpoint) {
            return Err(FeedError::MissingParent(endpoint));
        }
        let id = self.allocate_id();
        self.link_factory(FactoryNode { id, endpoint, address, tokens: BTreeSet::new() });
        Ok(id)
    }

    /// Get-or-insert of a fully resolved token. Factory and comparator must already exist.
    pub fn add_token(&mut self, draft: TokenDraft, history_capacity: usize) -> FeedResult<NodeId> {
        if let Some(id) = self.find_token(draft.factory, draft.address, draft.comparator) {
            return Ok(id);
        }
        let endpoint = self.factory(draft.factory).map_err(|_| FeedError::MissingParent(draft.factory))?.endpoint;
        if let Some(comparator) = draft.comparator {
            if !self.tokens.contains_key(&comparator) {
                return Err(FeedError::MissingParent(comparator));
            }
        }
        let id = self.allocate_id();
        self.link_token(TokenNode {
            id,
            endpoint,
            factory: draft.factory,
            address: draft.address,
            decimals: draft.decimals,
            symbol: draft.symbol,
            pool: draft.pool,
            comparator: draft.comparator,
            is_token0: draft.is_token0,
            price: PriceState::default(),
            history: SwapHistory::new(history_capacity),
        });
        Ok(id)
    }

    fn link_factory(&mut self, factory: FactoryNode) {
        if let Some(endpoint) = self.endpoints.get_mut(&factory.endpoint) {
            endpoint.factories.insert(factory.id);
        }
        self.factory_index.insert((factory.endpoint, factory.address), factory.id);
        self.factories.insert(factory.id, factory);
    }

    fn link_token(&mut self, token: TokenNode) {
        if let Some(factory) = self.factories.get_mut(&token.factory) {
            factory.tokens.insert(token.id);
        }
        if let Some(pool) = token.pool {
            self.pool_index.entry(pool).or_default().push(token.id);
        }
        self.token_index.insert((token.factory, token.address, token.comparator), token.id);
        self.tokens.insert(token.id, token);
    }

    // Restore path: nodes arrive with their persisted ids, parents first.

    pub(crate) fn restore_endpoint(&mut self, endpoint: EndpointNode) -> FeedResult<()> {
        self.check_free(endpoint.id)?;
        self.endpoint_index.insert(endpoint.connection_key.clone(), endpoint.id);
        self.endpoints.insert(endpoint.id, endpoint);
        Ok(())
    }

    pub(crate) fn restore_factory(&mut self, factory: FactoryNode) -> FeedResult<()> {
        self.check_free(factory.id)?;
        if !self.endpoints.contains_key(&factory.endpoint) {
            return Err(FeedError::Snapshot(format!("factory {} references missing endpoint {}", factory.id, factory.endpoint)));
        }
        self.link_factory(factory);
        Ok(())
    }

    pub(crate) fn restore_token(&mut self, token: TokenNode) -> FeedResult<()> {
        self.check_free(token.id)?;
        let factory = self
            .factories
            .get(&token.factory)
            .ok_or_else(|| FeedError::Snapshot(format!("token {} references missing factory {}", token.id, token.factory)))?;
        if factory.endpoint != token.endpoint {
            return Err(FeedError::Snapshot(format!("token {} endpoint does not match its factory", token.id)));
        }
        if let Some(comparator) = token.comparator {
            if !self.tokens.contains_key(&comparator) {
                return Err(FeedError::Snapshot(format!("token {} references missing comparator {}", token.id, comparator)));
            }
        }
        if token.comparator.is_some() != token.pool.is_some() {
            return Err(FeedError::Snapshot(format!("token {} must have a pool iff it has a comparator", token.id)));
        }
        self.link_token(token);
        Ok(())
    }

    pub(crate) fn restore_next_id(&mut self, next_id: u64) -> FeedResult<()> {
        let highest = self.endpoints.keys().chain(self.factories.keys()).chain(self.tokens.keys()).map(|id| id.0).max();
        if let Some(highest) = highest {
            if next_id <= highest {
                return Err(FeedError::Snapshot(format!("next id {} would reuse existing id {}", next_id, highest)));
            }
        }
        self.next_id = next_id;
        Ok(())
    }

    fn check_free(&self, id: NodeId) -> FeedResult<()> {
        if self.endpoints.contains_key(&id) || self.factories.contains_key(&id) || self.tokens.contains_key(&id) {
            return Err(FeedError::Snapshot(format!("duplicate node id {}", id)));
        }
        Ok(())
    }

    pub fn endpoint(&self, id: NodeId) -> FeedResult<&EndpointNode> {
        self.endpoints.get(&id).ok_or(FeedError::UnknownNode(id))
    }

    pub fn endpoint_mut(&mut self, id: NodeId) -> FeedResult<&mut EndpointNode> {
        self.endpoints.get_mut(&id).ok_or(FeedError::UnknownNode(id))
    }

    pub fn factory(&self, id: NodeId) -> FeedResult<&FactoryNode> {
        self.factories.get(&id).ok_or(FeedError::UnknownNode(id))
    }

    pub fn token(&self, id: NodeId) -> FeedResult<&TokenNode> {
        self.tokens.get(&id).ok_or(FeedError::UnknownNode(id))
    }

    pub fn token_mut(&mut self, id: NodeId) -> FeedResult<&mut TokenNode> {
        self.tokens.get_mut(&id).ok_or(FeedError::UnknownNode(id))
    }

    pub fn endpoints(&self) -> impl Iterator<Item = &EndpointNode> {
        self.endpoints.values()
    }

    pub fn factories(&self) -> impl Iterator<Item = &FactoryNode> {
        self.factories.values()
    }

    pub fn tokens(&self) -> impl Iterator<Item = &TokenNode> {
        self.tokens.values()
    }

    pub fn tokens_for_pool(&self, pool: &Address) -> &[NodeId] {
        self.pool_index.get(pool).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.endpoints.len() + self.factories.len() + self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Comparator chain of a token, from its immediate comparator to the root.
    pub fn ancestors(&self, id: NodeId) -> FeedResult<Vec<NodeId>> {
        let mut chain = Vec::new();
        let mut current = self.token(id)?.comparator;
        while let Some(ancestor) = current {
            if ancestor == id || chain.contains(&ancestor) {
                return Err(FeedError::Snapshot(format!("comparator cycle through {}", ancestor)));
            }
            chain.push(ancestor);
            current = self.token(ancestor)?.comparator;
        }
        Ok(chain)
    }
}
