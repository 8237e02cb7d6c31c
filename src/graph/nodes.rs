use crate::logic::types::SwapRecord;
use crate::utils::{ArbitrageCache, Rational};
use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};
use std::fmt::{Display, Formatter};
use std::time::Duration;

/// Opaque arena id. Never reused; the next value is persisted with the snapshot.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u64);

impl Display for NodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug)]
pub struct EndpointNode {
    pub id: NodeId,
    pub connection_key: String,
    pub factories: BTreeSet<NodeId>,
    pub arbitrage_cache: ArbitrageCache,
}

impl EndpointNode {
    pub fn new(id: NodeId, connection_key: String, cache_capacity: usize) -> Self {
        Self { id, connection_key, factories: BTreeSet::new(), arbitrage_cache: ArbitrageCache::new(cache_capacity) }
    }
}

#[derive(Clone, Debug)]
pub struct FactoryNode {
    pub id: NodeId,
    pub endpoint: NodeId,
    pub address: Address,
    pub tokens: BTreeSet<NodeId>,
}

/// Cached prices of a token. Always replaced as a whole.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PriceState {
    pub in_comparator: Option<Rational>,
    pub in_fiat: Option<Rational>,
    pub refreshed_at_ms: Option<u64>,
}

impl PriceState {
    /// Unavailable prices count as stale.
    pub fn is_stale(&self, now_ms: u64, threshold: Duration) -> bool {
        match (&self.in_comparator, self.refreshed_at_ms) {
            (Some(_), Some(at)) => u128::from(now_ms.saturating_sub(at)) > threshold.as_millis(),
            _ => true,
        }
    }
}

/// Append-only swap log that drops its oldest record once full.
#[derive(Clone, Debug)]
pub struct SwapHistory {
    capacity: usize,
    records: VecDeque<SwapRecord>,
}

impl SwapHistory {
    pub fn new(capacity: usize) -> Self {
        Self { capacity: capacity.max(1), records: VecDeque::new() }
    }

    pub fn push(&mut self, record: SwapRecord) {
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn last(&self) -> Option<&SwapRecord> {
        self.records.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SwapRecord> {
        self.records.iter()
    }
}

#[derive(Clone, Debug)]
pub struct TokenNode {
    pub id: NodeId,
    pub endpoint: NodeId,
    pub factory: NodeId,
    pub address: Address,
    pub decimals: u8,
    pub symbol: String,
    /// Absent iff this is the fiat anchor of its chain
    pub pool: Option<Address>,
    pub comparator: Option<NodeId>,
    /// Token sits at index 0 of its pool
    pub is_token0: bool,
    pub price: PriceState,
    pub history: SwapHistory,
}

impl TokenNode {
    pub fn is_fiat_anchor(&self) -> bool {
        self.comparator.is_none()
    }
}

/// Resolved attributes of a token that is about to be registered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenDraft {
    pub factory: NodeId,
    pub address: Address,
    pub decimals: u8,
    pub symbol: String,
    pub pool: Option<Address>,
    pub comparator: Option<NodeId>,
    pub is_token0: bool,
}
