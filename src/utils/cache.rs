use crate::data_sync::provider::{RawLog, TransactionInfo};
use alloy_primitives::B256;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

/// A transaction whose logs have been (partly) attributed to arbitrage.
#[derive(Clone, Debug)]
pub struct ArbitrageCacheEntry {
    pub transaction: TransactionInfo,
    pub logs: Vec<RawLog>,
    /// Log indices already attributed to an arbitrage pair
    pub consumed: BTreeSet<u64>,
}

impl ArbitrageCacheEntry {
    pub fn new(transaction: TransactionInfo, logs: Vec<RawLog>) -> Self {
        Self { transaction, logs, consumed: BTreeSet::new() }
    }

    pub fn is_consumed(&self, log_index: u64) -> bool {
        self.consumed.contains(&log_index)
    }
}

#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub evictions: AtomicU64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 { 0.0 } else { hits as f64 / total as f64 }
    }
}

/// Bounded per-endpoint cache of arbitrage transactions.
///
/// Eviction is FIFO by insertion order; lookups do not refresh an entry's position.
#[derive(Debug)]
pub struct ArbitrageCache {
    capacity: usize,
    entries: HashMap<B256, ArbitrageCacheEntry>,
    insertion_order: VecDeque<B256>,
    pub stats: CacheStats,
}

impl ArbitrageCache {
    pub fn new(capacity: usize) -> Self {
        Self { capacity: capacity.max(1), entries: HashMap::new(), insertion_order: VecDeque::new(), stats: CacheStats::default() }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, transaction_hash: &B256) -> bool {
        self.entries.contains_key(transaction_hash)
    }

    /// Lookup that is counted in the cache statistics.
    pub fn get(&self, transaction_hash: &B256) -> Option<&ArbitrageCacheEntry> {
        match self.entries.get(transaction_hash) {
            Some(entry) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry)
            }
            None => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn is_consumed(&self, transaction_hash: &B256, log_index: u64) -> bool {
        self.entries.get(transaction_hash).is_some_and(|entry| entry.is_consumed(log_index))
    }

    /// Marks log indices of a transaction as consumed, inserting the entry if absent.
    pub fn mark_consumed(&mut self, transaction: TransactionInfo, logs: Vec<RawLog>, log_indices: &[u64]) {
        let hash = transaction.hash;
        if !self.entries.contains_key(&hash) {
            self.insert(ArbitrageCacheEntry::new(transaction, logs));
        }
        if let Some(entry) = self.entries.get_mut(&hash) {
            entry.consumed.extend(log_indices.iter().copied());
        }
    }

    fn insert(&mut self, entry: ArbitrageCacheEntry) {
        while self.entries.len() >= self.capacity {
            let Some(oldest) = self.insertion_order.pop_front() else {
                break;
            };
            if self.entries.remove(&oldest).is_some() {
                self.stats.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.insertion_order.push_back(entry.transaction.hash);
        self.entries.insert(entry.transaction.hash, entry);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.insertion_order.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::Address;

    fn transaction(byte: u8) -> TransactionInfo {
        TransactionInfo { hash: B256::repeat_byte(byte), from: Address::repeat_byte(0xee) }
    }

    #[test]
    fn test_mark_and_lookup() {
        let mut cache = ArbitrageCache::new(30);
        let tx = transaction(1);

        assert!(cache.get(&tx.hash).is_none());
        cache.mark_consumed(tx.clone(), vec![], &[3, 5]);

        assert!(cache.is_consumed(&tx.hash, 3));
        assert!(cache.is_consumed(&tx.hash, 5));
        assert!(!cache.is_consumed(&tx.hash, 4));
        assert!(!cache.is_consumed(&B256::repeat_byte(2), 3));

        // Second pair of the same transaction reuses the entry
        cache.mark_consumed(tx.clone(), vec![], &[7, 9]);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&tx.hash).unwrap().consumed.len(), 4);

        assert_eq!(cache.stats.hits.load(Ordering::Relaxed), 1);
        assert_eq!(cache.stats.misses.load(Ordering::Relaxed), 1);
        assert_eq!(cache.stats.hit_rate(), 0.5);
    }

    #[test]
    fn test_fifo_eviction_at_capacity() {
        let mut cache = ArbitrageCache::new(30);
        for byte in 1..=30u8 {
            cache.mark_consumed(transaction(byte), vec![], &[0, 1]);
        }
        assert_eq!(cache.len(), 30);

        // Reading the oldest entry does not protect it
        assert!(cache.get(&B256::repeat_byte(1)).is_some());

        cache.mark_consumed(transaction(31), vec![], &[0, 1]);
        assert_eq!(cache.len(), 30);
        assert!(!cache.contains(&B256::repeat_byte(1)));
        assert!(cache.contains(&B256::repeat_byte(2)));
        assert!(cache.contains(&B256::repeat_byte(31)));
        assert_eq!(cache.stats.evictions.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_never_exceeds_capacity() {
        let mut cache = ArbitrageCache::new(3);
        for byte in 0..100u8 {
            cache.mark_consumed(transaction(byte), vec![], &[1]);
            assert!(cache.len() <= 3);
        }
        assert!(cache.contains(&B256::repeat_byte(99)));
        assert!(cache.contains(&B256::repeat_byte(97)));
        assert!(!cache.contains(&B256::repeat_byte(96)));
    }
}
