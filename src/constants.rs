use alloy_primitives::{B256, b256};

/// keccak256("Swap(address,uint256,uint256,uint256,uint256,address)")
pub const SWAP_EVENT_TOPIC: B256 = b256!("0xd78ad95fa46c994b6551d0da85fc275fe613ce37657fb8d5e3d130840159d822");

pub const DEFAULT_STALENESS_THRESHOLD_SECS: u64 = 30;

pub const DEFAULT_ARBITRAGE_CACHE_CAPACITY: usize = 30;

pub const DEFAULT_SWAP_HISTORY_CAPACITY: usize = 1000;

// Token bucket: 2 requests per second per endpoint
pub const DEFAULT_REQUESTS_PER_INTERVAL: u32 = 2;
pub const DEFAULT_RATE_LIMIT_INTERVAL_MS: u64 = 1000;

pub const DEFAULT_CHANNEL_BUFFER_SIZE: usize = 100;

// Decimal places used when rendering prices in log lines
pub const DISPLAY_DECIMALS: usize = 8;

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::keccak256;

    #[test]
    fn test_swap_topic_matches_signature() {
        assert_eq!(SWAP_EVENT_TOPIC, keccak256("Swap(address,uint256,uint256,uint256,uint256,address)"));
    }
}
