use crate::graph::NodeId;
use crate::logic::types::SwapRecord;
use alloy_primitives::B256;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::trace;

/// Notification published for every processed swap log that is not discarded.
#[derive(Clone, Debug, PartialEq)]
pub enum FeedEvent {
    Swap { token: NodeId, symbol: String, record: SwapRecord },
    /// `token` handled the log that found the pair, `mirror_token` tracks the other leg.
    Arbitrage { token: NodeId, mirror_token: NodeId, transaction_hash: B256 },
}

impl FeedEvent {
    pub fn token(&self) -> NodeId {
        match self {
            Self::Swap { token, .. } | Self::Arbitrage { token, .. } => *token,
        }
    }
}

/// Global and per-token broadcast of feed events.
///
/// Lagging receivers lose the oldest events, publishers never wait.
pub struct EventBus {
    capacity: usize,
    global: broadcast::Sender<FeedEvent>,
    per_token: DashMap<NodeId, broadcast::Sender<FeedEvent>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (global, _) = broadcast::channel(capacity);
        Self { capacity, global, per_token: DashMap::new() }
    }

    /// Every event of every token.
    pub fn subscribe_all(&self) -> broadcast::Receiver<FeedEvent> {
        self.global.subscribe()
    }

    pub fn subscribe_token(&self, token: NodeId) -> broadcast::Receiver<FeedEvent> {
        self.per_token.entry(token).or_insert_with(|| broadcast::channel(self.capacity).0).subscribe()
    }

    pub fn publish_swap(&self, token: NodeId, symbol: String, record: SwapRecord) -> usize {
        self.publish(FeedEvent::Swap { token, symbol, record })
    }

    /// Reaches the channels of both legs' tokens and the global channel once.
    pub fn publish_arbitrage(&self, token: NodeId, mirror_token: NodeId, transaction_hash: B256) -> usize {
        let event = FeedEvent::Arbitrage { token, mirror_token, transaction_hash };
        let mut targets = vec![token];
        if mirror_token != token {
            targets.push(mirror_token);
        }
        self.publish_to(&targets, event)
    }

    fn publish(&self, event: FeedEvent) -> usize {
        self.publish_to(&[event.token()], event)
    }

    /// Returns how many receivers got the event.
    fn publish_to(&self, tokens: &[NodeId], event: FeedEvent) -> usize {
        let mut delivered = 0;
        for token in tokens {
            if let Some(sender) = self.per_token.get(token) {
                delivered += sender.send(event.clone()).unwrap_or(0);
            }
        }
        delivered += self.global.send(event).unwrap_or(0);
        trace!("Event delivered to {} receiver(s)", delivered);
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::SwapAction;
    use crate::utils::Rational;
    use alloy_primitives::Address;
    use num_bigint::BigInt;

    #[tokio::test]
    async fn test_token_and_global_delivery() {
        let bus = EventBus::new(8);
        let mut all = bus.subscribe_all();
        let mut first = bus.subscribe_token(NodeId(1));
        let mut second = bus.subscribe_token(NodeId(2));

        let record = SwapRecord {
            transaction_hash: B256::repeat_byte(1),
            log_index: 0,
            sender: Address::ZERO,
            action: SwapAction::Buy,
            token_amount: Rational::from_integer(BigInt::from(2)),
            comparator_amount: Rational::from_integer(BigInt::from(1)),
            fiat_amount: None,
            price_in_comparator: Rational::new(BigInt::from(1), BigInt::from(2)),
            price_in_fiat: None,
            timestamp_ms: 0,
        };
        assert_eq!(bus.publish_swap(NodeId(1), "TOK".to_string(), record), 2);

        assert!(matches!(all.recv().await.unwrap(), FeedEvent::Swap { token: NodeId(1), .. }));
        assert!(matches!(first.recv().await.unwrap(), FeedEvent::Swap { token: NodeId(1), .. }));
        assert!(second.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_arbitrage_reaches_both_legs() {
        let bus = EventBus::new(8);
        let mut all = bus.subscribe_all();
        let mut first = bus.subscribe_token(NodeId(1));
        let mut second = bus.subscribe_token(NodeId(2));
        let mut other = bus.subscribe_token(NodeId(3));

        assert_eq!(bus.publish_arbitrage(NodeId(1), NodeId(2), B256::repeat_byte(1)), 3);

        let expected =
            FeedEvent::Arbitrage { token: NodeId(1), mirror_token: NodeId(2), transaction_hash: B256::repeat_byte(1) };
        assert_eq!(all.recv().await.unwrap(), expected);
        assert!(all.try_recv().is_err());
        assert_eq!(first.recv().await.unwrap(), expected);
        assert_eq!(second.recv().await.unwrap(), expected);
        assert!(other.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_arbitrage_on_one_token_delivered_once() {
        let bus = EventBus::new(8);
        let mut token = bus.subscribe_token(NodeId(1));

        assert_eq!(bus.publish_arbitrage(NodeId(1), NodeId(1), B256::repeat_byte(2)), 1);
        assert!(token.recv().await.is_ok());
        assert!(token.try_recv().is_err());
    }

    #[test]
    fn test_publish_without_receivers() {
        let bus = EventBus::new(8);
        assert_eq!(bus.publish_arbitrage(NodeId(3), NodeId(4), B256::ZERO), 0);
    }
}
