use crate::constants::DISPLAY_DECIMALS;
use crate::data_sync::provider::PoolProvider;
use crate::feed_error::FeedResult;
use crate::graph::{NodeGraph, NodeId, NodeStore, PriceState};
use crate::utils::rational::rational_one;
use crate::utils::{Rational, now_millis, scale_amount, to_decimal_opt};
use alloy_primitives::{Address, U256};
use futures::FutureExt;
use futures::future::BoxFuture;
use num_traits::Zero;
use std::sync::Arc;
use tracing::{debug, trace};

/// Price of the token in units of its comparator from raw pool reserves.
///
/// `None` when the token side of the pool is empty.
pub fn price_from_reserves(
    reserve0: U256,
    reserve1: U256,
    token_decimals: u8,
    comparator_decimals: u8,
    is_token0: bool,
) -> Option<Rational> {
    let (token_reserve, comparator_reserve) = if is_token0 { (reserve0, reserve1) } else { (reserve1, reserve0) };
    let token_side = scale_amount(token_reserve, token_decimals);
    if token_side.is_zero() {
        return None;
    }
    Some(scale_amount(comparator_reserve, comparator_decimals) / token_side)
}

/// Product of the token's own price and every ancestor's cached price-in-comparator.
fn fiat_price(graph: &NodeGraph, ancestors: &[NodeId], in_comparator: &Rational) -> Option<Rational> {
    ancestors.iter().try_fold(in_comparator.clone(), |acc, ancestor| {
        let price = graph.token(*ancestor).ok()?.price.in_comparator.as_ref()?;
        Some(acc * price)
    })
}

struct PoolRead {
    pool: Address,
    endpoint: NodeId,
    token_decimals: u8,
    comparator_decimals: u8,
    is_token0: bool,
    ancestors: Vec<NodeId>,
}

/// Reads pool reserves and propagates prices along comparator chains.
#[derive(Clone)]
pub struct PriceOracle {
    store: Arc<NodeStore>,
}

impl PriceOracle {
    pub fn new(store: Arc<NodeStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<NodeStore> {
        &self.store
    }

    /// Cached price-in-fiat without touching the network.
    pub async fn price_in_fiat(&self, id: NodeId) -> FeedResult<Option<Rational>> {
        Ok(self.store.graph().read().await.token(id)?.price.in_fiat.clone())
    }

    pub async fn price_state(&self, id: NodeId) -> FeedResult<PriceState> {
        Ok(self.store.graph().read().await.token(id)?.price.clone())
    }

    async fn is_stale(&self, id: NodeId) -> FeedResult<bool> {
        let graph = self.store.graph().read().await;
        Ok(graph.token(id)?.price.is_stale(now_millis(), self.store.config().staleness_threshold()))
    }

    /// Re-reads the token's pool and recomputes both prices, refreshing stale or unavailable ancestors first.
    ///
    /// Returns the new price-in-comparator. On a provider failure the cached prices stay untouched.
    pub fn refresh_price(&self, id: NodeId) -> BoxFuture<'_, FeedResult<Option<Rational>>> {
        async move {
            let read = {
                let graph = self.store.graph().read().await;
                let token = graph.token(id)?;
                match (token.comparator, token.pool) {
                    (Some(comparator), Some(pool)) => PoolRead {
                        pool,
                        endpoint: token.endpoint,
                        token_decimals: token.decimals,
                        comparator_decimals: graph.token(comparator)?.decimals,
                        is_token0: token.is_token0,
                        ancestors: graph.ancestors(id)?,
                    },
                    _ => {
                        drop(graph);
                        return Ok(Some(self.refresh_anchor(id).await?));
                    }
                }
            };

            for ancestor in &read.ancestors {
                if self.is_stale(*ancestor).await? {
                    trace!("Refreshing stale ancestor {} of {}", ancestor, id);
                    self.refresh_price(*ancestor).await?;
                }
            }

            let provider = self.store.provider(read.endpoint)?;
            let (reserve0, reserve1) = provider.get_reserves(read.pool).await?;
            let in_comparator =
                price_from_reserves(reserve0, reserve1, read.token_decimals, read.comparator_decimals, read.is_token0);

            let mut graph = self.store.graph().write().await;
            let in_fiat = in_comparator.as_ref().and_then(|price| fiat_price(&graph, &read.ancestors, price));
            let token = graph.token_mut(id)?;
            token.price = PriceState { in_comparator: in_comparator.clone(), in_fiat, refreshed_at_ms: Some(now_millis()) };
            debug!(
                "{} {} price {} in comparator, {} in fiat",
                token.symbol,
                id,
                to_decimal_opt(token.price.in_comparator.as_ref(), DISPLAY_DECIMALS),
                to_decimal_opt(token.price.in_fiat.as_ref(), DISPLAY_DECIMALS)
            );
            Ok(in_comparator)
        }
        .boxed()
    }

    async fn refresh_anchor(&self, id: NodeId) -> FeedResult<Rational> {
        let mut graph = self.store.graph().write().await;
        let token = graph.token_mut(id)?;
        token.price =
            PriceState { in_comparator: Some(rational_one()), in_fiat: Some(rational_one()), refreshed_at_ms: Some(now_millis()) };
        Ok(rational_one())
    }
}
