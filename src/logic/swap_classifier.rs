use super::types::{SwapAction, SwapRecord, TradeLeg};
use crate::data_sync::abi::IUniswapV2Pair;
use crate::data_sync::provider::RawLog;
use crate::feed_error::{FeedError, FeedResult};
use crate::graph::{NodeGraph, NodeId, TokenNode};
use crate::utils::{now_millis, scale_amount};
use alloy_primitives::Address;
use alloy_sol_types::SolEvent;
use num_traits::Zero;

/// Decodes the amount fields of a pool `Swap` log.
pub fn decode_swap(log: &RawLog) -> FeedResult<IUniswapV2Pair::Swap> {
    Ok(IUniswapV2Pair::Swap::decode_raw_log(log.topics.iter().copied(), &log.data)?)
}

/// Direction and scaled amounts of a swap log from the point of view of `token`.
///
/// A buy is any swap where the comparator asset flowed into the pool.
pub fn trade_leg(token: &TokenNode, comparator_decimals: u8, log: &RawLog) -> FeedResult<TradeLeg> {
    let swap = decode_swap(log)?;
    let (token_in, token_out, comparator_in, comparator_out) = if token.is_token0 {
        (swap.amount0In, swap.amount0Out, swap.amount1In, swap.amount1Out)
    } else {
        (swap.amount1In, swap.amount1Out, swap.amount0In, swap.amount0Out)
    };

    let (action, token_raw, comparator_raw) = if comparator_in.is_zero() {
        (SwapAction::Sell, token_in, comparator_out)
    } else {
        (SwapAction::Buy, token_out, comparator_in)
    };

    let token_amount = scale_amount(token_raw, token.decimals);
    if token_amount.is_zero() {
        return Err(FeedError::Decode(format!(
            "swap log {} of {} moved no {}",
            log.log_index, log.transaction_hash, token.symbol
        )));
    }
    Ok(TradeLeg { action, token_amount, comparator_amount: scale_amount(comparator_raw, comparator_decimals) })
}

/// Trade leg of a tracked token, looking up the comparator's decimals in the graph.
pub fn trade_leg_for(graph: &NodeGraph, id: NodeId, log: &RawLog) -> FeedResult<TradeLeg> {
    let token = graph.token(id)?;
    let comparator = token
        .comparator
        .ok_or_else(|| FeedError::Decode(format!("{} is a fiat anchor and trades in no pool", id)))?;
    trade_leg(token, graph.token(comparator)?.decimals, log)
}

/// Builds the swap record for a log and appends it to the token's history.
///
/// Uses the comparator's cached fiat price, so the caller refreshes prices first.
pub fn classify(graph: &mut NodeGraph, id: NodeId, log: &RawLog, sender: Address) -> FeedResult<SwapRecord> {
    let leg = trade_leg_for(graph, id, log)?;
    let comparator = graph.token(id)?.comparator.ok_or(FeedError::UnknownNode(id))?;
    let comparator_fiat = graph.token(comparator)?.price.in_fiat.clone();

    let fiat_amount = comparator_fiat.map(|price| &leg.comparator_amount * price);
    let price_in_comparator = &leg.comparator_amount / &leg.token_amount;
    let price_in_fiat = fiat_amount.as_ref().map(|fiat| fiat / &leg.token_amount);

    let record = SwapRecord {
        transaction_hash: log.transaction_hash,
        log_index: log.log_index,
        sender,
        action: leg.action,
        token_amount: leg.token_amount,
        comparator_amount: leg.comparator_amount,
        fiat_amount,
        price_in_comparator,
        price_in_fiat,
        timestamp_ms: now_millis(),
    };
    graph.token_mut(id)?.history.push(record.clone());
    Ok(record)
}
