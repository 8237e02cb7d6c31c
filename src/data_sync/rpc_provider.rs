use super::abi::{IERC20, IUniswapV2Factory, IUniswapV2Pair};
use super::provider::{Connector, LogFilter, LogStream, PoolProvider, RawLog, TokenMetadata, TransactionInfo};
use crate::feed_error::{FeedError, FeedResult};
use alloy_network::TransactionResponse;
use alloy_primitives::{Address, B256, U256};
use alloy_provider::{DynProvider, Provider, ProviderBuilder};
use alloy_rpc_types::{Filter, Log, TransactionInput, TransactionRequest};
use alloy_sol_types::SolCall;
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use tracing::{debug, info};

/// JSON-RPC backed provider (HTTP or WebSocket, chosen by the URL scheme).
#[derive(Clone)]
pub struct RpcProvider {
    provider: DynProvider,
}

impl RpcProvider {
    pub fn new(provider: DynProvider) -> Self {
        Self { provider }
    }

    pub async fn connect(url: &str) -> FeedResult<Self> {
        let provider = ProviderBuilder::new().connect(url).await?.erased();
        Ok(Self { provider })
    }

    async fn call<C: SolCall + Send>(&self, to: Address, call: C) -> FeedResult<C::Return> {
        let request = TransactionRequest::default().to(to).input(TransactionInput::new(call.abi_encode().into()));
        let output = self.provider.call(request).await?;
        Ok(C::abi_decode_returns(&output)?)
    }
}

fn to_raw_log(log: &Log) -> Option<RawLog> {
    Some(RawLog {
        address: log.inner.address,
        topics: log.inner.data.topics().to_vec(),
        data: log.inner.data.data.clone(),
        // pending logs carry neither
        log_index: log.log_index?,
        transaction_hash: log.transaction_hash?,
    })
}

#[async_trait]
impl PoolProvider for RpcProvider {
    async fn get_reserves(&self, pool: Address) -> FeedResult<(U256, U256)> {
        let reserves = self.call(pool, IUniswapV2Pair::getReservesCall {}).await?;
        Ok((U256::from(reserves.reserve0), U256::from(reserves.reserve1)))
    }

    async fn get_pair_address(&self, factory: Address, token_a: Address, token_b: Address) -> FeedResult<Option<Address>> {
        let pair = self.call(factory, IUniswapV2Factory::getPairCall { tokenA: token_a, tokenB: token_b }).await?;
        Ok(if pair.is_zero() { None } else { Some(pair) })
    }

    async fn get_pool_token0(&self, pool: Address) -> FeedResult<Address> {
        self.call(pool, IUniswapV2Pair::token0Call {}).await
    }

    async fn get_token_metadata(&self, token: Address) -> FeedResult<TokenMetadata> {
        let (decimals, symbol) = tokio::try_join!(self.call(token, IERC20::decimalsCall {}), self.call(token, IERC20::symbolCall {}))?;
        Ok(TokenMetadata { decimals, symbol })
    }

    async fn get_transaction(&self, hash: B256) -> FeedResult<TransactionInfo> {
        let transaction = self
            .provider
            .get_transaction_by_hash(hash)
            .await?
            .ok_or_else(|| FeedError::ProviderTransient(format!("transaction {} not found", hash)))?;
        Ok(TransactionInfo { hash: transaction.tx_hash(), from: transaction.from() })
    }

    async fn get_receipt(&self, transaction: &TransactionInfo) -> FeedResult<Vec<RawLog>> {
        let receipt = self
            .provider
            .get_transaction_receipt(transaction.hash)
            .await?
            .ok_or_else(|| FeedError::ProviderTransient(format!("receipt {} not found", transaction.hash)))?;
        Ok(receipt.inner.logs().iter().filter_map(to_raw_log).collect())
    }

    async fn subscribe(&self, filter: &LogFilter) -> FeedResult<LogStream> {
        let rpc_filter = Filter::new().address(filter.addresses.clone()).event_signature(filter.topic);
        let subscription = self.provider.subscribe_logs(&rpc_filter).await?;
        debug!("Subscribed to {} pool(s)", filter.addresses.len());
        Ok(subscription.into_stream().filter_map(|log| async move { to_raw_log(&log) }).boxed())
    }

    async fn unsubscribe(&self, filter: &LogFilter) -> FeedResult<()> {
        // the server side subscription ends when its stream is dropped
        debug!("Unsubscribed from {} pool(s)", filter.addresses.len());
        Ok(())
    }
}

/// Treats the endpoint connection key as an RPC URL.
#[derive(Debug, Default, Clone)]
pub struct RpcConnector;

#[async_trait]
impl Connector for RpcConnector {
    async fn connect(&self, connection_key: &str) -> FeedResult<Arc<dyn PoolProvider>> {
        info!("Connecting to endpoint {}", connection_key);
        let provider = RpcProvider::connect(connection_key).await?;
        Ok(Arc::new(provider))
    }
}
