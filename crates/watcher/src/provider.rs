use alloy::providers::{DynProvider, Provider};
use alloy::rpc::types::{Filter, Log};
use alloy::transports::TransportResult;
use async_trait::async_trait;

/// The two RPC queries the fetch path needs. Kept as a trait so the fetcher
/// and monitor can run against scripted fakes in tests.
#[async_trait]
pub trait ChainRpc: Send + Sync {
    async fn block_number(&self) -> TransportResult<u64>;

    async fn logs(&self, filter: &Filter) -> TransportResult<Vec<Log>>;
}

/// `ChainRpc` over an erased alloy provider.
pub struct EvmRpc {
    provider: DynProvider,
}

impl EvmRpc {
    pub fn new(provider: DynProvider) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl ChainRpc for EvmRpc {
    async fn block_number(&self) -> TransportResult<u64> {
        self.provider.get_block_number().await
    }

    async fn logs(&self, filter: &Filter) -> TransportResult<Vec<Log>> {
        self.provider.get_logs(filter).await
    }
}
