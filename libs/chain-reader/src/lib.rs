//! Read-only access to group contracts over JSON-RPC.
//!
//! Provides:
//! - [`ChainReader`], the seam used by the indexer (mocked in tests)
//! - [`RpcChainReader`], an alloy-backed implementation with per-call timeouts
//! - [`ChainRegistry`], mapping chain ids to readers
//!
//! Readers never retry; failures carry [`ChainError::is_retryable`] so the
//! caller decides. State reads take an optional block number; `None` reads
//! the latest block.

mod errors;
mod types;

pub use errors::ChainError;
pub use types::GroupChainState;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::{BlockId, Filter};
use alloy::transports::http::reqwest::Url;
use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;
use common::amount::Amount;
use common::events::RawLog;

// View functions of the group token, bound for RPC calls
alloy::sol! {
    #[sol(rpc)]
    interface ICommunityTokenReader {
        function totalSupply() external view returns (uint256);
        function balanceOf(address account) external view returns (uint256);
        function reserveBalance() external view returns (uint256);
        function currentPrice() external view returns (uint256);
        function charterCid() external view returns (string memory);
    }
}

/// Chain queries needed by the indexer.
#[async_trait]
pub trait ChainReader: Send + Sync {
    fn chain_id(&self) -> u64;

    /// Current head block
    async fn block_number(&self) -> Result<u64, ChainError>;

    /// Logs emitted by `contract` matching any of `signatures` within
    /// `[from_block, to_block]`, both ends inclusive.
    async fn get_logs(
        &self,
        contract: Address,
        signatures: &[B256],
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RawLog>, ChainError>;

    async fn total_supply(&self, token: Address, block: Option<u64>) -> Result<Amount, ChainError>;

    async fn reserve_balance(&self, token: Address, block: Option<u64>) -> Result<Amount, ChainError>;

    async fn balance_of(&self, token: Address, account: Address, block: Option<u64>) -> Result<Amount, ChainError>;

    async fn current_price(&self, token: Address) -> Result<Amount, ChainError>;

    async fn charter_cid(&self, token: Address) -> Result<String, ChainError>;

    /// Native balance of any account
    async fn eth_balance(&self, account: Address, block: Option<u64>) -> Result<Amount, ChainError>;

    /// Snapshot of a token's live state
    async fn group_state(&self, token: Address) -> Result<GroupChainState, ChainError> {
        Ok(GroupChainState {
            total_supply: self.total_supply(token, None).await?,
            reserve_balance: self.reserve_balance(token, None).await?,
            current_price: self.current_price(token).await?,
            charter_cid: self.charter_cid(token).await?,
        })
    }
}

/// [`ChainReader`] over an alloy provider.
///
/// Generic over the provider type so tests and callers can bring their own
/// transport.
pub struct RpcChainReader<P: Provider + Clone> {
    provider: P,
    chain_id: u64,
    timeout: Duration,
}

impl<P> RpcChainReader<P>
where
    P: Provider + Clone + Send + Sync + 'static,
{
    pub fn new(provider: P, chain_id: u64, timeout: Duration) -> Self {
        Self {
            provider,
            chain_id,
            timeout,
        }
    }

    async fn bounded<T, F>(&self, operation: &'static str, fut: F) -> Result<T, ChainError>
    where
        F: Future<Output = Result<T, ChainError>> + Send,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(chain_id = self.chain_id, operation, "RPC call timed out");
                Err(ChainError::Timeout {
                    operation,
                    secs: self.timeout.as_secs(),
                })
            }
        }
    }
}

/// Connect an HTTP reader for one chain.
pub fn connect_http(chain_id: u64, rpc_url: &str, timeout: Duration) -> Result<Arc<dyn ChainReader>, ChainError> {
    let url: Url = rpc_url
        .parse()
        .map_err(|_| ChainError::InvalidConfig(format!("Invalid RPC URL for chain {}: {}", chain_id, rpc_url)))?;
    let provider = ProviderBuilder::new().connect_http(url);
    Ok(Arc::new(RpcChainReader::new(provider, chain_id, timeout)))
}

fn to_amount(call: &'static str, value: U256) -> Result<Amount, ChainError> {
    Amount::from_wei(value).ok_or(ChainError::ValueOverflow { call })
}

fn block_id(block: Option<u64>) -> BlockId {
    block.map(BlockId::number).unwrap_or_else(BlockId::latest)
}

fn call_failed(call: &'static str) -> impl FnOnce(alloy::contract::Error) -> ChainError {
    move |e| ChainError::ContractCallFailed {
        call,
        reason: e.to_string(),
    }
}

#[async_trait]
impl<P> ChainReader for RpcChainReader<P>
where
    P: Provider + Clone + Send + Sync + 'static,
{
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn block_number(&self) -> Result<u64, ChainError> {
        self.bounded("eth_blockNumber", async {
            self.provider
                .get_block_number()
                .await
                .map_err(|e| ChainError::RpcError(format!("Failed to get block number: {}", e)))
        })
        .await
    }

    async fn get_logs(
        &self,
        contract: Address,
        signatures: &[B256],
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RawLog>, ChainError> {
        let filter = Filter::new()
            .address(contract)
            .event_signature(signatures.to_vec())
            .from_block(from_block)
            .to_block(to_block);

        let logs = self
            .bounded("eth_getLogs", async {
                self.provider
                    .get_logs(&filter)
                    .await
                    .map_err(|e| ChainError::RpcError(format!("Failed to fetch logs for {}: {}", contract, e)))
            })
            .await?;

        let mut raw_logs = Vec::with_capacity(logs.len());
        for log in logs {
            if log.removed {
                continue;
            }
            let (Some(block_number), Some(tx_hash), Some(log_index)) =
                (log.block_number, log.transaction_hash, log.log_index)
            else {
                tracing::debug!(%contract, "Skipping pending log without position");
                continue;
            };
            raw_logs.push(RawLog {
                address: log.inner.address,
                topics: log.inner.data.topics().to_vec(),
                data: log.inner.data.data.clone(),
                block_number,
                tx_hash,
                log_index,
            });
        }

        tracing::debug!(
            chain_id = self.chain_id,
            %contract,
            from_block,
            to_block,
            count = raw_logs.len(),
            "Fetched logs"
        );
        Ok(raw_logs)
    }

    async fn total_supply(&self, token: Address, block: Option<u64>) -> Result<Amount, ChainError> {
        let contract = ICommunityTokenReader::new(token, &self.provider);
        let value = self
            .bounded("totalSupply", async {
                contract.totalSupply().block(block_id(block)).call().await.map_err(call_failed("totalSupply"))
            })
            .await?;
        to_amount("totalSupply", value)
    }

    async fn reserve_balance(&self, token: Address, block: Option<u64>) -> Result<Amount, ChainError> {
        let contract = ICommunityTokenReader::new(token, &self.provider);
        let value = self
            .bounded("reserveBalance", async {
                contract
                    .reserveBalance()
                    .block(block_id(block))
                    .call()
                    .await.map_err(call_failed("reserveBalance"))
            })
            .await?;
        to_amount("reserveBalance", value)
    }

    async fn balance_of(&self, token: Address, account: Address, block: Option<u64>) -> Result<Amount, ChainError> {
        let contract = ICommunityTokenReader::new(token, &self.provider);
        let value = self
            .bounded("balanceOf", async {
                contract
                    .balanceOf(account)
                    .block(block_id(block))
                    .call()
                    .await.map_err(call_failed("balanceOf"))
            })
            .await?;
        to_amount("balanceOf", value)
    }

    async fn current_price(&self, token: Address) -> Result<Amount, ChainError> {
        let contract = ICommunityTokenReader::new(token, &self.provider);
        let value = self
            .bounded("currentPrice", async {
                contract.currentPrice().call().await.map_err(call_failed("currentPrice"))
            })
            .await?;
        to_amount("currentPrice", value)
    }

    async fn charter_cid(&self, token: Address) -> Result<String, ChainError> {
        let contract = ICommunityTokenReader::new(token, &self.provider);
        self.bounded("charterCid", async {
            contract.charterCid().call().await.map_err(call_failed("charterCid"))
        })
        .await
    }

    async fn eth_balance(&self, account: Address, block: Option<u64>) -> Result<Amount, ChainError> {
        let value = self
            .bounded("eth_getBalance", async {
                self.provider
                    .get_balance(account)
                    .block_id(block_id(block))
                    .await
                    .map_err(|e| ChainError::RpcError(format!("Failed to get balance of {}: {}", account, e)))
            })
            .await?;
        to_amount("eth_getBalance", value)
    }
}

/// Readers keyed by chain id.
#[derive(Default, Clone)]
pub struct ChainRegistry {
    readers: HashMap<u64, Arc<dyn ChainReader>>,
}

impl ChainRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, reader: Arc<dyn ChainReader>) {
        self.readers.insert(reader.chain_id(), reader);
    }

    pub fn get(&self, chain_id: u64) -> Result<Arc<dyn ChainReader>, ChainError> {
        self.readers
            .get(&chain_id)
            .cloned()
            .ok_or(ChainError::UnsupportedChain(chain_id))
    }

    pub fn chain_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.readers.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn is_empty(&self) -> bool {
        self.readers.is_empty()
    }
}
