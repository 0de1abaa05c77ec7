use std::{collections::HashMap, future::Future, time::Duration};

use alloy::{
    eips::{BlockId, BlockNumberOrTag},
    primitives::{Address, B256, Bytes},
    providers::{Provider, RootProvider},
    rpc::{client::RpcClient, types::TransactionRequest},
    transports::http::{
        Http,
        reqwest::{ClientBuilder as HttpClientBuilder, Url},
    },
};
use serde::{Deserialize, Serialize};

use crate::error::{AlloyRpcErrorToEngineError, EngineError};

/// Execution settings for a single configured chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainSettings {
    pub chain_id: u64,
    /// Blocks that must be built on top of the inclusion block before a receipt is final.
    #[serde(default = "default_confirmations")]
    pub confirmations: u64,
    /// Whether the chain prices gas with a base fee.
    #[serde(default = "default_eip1559")]
    pub eip1559: bool,
    #[serde(default = "default_rpc_timeout_ms")]
    pub rpc_timeout_ms: u64,
}

fn default_confirmations() -> u64 {
    1
}

fn default_eip1559() -> bool {
    true
}

fn default_rpc_timeout_ms() -> u64 {
    10_000
}

impl ChainSettings {
    pub fn new(chain_id: u64) -> Self {
        Self {
            chain_id,
            confirmations: default_confirmations(),
            eip1559: default_eip1559(),
            rpc_timeout_ms: default_rpc_timeout_ms(),
        }
    }
}

/// The slice of a transaction receipt the engine acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptSummary {
    pub transaction_hash: B256,
    pub block_number: u64,
    pub success: bool,
    pub gas_used: u64,
    pub effective_gas_price: u128,
}

/// RPC surface of an EVM chain, as used by the submission and confirmation workers.
pub trait Chain: Send + Sync {
    fn chain_id(&self) -> u64;
    fn rpc_url(&self) -> Url;
    fn settings(&self) -> &ChainSettings;

    /// Number of transactions from `address` included in the latest block.
    fn get_transaction_count(
        &self,
        address: Address,
    ) -> impl Future<Output = Result<u64, EngineError>> + Send;

    /// Like [`Chain::get_transaction_count`], but counting the node's mempool as well.
    fn get_pending_transaction_count(
        &self,
        address: Address,
    ) -> impl Future<Output = Result<u64, EngineError>> + Send;

    fn get_block_number(&self) -> impl Future<Output = Result<u64, EngineError>> + Send;

    /// Base fee of the latest block, `None` when the chain has no base fee.
    fn get_base_fee(&self) -> impl Future<Output = Result<Option<u128>, EngineError>> + Send;

    fn get_max_priority_fee_per_gas(
        &self,
    ) -> impl Future<Output = Result<u128, EngineError>> + Send;

    fn get_gas_price(&self) -> impl Future<Output = Result<u128, EngineError>> + Send;

    fn estimate_gas(
        &self,
        request: &TransactionRequest,
    ) -> impl Future<Output = Result<u64, EngineError>> + Send;

    fn send_raw_transaction(
        &self,
        raw: &Bytes,
    ) -> impl Future<Output = Result<B256, EngineError>> + Send;

    /// `None` while the transaction is unknown or not yet included.
    fn get_transaction_receipt(
        &self,
        hash: B256,
    ) -> impl Future<Output = Result<Option<ReceiptSummary>, EngineError>> + Send;
}

pub struct RpcChainConfig<'a> {
    pub settings: &'a ChainSettings,
    pub rpc_url: &'a str,
}

/// A chain reached over JSON-RPC through an alloy provider.
#[derive(Clone)]
pub struct RpcChain {
    settings: ChainSettings,
    rpc_url: Url,
    pub provider: RootProvider,
}

impl RpcChainConfig<'_> {
    pub fn to_chain(&self) -> Result<RpcChain, EngineError> {
        let rpc_url = Url::parse(self.rpc_url).map_err(|e| EngineError::RpcConfigError {
            message: format!(
                "Failed to parse RPC URL for chain {}: {e}",
                self.settings.chain_id
            ),
        })?;

        let http_client = HttpClientBuilder::new()
            .timeout(Duration::from_millis(self.settings.rpc_timeout_ms))
            .build()
            .map_err(|e| EngineError::RpcConfigError {
                message: format!("Failed to build HTTP client: {e}"),
            })?;

        let transport = Http::with_client(http_client, rpc_url.clone());
        let client = RpcClient::new(transport, false);

        Ok(RpcChain {
            settings: self.settings.clone(),
            rpc_url,
            provider: RootProvider::new(client),
        })
    }
}

impl Chain for RpcChain {
    fn chain_id(&self) -> u64 {
        self.settings.chain_id
    }

    fn rpc_url(&self) -> Url {
        self.rpc_url.clone()
    }

    fn settings(&self) -> &ChainSettings {
        &self.settings
    }

    async fn get_transaction_count(&self, address: Address) -> Result<u64, EngineError> {
        self.provider
            .get_transaction_count(address)
            .block_id(BlockId::latest())
            .await
            .map_err(|e| e.to_engine_error(self))
    }

    async fn get_pending_transaction_count(&self, address: Address) -> Result<u64, EngineError> {
        self.provider
            .get_transaction_count(address)
            .block_id(BlockId::pending())
            .await
            .map_err(|e| e.to_engine_error(self))
    }

    async fn get_block_number(&self) -> Result<u64, EngineError> {
        self.provider
            .get_block_number()
            .await
            .map_err(|e| e.to_engine_error(self))
    }

    async fn get_base_fee(&self) -> Result<Option<u128>, EngineError> {
        let block = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Latest)
            .await
            .map_err(|e| e.to_engine_error(self))?;

        Ok(block.and_then(|block| block.header.base_fee_per_gas.map(u128::from)))
    }

    async fn get_max_priority_fee_per_gas(&self) -> Result<u128, EngineError> {
        self.provider
            .get_max_priority_fee_per_gas()
            .await
            .map_err(|e| e.to_engine_error(self))
    }

    async fn get_gas_price(&self) -> Result<u128, EngineError> {
        self.provider
            .get_gas_price()
            .await
            .map_err(|e| e.to_engine_error(self))
    }

    async fn estimate_gas(&self, request: &TransactionRequest) -> Result<u64, EngineError> {
        self.provider
            .estimate_gas(request.clone())
            .await
            .map_err(|e| e.to_engine_error(self))
    }

    async fn send_raw_transaction(&self, raw: &Bytes) -> Result<B256, EngineError> {
        let pending = self
            .provider
            .send_raw_transaction(raw)
            .await
            .map_err(|e| e.to_engine_error(self))?;

        Ok(*pending.tx_hash())
    }

    async fn get_transaction_receipt(
        &self,
        hash: B256,
    ) -> Result<Option<ReceiptSummary>, EngineError> {
        let receipt = self
            .provider
            .get_transaction_receipt(hash)
            .await
            .map_err(|e| e.to_engine_error(self))?;

        Ok(receipt.and_then(|receipt| {
            receipt.block_number.map(|block_number| ReceiptSummary {
                transaction_hash: receipt.transaction_hash,
                block_number,
                success: receipt.status(),
                gas_used: receipt.gas_used,
                effective_gas_price: receipt.effective_gas_price,
            })
        }))
    }
}

pub trait ChainService: Send + Sync {
    type Chain: Chain + Clone + 'static;

    fn get_chain(&self, chain_id: u64) -> Result<Self::Chain, EngineError>;

    fn chain_ids(&self) -> Vec<u64>;
}

/// Chains built from static configuration, one provider per chain.
#[derive(Clone, Default)]
pub struct RpcChainService {
    chains: HashMap<u64, RpcChain>,
}

impl RpcChainService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_chain(&mut self, config: RpcChainConfig<'_>) -> Result<(), EngineError> {
        let chain = config.to_chain()?;
        tracing::debug!(chain_id = chain.chain_id(), rpc_url = %chain.rpc_url, "Registered chain");
        self.chains.insert(chain.chain_id(), chain);
        Ok(())
    }
}

impl ChainService for RpcChainService {
    type Chain = RpcChain;

    fn get_chain(&self, chain_id: u64) -> Result<RpcChain, EngineError> {
        self.chains
            .get(&chain_id)
            .cloned()
            .ok_or(EngineError::UnknownChainError { chain_id })
    }

    fn chain_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.chains.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}
