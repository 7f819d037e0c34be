//! Chain node access.
//!
//! [`ChainNode`] is the read-only view of the chain the crawler needs.
//! [`RpcChainNode`] implements it over an Alloy HTTP provider and maps Alloy
//! types to the crate's raw block types.

use std::future::Future;
use std::sync::Arc;

use alloy::consensus::Transaction as _;
use alloy::network::Ethereum;
use alloy::primitives::B256;
use alloy::providers::fillers::FillProvider;
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::eth::{BlockId, BlockNumberOrTag};
use eyre::{Context, Result};

use crate::error::FetchError;
use crate::types::{RawBlock, RawLog, RawTransaction};

/// Read-only chain queries. Every call must be idempotent.
pub trait ChainNode: Send + Sync {
    /// Current chain head.
    fn get_current_height(&self) -> impl Future<Output = Result<u64, FetchError>> + Send;

    /// Full block with transactions and receipt data.
    fn get_block(&self, height: u64) -> impl Future<Output = Result<RawBlock, FetchError>> + Send;

    /// Canonical hash at `height`.
    fn get_block_hash(&self, height: u64) -> impl Future<Output = Result<B256, FetchError>> + Send;
}

type ProviderType = FillProvider<
    alloy::providers::fillers::JoinFill<
        alloy::providers::Identity,
        alloy::providers::fillers::JoinFill<
            alloy::providers::fillers::GasFiller,
            alloy::providers::fillers::JoinFill<
                alloy::providers::fillers::BlobGasFiller,
                alloy::providers::fillers::JoinFill<
                    alloy::providers::fillers::NonceFiller,
                    alloy::providers::fillers::ChainIdFiller,
                >,
            >,
        >,
    >,
    alloy::providers::RootProvider<Ethereum>,
>;

/// Chain node reached over JSON-RPC.
pub struct RpcChainNode {
    provider: Arc<ProviderType>,
}

impl RpcChainNode {
    /// Creates a client and tests RPC connectivity with `eth_blockNumber`.
    ///
    /// # Arguments
    /// * `rpc_url` - URL of the node's JSON-RPC endpoint
    ///
    /// # Errors
    /// Returns error if the URL is malformed or the connectivity test fails.
    #[tracing::instrument(skip_all, fields(rpc_url = %rpc_url))]
    pub async fn new(rpc_url: &str) -> Result<Self> {
        let provider =
            ProviderBuilder::new().on_http(rpc_url.parse().wrap_err("invalid RPC URL format")?);
        let provider = Arc::new(provider);

        let block_number = provider
            .get_block_number()
            .await
            .wrap_err("failed to test RPC connectivity with eth_blockNumber")?;

        tracing::info!(
            rpc_url = %rpc_url,
            latest_block = block_number,
            "RPC connection successful"
        );

        Ok(Self { provider })
    }

    async fn fetch_transaction(&self, hash: B256, index: u64) -> Result<RawTransaction, FetchError> {
        let (tx, receipt) = futures::try_join!(
            async {
                self.provider
                    .get_transaction_by_hash(hash)
                    .await
                    .map_err(FetchError::transport)?
                    .ok_or(FetchError::MissingTransaction(hash))
            },
            async {
                self.provider
                    .get_transaction_receipt(hash)
                    .await
                    .map_err(FetchError::transport)?
                    .ok_or(FetchError::MissingReceipt(hash))
            }
        )?;

        let logs = receipt
            .inner
            .logs()
            .iter()
            .enumerate()
            .map(|(position, log)| RawLog {
                log_index: log.log_index.unwrap_or(position as u64),
                address: log.inner.address,
                topics: log.inner.data.topics().to_vec(),
                data: log.inner.data.data.clone(),
            })
            .collect();

        Ok(RawTransaction {
            hash,
            index,
            from: receipt.from,
            to: receipt.to,
            value: tx.value(),
            input: tx.input().clone(),
            success: receipt.status(),
            gas_used: receipt.gas_used,
            contract_address: receipt.contract_address,
            logs,
        })
    }
}

impl ChainNode for RpcChainNode {
    async fn get_current_height(&self) -> Result<u64, FetchError> {
        self.provider
            .get_block_number()
            .await
            .map_err(FetchError::transport)
    }

    #[tracing::instrument(skip(self))]
    async fn get_block(&self, height: u64) -> Result<RawBlock, FetchError> {
        let block = self
            .provider
            .get_block(BlockId::Number(BlockNumberOrTag::Number(height)))
            .await
            .map_err(FetchError::transport)?
            .ok_or(FetchError::MissingBlock(height))?;

        let tx_hashes: Vec<B256> = block.transactions.hashes().collect();

        // Transactions and receipts are fetched concurrently, kept in block order
        let transactions = futures::future::try_join_all(
            tx_hashes
                .iter()
                .enumerate()
                .map(|(index, hash)| self.fetch_transaction(*hash, index as u64)),
        )
        .await?;

        tracing::debug!(
            block_number = height,
            transactions = transactions.len(),
            "fetched block"
        );

        Ok(RawBlock {
            number: block.header.number,
            hash: block.header.hash,
            parent_hash: block.header.parent_hash,
            timestamp: block.header.timestamp,
            miner: block.header.beneficiary,
            gas_used: block.header.gas_used,
            transactions,
        })
    }

    async fn get_block_hash(&self, height: u64) -> Result<B256, FetchError> {
        let block = self
            .provider
            .get_block(BlockId::Number(BlockNumberOrTag::Number(height)))
            .await
            .map_err(FetchError::transport)?
            .ok_or(FetchError::MissingBlock(height))?;
        Ok(block.header.hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn new_requires_valid_url() {
        let result = RpcChainNode::new("invalid://url").await;
        assert!(result.is_err(), "should reject invalid URL");
    }
}
