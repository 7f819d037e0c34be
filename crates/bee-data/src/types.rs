//! Type definitions for raw chain data and decoded records.

use alloy::primitives::{Address, Bytes, B256, U256};
use bee_abi::DecodedParam;
use serde::Serialize;

/// Block as returned by the chain node, with receipts folded in.
#[derive(Clone, Debug, PartialEq)]
pub struct RawBlock {
    pub number: u64,
    pub hash: B256,
    pub parent_hash: B256,
    /// Timestamp in unix seconds.
    pub timestamp: u64,
    pub miner: Address,
    pub gas_used: u64,
    pub transactions: Vec<RawTransaction>,
}

/// Transaction plus the receipt fields the decoder needs.
#[derive(Clone, Debug, PartialEq)]
pub struct RawTransaction {
    pub hash: B256,
    pub index: u64,
    pub from: Address,
    /// `None` for contract creation.
    pub to: Option<Address>,
    pub value: U256,
    pub input: Bytes,
    /// Execution status from the receipt.
    pub success: bool,
    pub gas_used: u64,
    /// Address created by a deployment, from the receipt.
    pub contract_address: Option<Address>,
    pub logs: Vec<RawLog>,
}

impl RawTransaction {
    pub fn is_deployment(&self) -> bool {
        self.to.is_none()
    }
}

/// Receipt log entry.
#[derive(Clone, Debug, PartialEq)]
pub struct RawLog {
    /// Log index within the block.
    pub log_index: u64,
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
}

/// How a transaction was matched against the registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Attribution {
    /// Method id matched a registered method.
    Method,
    /// Creation bytecode matched a registered contract.
    Deployment,
    /// Nothing matched, or decoding failed; stored raw.
    Unattributed,
}

impl Attribution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Method => "method",
            Self::Deployment => "deployment",
            Self::Unattributed => "unattributed",
        }
    }
}

/// Decoded transaction record.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DecodedTransaction {
    pub block_number: u64,
    /// Transaction hash (hex text).
    pub tx_hash: String,
    pub tx_index: u64,
    pub from_address: String,
    /// Recipient (None for contract creation).
    pub to_address: Option<String>,
    pub contract_address: Option<String>,
    /// Value in Wei (decimal text).
    pub value: String,
    /// Execution status (1=success, 0=revert).
    pub status: u32,
    pub gas_used: u64,
    /// Raw input (hex with 0x prefix), kept for every record.
    pub input: String,
    pub attribution: Attribution,
    pub contract_name: Option<String>,
    pub method_name: Option<String>,
    pub method_id: Option<String>,
    pub params: Vec<DecodedParam>,
    /// Why a matched transaction fell back to raw form.
    pub decode_error: Option<String>,
}

/// Decoded receipt log.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DecodedEvent {
    pub block_number: u64,
    pub tx_hash: String,
    pub log_index: u64,
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    pub contract_name: Option<String>,
    pub event_name: Option<String>,
    pub params: Vec<DecodedParam>,
    pub decode_error: Option<String>,
}

/// Everything persisted for one block.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DecodedBlock {
    pub block_number: u64,
    /// Block hash (hex text).
    pub block_hash: String,
    pub parent_hash: String,
    pub timestamp: u64,
    pub miner: String,
    pub gas_used: u64,
    pub transaction_count: u64,
    /// Chain head when the block was processed.
    pub chain_height: u64,
    /// Unix seconds at processing time.
    pub ingested_at: i64,
    pub transactions: Vec<DecodedTransaction>,
    pub events: Vec<DecodedEvent>,
}
