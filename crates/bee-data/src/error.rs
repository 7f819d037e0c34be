use alloy::primitives::B256;
use thiserror::Error;

/// Failure to read from the chain node.
///
/// A fetch error aborts the current batch; the claimed tasks stay in flight
/// until the timeout path hands them back for retry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("chain node request failed: {0}")]
    Transport(String),
    #[error("block {0} not found on chain node")]
    MissingBlock(u64),
    #[error("transaction {0} not found on chain node")]
    MissingTransaction(B256),
    #[error("receipt for transaction {0} not found on chain node")]
    MissingReceipt(B256),
}

impl FetchError {
    pub fn transport(err: impl std::fmt::Display) -> Self {
        Self::Transport(err.to_string())
    }
}
