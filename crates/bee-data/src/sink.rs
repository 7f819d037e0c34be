//! Persistence seams used by the crawler.

use bee_abi::ContractMethodInfo;
use eyre::Result;

use crate::types::DecodedBlock;

/// Receives decoded records.
///
/// Writes must be idempotent per key: saving the same block or contract
/// again overwrites the earlier record, because the crawler redelivers
/// blocks after timeouts and forks.
pub trait BlockSink {
    fn save_block(&self, block: &DecodedBlock) -> Result<()>;

    fn save_contract(&self, contract: &ContractMethodInfo) -> Result<()>;

    /// Removes every record at or above `height`. Returns the number of
    /// blocks removed.
    fn rollback_from(&self, height: u64) -> Result<usize>;
}

/// Durable ingestion cursor: the next height to ingest.
pub trait CursorStore {
    fn load_start_height(&self) -> Result<Option<u64>>;

    fn advance_height(&self, next_height: u64) -> Result<()>;
}
