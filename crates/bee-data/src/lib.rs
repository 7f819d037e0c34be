//! bee-data crate
//!
//! Chain-node access, raw and decoded block types, and the SQLite store
//! that persists decoded records and the ingestion cursor.

pub mod chain;
pub mod error;
pub mod sink;
pub mod store;
pub mod types;

pub use chain::{ChainNode, RpcChainNode};
pub use error::FetchError;
pub use sink::{BlockSink, CursorStore};
pub use store::Store;
pub use types::{
    Attribution, DecodedBlock, DecodedEvent, DecodedTransaction, RawBlock, RawLog, RawTransaction,
};
