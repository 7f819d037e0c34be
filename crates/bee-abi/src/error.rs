//! Error types for registry construction and decoding.

use thiserror::Error;

/// Startup-fatal problems with the contract manifest or registry settings.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    /// Two different canonical signatures hash to the same method id.
    #[error("method id 0x{id} is shared by `{existing}` and `{incoming}`")]
    MethodIdCollision {
        id: String,
        existing: String,
        incoming: String,
    },
    #[error("no contract in the manifest defines a decodable method")]
    EmptyRegistry,
    #[error("selector width must be between 1 and 32 bytes, got {0}")]
    InvalidSelectorWidth(usize),
    #[error("contract `{contract}`: {reason}")]
    InvalidContract { contract: String, reason: String },
    #[error("malformed contract manifest: {0}")]
    Manifest(String),
}

/// Failure to decode one transaction input or log.
///
/// Callers degrade the affected record to raw form; a `DecodeError` never
/// aborts a block.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("input is not valid hex: {0}")]
    InvalidHex(String),
    #[error("unsupported type descriptor `{0}`")]
    UnsupportedType(String),
    /// A word, offset or length points past the end of the data.
    #[error("data truncated: {available} bytes do not cover the declared parameters")]
    Truncated { available: usize },
    /// Offsets or lengths that cannot describe a valid encoding.
    #[error("malformed ABI encoding: {0}")]
    BadOffset(String),
    #[error("event `{event}` expects {expected} topics, log has {actual}")]
    TopicCount {
        event: String,
        expected: usize,
        actual: usize,
    },
}
