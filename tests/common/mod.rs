//! Shared test helpers and utilities.
//!
//! Re-exports the crawler's in-memory chain and provides a store factory
//! and a small token contract with helpers to build calldata against it.

#![allow(dead_code)]

use std::sync::Arc;

use alloy::dyn_abi::DynSolValue;
use alloy::primitives::{keccak256, Address, Bytes, B256, U256};
use bee_abi::{ContractArtifact, MethodRegistry};
use bee_data::{RawLog, RawTransaction, Store};

pub use bee_crawler::test_utils::MockChain;

/// Creates an in-memory SQLite Store.
///
/// # Panics
/// Panics if the in-memory database cannot be created (should never happen).
pub fn test_store() -> Store {
    Store::new(":memory:").expect("in-memory store should always open")
}

pub const TOKEN_BYTECODE: &str = "0x608060405234801561001057600080fd5b50";

pub const TOKEN_ABI: &str = r#"[
    {"type":"constructor","inputs":[{"name":"supply","type":"uint256"},{"name":"symbol","type":"string"}],"stateMutability":"nonpayable"},
    {"type":"function","name":"transfer","inputs":[{"name":"to","type":"address"},{"name":"amount","type":"uint256"}],"outputs":[{"name":"","type":"bool"}],"stateMutability":"nonpayable"},
    {"type":"function","name":"batchMint","inputs":[{"name":"recipients","type":"address[]"},{"name":"memo","type":"bytes"}],"outputs":[],"stateMutability":"nonpayable"},
    {"type":"function","name":"balanceOf","inputs":[{"name":"who","type":"address"}],"outputs":[{"name":"","type":"uint256"}],"stateMutability":"view"},
    {"type":"event","name":"Transfer","anonymous":false,"inputs":[{"name":"from","type":"address","indexed":true},{"name":"to","type":"address","indexed":true},{"name":"value","type":"uint256","indexed":false}]}
]"#;

pub const VAULT_ABI: &str = r#"[
    {"type":"function","name":"deposit","inputs":[{"name":"assets","type":"uint256"},{"name":"receiver","type":"address"}],"outputs":[{"name":"","type":"uint256"}],"stateMutability":"nonpayable"},
    {"type":"function","name":"pause","inputs":[],"outputs":[],"stateMutability":"nonpayable"}
]"#;

pub fn token_artifact() -> ContractArtifact {
    ContractArtifact::new("Token", TOKEN_BYTECODE, TOKEN_ABI).expect("token artifact should parse")
}

pub fn vault_artifact() -> ContractArtifact {
    ContractArtifact::new("Vault", "", VAULT_ABI).expect("vault artifact should parse")
}

pub fn test_registry() -> Arc<MethodRegistry> {
    Arc::new(
        MethodRegistry::build(&[token_artifact(), vault_artifact()])
            .expect("test registry should build"),
    )
}

/// Method id followed by the ABI encoding of `args`.
pub fn calldata(signature: &str, args: Vec<DynSolValue>) -> Bytes {
    let mut input = keccak256(signature.as_bytes())[..4].to_vec();
    input.extend(DynSolValue::Tuple(args).abi_encode_params());
    Bytes::from(input)
}

/// Creates a transaction with sensible defaults.
pub fn sample_tx(seed: u8, to: Option<Address>, input: Bytes) -> RawTransaction {
    RawTransaction {
        hash: B256::repeat_byte(seed),
        index: 0,
        from: Address::repeat_byte(0xf3),
        to,
        value: U256::ZERO,
        input,
        success: true,
        gas_used: 21_000,
        contract_address: None,
        logs: Vec::new(),
    }
}

/// A `Transfer(from, to, value)` log emitted by the token.
pub fn transfer_log(log_index: u64, from: Address, to: Address, value: u64) -> RawLog {
    RawLog {
        log_index,
        address: Address::repeat_byte(0x70),
        topics: vec![
            keccak256("Transfer(address,address,uint256)".as_bytes()),
            from.into_word(),
            to.into_word(),
        ],
        data: Bytes::from(U256::from(value).to_be_bytes::<32>().to_vec()),
    }
}
