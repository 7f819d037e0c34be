//! In-memory chain for crawler tests.
//!
//! Compiled for this crate's unit tests and, behind the `test-utils`
//! feature, for the integration tests.
#![cfg(any(test, feature = "test-utils"))]

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use alloy::primitives::{keccak256, Address, B256};
use bee_data::{ChainNode, FetchError, RawBlock, RawTransaction};

#[derive(Default)]
struct State {
    height: u64,
    // bumped per height on re-org so hashes change
    salt: HashMap<u64, u8>,
    transactions: HashMap<u64, Vec<RawTransaction>>,
    failing: HashSet<u64>,
    requested: Vec<u64>,
}

/// In-memory chain with deterministic hashes and scriptable failures.
///
/// Every block's `parent_hash` is the current hash of the height below, so
/// a [`MockChain::reorg_from`] between two `get_block` calls yields blocks
/// that do not link.
pub struct MockChain {
    state: Mutex<State>,
}

impl MockChain {
    pub fn new(height: u64) -> Self {
        Self {
            state: Mutex::new(State {
                height,
                ..State::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_height(&self, height: u64) {
        self.lock().height = height;
    }

    pub fn hash_at(&self, height: u64) -> B256 {
        let salt = self.lock().salt.get(&height).copied().unwrap_or(0);
        let mut seed = height.to_be_bytes().to_vec();
        seed.push(salt);
        keccak256(seed)
    }

    /// Replaces every block from `height` up to the head.
    pub fn reorg_from(&self, height: u64) {
        let mut state = self.lock();
        let top = state.height;
        for h in height..=top {
            *state.salt.entry(h).or_default() += 1;
        }
    }

    pub fn set_transactions(&self, height: u64, transactions: Vec<RawTransaction>) {
        self.lock().transactions.insert(height, transactions);
    }

    pub fn fail_block(&self, height: u64) {
        self.lock().failing.insert(height);
    }

    pub fn heal_block(&self, height: u64) {
        self.lock().failing.remove(&height);
    }

    /// Heights passed to `get_block`, in call order.
    pub fn requested(&self) -> Vec<u64> {
        self.lock().requested.clone()
    }

    pub fn block_calls(&self) -> usize {
        self.lock().requested.len()
    }
}

impl ChainNode for MockChain {
    async fn get_current_height(&self) -> Result<u64, FetchError> {
        Ok(self.lock().height)
    }

    async fn get_block(&self, height: u64) -> Result<RawBlock, FetchError> {
        let (transactions, failing) = {
            let mut state = self.lock();
            state.requested.push(height);
            if height > state.height {
                return Err(FetchError::MissingBlock(height));
            }
            (
                state.transactions.get(&height).cloned().unwrap_or_default(),
                state.failing.contains(&height),
            )
        };
        if failing {
            return Err(FetchError::Transport("connection reset".to_string()));
        }
        Ok(RawBlock {
            number: height,
            hash: self.hash_at(height),
            parent_hash: height
                .checked_sub(1)
                .map_or(B256::ZERO, |parent| self.hash_at(parent)),
            timestamp: 1_700_000_000 + height * 12,
            miner: Address::ZERO,
            gas_used: 21_000 * transactions.len() as u64,
            transactions,
        })
    }

    async fn get_block_hash(&self, height: u64) -> Result<B256, FetchError> {
        if height > self.lock().height {
            return Err(FetchError::MissingBlock(height));
        }
        Ok(self.hash_at(height))
    }
}
