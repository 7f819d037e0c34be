//! Block decoding and hand-off to the sink.
//!
//! Each transaction is attributed in order: input whose leading bytes match
//! a registered method id, a deployment whose creation code starts with a
//! registered contract binary, otherwise unattributed. Unattributed and
//! undecodable transactions are still recorded with their raw fields.

use std::sync::Arc;

use alloy::primitives::{hex, B256};
use bee_abi::{decode_bytes, decode_log, named_params, MethodMetaInfo, MethodRegistry};
use bee_data::{
    Attribution, BlockSink, DecodedBlock, DecodedEvent, DecodedTransaction, RawBlock, RawLog,
    RawTransaction,
};
use eyre::Result;

pub struct BlockProcessor {
    registry: Arc<MethodRegistry>,
    persist: bool,
}

impl BlockProcessor {
    pub fn new(registry: Arc<MethodRegistry>, persist: bool) -> Self {
        Self { registry, persist }
    }

    pub fn persist(&self) -> bool {
        self.persist
    }

    /// Registers every known contract with the sink.
    ///
    /// # Errors
    /// Returns error if the sink rejects a contract.
    pub fn save_contracts<S: BlockSink>(&self, sink: &S) -> Result<()> {
        if !self.persist {
            return Ok(());
        }
        for contract in self.registry.contracts() {
            sink.save_contract(contract)?;
        }
        tracing::info!(
            contracts = self.registry.contracts().len(),
            "registered contracts with sink"
        );
        Ok(())
    }

    /// Decodes `block` and saves it when persistence is enabled.
    ///
    /// # Errors
    /// Returns error if the sink fails. Decoding problems never fail the
    /// block, they are recorded on the affected transaction or event.
    #[tracing::instrument(skip_all, fields(block_number = block.number))]
    pub fn handle_single_block<S: BlockSink>(
        &self,
        sink: &S,
        block: &RawBlock,
        chain_height: u64,
    ) -> Result<DecodedBlock> {
        let decoded = self.decode_block(block, chain_height);
        if self.persist {
            sink.save_block(&decoded)?;
        }
        tracing::debug!(
            transactions = decoded.transactions.len(),
            events = decoded.events.len(),
            "processed block"
        );
        Ok(decoded)
    }

    pub fn decode_block(&self, block: &RawBlock, chain_height: u64) -> DecodedBlock {
        let transactions = block
            .transactions
            .iter()
            .map(|tx| self.decode_transaction(block.number, tx))
            .collect();
        let events = block
            .transactions
            .iter()
            .flat_map(|tx| tx.logs.iter().map(move |log| (tx.hash, log)))
            .map(|(tx_hash, log)| self.decode_event(block.number, tx_hash, log))
            .collect();

        DecodedBlock {
            block_number: block.number,
            block_hash: block.hash.to_string(),
            parent_hash: block.parent_hash.to_string(),
            timestamp: block.timestamp,
            miner: block.miner.to_string(),
            gas_used: block.gas_used,
            transaction_count: block.transactions.len() as u64,
            chain_height,
            ingested_at: chrono::Utc::now().timestamp(),
            transactions,
            events,
        }
    }

    pub fn decode_transaction(&self, block_number: u64, tx: &RawTransaction) -> DecodedTransaction {
        let mut decoded = DecodedTransaction {
            block_number,
            tx_hash: tx.hash.to_string(),
            tx_index: tx.index,
            from_address: tx.from.to_string(),
            to_address: tx.to.map(|a| a.to_string()),
            contract_address: tx.contract_address.map(|a| a.to_string()),
            value: tx.value.to_string(),
            status: u32::from(tx.success),
            gas_used: tx.gas_used,
            input: hex::encode_prefixed(&tx.input),
            attribution: Attribution::Unattributed,
            contract_name: None,
            method_name: None,
            method_id: None,
            params: Vec::new(),
            decode_error: None,
        };

        if let Some(method) = self.registry.method_for_input(&tx.input) {
            self.attribute_call(method, tx, &mut decoded);
        } else if tx.is_deployment() {
            self.attribute_deployment(tx, &mut decoded);
        }
        decoded
    }

    fn attribute_call(
        &self,
        method: &MethodMetaInfo,
        tx: &RawTransaction,
        decoded: &mut DecodedTransaction,
    ) {
        let args = &tx.input[self.registry.selector_width()..];
        match decode_bytes(args, &method.inputs) {
            Ok(values) => {
                decoded.attribution = Attribution::Method;
                decoded.contract_name = Some(method.contract_name.clone());
                decoded.method_name = Some(method.method_name.clone());
                decoded.method_id = Some(method.method_id.to_string());
                decoded.params = named_params(&method.inputs, &values);
            }
            Err(e) => {
                tracing::warn!(
                    tx_hash = %tx.hash,
                    method = %method.signature,
                    error = %e,
                    "failed to decode call arguments"
                );
                decoded.decode_error = Some(e.to_string());
            }
        }
    }

    fn attribute_deployment(&self, tx: &RawTransaction, decoded: &mut DecodedTransaction) {
        let Some(contract) = self.registry.contract_for_deployment(&tx.input) else {
            return;
        };
        decoded.attribution = Attribution::Deployment;
        decoded.contract_name = Some(contract.contract_name.clone());

        let Some(constructor) = contract.constructor() else {
            return;
        };
        decoded.method_name = Some(constructor.method_name.clone());
        decoded.method_id = Some(constructor.method_id.to_string());

        let args = &tx.input[contract.bytecode.len()..];
        match decode_bytes(args, &constructor.inputs) {
            Ok(values) => decoded.params = named_params(&constructor.inputs, &values),
            Err(e) => {
                tracing::warn!(
                    tx_hash = %tx.hash,
                    contract = %contract.contract_name,
                    error = %e,
                    "failed to decode constructor arguments"
                );
                decoded.decode_error = Some(e.to_string());
            }
        }
    }

    fn decode_event(&self, block_number: u64, tx_hash: B256, log: &RawLog) -> DecodedEvent {
        let mut decoded = DecodedEvent {
            block_number,
            tx_hash: tx_hash.to_string(),
            log_index: log.log_index,
            address: log.address.to_string(),
            topics: log.topics.iter().map(|t| t.to_string()).collect(),
            data: hex::encode_prefixed(&log.data),
            contract_name: None,
            event_name: None,
            params: Vec::new(),
            decode_error: None,
        };

        let Some(event) = log.topics.first().and_then(|t| self.registry.event(t)) else {
            return decoded;
        };
        decoded.contract_name = Some(event.contract_name.clone());
        decoded.event_name = Some(event.event_name.clone());
        match decode_log(event, &log.topics, &log.data) {
            Ok(values) => decoded.params = named_params(&event.params, &values),
            Err(e) => {
                tracing::debug!(
                    tx_hash = %tx_hash,
                    event = %event.signature,
                    error = %e,
                    "failed to decode event"
                );
                decoded.decode_error = Some(e.to_string());
            }
        }
        decoded
    }
}
