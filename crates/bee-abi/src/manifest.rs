//! Static contract manifest loading.
//!
//! The manifest is a JSON array of `{ "name", "bytecode", "abi" }` entries.
//! `abi` may be given inline as a JSON array or as a string holding the ABI
//! JSON, which is how most compiler artifacts embed it.

use std::path::Path;

use alloy::json_abi::JsonAbi;
use alloy::primitives::{hex, keccak256, Bytes, B256};
use eyre::{Context, Result};
use serde::Deserialize;

use crate::error::ConfigurationError;

#[derive(Debug, Deserialize)]
struct ManifestEntry {
    name: String,
    #[serde(default)]
    bytecode: String,
    abi: serde_json::Value,
}

/// One contract known at startup.
#[derive(Clone, Debug)]
pub struct ContractArtifact {
    /// Contract name used for attribution.
    pub name: String,
    /// Creation bytecode. Empty for interface-only entries.
    pub bytecode: Bytes,
    /// ABI text exactly as stored in the manifest.
    pub abi_json: String,
    /// Parsed interface definition.
    pub abi: JsonAbi,
}

impl ContractArtifact {
    /// Parses a single contract from its name, hex bytecode and ABI JSON text.
    ///
    /// # Errors
    /// Returns `ConfigurationError::InvalidContract` if the bytecode is not hex
    /// or the ABI does not parse.
    pub fn new(name: &str, bytecode_hex: &str, abi_json: &str) -> Result<Self, ConfigurationError> {
        let invalid = |reason: String| ConfigurationError::InvalidContract {
            contract: name.to_string(),
            reason,
        };

        let bytecode_hex = bytecode_hex.trim();
        let bytecode_hex = bytecode_hex.strip_prefix("0x").unwrap_or(bytecode_hex);
        let bytecode = hex::decode(bytecode_hex)
            .map_err(|e| invalid(format!("bytecode is not hex: {e}")))?;
        let abi: JsonAbi =
            serde_json::from_str(abi_json).map_err(|e| invalid(format!("invalid abi: {e}")))?;

        Ok(Self {
            name: name.to_string(),
            bytecode: Bytes::from(bytecode),
            abi_json: abi_json.to_string(),
            abi,
        })
    }

    /// Keccak-256 of the ABI text, used to detect interface changes between runs.
    pub fn abi_hash(&self) -> B256 {
        keccak256(self.abi_json.as_bytes())
    }
}

/// Parses manifest text into contract artifacts, preserving manifest order.
///
/// # Errors
/// Returns `ConfigurationError` if the document or any entry is malformed.
pub fn parse_manifest(text: &str) -> Result<Vec<ContractArtifact>, ConfigurationError> {
    let entries: Vec<ManifestEntry> =
        serde_json::from_str(text).map_err(|e| ConfigurationError::Manifest(e.to_string()))?;

    entries
        .into_iter()
        .map(|entry| {
            let abi_json = match entry.abi {
                serde_json::Value::String(text) => text,
                other => other.to_string(),
            };
            ContractArtifact::new(&entry.name, &entry.bytecode, &abi_json)
        })
        .collect()
}

/// Reads and parses the manifest file at `path`.
///
/// # Errors
/// Returns error if the file cannot be read or fails to parse.
#[tracing::instrument(skip_all, fields(path = %path.display()))]
pub fn load_manifest(path: &Path) -> Result<Vec<ContractArtifact>> {
    let text = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("failed to read contract manifest {}", path.display()))?;
    let contracts = parse_manifest(&text)?;
    tracing::info!(contracts = contracts.len(), "loaded contract manifest");
    Ok(contracts)
}
