//! Method registry built once from the contract manifest.
//!
//! Every state-changing function with at least one input (and every
//! constructor with inputs) gets a method id: the leading `width` bytes of
//! the configured hash over its canonical signature. The registry maps
//! method ids to method metadata, creation bytecode to contracts, and event
//! topic0 to event metadata. It is immutable after [`RegistryBuilder::build`].

use std::borrow::Borrow;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use alloy::json_abi::{EventParam, Param, StateMutability};
use alloy::primitives::{hex, keccak256, Bytes, B256};
use serde::Serialize;

use crate::error::ConfigurationError;
use crate::manifest::ContractArtifact;

/// Display name given to constructor entries.
pub const CONSTRUCTOR: &str = "constructor";

/// Default method id width in bytes.
pub const DEFAULT_SELECTOR_WIDTH: usize = 4;

/// Hash function used to derive method ids from canonical signatures.
pub trait SelectorHasher: Send + Sync + fmt::Debug {
    /// Short identifier shown in logs.
    fn name(&self) -> &'static str;

    /// 32-byte digest of `input`.
    fn digest(&self, input: &[u8]) -> B256;
}

/// Keccak-256, the EVM's selector hash.
#[derive(Clone, Copy, Debug, Default)]
pub struct Keccak256;

impl SelectorHasher for Keccak256 {
    fn name(&self) -> &'static str {
        "keccak256"
    }

    fn digest(&self, input: &[u8]) -> B256 {
        keccak256(input)
    }
}

/// Truncated signature hash identifying a method.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct MethodId(Vec<u8>);

impl MethodId {
    pub fn from_slice(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Borrow<[u8]> for MethodId {
    fn borrow(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(&self.0))
    }
}

/// Declared parameter: name plus canonical type string.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ParamDescriptor {
    pub name: String,
    /// Canonical type (`uint256`, `(address,bytes)[]`, ...).
    pub ty: String,
    /// Only meaningful for event parameters.
    pub indexed: bool,
}

impl ParamDescriptor {
    pub fn new(name: &str, ty: &str) -> Self {
        Self {
            name: name.to_string(),
            ty: ty.to_string(),
            indexed: false,
        }
    }

    fn from_param(param: &Param) -> Self {
        Self::new(&param.name, &param.selector_type())
    }

    fn from_event_param(param: &EventParam) -> Self {
        Self {
            name: param.name.clone(),
            ty: param.selector_type().into_owned(),
            indexed: param.indexed,
        }
    }
}

/// Metadata of one decodable method.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MethodMetaInfo {
    pub method_id: MethodId,
    /// Function name, or `"constructor"`.
    pub method_name: String,
    pub contract_name: String,
    /// Canonical signature the id was derived from.
    pub signature: String,
    pub inputs: Vec<ParamDescriptor>,
    pub outputs: Vec<ParamDescriptor>,
}

impl MethodMetaInfo {
    pub fn is_constructor(&self) -> bool {
        self.method_name == CONSTRUCTOR
    }
}

/// Metadata of one non-anonymous event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EventMetaInfo {
    pub topic0: B256,
    pub event_name: String,
    pub contract_name: String,
    pub signature: String,
    pub params: Vec<ParamDescriptor>,
}

/// Everything the registry knows about one contract.
#[derive(Clone, Debug, Serialize)]
pub struct ContractMethodInfo {
    pub contract_name: String,
    pub bytecode: Bytes,
    pub abi_hash: B256,
    pub methods: Vec<MethodMetaInfo>,
    pub events: Vec<EventMetaInfo>,
}

impl ContractMethodInfo {
    /// The constructor entry, if the constructor takes arguments.
    pub fn constructor(&self) -> Option<&MethodMetaInfo> {
        self.methods.iter().find(|m| m.is_constructor())
    }
}

/// Configures the hash and id width before building a [`MethodRegistry`].
#[derive(Debug)]
pub struct RegistryBuilder {
    hasher: Box<dyn SelectorHasher>,
    width: usize,
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self {
            hasher: Box::new(Keccak256),
            width: DEFAULT_SELECTOR_WIDTH,
        }
    }
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hasher(mut self, hasher: impl SelectorHasher + 'static) -> Self {
        self.hasher = Box::new(hasher);
        self
    }

    pub fn selector_width(mut self, width: usize) -> Self {
        self.width = width;
        self
    }

    /// Builds the registry from the manifest contracts.
    ///
    /// Contracts without any decodable method are skipped together with
    /// their events, so every event names a registered contract. Identical
    /// signatures declared by several contracts keep the first contract's
    /// entry.
    ///
    /// # Errors
    /// - `InvalidSelectorWidth` if the width is 0 or above 32
    /// - `MethodIdCollision` if two different signatures share an id
    /// - `EmptyRegistry` if no contract contributed a method
    pub fn build(self, contracts: &[ContractArtifact]) -> Result<MethodRegistry, ConfigurationError> {
        if self.width == 0 || self.width > 32 {
            return Err(ConfigurationError::InvalidSelectorWidth(self.width));
        }

        let mut method_id_map: HashMap<MethodId, MethodMetaInfo> = HashMap::new();
        let mut contract_binary_map = HashMap::new();
        let mut event_map: HashMap<B256, EventMetaInfo> = HashMap::new();
        let mut registered = Vec::new();

        for artifact in contracts {
            let info = self.parse_contract(artifact);

            if info.methods.is_empty() {
                tracing::debug!(contract = %info.contract_name, "no decodable methods, skipping contract");
                continue;
            }

            for event in &info.events {
                event_map
                    .entry(event.topic0)
                    .or_insert_with(|| event.clone());
            }

            for method in &info.methods {
                match method_id_map.entry(method.method_id.clone()) {
                    Entry::Vacant(slot) => {
                        slot.insert(method.clone());
                    }
                    Entry::Occupied(slot) if slot.get().signature != method.signature => {
                        return Err(ConfigurationError::MethodIdCollision {
                            id: hex::encode(method.method_id.as_bytes()),
                            existing: slot.get().signature.clone(),
                            incoming: method.signature.clone(),
                        });
                    }
                    Entry::Occupied(slot) => {
                        tracing::debug!(
                            method_id = %method.method_id,
                            signature = %method.signature,
                            kept = %slot.get().contract_name,
                            duplicate = %method.contract_name,
                            "signature declared by several contracts"
                        );
                    }
                }
            }

            let info = Arc::new(info);
            if !info.bytecode.is_empty() {
                contract_binary_map.insert(info.bytecode.clone(), Arc::clone(&info));
            }
            registered.push(info);
        }

        if method_id_map.is_empty() {
            return Err(ConfigurationError::EmptyRegistry);
        }

        tracing::info!(
            hasher = self.hasher.name(),
            width = self.width,
            contracts = registered.len(),
            methods = method_id_map.len(),
            constructors = contract_binary_map.len(),
            events = event_map.len(),
            "method registry built"
        );

        Ok(MethodRegistry {
            width: self.width,
            method_id_map,
            contract_binary_map,
            event_map,
            contracts: registered,
        })
    }

    fn method_id(&self, signature: &str) -> MethodId {
        let digest = self.hasher.digest(signature.as_bytes());
        MethodId::from_slice(&digest[..self.width])
    }

    fn parse_contract(&self, artifact: &ContractArtifact) -> ContractMethodInfo {
        let mut methods = Vec::new();

        if let Some(constructor) = artifact.abi.constructor.as_ref() {
            if !constructor.inputs.is_empty() {
                methods.push(self.method_meta(artifact, CONSTRUCTOR, &constructor.inputs, &[]));
            }
        }

        for function in artifact.abi.functions() {
            if matches!(
                function.state_mutability,
                StateMutability::View | StateMutability::Pure
            ) {
                continue;
            }
            if function.inputs.is_empty() {
                continue;
            }
            methods.push(self.method_meta(
                artifact,
                &function.name,
                &function.inputs,
                &function.outputs,
            ));
        }

        let events = artifact
            .abi
            .events()
            .filter(|event| !event.anonymous)
            .map(|event| {
                let params: Vec<ParamDescriptor> = event
                    .inputs
                    .iter()
                    .map(ParamDescriptor::from_event_param)
                    .collect();
                let signature = canonical_signature(&event.name, &params);
                EventMetaInfo {
                    topic0: keccak256(signature.as_bytes()),
                    event_name: event.name.clone(),
                    contract_name: artifact.name.clone(),
                    signature,
                    params,
                }
            })
            .collect();

        ContractMethodInfo {
            contract_name: artifact.name.clone(),
            bytecode: artifact.bytecode.clone(),
            abi_hash: artifact.abi_hash(),
            methods,
            events,
        }
    }

    fn method_meta(
        &self,
        artifact: &ContractArtifact,
        name: &str,
        inputs: &[Param],
        outputs: &[Param],
    ) -> MethodMetaInfo {
        let inputs: Vec<ParamDescriptor> = inputs.iter().map(ParamDescriptor::from_param).collect();
        let signature = canonical_signature(name, &inputs);
        let method_id = self.method_id(&signature);
        tracing::trace!(contract = %artifact.name, %method_id, %signature, "registered method");

        MethodMetaInfo {
            method_id,
            method_name: name.to_string(),
            contract_name: artifact.name.clone(),
            signature,
            inputs,
            outputs: outputs.iter().map(ParamDescriptor::from_param).collect(),
        }
    }
}

/// `name(type1,type2,...)` with tuple types already expanded.
pub fn canonical_signature(name: &str, params: &[ParamDescriptor]) -> String {
    let types: Vec<&str> = params.iter().map(|p| p.ty.as_str()).collect();
    format!("{}({})", name, types.join(","))
}

/// Read-only lookup tables shared by all decoding.
#[derive(Debug)]
pub struct MethodRegistry {
    width: usize,
    method_id_map: HashMap<MethodId, MethodMetaInfo>,
    contract_binary_map: HashMap<Bytes, Arc<ContractMethodInfo>>,
    event_map: HashMap<B256, EventMetaInfo>,
    contracts: Vec<Arc<ContractMethodInfo>>,
}

impl MethodRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Builds with keccak-256 and 4-byte method ids.
    ///
    /// # Errors
    /// See [`RegistryBuilder::build`].
    pub fn build(contracts: &[ContractArtifact]) -> Result<Self, ConfigurationError> {
        RegistryBuilder::new().build(contracts)
    }

    pub fn selector_width(&self) -> usize {
        self.width
    }

    pub fn method(&self, id: &[u8]) -> Option<&MethodMetaInfo> {
        self.method_id_map.get(id)
    }

    /// Looks up the method whose id matches the leading bytes of `input`.
    pub fn method_for_input(&self, input: &[u8]) -> Option<&MethodMetaInfo> {
        input
            .get(..self.width)
            .and_then(|id| self.method_id_map.get(id))
    }

    /// Finds the contract whose creation bytecode prefixes `input`.
    ///
    /// Deployment inputs are the creation bytecode followed by the encoded
    /// constructor arguments; the longest matching bytecode wins.
    pub fn contract_for_deployment(&self, input: &[u8]) -> Option<&Arc<ContractMethodInfo>> {
        self.contract_binary_map
            .iter()
            .filter(|(code, _)| input.starts_with(code))
            .max_by_key(|(code, _)| code.len())
            .map(|(_, info)| info)
    }

    pub fn event(&self, topic0: &B256) -> Option<&EventMetaInfo> {
        self.event_map.get(topic0)
    }

    /// Contracts that contributed at least one method, in manifest order.
    pub fn contracts(&self) -> &[Arc<ContractMethodInfo>] {
        &self.contracts
    }

    pub fn method_count(&self) -> usize {
        self.method_id_map.len()
    }

    pub fn methods(&self) -> impl Iterator<Item = &MethodMetaInfo> {
        self.method_id_map.values()
    }
}
