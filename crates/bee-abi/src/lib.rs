//! bee-abi: contract interface resolution and call-data decoding.
//!
//! Builds the method registry (method id → method metadata, creation
//! bytecode → contract) from a static contract manifest and decodes
//! transaction inputs and receipt logs into typed values.

pub mod decode;
pub mod error;
pub mod json;
pub mod manifest;
pub mod registry;

pub use decode::{decode, decode_bytes, decode_log};
pub use error::{ConfigurationError, DecodeError};
pub use json::{named_params, value_to_json, DecodedParam};
pub use manifest::{load_manifest, parse_manifest, ContractArtifact};
pub use registry::{
    ContractMethodInfo, EventMetaInfo, Keccak256, MethodId, MethodMetaInfo, MethodRegistry,
    ParamDescriptor, RegistryBuilder, SelectorHasher,
};
