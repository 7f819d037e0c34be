//! ABI decoding of call data and logs.
//!
//! Descriptors are resolved up front, then the payload is decoded as one
//! parameter tuple with Alloy's head/tail decoder. Strings are decoded
//! lossily, so invalid UTF-8 never fails a record.

use alloy::dyn_abi::{DynSolType, DynSolValue, Error as AbiError};
use alloy::primitives::{hex, B256};
use alloy::sol_types::Error as SolTypesError;

use crate::error::DecodeError;
use crate::registry::{EventMetaInfo, ParamDescriptor};

const WORD: usize = 32;

/// Decodes hex call data (without method id) against `params`.
///
/// Empty input, with or without `0x`, decodes to an empty list.
///
/// # Errors
/// Returns `DecodeError` for invalid hex, unsupported type descriptors,
/// truncated data, or out-of-range offsets.
pub fn decode(raw_input_hex: &str, params: &[ParamDescriptor]) -> Result<Vec<DynSolValue>, DecodeError> {
    let trimmed = raw_input_hex.trim();
    let trimmed = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    let data = hex::decode(trimmed).map_err(|e| DecodeError::InvalidHex(e.to_string()))?;
    decode_bytes(&data, params)
}

/// Byte-slice form of [`decode`].
///
/// # Errors
/// See [`decode`].
pub fn decode_bytes(data: &[u8], params: &[ParamDescriptor]) -> Result<Vec<DynSolValue>, DecodeError> {
    if data.is_empty() {
        return Ok(Vec::new());
    }
    let types = resolve_types(params)?;
    decode_sequence(types, data)
}

/// Decodes a receipt log against its event definition.
///
/// Non-indexed parameters come from `data`; indexed value types are read
/// from their topic word. Indexed dynamic or composite parameters are only
/// stored as their keccak hash, so the raw topic is returned as `bytes32`.
///
/// # Errors
/// Returns `DecodeError::TopicCount` when the topic count does not match the
/// event's indexed parameters, or any error [`decode`] can return.
pub fn decode_log(
    event: &EventMetaInfo,
    topics: &[B256],
    data: &[u8],
) -> Result<Vec<DynSolValue>, DecodeError> {
    let expected = 1 + event.params.iter().filter(|p| p.indexed).count();
    if topics.len() != expected {
        return Err(DecodeError::TopicCount {
            event: event.signature.clone(),
            expected,
            actual: topics.len(),
        });
    }

    let types = resolve_types(&event.params)?;
    let body_types: Vec<DynSolType> = types
        .iter()
        .zip(&event.params)
        .filter(|(_, p)| !p.indexed)
        .map(|(ty, _)| ty.clone())
        .collect();
    let mut body = if body_types.is_empty() {
        Vec::new()
    } else {
        decode_sequence(body_types, data)?
    }
    .into_iter();

    let mut indexed_topics = topics[1..].iter();
    let mut values = Vec::with_capacity(types.len());
    for (ty, param) in types.iter().zip(&event.params) {
        let value = if param.indexed {
            let topic = indexed_topics.next().ok_or(DecodeError::TopicCount {
                event: event.signature.clone(),
                expected,
                actual: topics.len(),
            })?;
            if is_word_type(ty) {
                ty.abi_decode(topic.as_slice())
                    .map_err(|e| abi_error(e, WORD))?
            } else {
                DynSolValue::FixedBytes(*topic, WORD)
            }
        } else {
            body.next().ok_or(DecodeError::Truncated {
                available: data.len(),
            })?
        };
        values.push(value);
    }
    Ok(values)
}

/// Parses every descriptor before any data is read.
fn resolve_types(params: &[ParamDescriptor]) -> Result<Vec<DynSolType>, DecodeError> {
    params
        .iter()
        .map(|p| {
            let ty = DynSolType::parse(&p.ty)
                .map_err(|_| DecodeError::UnsupportedType(p.ty.clone()))?;
            if is_supported(&ty) {
                Ok(ty)
            } else {
                Err(DecodeError::UnsupportedType(p.ty.clone()))
            }
        })
        .collect()
}

fn is_supported(ty: &DynSolType) -> bool {
    match ty {
        DynSolType::Bool
        | DynSolType::Address
        | DynSolType::Int(_)
        | DynSolType::Uint(_)
        | DynSolType::FixedBytes(_)
        | DynSolType::Bytes
        | DynSolType::String => true,
        DynSolType::Array(inner) | DynSolType::FixedArray(inner, _) => is_supported(inner),
        DynSolType::Tuple(types) => types.iter().all(is_supported),
        #[allow(unreachable_patterns)]
        _ => false,
    }
}

fn is_word_type(ty: &DynSolType) -> bool {
    matches!(
        ty,
        DynSolType::Bool
            | DynSolType::Address
            | DynSolType::Int(_)
            | DynSolType::Uint(_)
            | DynSolType::FixedBytes(_)
    )
}

/// Decodes `data` as the parameter tuple `types`.
fn decode_sequence(types: Vec<DynSolType>, data: &[u8]) -> Result<Vec<DynSolValue>, DecodeError> {
    let decoded = DynSolType::Tuple(types)
        .abi_decode_params(data)
        .map_err(|e| abi_error(e, data.len()))?;
    match decoded {
        DynSolValue::Tuple(values) => Ok(values),
        other => Ok(vec![other]),
    }
}

/// Maps an Alloy decoding failure onto the crate's error kinds.
fn abi_error(err: AbiError, available: usize) -> DecodeError {
    match err {
        AbiError::SolTypes(SolTypesError::Overrun) => DecodeError::Truncated { available },
        AbiError::TypeParser(e) => DecodeError::UnsupportedType(e.to_string()),
        other => DecodeError::BadOffset(other.to_string()),
    }
}
