//! JSON rendering of decoded values for storage.

use alloy::dyn_abi::DynSolValue;
use alloy::primitives::hex;
use serde::Serialize;

use crate::registry::ParamDescriptor;

/// A decoded parameter ready to be stored.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DecodedParam {
    pub name: String,
    pub ty: String,
    pub value: serde_json::Value,
}

/// Renders a decoded value as JSON.
///
/// Integers become decimal strings so 256-bit values survive JSON readers,
/// byte strings become `0x` hex, and arrays and tuples become JSON arrays.
pub fn value_to_json(value: &DynSolValue) -> serde_json::Value {
    use serde_json::Value;

    match value {
        DynSolValue::Bool(b) => Value::Bool(*b),
        DynSolValue::Int(i, _) => Value::String(i.to_string()),
        DynSolValue::Uint(u, _) => Value::String(u.to_string()),
        DynSolValue::FixedBytes(word, size) => Value::String(hex::encode_prefixed(&word[..*size])),
        DynSolValue::Address(addr) => Value::String(addr.to_checksum(None)),
        DynSolValue::Function(f) => Value::String(hex::encode_prefixed(f)),
        DynSolValue::Bytes(b) => Value::String(hex::encode_prefixed(b)),
        DynSolValue::String(s) => Value::String(s.clone()),
        DynSolValue::Array(values) | DynSolValue::FixedArray(values) | DynSolValue::Tuple(values) => {
            Value::Array(values.iter().map(value_to_json).collect())
        }
        #[allow(unreachable_patterns)]
        _ => Value::Null,
    }
}

/// Pairs decoded values with their declared parameters.
pub fn named_params(params: &[ParamDescriptor], values: &[DynSolValue]) -> Vec<DecodedParam> {
    params
        .iter()
        .zip(values)
        .map(|(param, value)| DecodedParam {
            name: param.name.clone(),
            ty: param.ty.clone(),
            value: value_to_json(value),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{address, B256, I256, U256};

    #[test]
    fn numbers_render_as_decimal_strings() {
        let v = value_to_json(&DynSolValue::Uint(U256::MAX, 256));
        assert_eq!(v, serde_json::json!(U256::MAX.to_string()));

        let v = value_to_json(&DynSolValue::Int(I256::from_raw(U256::MAX), 64));
        assert_eq!(v, serde_json::json!("-1"));
    }

    #[test]
    fn fixed_bytes_keep_declared_width() {
        let word = B256::right_padding_from(&[0xde, 0xad]);
        assert_eq!(value_to_json(&DynSolValue::FixedBytes(word, 2)), serde_json::json!("0xdead"));
    }

    #[test]
    fn nested_values_become_arrays() {
        let owner = address!("f39fd6e51aad88f6f4ce6ab8827279cfffb92266");
        let value = DynSolValue::Tuple(vec![
            DynSolValue::Address(owner),
            DynSolValue::Array(vec![DynSolValue::Bool(true), DynSolValue::Bool(false)]),
        ]);
        assert_eq!(
            value_to_json(&value),
            serde_json::json!(["0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266", [true, false]])
        );
    }

    #[test]
    fn named_params_zip_descriptors() {
        let params = vec![ParamDescriptor::new("ok", "bool")];
        let decoded = named_params(&params, &[DynSolValue::Bool(true)]);
        assert_eq!(decoded[0].name, "ok");
        assert_eq!(decoded[0].value, serde_json::json!(true));
    }
}
