//! Integration tests for registry construction and argument decoding.

mod common;

use alloy::dyn_abi::DynSolValue;
use alloy::primitives::{hex, keccak256, Address, Bytes, B256, I256, U256};
use bee_abi::{decode, decode_bytes, parse_manifest, MethodRegistry, ParamDescriptor};
use common::{calldata, test_registry, TOKEN_ABI, TOKEN_BYTECODE, VAULT_ABI};

/// The registry holds one entry per state-changing function with inputs plus
/// one per constructor with inputs.
///
/// Token: constructor, transfer, batchMint (balanceOf is a view).
/// Vault: deposit (pause takes no inputs).
#[test]
fn registry_size_counts_decodable_methods() {
    let registry = test_registry();
    assert_eq!(registry.method_count(), 4);
    assert_eq!(registry.contracts().len(), 2);

    let names: Vec<&str> = registry.methods().map(|m| m.method_name.as_str()).collect();
    assert!(!names.contains(&"balanceOf"));
    assert!(!names.contains(&"pause"));
}

/// The constructor id is derived from `constructor(<types>)`.
#[test]
fn constructor_uses_canonical_signature() {
    let registry = test_registry();
    let token = &registry.contracts()[0];
    let constructor = token.constructor().expect("token has a constructor");

    assert_eq!(constructor.signature, "constructor(uint256,string)");
    let expected = keccak256("constructor(uint256,string)".as_bytes());
    assert_eq!(constructor.method_id.as_bytes(), &expected[..4]);
    assert!(registry.method(&expected[..4]).is_some());
}

/// Loading from manifest text gives the same registry as direct artifacts.
#[test]
fn manifest_builds_same_registry() {
    let manifest = format!(
        r#"[{{"name":"Token","bytecode":"{}","abi":{}}},{{"name":"Vault","abi":{}}}]"#,
        TOKEN_BYTECODE, TOKEN_ABI, VAULT_ABI
    );
    let artifacts = parse_manifest(&manifest).expect("manifest should parse");
    let registry = MethodRegistry::build(&artifacts).expect("registry should build");

    assert_eq!(registry.method_count(), test_registry().method_count());
    let code = hex::decode(TOKEN_BYTECODE).unwrap();
    assert_eq!(
        registry
            .contract_for_deployment(&code)
            .map(|c| c.contract_name.as_str()),
        Some("Token")
    );
}

/// Empty call data decodes to no values whatever the parameters.
#[test]
fn empty_input_decodes_to_nothing() {
    let params = vec![ParamDescriptor::new("amount", "uint256")];
    assert!(decode("", &params).unwrap().is_empty());
    assert!(decode("0x", &params).unwrap().is_empty());
}

/// Decoding reproduces values produced by the reference encoder, including
/// dynamic arrays and byte strings in the tail.
#[test]
fn decode_round_trips_reference_encoding() {
    let registry = test_registry();
    let values = vec![
        DynSolValue::Array(vec![
            DynSolValue::Address(Address::repeat_byte(0x11)),
            DynSolValue::Address(Address::repeat_byte(0x22)),
            DynSolValue::Address(Address::repeat_byte(0x33)),
        ]),
        DynSolValue::Bytes(b"launch batch".to_vec()),
    ];
    let input = calldata("batchMint(address[],bytes)", values.clone());

    let method = registry
        .method_for_input(&input)
        .expect("batchMint should be registered");
    assert_eq!(method.method_name, "batchMint");

    let decoded = decode_bytes(&input[4..], &method.inputs).expect("calldata should decode");
    assert_eq!(decoded, values);

    let from_hex = decode(&hex::encode_prefixed(&input[4..]), &method.inputs).unwrap();
    assert_eq!(from_hex, values);
}

/// Every supported value class survives an encode and decode through its
/// descriptor, including fixed arrays and tuples with dynamic members.
#[test]
fn decode_round_trips_every_supported_type() {
    let descriptors = [
        "bool",
        "int8",
        "bytes4",
        "string[2]",
        "(uint256,bytes)",
        "address[][]",
        "uint64[2]",
    ];
    let params: Vec<ParamDescriptor> = descriptors
        .iter()
        .enumerate()
        .map(|(i, ty)| ParamDescriptor::new(&format!("arg{i}"), ty))
        .collect();
    let values = vec![
        DynSolValue::Bool(true),
        DynSolValue::Int(I256::try_from(-5i64).unwrap(), 8),
        DynSolValue::FixedBytes(B256::right_padding_from(&[0xde, 0xad, 0xbe, 0xef]), 4),
        DynSolValue::FixedArray(vec![
            DynSolValue::String("hive".to_string()),
            DynSolValue::String(String::new()),
        ]),
        DynSolValue::Tuple(vec![
            DynSolValue::Uint(U256::from(99u64), 256),
            DynSolValue::Bytes(vec![0x01, 0x02, 0x03]),
        ]),
        DynSolValue::Array(vec![
            DynSolValue::Array(vec![
                DynSolValue::Address(Address::repeat_byte(0x44)),
                DynSolValue::Address(Address::repeat_byte(0x55)),
            ]),
            DynSolValue::Array(Vec::new()),
        ]),
        DynSolValue::FixedArray(vec![
            DynSolValue::Uint(U256::from(u64::MAX), 64),
            DynSolValue::Uint(U256::from(7u64), 64),
        ]),
    ];
    let encoded = DynSolValue::Tuple(values.clone()).abi_encode_params();

    let decoded = decode_bytes(&encoded, &params).expect("every type should decode");
    assert_eq!(decoded, values);
}

/// Constructor arguments sit after the creation code in a deployment input.
#[test]
fn constructor_arguments_follow_bytecode() {
    let registry = test_registry();
    let args = DynSolValue::Tuple(vec![
        DynSolValue::Uint(U256::from(1_000_000u64), 256),
        DynSolValue::String("BEE".to_string()),
    ])
    .abi_encode_params();
    let mut input = hex::decode(TOKEN_BYTECODE).unwrap();
    let code_len = input.len();
    input.extend(args);
    let input = Bytes::from(input);

    let token = registry
        .contract_for_deployment(&input)
        .expect("deployment should match token bytecode");
    let constructor = token.constructor().unwrap();
    let decoded = decode_bytes(&input[code_len..], &constructor.inputs).unwrap();
    assert_eq!(decoded[1], DynSolValue::String("BEE".to_string()));
}

/// Inputs shorter than a method id never match.
#[test]
fn short_input_has_no_method() {
    let registry = test_registry();
    assert!(registry.method_for_input(&[0xa9, 0x05]).is_none());
    assert!(registry.method_for_input(&[]).is_none());
}
