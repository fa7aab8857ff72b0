use crate::types::UserOperation;
use ethers::types::{Address, Bytes, H256, U256};
use serde_json::{Map, Number, Value};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CanonicalizeError {
    /// A value with no wire representation (bool, null, float, negative or
    /// non-numeric string). Never coerced.
    #[error("unsupported field type at `{path}`: {found}")]
    UnsupportedFieldType { path: String, found: String },
}

pub fn fmt_address(addr: Address) -> String {
    format!("0x{}", hex::encode(addr.as_bytes()))
}

pub fn fmt_h256(h: H256) -> String {
    format!("0x{}", hex::encode(h.as_bytes()))
}

/// JSON-RPC "quantity" encoding.
pub fn fmt_u256(v: U256) -> String {
    if v.is_zero() {
        "0x0".to_string()
    } else {
        format!("0x{:x}", v)
    }
}

pub fn fmt_bytes(b: &Bytes) -> String {
    format!("0x{}", hex::encode(b.as_ref()))
}

/// Wire object for `eth_sendUserOperation`. Every field is always present.
pub fn user_op_to_json(op: &UserOperation) -> Value {
    serde_json::json!({
        "sender": fmt_address(op.sender),
        "nonce": fmt_u256(op.nonce),
        "initCode": fmt_bytes(&op.init_code),
        "callData": fmt_bytes(&op.call_data),
        "callGasLimit": fmt_u256(op.call_gas_limit),
        "verificationGasLimit": fmt_u256(op.verification_gas_limit),
        "preVerificationGas": fmt_u256(op.pre_verification_gas),
        "maxFeePerGas": fmt_u256(op.max_fee_per_gas),
        "maxPriorityFeePerGas": fmt_u256(op.max_priority_fee_per_gas),
        "paymasterAndData": fmt_bytes(&op.paymaster_and_data),
        "signature": fmt_bytes(&op.signature),
    })
}

/// UserOperation fields that carry a JSON-RPC quantity rather than bytes.
const QUANTITY_FIELDS: [&str; 6] = [
    "nonce",
    "callGasLimit",
    "verificationGasLimit",
    "preVerificationGas",
    "maxFeePerGas",
    "maxPriorityFeePerGas",
];

/// Rewrites an arbitrary JSON value into wire form.
///
/// Integers and decimal strings become minimal quantities (`0x0` for zero).
/// Hex strings under a quantity field are trimmed to minimal width; any other
/// hex string is a byte string, lowercased, and must have an even number of
/// digits. The empty string becomes `0x`. Objects and arrays are walked
/// recursively with key order preserved. Applying this to its own output is a
/// no-op.
pub fn canonicalize(value: &Value) -> Result<Value, CanonicalizeError> {
    canonicalize_at(value, "$", None)
}

fn canonicalize_at(
    value: &Value,
    path: &str,
    field: Option<&str>,
) -> Result<Value, CanonicalizeError> {
    match value {
        Value::Object(fields) => {
            let mut out = Map::with_capacity(fields.len());
            for (k, v) in fields {
                out.insert(
                    k.clone(),
                    canonicalize_at(v, &format!("{path}.{k}"), Some(k))?,
                );
            }
            Ok(Value::Object(out))
        }
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, v)| canonicalize_at(v, &format!("{path}[{i}]"), None))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Number(n) => canonicalize_number(n)
            .map(Value::String)
            .ok_or_else(|| unsupported(path, format!("number {n}"))),
        Value::String(s) => {
            let quantity = field.map_or(false, |f| QUANTITY_FIELDS.contains(&f));
            canonicalize_str(s, quantity)
                .map(Value::String)
                .ok_or_else(|| unsupported(path, format!("string {s:?}")))
        }
        Value::Bool(b) => Err(unsupported(path, format!("bool {b}"))),
        Value::Null => Err(unsupported(path, "null".to_string())),
    }
}

/// Numbers keep their source text, so anything up to 256 bits survives.
/// Signs, fractions and exponents are rejected.
fn canonicalize_number(n: &Number) -> Option<String> {
    let text = n.to_string();
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    U256::from_dec_str(&text).ok().map(fmt_u256)
}

fn canonicalize_str(s: &str, quantity: bool) -> Option<String> {
    if s.is_empty() {
        return Some(if quantity { "0x0" } else { "0x" }.to_string());
    }
    if let Some(digits) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        if quantity {
            return parse_u256_quantity(digits).ok().map(fmt_u256);
        }
        if digits.len() % 2 != 0 {
            return None;
        }
        return Some(format!("0x{}", digits.to_ascii_lowercase()));
    }
    if s.chars().all(|c| c.is_ascii_digit()) {
        return U256::from_dec_str(s).ok().map(fmt_u256);
    }
    None
}

fn unsupported(path: &str, found: String) -> CanonicalizeError {
    CanonicalizeError::UnsupportedFieldType {
        path: path.to_string(),
        found,
    }
}

pub fn parse_u256_quantity(s: &str) -> anyhow::Result<U256> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    if s.is_empty() {
        return Ok(U256::zero());
    }
    Ok(U256::from_str_radix(s, 16)?)
}

/// Accepts decimal or `0x`-prefixed hex.
pub fn parse_u256(s: &str) -> anyhow::Result<U256> {
    if s.starts_with("0x") {
        parse_u256_quantity(s)
    } else {
        Ok(U256::from_dec_str(s)?)
    }
}

pub fn parse_h256(s: &str) -> anyhow::Result<H256> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(s)?;
    if bytes.len() != 32 {
        anyhow::bail!("expected 32-byte hex, got {} bytes", bytes.len());
    }
    let mut arr = [0u8; 32];
    arr.copy_from_slice(&bytes);
    Ok(H256(arr))
}
