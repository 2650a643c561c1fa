//! Canonical Clarity value binary serialization.
//!
//! Hand-rolled for the same reason as the c32check codec: this is a narrow,
//! fully-specified binary format, and pulling in the full Clarity VM crate
//! family just for its serializer would be a much heavier dependency than
//! the problem warrants.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClarityError {
    #[error("invalid clarity value: {0}")]
    InvalidValue(String),
}

/// A standard or contract Stacks principal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    Standard { version: u8, hash160: [u8; 20] },
    Contract {
        version: u8,
        hash160: [u8; 20],
        contract_name: String,
    },
}

/// Tagged Clarity value variants used by SIP-018 structured data.
#[derive(Debug, Clone, PartialEq)]
pub enum ClarityValue {
    UInt(u128),
    Int(i128),
    Bool(bool),
    Principal(Principal),
    StringAscii(String),
    StringUtf8(String),
    Buffer(Vec<u8>),
    List(Vec<ClarityValue>),
    /// Field order on the wire is defined by sorted field names, not
    /// insertion order.
    Tuple(BTreeMap<String, ClarityValue>),
    OptionalNone,
    OptionalSome(Box<ClarityValue>),
    ResponseOk(Box<ClarityValue>),
    ResponseErr(Box<ClarityValue>),
}

// Clarity type-prefix bytes, per the standard binary encoding.
const TYPE_INT: u8 = 0x00;
const TYPE_UINT: u8 = 0x01;
const TYPE_BUFFER: u8 = 0x02;
const TYPE_BOOL_TRUE: u8 = 0x03;
const TYPE_BOOL_FALSE: u8 = 0x04;
const TYPE_PRINCIPAL_STANDARD: u8 = 0x05;
const TYPE_PRINCIPAL_CONTRACT: u8 = 0x06;
const TYPE_RESPONSE_OK: u8 = 0x07;
const TYPE_RESPONSE_ERR: u8 = 0x08;
const TYPE_OPTIONAL_NONE: u8 = 0x09;
const TYPE_OPTIONAL_SOME: u8 = 0x0a;
const TYPE_LIST: u8 = 0x0b;
const TYPE_TUPLE: u8 = 0x0c;
const TYPE_STRING_ASCII: u8 = 0x0d;
const TYPE_STRING_UTF8: u8 = 0x0e;

impl ClarityValue {
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.write(&mut out);
        out
    }

    fn write(&self, out: &mut Vec<u8>) {
        match self {
            ClarityValue::Int(v) => {
                out.push(TYPE_INT);
                out.extend_from_slice(&v.to_be_bytes());
            }
            ClarityValue::UInt(v) => {
                out.push(TYPE_UINT);
                out.extend_from_slice(&v.to_be_bytes());
            }
            ClarityValue::Bool(true) => out.push(TYPE_BOOL_TRUE),
            ClarityValue::Bool(false) => out.push(TYPE_BOOL_FALSE),
            ClarityValue::Principal(Principal::Standard { version, hash160 }) => {
                out.push(TYPE_PRINCIPAL_STANDARD);
                out.push(*version);
                out.extend_from_slice(hash160);
            }
            ClarityValue::Principal(Principal::Contract {
                version,
                hash160,
                contract_name,
            }) => {
                out.push(TYPE_PRINCIPAL_CONTRACT);
                out.push(*version);
                out.extend_from_slice(hash160);
                out.push(contract_name.len() as u8);
                out.extend_from_slice(contract_name.as_bytes());
            }
            ClarityValue::StringAscii(s) => {
                out.push(TYPE_STRING_ASCII);
                out.extend_from_slice(&(s.len() as u32).to_be_bytes());
                out.extend_from_slice(s.as_bytes());
            }
            ClarityValue::StringUtf8(s) => {
                out.push(TYPE_STRING_UTF8);
                let bytes = s.as_bytes();
                out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
                out.extend_from_slice(bytes);
            }
            ClarityValue::Buffer(bytes) => {
                out.push(TYPE_BUFFER);
                out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
                out.extend_from_slice(bytes);
            }
            ClarityValue::List(items) => {
                out.push(TYPE_LIST);
                out.extend_from_slice(&(items.len() as u32).to_be_bytes());
                for item in items {
                    item.write(out);
                }
            }
            ClarityValue::Tuple(fields) => {
                out.push(TYPE_TUPLE);
                out.extend_from_slice(&(fields.len() as u32).to_be_bytes());
                // BTreeMap already iterates in sorted key order.
                for (name, value) in fields {
                    out.push(name.len() as u8);
                    out.extend_from_slice(name.as_bytes());
                    value.write(out);
                }
            }
            ClarityValue::OptionalNone => out.push(TYPE_OPTIONAL_NONE),
            ClarityValue::OptionalSome(inner) => {
                out.push(TYPE_OPTIONAL_SOME);
                inner.write(out);
            }
            ClarityValue::ResponseOk(inner) => {
                out.push(TYPE_RESPONSE_OK);
                inner.write(out);
            }
            ClarityValue::ResponseErr(inner) => {
                out.push(TYPE_RESPONSE_ERR);
                inner.write(out);
            }
        }
    }

    /// Best-effort JSON → ClarityValue conversion for the hint-less case:
    /// string → string-utf8, integer → signed int, boolean → bool,
    /// null → none, array → list, object → tuple.
    pub fn from_json(value: &serde_json::Value) -> Result<ClarityValue, ClarityError> {
        match value {
            serde_json::Value::Null => Ok(ClarityValue::OptionalNone),
            serde_json::Value::Bool(b) => Ok(ClarityValue::Bool(*b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(ClarityValue::Int(i as i128))
                } else if let Some(u) = n.as_u64() {
                    Ok(ClarityValue::Int(u as i128))
                } else {
                    Err(ClarityError::InvalidValue(format!("non-integer number: {n}")))
                }
            }
            serde_json::Value::String(s) => Ok(ClarityValue::StringUtf8(s.clone())),
            serde_json::Value::Array(items) => {
                let converted = items
                    .iter()
                    .map(ClarityValue::from_json)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(ClarityValue::List(converted))
            }
            serde_json::Value::Object(map) => {
                let mut fields = BTreeMap::new();
                for (key, v) in map {
                    fields.insert(key.clone(), ClarityValue::from_json(v)?);
                }
                Ok(ClarityValue::Tuple(fields))
            }
        }
    }
}

pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tuple_fields_serialize_in_sorted_order() {
        let mut fields = BTreeMap::new();
        fields.insert("zeta".to_string(), ClarityValue::Bool(true));
        fields.insert("alpha".to_string(), ClarityValue::Bool(false));
        let tuple = ClarityValue::Tuple(fields);
        let bytes = tuple.serialize();
        // alpha (5 bytes) comes before zeta in the serialized stream.
        let alpha_pos = bytes.windows(5).position(|w| w == b"alpha").unwrap();
        let zeta_pos = bytes.windows(4).position(|w| w == b"zeta").unwrap();
        assert!(alpha_pos < zeta_pos);
    }

    #[test]
    fn json_conversion_handles_primitive_defaults() {
        let json = serde_json::json!({"amount": 100, "memo": "hi", "flag": true, "none": null});
        let value = ClarityValue::from_json(&json).unwrap();
        match value {
            ClarityValue::Tuple(fields) => {
                assert_eq!(fields.get("amount"), Some(&ClarityValue::Int(100)));
                assert_eq!(
                    fields.get("memo"),
                    Some(&ClarityValue::StringUtf8("hi".to_string()))
                );
                assert_eq!(fields.get("flag"), Some(&ClarityValue::Bool(true)));
                assert_eq!(fields.get("none"), Some(&ClarityValue::OptionalNone));
            }
            _ => panic!("expected tuple"),
        }
    }
}
