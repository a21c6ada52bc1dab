use serde::{Deserialize, Serialize};
use serde_bencode::value::Value;

/// Loosely typed KRPC message, every field is optional so that
/// missing or malformed fields can be answered with a precise protocol error.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct DHTMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub a: Option<DHTArguments>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub q: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r: Option<DHTArguments>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub v: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<Value>,
}

impl DHTMessage {
    pub fn from_bytes(bytes: &[u8]) -> Result<DHTMessage, serde_bencode::Error> {
        let obj = serde_bencode::from_bytes(bytes)?;
        Ok(obj)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_bencode::Error> {
        serde_bencode::to_bytes(self)
    }
}

/// Union of the query arguments (`a`) and response values (`r`) of all supported methods.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct DHTArguments {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub implied_port: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info_hash: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodes: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Value>,
}

pub fn bytes(bytes: impl Into<Vec<u8>>) -> Option<Value> {
    Some(Value::Bytes(bytes.into()))
}

pub fn int(int: impl Into<i64>) -> Option<Value> {
    Some(Value::Int(int.into()))
}

pub fn as_bytes(value: &Option<Value>) -> Option<&[u8]> {
    match value {
        Some(Value::Bytes(bytes)) => Some(bytes),
        _ => None,
    }
}

pub fn as_int(value: &Option<Value>) -> Option<i64> {
    match value {
        Some(Value::Int(int)) => Some(*int),
        _ => None,
    }
}
