//! Wire codecs for broker payloads.
//!
//! The broker side speaks either JSON text or MessagePack maps.  Both decode
//! to a [`serde_json::Value`] tree, which schema population then turns into
//! a typed message.

use std::fmt;
use std::str::FromStr;

use mqbridge_types::BridgeError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Serializer/deserializer pair used for broker payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    #[default]
    Json,
    #[serde(alias = "msgpack")]
    MessagePack,
}

impl Codec {
    pub fn encode(&self, value: &Value) -> Result<Vec<u8>, BridgeError> {
        match self {
            Codec::Json => {
                serde_json::to_vec(value).map_err(|e| BridgeError::Encoding(e.to_string()))
            }
            Codec::MessagePack => {
                rmp_serde::to_vec_named(value).map_err(|e| BridgeError::Encoding(e.to_string()))
            }
        }
    }

    pub fn decode(&self, payload: &[u8]) -> Result<Value, BridgeError> {
        match self {
            Codec::Json => {
                serde_json::from_slice(payload).map_err(|e| BridgeError::Decoding(e.to_string()))
            }
            Codec::MessagePack => {
                rmp_serde::from_slice(payload).map_err(|e| BridgeError::Decoding(e.to_string()))
            }
        }
    }
}

impl FromStr for Codec {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Codec::Json),
            "msgpack" | "messagepack" => Ok(Codec::MessagePack),
            other => Err(BridgeError::Config(format!("unknown codec '{other}'"))),
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Codec::Json => write!(f, "json"),
            Codec::MessagePack => write!(f, "msgpack"),
        }
    }
}
