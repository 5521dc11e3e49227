//! Wire encodings for message payloads
//!
//! Player-facing messages travel as JSON so other tooling can read them;
//! game logs travel as MessagePack, which only peril processes consume.

use crate::error::{PerilError, Result};
use serde::{de::DeserializeOwned, Serialize};

/// Encodings understood by the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    /// Human-readable JSON
    Structured,
    /// Compact MessagePack
    Binary,
}

impl Encoding {
    pub fn content_type(&self) -> &'static str {
        match self {
            Encoding::Structured => "application/json",
            Encoding::Binary => "application/msgpack",
        }
    }

    pub fn from_content_type(content_type: &str) -> Option<Self> {
        match content_type {
            "application/json" => Some(Encoding::Structured),
            "application/msgpack" | "application/x-msgpack" => Some(Encoding::Binary),
            _ => None,
        }
    }
}

/// Converts payloads to and from bytes
pub trait Codec: Send + Sync + 'static {
    fn encoding(&self) -> Encoding;

    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>>;

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encoding(&self) -> Encoding {
        Encoding::Structured
    }

    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| PerilError::Encode {
            message: e.to_string(),
        })
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        serde_json::from_slice(bytes).map_err(|e| PerilError::Decode {
            message: e.to_string(),
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MsgPackCodec;

impl Codec for MsgPackCodec {
    fn encoding(&self) -> Encoding {
        Encoding::Binary
    }

    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        rmp_serde::to_vec(value).map_err(|e| PerilError::Encode {
            message: e.to_string(),
        })
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        rmp_serde::from_slice(bytes).map_err(|e| PerilError::Decode {
            message: e.to_string(),
        })
    }
}
