//! Byte order of integer prefixes and payload serialization formats.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::PayloadError;

/// Byte order for the message id prefix (and the transport's length prefix).
///
/// Must match between peers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ByteOrder {
    #[default]
    BigEndian,
    LittleEndian,
}

impl ByteOrder {
    pub fn encode_u16(self, value: u16) -> [u8; 2] {
        match self {
            Self::BigEndian => value.to_be_bytes(),
            Self::LittleEndian => value.to_le_bytes(),
        }
    }

    pub fn decode_u16(self, bytes: [u8; 2]) -> u16 {
        match self {
            Self::BigEndian => u16::from_be_bytes(bytes),
            Self::LittleEndian => u16::from_le_bytes(bytes),
        }
    }

    pub fn encode_u32(self, value: u32) -> [u8; 4] {
        match self {
            Self::BigEndian => value.to_be_bytes(),
            Self::LittleEndian => value.to_le_bytes(),
        }
    }

    pub fn decode_u32(self, bytes: [u8; 4]) -> u32 {
        match self {
            Self::BigEndian => u32::from_be_bytes(bytes),
            Self::LittleEndian => u32::from_le_bytes(bytes),
        }
    }
}

/// Serializer used for frame payloads.
///
/// `Postcard` is a compact schema-driven binary encoding: field order comes
/// from the type definition and a fieldless struct encodes to zero bytes.
/// `Json` trades size for readability when debugging clients.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadFormat {
    #[default]
    Postcard,
    Json,
}

impl PayloadFormat {
    pub fn encode<T: Serialize>(self, value: &T) -> Result<Vec<u8>, PayloadError> {
        match self {
            Self::Postcard => Ok(postcard::to_allocvec(value)?),
            Self::Json => Ok(serde_json::to_vec(value)?),
        }
    }

    pub fn decode<T: DeserializeOwned>(self, bytes: &[u8]) -> Result<T, PayloadError> {
        match self {
            Self::Postcard => Ok(postcard::from_bytes(bytes)?),
            Self::Json => Ok(serde_json::from_slice(bytes)?),
        }
    }
}
