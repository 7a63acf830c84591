//! Frame encoding and decoding for network transport.
//!
//! # Wire Formats
//!
//! Binary frames are bincode-encoded then LZ4-compressed, behind a version byte:
//!
//! ```text
//! [version: u8][LZ4 compressed bincode payload]
//! ```
//!
//! JSON frames are plain `serde_json` documents. They are larger but readable,
//! which makes them the format of choice for debugging and dashboards.

use palisade_messages::ConsensusMessage;
use palisade_types::{DataEntry, NodeId, Version};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Current binary wire format version.
pub const WIRE_VERSION: u8 = 1;

/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Message too short")]
    MessageTooShort,

    #[error("Unknown wire version: {0}")]
    UnknownVersion(u8),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Binary encoding error: {0}")]
    Binary(#[from] bincode::Error),

    #[error("Decompression error: {0}")]
    Decompress(String),
}

/// Replica traffic between replication managers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplicaRequest {
    /// Hold a copy of this entry.
    Store(DataEntry),
    /// Drop the copy of `key` at `version`; the replica set moved.
    Release { key: String, version: Version },
}

/// Everything that travels between nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Frame {
    /// A signed consensus or heartbeat envelope.
    Consensus(ConsensusMessage),
    /// Replica data, tagged with the sending node.
    Replica {
        from: NodeId,
        request: ReplicaRequest,
    },
}

impl Frame {
    /// The node that sent this frame.
    pub fn sender(&self) -> &NodeId {
        match self {
            Frame::Consensus(message) => &message.sender_id,
            Frame::Replica { from, .. } => from,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Frame::Consensus(message) => message.message_type.as_str(),
            Frame::Replica {
                request: ReplicaRequest::Store(_),
                ..
            } => "replica_store",
            Frame::Replica {
                request: ReplicaRequest::Release { .. },
                ..
            } => "replica_release",
        }
    }
}

/// Which encoding a transport puts on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    Json,
    #[default]
    Binary,
}

impl WireFormat {
    pub fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        match self {
            WireFormat::Json => encode_json(value),
            WireFormat::Binary => encode_binary(value),
        }
    }

    pub fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, CodecError> {
        match self {
            WireFormat::Json => decode_json(data),
            WireFormat::Binary => decode_binary(data),
        }
    }
}

impl std::str::FromStr for WireFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(WireFormat::Json),
            "binary" => Ok(WireFormat::Binary),
            other => Err(format!("unknown wire format '{other}' (expected json or binary)")),
        }
    }
}

/// Encode a value as a JSON document.
pub fn encode_json<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    Ok(serde_json::to_vec(value)?)
}

/// Decode a JSON document.
pub fn decode_json<T: DeserializeOwned>(data: &[u8]) -> Result<T, CodecError> {
    if data.is_empty() {
        return Err(CodecError::MessageTooShort);
    }
    Ok(serde_json::from_slice(data)?)
}

/// Encode a value to the versioned binary format.
///
/// bincode-encodes the value then LZ4-compresses it.
pub fn encode_binary<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    let payload = bincode::serialize(value)?;
    let compressed = lz4_flex::compress_prepend_size(&payload);
    let mut data = Vec::with_capacity(1 + compressed.len());
    data.push(WIRE_VERSION);
    data.extend_from_slice(&compressed);
    Ok(data)
}

/// Decode a value from the versioned binary format.
pub fn decode_binary<T: DeserializeOwned>(data: &[u8]) -> Result<T, CodecError> {
    let (&version, compressed) = data.split_first().ok_or(CodecError::MessageTooShort)?;
    if version != WIRE_VERSION {
        return Err(CodecError::UnknownVersion(version));
    }
    if compressed.is_empty() {
        return Err(CodecError::MessageTooShort);
    }
    let payload = lz4_flex::decompress_size_prepended(compressed)
        .map_err(|e| CodecError::Decompress(e.to_string()))?;
    Ok(bincode::deserialize(&payload)?)
}
