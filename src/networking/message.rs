//! Wire messages for the LVE Node P2P protocol
//!
//! Every frame is one UTF-8 JSON object `{"type": ..., "data": ...}` carried
//! in a WebSocket text message. The closed enum below is the entire
//! protocol: unknown tags fail decoding and count against the sender.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ledger::{Block, Transaction};

/// Protocol revision; bumped on incompatible wire changes.
pub const PROTOCOL_VERSION: u32 = 1;
/// Hard cap on a single frame before JSON parsing is attempted.
pub const MAX_FRAME_BYTES: usize = 2 * 1024 * 1024;
/// Blocks per chunked-sync response.
pub const SYNC_CHUNK_SIZE: usize = 100;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("frame of {0} bytes exceeds the {MAX_FRAME_BYTES}-byte limit")]
    FrameTooLarge(usize),
    #[error("malformed frame: {0}")]
    Malformed(String),
}

/// First message on every connection, in both directions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub protocol_version: u32,
    pub chain_id: String,
    pub genesis_hash: String,
    pub node_version: String,
    pub current_height: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionReject {
    pub reason: String,
    pub expected: String,
    pub got: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlocksRequest {
    pub from_height: u64,
    pub limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlocksResponse {
    pub blocks: Vec<Block>,
    pub has_more: bool,
}

/// The closed set of P2P messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    Handshake(Handshake),
    HandshakeAck(Handshake),
    VersionReject(VersionReject),
    QueryLatest,
    QueryAll,
    QueryBlocksFrom(BlocksRequest),
    ResponseBlockchain(Vec<Block>),
    ResponseBlocks(BlocksResponse),
    NewBlock(Block),
    NewTransaction(Transaction),
    QueryTransactionPool,
    ResponseTransactionPool(Vec<Transaction>),
    QueryPeers,
    ResponsePeers(Vec<String>),
}

impl Message {
    pub fn encode(&self) -> String {
        serde_json::to_string(self).expect("wire messages always serialize")
    }

    /// Length-limited decode. serde_json's own recursion limit bounds the
    /// nesting depth before any payload reaches dispatch.
    pub fn decode(frame: &str) -> Result<Self, DecodeError> {
        if frame.len() > MAX_FRAME_BYTES {
            return Err(DecodeError::FrameTooLarge(frame.len()));
        }
        serde_json::from_str(frame).map_err(|e| DecodeError::Malformed(e.to_string()))
    }
}
