//! Neo p2p message envelope and payloads.
//!
//! A message on the wire is `flags: u8 | command: u8 | payload: var_bytes`.
//! [`Message`] pairs each command with its typed payload, the way
//! `bitcoin::p2p::message::NetworkMessage` does for bitcoin.

mod address;
mod block;
mod disconnect;
mod filter;
mod inventory;
mod ping;
mod version;

pub use address::{
    decode_address_list, encode_address_list, normalize_ip, AddrPayload, NetworkAddressWithTime,
    MAX_COUNT_TO_SEND,
};
pub use block::{
    Block, ConsensusPayload, Header, HeadersPayload, Inventory, MerkleBlockPayload, Transaction,
    MAX_HEADERS_COUNT, MAX_TRANSACTION_SIZE,
};
pub use disconnect::{
    DisconnectPayload, DisconnectReason, PayloadError, MAX_DATA_SIZE, MAX_MESSAGE_SIZE,
};
pub use filter::{
    FilterAddPayload, FilterLoadPayload, MAX_FILTER_ADD_SIZE, MAX_FILTER_SIZE, MAX_HASH_FUNCTIONS,
};
pub use inventory::{
    GetBlockDataPayload, GetBlocksPayload, InvPayload, InventoryType, MAX_HASHES_COUNT,
};
pub use ping::PingPayload;
pub use version::{NodeCapability, VersionPayload, MAX_CAPABILITIES, MAX_USER_AGENT_SIZE};

use crate::codec::{read_var_bytes, write_var_bytes};
use bitcoin::consensus::encode::{self, Decodable, Encodable};
use bitcoin::io::{self, Read, Write};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Maximum size of a message payload.
pub const PAYLOAD_MAX_SIZE: usize = 0x0200_0000;

/// Flag bit marking a compressed payload.
pub const FLAG_COMPRESSED: u8 = 0x01;

/// Seconds since the unix epoch, saturating into the u32 the wire uses.
pub fn unix_timestamp() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs().min(u32::MAX as u64) as u32)
        .unwrap_or(0)
}

/// Command byte of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageCommand {
    Version,
    Verack,
    Disconnect,
    GetAddr,
    Addr,
    Ping,
    Pong,
    GetHeaders,
    Headers,
    GetBlocks,
    Mempool,
    Inv,
    GetData,
    GetBlockData,
    NotFound,
    Transaction,
    Block,
    Consensus,
    Reject,
    FilterLoad,
    FilterAdd,
    FilterClear,
    MerkleBlock,
    Alert,
}

impl MessageCommand {
    pub fn to_u8(self) -> u8 {
        match self {
            MessageCommand::Version => 0x00,
            MessageCommand::Verack => 0x01,
            MessageCommand::Disconnect => 0x02,
            MessageCommand::GetAddr => 0x10,
            MessageCommand::Addr => 0x11,
            MessageCommand::Ping => 0x18,
            MessageCommand::Pong => 0x19,
            MessageCommand::GetHeaders => 0x20,
            MessageCommand::Headers => 0x21,
            MessageCommand::GetBlocks => 0x24,
            MessageCommand::Mempool => 0x25,
            MessageCommand::Inv => 0x27,
            MessageCommand::GetData => 0x28,
            MessageCommand::GetBlockData => 0x29,
            MessageCommand::NotFound => 0x2a,
            MessageCommand::Transaction => 0x2b,
            MessageCommand::Block => 0x2c,
            MessageCommand::Consensus => 0x2d,
            MessageCommand::Reject => 0x2f,
            MessageCommand::FilterLoad => 0x30,
            MessageCommand::FilterAdd => 0x31,
            MessageCommand::FilterClear => 0x32,
            MessageCommand::MerkleBlock => 0x38,
            MessageCommand::Alert => 0x40,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        let command = match value {
            0x00 => MessageCommand::Version,
            0x01 => MessageCommand::Verack,
            0x02 => MessageCommand::Disconnect,
            0x10 => MessageCommand::GetAddr,
            0x11 => MessageCommand::Addr,
            0x18 => MessageCommand::Ping,
            0x19 => MessageCommand::Pong,
            0x20 => MessageCommand::GetHeaders,
            0x21 => MessageCommand::Headers,
            0x24 => MessageCommand::GetBlocks,
            0x25 => MessageCommand::Mempool,
            0x27 => MessageCommand::Inv,
            0x28 => MessageCommand::GetData,
            0x29 => MessageCommand::GetBlockData,
            0x2a => MessageCommand::NotFound,
            0x2b => MessageCommand::Transaction,
            0x2c => MessageCommand::Block,
            0x2d => MessageCommand::Consensus,
            0x2f => MessageCommand::Reject,
            0x30 => MessageCommand::FilterLoad,
            0x31 => MessageCommand::FilterAdd,
            0x32 => MessageCommand::FilterClear,
            0x38 => MessageCommand::MerkleBlock,
            0x40 => MessageCommand::Alert,
            _ => return None,
        };
        Some(command)
    }
}

impl fmt::Display for MessageCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A neo p2p message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Version(VersionPayload),
    Verack,
    Disconnect(DisconnectPayload),
    GetAddr,
    Addr(AddrPayload),
    Ping(PingPayload),
    Pong(PingPayload),
    GetHeaders(GetBlocksPayload),
    Headers(HeadersPayload),
    GetBlocks(GetBlocksPayload),
    Mempool,
    Inv(InvPayload),
    GetData(InvPayload),
    GetBlockData(GetBlockDataPayload),
    NotFound(InvPayload),
    Transaction(Transaction),
    Block(Block),
    Consensus(ConsensusPayload),
    Reject(Vec<u8>),
    FilterLoad(FilterLoadPayload),
    FilterAdd(FilterAddPayload),
    FilterClear,
    MerkleBlock(MerkleBlockPayload),
    Alert(Vec<u8>),
}

impl Message {
    pub fn command(&self) -> MessageCommand {
        match self {
            Message::Version(_) => MessageCommand::Version,
            Message::Verack => MessageCommand::Verack,
            Message::Disconnect(_) => MessageCommand::Disconnect,
            Message::GetAddr => MessageCommand::GetAddr,
            Message::Addr(_) => MessageCommand::Addr,
            Message::Ping(_) => MessageCommand::Ping,
            Message::Pong(_) => MessageCommand::Pong,
            Message::GetHeaders(_) => MessageCommand::GetHeaders,
            Message::Headers(_) => MessageCommand::Headers,
            Message::GetBlocks(_) => MessageCommand::GetBlocks,
            Message::Mempool => MessageCommand::Mempool,
            Message::Inv(_) => MessageCommand::Inv,
            Message::GetData(_) => MessageCommand::GetData,
            Message::GetBlockData(_) => MessageCommand::GetBlockData,
            Message::NotFound(_) => MessageCommand::NotFound,
            Message::Transaction(_) => MessageCommand::Transaction,
            Message::Block(_) => MessageCommand::Block,
            Message::Consensus(_) => MessageCommand::Consensus,
            Message::Reject(_) => MessageCommand::Reject,
            Message::FilterLoad(_) => MessageCommand::FilterLoad,
            Message::FilterAdd(_) => MessageCommand::FilterAdd,
            Message::FilterClear => MessageCommand::FilterClear,
            Message::MerkleBlock(_) => MessageCommand::MerkleBlock,
            Message::Alert(_) => MessageCommand::Alert,
        }
    }

    /// Serialized payload bytes, empty for commands without a payload.
    fn payload_bytes(&self) -> Vec<u8> {
        match self {
            Message::Version(payload) => encode::serialize(payload),
            Message::Disconnect(payload) => encode::serialize(payload),
            Message::Addr(payload) => encode::serialize(payload),
            Message::Ping(payload) | Message::Pong(payload) => encode::serialize(payload),
            Message::GetHeaders(payload) | Message::GetBlocks(payload) => {
                encode::serialize(payload)
            }
            Message::Headers(payload) => encode::serialize(payload),
            Message::Inv(payload) | Message::GetData(payload) | Message::NotFound(payload) => {
                encode::serialize(payload)
            }
            Message::GetBlockData(payload) => encode::serialize(payload),
            Message::Transaction(payload) => encode::serialize(payload),
            Message::Block(payload) => encode::serialize(payload),
            Message::Consensus(payload) => encode::serialize(payload),
            Message::FilterLoad(payload) => encode::serialize(payload),
            Message::FilterAdd(payload) => encode::serialize(payload),
            Message::MerkleBlock(payload) => encode::serialize(payload),
            Message::Reject(bytes) | Message::Alert(bytes) => bytes.clone(),
            Message::Verack | Message::GetAddr | Message::Mempool | Message::FilterClear => {
                Vec::new()
            }
        }
    }

    fn from_payload(command: MessageCommand, payload: &[u8]) -> Result<Self, encode::Error> {
        let message = match command {
            MessageCommand::Version => Message::Version(encode::deserialize(payload)?),
            MessageCommand::Verack => empty(payload, Message::Verack)?,
            MessageCommand::Disconnect => Message::Disconnect(encode::deserialize(payload)?),
            MessageCommand::GetAddr => empty(payload, Message::GetAddr)?,
            MessageCommand::Addr => Message::Addr(encode::deserialize(payload)?),
            MessageCommand::Ping => Message::Ping(encode::deserialize(payload)?),
            MessageCommand::Pong => Message::Pong(encode::deserialize(payload)?),
            MessageCommand::GetHeaders => Message::GetHeaders(encode::deserialize(payload)?),
            MessageCommand::Headers => Message::Headers(encode::deserialize(payload)?),
            MessageCommand::GetBlocks => Message::GetBlocks(encode::deserialize(payload)?),
            MessageCommand::Mempool => empty(payload, Message::Mempool)?,
            MessageCommand::Inv => Message::Inv(encode::deserialize(payload)?),
            MessageCommand::GetData => Message::GetData(InvPayload::deserialize_request(payload)?),
            MessageCommand::GetBlockData => Message::GetBlockData(encode::deserialize(payload)?),
            MessageCommand::NotFound => Message::NotFound(encode::deserialize(payload)?),
            MessageCommand::Transaction => Message::Transaction(encode::deserialize(payload)?),
            MessageCommand::Block => Message::Block(encode::deserialize(payload)?),
            MessageCommand::Consensus => Message::Consensus(encode::deserialize(payload)?),
            MessageCommand::Reject => Message::Reject(payload.to_vec()),
            MessageCommand::FilterLoad => Message::FilterLoad(encode::deserialize(payload)?),
            MessageCommand::FilterAdd => Message::FilterAdd(encode::deserialize(payload)?),
            MessageCommand::FilterClear => empty(payload, Message::FilterClear)?,
            MessageCommand::MerkleBlock => Message::MerkleBlock(encode::deserialize(payload)?),
            MessageCommand::Alert => Message::Alert(payload.to_vec()),
        };
        Ok(message)
    }
}

fn empty(payload: &[u8], message: Message) -> Result<Message, encode::Error> {
    if payload.is_empty() {
        Ok(message)
    } else {
        Err(encode::Error::ParseFailed("unexpected payload"))
    }
}

impl Encodable for Message {
    fn consensus_encode<W: Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        let mut len = 0u8.consensus_encode(writer)?;
        len += self.command().to_u8().consensus_encode(writer)?;
        len += write_var_bytes(writer, &self.payload_bytes())?;
        Ok(len)
    }
}

impl Decodable for Message {
    fn consensus_decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self, encode::Error> {
        let flags = u8::consensus_decode(reader)?;
        if flags & FLAG_COMPRESSED != 0 {
            return Err(encode::Error::ParseFailed("compressed payloads are not supported"));
        }
        let command = MessageCommand::from_u8(u8::consensus_decode(reader)?)
            .ok_or(encode::Error::ParseFailed("unknown message command"))?;
        let payload = read_var_bytes(reader, PAYLOAD_MAX_SIZE)?;
        Message::from_payload(command, &payload)
    }
}
