//! Inventory announcements and chain walk requests.

use crate::codec::{read_hash, read_hash_list, write_hash, write_hash_list, Hash256};
use bitcoin::consensus::encode::{self, Decodable, Encodable, VarInt};
use bitcoin::io::{self, Read, Write};
use std::fmt;

/// Maximum number of hashes in a single inventory message.
pub const MAX_HASHES_COUNT: usize = 500;

/// Kind of relayable chain object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InventoryType {
    Transaction,
    Block,
    Consensus,
}

impl InventoryType {
    pub fn to_u8(self) -> u8 {
        match self {
            InventoryType::Transaction => 0x2b,
            InventoryType::Block => 0x2c,
            InventoryType::Consensus => 0x2d,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x2b => Some(InventoryType::Transaction),
            0x2c => Some(InventoryType::Block),
            0x2d => Some(InventoryType::Consensus),
            _ => None,
        }
    }
}

impl fmt::Display for InventoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InventoryType::Transaction => write!(f, "tx"),
            InventoryType::Block => write!(f, "block"),
            InventoryType::Consensus => write!(f, "consensus"),
        }
    }
}

impl Encodable for InventoryType {
    fn consensus_encode<W: Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        self.to_u8().consensus_encode(writer)
    }
}

impl Decodable for InventoryType {
    fn consensus_decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self, encode::Error> {
        InventoryType::from_u8(u8::consensus_decode(reader)?)
            .ok_or(encode::Error::ParseFailed("unknown inventory type"))
    }
}

/// Payload of Inv, GetData and NotFound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvPayload {
    pub inventory_type: InventoryType,
    pub hashes: Vec<Hash256>,
}

impl InvPayload {
    pub fn new(inventory_type: InventoryType, hashes: Vec<Hash256>) -> Self {
        Self {
            inventory_type,
            hashes,
        }
    }

    /// Split a hash list into payloads that each respect [`MAX_HASHES_COUNT`].
    pub fn create_group(inventory_type: InventoryType, hashes: &[Hash256]) -> Vec<InvPayload> {
        hashes
            .chunks(MAX_HASHES_COUNT)
            .map(|chunk| InvPayload::new(inventory_type, chunk.to_vec()))
            .collect()
    }

    /// Decode a GetData request, keeping the first [`MAX_HASHES_COUNT`] hashes.
    ///
    /// Announcements are strict, but a request for too many items is served
    /// up to the cap instead of failing the connection. The frame size
    /// already bounds how many hashes are read.
    pub fn deserialize_request(payload: &[u8]) -> Result<Self, encode::Error> {
        let mut reader = payload;
        let inventory_type = InventoryType::consensus_decode(&mut reader)?;
        let count = VarInt::consensus_decode(&mut reader)?.0;
        let mut hashes = Vec::with_capacity(count.min(MAX_HASHES_COUNT as u64) as usize);
        for _ in 0..count {
            let hash = read_hash(&mut reader)?;
            if hashes.len() < MAX_HASHES_COUNT {
                hashes.push(hash);
            }
        }
        if !reader.is_empty() {
            return Err(encode::Error::ParseFailed(
                "data not consumed entirely when deserializing",
            ));
        }
        Ok(InvPayload::new(inventory_type, hashes))
    }
}

impl Encodable for InvPayload {
    fn consensus_encode<W: Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        Ok(self.inventory_type.consensus_encode(writer)? + write_hash_list(writer, &self.hashes)?)
    }
}

impl Decodable for InvPayload {
    fn consensus_decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self, encode::Error> {
        Ok(InvPayload {
            inventory_type: InventoryType::consensus_decode(reader)?,
            hashes: read_hash_list(reader, MAX_HASHES_COUNT)?,
        })
    }
}

/// Payload of GetBlocks and GetHeaders.
///
/// A negative `count` asks for as many items as the responder allows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetBlocksPayload {
    pub hash_start: Hash256,
    pub count: i16,
}

impl Encodable for GetBlocksPayload {
    fn consensus_encode<W: Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        Ok(write_hash(writer, &self.hash_start)? + self.count.consensus_encode(writer)?)
    }
}

impl Decodable for GetBlocksPayload {
    fn consensus_decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self, encode::Error> {
        Ok(GetBlocksPayload {
            hash_start: read_hash(reader)?,
            count: i16::consensus_decode(reader)?,
        })
    }
}

/// Payload of GetBlockData, a range of blocks by index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetBlockDataPayload {
    pub index_start: u32,
    pub count: u16,
}

impl Encodable for GetBlockDataPayload {
    fn consensus_encode<W: Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        Ok(self.index_start.consensus_encode(writer)? + self.count.consensus_encode(writer)?)
    }
}

impl Decodable for GetBlockDataPayload {
    fn consensus_decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self, encode::Error> {
        Ok(GetBlockDataPayload {
            index_start: u32::consensus_decode(reader)?,
            count: u16::consensus_decode(reader)?,
        })
    }
}
