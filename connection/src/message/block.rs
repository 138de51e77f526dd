//! Chain objects carried over the wire.
//!
//! Blocks, transactions and consensus items are treated as opaque carriers
//! with a content hash. Their inner structure is validated elsewhere.

use super::inventory::InventoryType;
use crate::codec::{
    read_hash, read_hash160, read_hash_list, read_list, read_var_bytes, var_int_size, write_hash,
    write_hash160, write_hash_list, write_list, write_var_bytes, Hash160, Hash256,
};
use bitcoin::consensus::encode::{self, Decodable, Encodable, VarInt};
use bitcoin::hashes::Hash;
use bitcoin::io::{self, Read, Write};

/// Maximum serialized size of a relayed transaction.
pub const MAX_TRANSACTION_SIZE: usize = 102_400;
/// Maximum number of headers in one Headers message.
pub const MAX_HEADERS_COUNT: usize = 2000;
/// Maximum number of transactions in a block.
pub const MAX_TRANSACTIONS_PER_BLOCK: usize = u16::MAX as usize;

const MAX_OPAQUE_SIZE: usize = 0x0200_0000;
const MAX_WITNESS_SIZE: usize = 1024;

/// Block header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub version: u32,
    pub prev_hash: Hash256,
    pub merkle_root: Hash256,
    pub timestamp: u64,
    pub nonce: u64,
    pub index: u32,
    pub primary_index: u8,
    pub next_consensus: Hash160,
    pub witness: Vec<u8>,
}

impl Header {
    fn encode_unsigned<W: Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        let mut len = self.version.consensus_encode(writer)?;
        len += write_hash(writer, &self.prev_hash)?;
        len += write_hash(writer, &self.merkle_root)?;
        len += self.timestamp.consensus_encode(writer)?;
        len += self.nonce.consensus_encode(writer)?;
        len += self.index.consensus_encode(writer)?;
        len += self.primary_index.consensus_encode(writer)?;
        len += write_hash160(writer, &self.next_consensus)?;
        Ok(len)
    }

    /// Hash over every field except the witness.
    pub fn hash(&self) -> Hash256 {
        let mut buffer = Vec::new();
        let _ = self.encode_unsigned(&mut buffer);
        Hash256::hash(&buffer)
    }
}

impl Encodable for Header {
    fn consensus_encode<W: Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        Ok(self.encode_unsigned(writer)? + write_var_bytes(writer, &self.witness)?)
    }
}

impl Decodable for Header {
    fn consensus_decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self, encode::Error> {
        Ok(Header {
            version: u32::consensus_decode(reader)?,
            prev_hash: read_hash(reader)?,
            merkle_root: read_hash(reader)?,
            timestamp: u64::consensus_decode(reader)?,
            nonce: u64::consensus_decode(reader)?,
            index: u32::consensus_decode(reader)?,
            primary_index: u8::consensus_decode(reader)?,
            next_consensus: read_hash160(reader)?,
            witness: read_var_bytes(reader, MAX_WITNESS_SIZE)?,
        })
    }
}

/// An opaque transaction body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub data: Vec<u8>,
}

impl Transaction {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn hash(&self) -> Hash256 {
        Hash256::hash(&self.data)
    }

    /// Size of the transaction on the wire.
    pub fn size(&self) -> usize {
        var_int_size(self.data.len() as u64) + self.data.len()
    }
}

impl Encodable for Transaction {
    fn consensus_encode<W: Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        write_var_bytes(writer, &self.data)
    }
}

impl Decodable for Transaction {
    fn consensus_decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self, encode::Error> {
        Ok(Transaction {
            data: read_var_bytes(reader, MAX_OPAQUE_SIZE)?,
        })
    }
}

/// A block: header plus its transactions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub header: Header,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn hash(&self) -> Hash256 {
        self.header.hash()
    }

    pub fn index(&self) -> u32 {
        self.header.index
    }
}

impl Encodable for Block {
    fn consensus_encode<W: Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        Ok(self.header.consensus_encode(writer)? + write_list(writer, &self.transactions)?)
    }
}

impl Decodable for Block {
    fn consensus_decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self, encode::Error> {
        Ok(Block {
            header: Header::consensus_decode(reader)?,
            transactions: read_list(reader, MAX_TRANSACTIONS_PER_BLOCK)?,
        })
    }
}

/// An opaque consensus message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsensusPayload {
    pub data: Vec<u8>,
}

impl ConsensusPayload {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn hash(&self) -> Hash256 {
        Hash256::hash(&self.data)
    }
}

impl Encodable for ConsensusPayload {
    fn consensus_encode<W: Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        write_var_bytes(writer, &self.data)
    }
}

impl Decodable for ConsensusPayload {
    fn consensus_decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self, encode::Error> {
        Ok(ConsensusPayload {
            data: read_var_bytes(reader, MAX_OPAQUE_SIZE)?,
        })
    }
}

/// Reply to GetHeaders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadersPayload {
    pub headers: Vec<Header>,
}

impl Encodable for HeadersPayload {
    fn consensus_encode<W: Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        write_list(writer, &self.headers)
    }
}

impl Decodable for HeadersPayload {
    fn consensus_decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self, encode::Error> {
        Ok(HeadersPayload {
            headers: read_list(reader, MAX_HEADERS_COUNT)?,
        })
    }
}

/// Partial block for a peer with a bloom filter loaded.
///
/// Carries the header, the transaction count, every transaction hash in
/// block order and one match flag bit per transaction. There is no pruned
/// branch, so this is not a merkle inclusion proof.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleBlockPayload {
    pub header: Header,
    pub tx_count: u32,
    pub hashes: Vec<Hash256>,
    pub flags: Vec<u8>,
}

impl MerkleBlockPayload {
    /// Build the partial block for `block`, flagging each transaction in `matches`.
    pub fn create(block: &Block, matches: &[bool]) -> Self {
        let mut flags = vec![0u8; (matches.len() + 7) / 8];
        for (i, matched) in matches.iter().enumerate() {
            if *matched {
                flags[i / 8] |= 1 << (i % 8);
            }
        }
        MerkleBlockPayload {
            header: block.header.clone(),
            tx_count: block.transactions.len() as u32,
            hashes: block.transactions.iter().map(Transaction::hash).collect(),
            flags,
        }
    }

    /// Whether the transaction at `index` matched the filter.
    pub fn is_matched(&self, index: usize) -> bool {
        self.flags
            .get(index / 8)
            .map_or(false, |byte| byte & (1 << (index % 8)) != 0)
    }
}

impl Encodable for MerkleBlockPayload {
    fn consensus_encode<W: Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        let mut len = self.header.consensus_encode(writer)?;
        len += VarInt(self.tx_count as u64).consensus_encode(writer)?;
        len += write_hash_list(writer, &self.hashes)?;
        len += write_var_bytes(writer, &self.flags)?;
        Ok(len)
    }
}

impl Decodable for MerkleBlockPayload {
    fn consensus_decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self, encode::Error> {
        let header = Header::consensus_decode(reader)?;
        let tx_count = VarInt::consensus_decode(reader)?.0;
        if tx_count > MAX_TRANSACTIONS_PER_BLOCK as u64 {
            return Err(encode::Error::ParseFailed("merkle block tx count too large"));
        }
        Ok(MerkleBlockPayload {
            header,
            tx_count: tx_count as u32,
            hashes: read_hash_list(reader, MAX_TRANSACTIONS_PER_BLOCK)?,
            flags: read_var_bytes(reader, (MAX_TRANSACTIONS_PER_BLOCK + 7) / 8)?,
        })
    }
}

/// Any relayable chain object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inventory {
    Transaction(Transaction),
    Block(Block),
    Consensus(ConsensusPayload),
}

impl Inventory {
    pub fn hash(&self) -> Hash256 {
        match self {
            Inventory::Transaction(tx) => tx.hash(),
            Inventory::Block(block) => block.hash(),
            Inventory::Consensus(payload) => payload.hash(),
        }
    }

    pub fn inventory_type(&self) -> InventoryType {
        match self {
            Inventory::Transaction(_) => InventoryType::Transaction,
            Inventory::Block(_) => InventoryType::Block,
            Inventory::Consensus(_) => InventoryType::Consensus,
        }
    }
}
