use bitcoin::consensus::encode::{self, Decodable, Encodable};
use bitcoin::io::{self, Read, Write};

/// Payload shared by Ping and Pong.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingPayload {
    /// Chain height of the sender.
    pub last_block_index: u32,
    pub timestamp: u32,
    /// Echoed back unchanged in the Pong reply.
    pub nonce: u32,
}

impl PingPayload {
    pub fn new(last_block_index: u32, nonce: u32) -> Self {
        Self {
            last_block_index,
            timestamp: super::unix_timestamp(),
            nonce,
        }
    }
}

impl Encodable for PingPayload {
    fn consensus_encode<W: Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        let mut len = self.last_block_index.consensus_encode(writer)?;
        len += self.timestamp.consensus_encode(writer)?;
        len += self.nonce.consensus_encode(writer)?;
        Ok(len)
    }
}

impl Decodable for PingPayload {
    fn consensus_decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self, encode::Error> {
        Ok(PingPayload {
            last_block_index: u32::consensus_decode(reader)?,
            timestamp: u32::consensus_decode(reader)?,
            nonce: u32::consensus_decode(reader)?,
        })
    }
}
