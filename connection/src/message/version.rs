//! Handshake payload and node capabilities.

use crate::codec::{read_list, read_var_string, write_list, write_var_string};
use bitcoin::consensus::encode::{self, Decodable, Encodable};
use bitcoin::io::{self, Read, Write};

/// Maximum byte length of a user agent string.
pub const MAX_USER_AGENT_SIZE: usize = 1024;
/// Maximum number of capabilities a node may announce.
pub const MAX_CAPABILITIES: usize = 32;

const TCP_SERVER: u8 = 0x01;
const WS_SERVER: u8 = 0x02;
const FULL_NODE: u8 = 0x10;

/// A service announced by a node in its version or address records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeCapability {
    /// Accepts TCP connections on the port.
    TcpServer(u16),
    /// Accepts websocket connections on the port.
    WsServer(u16),
    /// Stores the full chain, currently at the start height.
    FullNode(u32),
}

impl Encodable for NodeCapability {
    fn consensus_encode<W: Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        let len = match self {
            NodeCapability::TcpServer(port) => {
                TCP_SERVER.consensus_encode(writer)? + port.consensus_encode(writer)?
            }
            NodeCapability::WsServer(port) => {
                WS_SERVER.consensus_encode(writer)? + port.consensus_encode(writer)?
            }
            NodeCapability::FullNode(start_height) => {
                FULL_NODE.consensus_encode(writer)? + start_height.consensus_encode(writer)?
            }
        };
        Ok(len)
    }
}

impl Decodable for NodeCapability {
    fn consensus_decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self, encode::Error> {
        match u8::consensus_decode(reader)? {
            TCP_SERVER => Ok(NodeCapability::TcpServer(u16::consensus_decode(reader)?)),
            WS_SERVER => Ok(NodeCapability::WsServer(u16::consensus_decode(reader)?)),
            FULL_NODE => Ok(NodeCapability::FullNode(u32::consensus_decode(reader)?)),
            _ => Err(encode::Error::ParseFailed("unknown node capability")),
        }
    }
}

/// Port of the first TCP server capability, if any.
pub(crate) fn tcp_port(capabilities: &[NodeCapability]) -> Option<u16> {
    capabilities.iter().find_map(|capability| match capability {
        NodeCapability::TcpServer(port) => Some(*port),
        _ => None,
    })
}

/// Identity a node announces at the start of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionPayload {
    /// Network magic, nodes on different networks refuse each other.
    pub magic: u32,
    /// Protocol version.
    pub version: u32,
    /// Seconds since the unix epoch when the payload was created.
    pub timestamp: u32,
    /// Random per-process nonce used to detect connections to self.
    pub nonce: u32,
    pub user_agent: String,
    pub capabilities: Vec<NodeCapability>,
}

impl VersionPayload {
    /// Port the node accepts TCP connections on, if it announced one.
    pub fn listener_tcp_port(&self) -> Option<u16> {
        tcp_port(&self.capabilities)
    }

    /// Chain height announced through the full node capability.
    pub fn start_height(&self) -> Option<u32> {
        self.capabilities
            .iter()
            .find_map(|capability| match capability {
                NodeCapability::FullNode(height) => Some(*height),
                _ => None,
            })
    }
}

impl Encodable for VersionPayload {
    fn consensus_encode<W: Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        let mut len = self.magic.consensus_encode(writer)?;
        len += self.version.consensus_encode(writer)?;
        len += self.timestamp.consensus_encode(writer)?;
        len += self.nonce.consensus_encode(writer)?;
        len += write_var_string(writer, &self.user_agent)?;
        len += write_list(writer, &self.capabilities)?;
        Ok(len)
    }
}

impl Decodable for VersionPayload {
    fn consensus_decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self, encode::Error> {
        Ok(VersionPayload {
            magic: u32::consensus_decode(reader)?,
            version: u32::consensus_decode(reader)?,
            timestamp: u32::consensus_decode(reader)?,
            nonce: u32::consensus_decode(reader)?,
            user_agent: read_var_string(reader, MAX_USER_AGENT_SIZE)?,
            capabilities: read_list(reader, MAX_CAPABILITIES)?,
        })
    }
}
