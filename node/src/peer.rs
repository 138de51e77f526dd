use crate::handshake::VersionInfo;
use std::fmt;
use std::net::SocketAddr;

/// Identifier of a live connection, unique for the lifetime of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeerId(u64);

impl PeerId {
    pub(crate) fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer#{}", self.0)
    }
}

/// Which side opened the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Inbound,
    Outbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Inbound => write!(f, "inbound"),
            Direction::Outbound => write!(f, "outbound"),
        }
    }
}

/// Snapshot of a connection as seen by the connection manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub id: PeerId,
    pub remote: SocketAddr,
    pub direction: Direction,
    /// Announced identity, `None` until the peer's version arrived.
    pub version: Option<VersionInfo>,
    /// Handshake complete.
    pub ready: bool,
    /// Latest chain height learned from the version or pings.
    pub last_block_index: u32,
    /// Whether the peer loaded a bloom filter.
    pub filtered: bool,
}

impl PeerInfo {
    /// Address other nodes can dial the peer on, if it listens.
    pub fn listener(&self) -> Option<SocketAddr> {
        let port = self.version.as_ref()?.listener_port()?;
        Some(SocketAddr::new(self.remote.ip(), port))
    }
}
