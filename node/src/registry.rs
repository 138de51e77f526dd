//! Live connections tracked by the connection manager.
//!
//! Admission checks and insertion happen in one call so the global and
//! per-address caps hold after every operation.

use crate::bloom::BloomFilter;
use crate::handshake::VersionInfo;
use crate::peer::{Direction, PeerId, PeerInfo};
use crate::session::SessionCommand;
use neo_peers_connection::message::{normalize_ip, DisconnectReason};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use tokio::sync::mpsc;

#[derive(Debug)]
pub(crate) struct PeerEntry {
    pub remote: SocketAddr,
    pub direction: Direction,
    pub version: Option<VersionInfo>,
    pub ready: bool,
    pub filter: Option<BloomFilter>,
    pub last_block_index: u32,
    pub commands: mpsc::UnboundedSender<SessionCommand>,
}

impl PeerEntry {
    /// Endpoint other nodes can dial this peer on.
    fn listener(&self) -> Option<SocketAddr> {
        let port = self.version.as_ref()?.listener_port()?;
        Some(SocketAddr::new(normalize_ip(self.remote.ip()), port))
    }
}

#[derive(Debug, Default)]
pub(crate) struct Registry {
    peers: HashMap<PeerId, PeerEntry>,
    per_address: HashMap<IpAddr, usize>,
    next_id: u64,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection if both caps allow it.
    pub fn admit(
        &mut self,
        remote: SocketAddr,
        direction: Direction,
        commands: mpsc::UnboundedSender<SessionCommand>,
        max_connections: usize,
        max_connections_per_address: usize,
    ) -> Result<PeerId, DisconnectReason> {
        let ip = normalize_ip(remote.ip());
        if self.peers.len() >= max_connections {
            return Err(DisconnectReason::MaxConnectionReached);
        }
        if self.connections_from(ip) >= max_connections_per_address {
            return Err(DisconnectReason::MaxConnectionPerAddressReached);
        }

        self.next_id += 1;
        let peer = PeerId::new(self.next_id);
        self.peers.insert(
            peer,
            PeerEntry {
                remote,
                direction,
                version: None,
                ready: false,
                filter: None,
                last_block_index: 0,
                commands,
            },
        );
        *self.per_address.entry(ip).or_insert(0) += 1;
        Ok(peer)
    }

    pub fn remove(&mut self, peer: PeerId) -> Option<PeerEntry> {
        let entry = self.peers.remove(&peer)?;
        let ip = normalize_ip(entry.remote.ip());
        if let Some(count) = self.per_address.get_mut(&ip) {
            *count -= 1;
            if *count == 0 {
                self.per_address.remove(&ip);
            }
        }
        Some(entry)
    }

    pub fn get(&self, peer: PeerId) -> Option<&PeerEntry> {
        self.peers.get(&peer)
    }

    pub fn get_mut(&mut self, peer: PeerId) -> Option<&mut PeerEntry> {
        self.peers.get_mut(&peer)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Live connections from `ip`, any state.
    pub fn connections_from(&self, ip: IpAddr) -> usize {
        self.per_address
            .get(&normalize_ip(ip))
            .copied()
            .unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (PeerId, &PeerEntry)> {
        self.peers.iter().map(|(peer, entry)| (*peer, entry))
    }

    /// Connections that completed the handshake.
    pub fn ready(&self) -> impl Iterator<Item = (PeerId, &PeerEntry)> {
        self.iter().filter(|(_, entry)| entry.ready)
    }

    /// Whether another connection from the same address announced `nonce`.
    pub fn is_duplicate(&self, peer: PeerId, ip: IpAddr, nonce: u32) -> bool {
        let ip = normalize_ip(ip);
        self.iter().any(|(other, entry)| {
            other != peer
                && normalize_ip(entry.remote.ip()) == ip
                && entry
                    .version
                    .as_ref()
                    .map_or(false, |version| version.nonce == nonce)
        })
    }

    /// Whether a live connection reaches `endpoint`, dialed or announced.
    pub fn is_connected_to(&self, endpoint: SocketAddr) -> bool {
        let endpoint = SocketAddr::new(normalize_ip(endpoint.ip()), endpoint.port());
        self.peers.values().any(|entry| {
            SocketAddr::new(normalize_ip(entry.remote.ip()), entry.remote.port()) == endpoint
                || entry.listener() == Some(endpoint)
        })
    }

    pub fn snapshot(&self) -> Vec<PeerInfo> {
        let mut peers: Vec<PeerInfo> = self
            .iter()
            .map(|(id, entry)| PeerInfo {
                id,
                remote: entry.remote,
                direction: entry.direction,
                version: entry.version.clone(),
                ready: entry.ready,
                last_block_index: entry.last_block_index,
                filtered: entry.filter.is_some(),
            })
            .collect();
        peers.sort_by_key(|info| info.id);
        peers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use neo_peers_connection::message::NodeCapability;
    use std::net::Ipv4Addr;

    fn admit(registry: &mut Registry, remote: &str) -> Result<PeerId, DisconnectReason> {
        let (commands, _) = mpsc::unbounded_channel();
        registry.admit(remote.parse().unwrap(), Direction::Inbound, commands, 4, 2)
    }

    fn version(nonce: u32, port: u16) -> VersionInfo {
        VersionInfo {
            magic: 0,
            version: 0,
            timestamp: 0,
            nonce,
            user_agent: String::new(),
            capabilities: vec![NodeCapability::TcpServer(port)],
        }
    }

    #[test]
    fn test_per_address_cap() {
        let mut registry = Registry::new();
        admit(&mut registry, "10.0.0.1:1000").unwrap();
        admit(&mut registry, "10.0.0.1:1001").unwrap();
        assert_eq!(
            admit(&mut registry, "10.0.0.1:1002"),
            Err(DisconnectReason::MaxConnectionPerAddressReached)
        );
        // The IPv4-mapped form counts against the same address.
        assert_eq!(
            admit(&mut registry, "[::ffff:10.0.0.1]:1003"),
            Err(DisconnectReason::MaxConnectionPerAddressReached)
        );
        admit(&mut registry, "10.0.0.2:1000").unwrap();
        assert_eq!(registry.connections_from(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))), 2);
    }

    #[test]
    fn test_global_cap_checked_first() {
        let mut registry = Registry::new();
        for i in 1..=4 {
            admit(&mut registry, &format!("10.0.0.{i}:1000")).unwrap();
        }
        assert_eq!(
            admit(&mut registry, "10.0.0.1:2000"),
            Err(DisconnectReason::MaxConnectionReached)
        );
    }

    #[test]
    fn test_remove_frees_slot() {
        let mut registry = Registry::new();
        let first = admit(&mut registry, "10.0.0.1:1000").unwrap();
        admit(&mut registry, "10.0.0.1:1001").unwrap();
        assert!(registry.remove(first).is_some());
        assert!(registry.remove(first).is_none());
        admit(&mut registry, "10.0.0.1:1002").unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_duplicate_nonce_same_address() {
        let mut registry = Registry::new();
        let first = admit(&mut registry, "10.0.0.1:1000").unwrap();
        let second = admit(&mut registry, "10.0.0.1:1001").unwrap();
        registry.get_mut(first).unwrap().version = Some(version(7, 20333));

        assert!(registry.is_duplicate(second, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), 7));
        assert!(!registry.is_duplicate(second, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), 8));
        assert!(!registry.is_duplicate(first, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), 7));
    }

    #[test]
    fn test_connected_by_listener_port() {
        let mut registry = Registry::new();
        let peer = admit(&mut registry, "10.0.0.1:51000").unwrap();
        registry.get_mut(peer).unwrap().version = Some(version(1, 20333));

        assert!(registry.is_connected_to("10.0.0.1:51000".parse().unwrap()));
        assert!(registry.is_connected_to("10.0.0.1:20333".parse().unwrap()));
        assert!(!registry.is_connected_to("10.0.0.1:20334".parse().unwrap()));
    }
}
