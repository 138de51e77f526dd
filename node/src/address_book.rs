use neo_peers_connection::message::{normalize_ip, NetworkAddressWithTime};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;

#[derive(Debug, Clone)]
struct AddressEntry {
    /// The record as last announced, capabilities included.
    address: NetworkAddressWithTime,
    last_seen: Instant,
}

/// Nodes learned from peers and seeds, keyed by TCP endpoint.
///
/// Entries are only ever refreshed, never dropped. Once the book is full
/// new endpoints are ignored.
#[derive(Debug)]
pub(crate) struct AddressBook {
    entries: HashMap<SocketAddr, AddressEntry>,
    max_size: usize,
}

impl AddressBook {
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: HashMap::new(),
            max_size,
        }
    }

    /// Record `address` as seen at `now`, returning `true` if it is new.
    ///
    /// A known endpoint takes the newer record's capabilities.
    pub fn add(&mut self, address: NetworkAddressWithTime, now: Instant) -> bool {
        let endpoint = address.endpoint();
        if endpoint.port() == 0 || endpoint.ip().is_unspecified() {
            return false;
        }
        let endpoint = SocketAddr::new(normalize_ip(endpoint.ip()), endpoint.port());
        if let Some(entry) = self.entries.get_mut(&endpoint) {
            entry.address = address;
            entry.last_seen = now;
            return false;
        }
        if self.entries.len() >= self.max_size {
            return false;
        }
        self.entries.insert(
            endpoint,
            AddressEntry {
                address,
                last_seen: now,
            },
        );
        true
    }

    pub fn endpoints(&self) -> impl Iterator<Item = SocketAddr> + '_ {
        self.entries.keys().copied()
    }

    /// Every record, most recently seen first.
    pub fn addresses(&self) -> Vec<NetworkAddressWithTime> {
        let mut entries: Vec<&AddressEntry> = self.entries.values().collect();
        entries.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        entries.into_iter().map(|entry| entry.address.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use neo_peers_connection::message::NodeCapability;
    use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
    use std::time::Duration;

    fn address(ip: IpAddr, capabilities: Vec<NodeCapability>) -> NetworkAddressWithTime {
        NetworkAddressWithTime::new(ip, 1_600_000_000, capabilities)
    }

    fn listening(ip: IpAddr, port: u16) -> NetworkAddressWithTime {
        address(ip, vec![NodeCapability::TcpServer(port)])
    }

    #[test]
    fn test_add_normalizes_and_refreshes() {
        let now = Instant::now();
        let mut book = AddressBook::new(10);
        let mapped = IpAddr::V6(Ipv4Addr::new(10, 0, 0, 1).to_ipv6_mapped());
        let v4 = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));

        assert!(book.add(listening(mapped, 20333), now));
        assert!(!book.add(listening(v4, 20333), now));
        assert!(!book.add(address(v4, vec![NodeCapability::FullNode(1)]), now));
        assert!(!book.add(
            listening(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 20333),
            now
        ));
        assert!(!book.add(listening(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 20333), now));
        assert_eq!(
            book.endpoints().collect::<Vec<_>>(),
            vec!["10.0.0.1:20333".parse::<SocketAddr>().unwrap()]
        );
    }

    #[test]
    fn test_refresh_keeps_latest_capabilities() {
        let now = Instant::now();
        let mut book = AddressBook::new(10);
        let ip = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        let full_node = address(
            ip,
            vec![NodeCapability::TcpServer(20333), NodeCapability::FullNode(7)],
        );

        book.add(listening(ip, 20333), now);
        book.add(full_node.clone(), now + Duration::from_secs(1));
        assert_eq!(book.addresses(), vec![full_node]);
    }

    #[test]
    fn test_addresses_most_recent_first() {
        let now = Instant::now();
        let mut book = AddressBook::new(10);
        let older = listening(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), 1);
        let newer = listening(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)), 1);

        book.add(older.clone(), now);
        book.add(newer.clone(), now + Duration::from_secs(5));
        assert_eq!(book.addresses(), vec![newer, older]);
    }

    #[test]
    fn test_full_book_ignores_new() {
        let now = Instant::now();
        let mut book = AddressBook::new(1);
        assert!(book.add(listening(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), 1), now));
        assert!(!book.add(listening(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)), 1), now));
        assert_eq!(book.len(), 1);
    }
}
