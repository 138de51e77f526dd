//! Peer address records exchanged for discovery.

use super::version::{tcp_port, NodeCapability, MAX_CAPABILITIES};
use crate::codec::{read_list, write_list};
use bitcoin::consensus::encode::{self, Decodable, Encodable};
use bitcoin::io::{self, Read, Write};
use std::net::{IpAddr, Ipv6Addr, SocketAddr};

/// Maximum number of address records sent in one message.
pub const MAX_COUNT_TO_SEND: usize = 200;

/// Map an IPv4-mapped IPv6 address back to IPv4, leave others untouched.
pub fn normalize_ip(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        },
        v4 => v4,
    }
}

/// An announced peer with the time it was last seen.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NetworkAddressWithTime {
    pub timestamp: u32,
    pub address: IpAddr,
    pub capabilities: Vec<NodeCapability>,
}

impl NetworkAddressWithTime {
    pub fn new(address: IpAddr, timestamp: u32, capabilities: Vec<NodeCapability>) -> Self {
        Self {
            timestamp,
            address: normalize_ip(address),
            capabilities,
        }
    }

    /// TCP endpoint of the peer, port zero when it announced no TCP server.
    pub fn endpoint(&self) -> SocketAddr {
        SocketAddr::new(self.address, tcp_port(&self.capabilities).unwrap_or(0))
    }
}

impl Encodable for NetworkAddressWithTime {
    fn consensus_encode<W: Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        let mut len = self.timestamp.consensus_encode(writer)?;
        let v6 = match self.address {
            IpAddr::V4(v4) => v4.to_ipv6_mapped(),
            IpAddr::V6(v6) => v6,
        };
        writer.write_all(&v6.octets())?;
        len += 16;
        len += write_list(writer, &self.capabilities)?;
        Ok(len)
    }
}

impl Decodable for NetworkAddressWithTime {
    fn consensus_decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self, encode::Error> {
        let timestamp = u32::consensus_decode(reader)?;
        let mut octets = [0u8; 16];
        reader.read_exact(&mut octets)?;
        let capabilities = read_list(reader, MAX_CAPABILITIES)?;
        Ok(NetworkAddressWithTime::new(
            IpAddr::V6(Ipv6Addr::from(octets)),
            timestamp,
            capabilities,
        ))
    }
}

/// Reply to a GetAddr request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddrPayload {
    pub addresses: Vec<NetworkAddressWithTime>,
}

impl Encodable for AddrPayload {
    fn consensus_encode<W: Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        write_list(writer, &self.addresses)
    }
}

impl Decodable for AddrPayload {
    fn consensus_decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self, encode::Error> {
        let addresses = read_list(reader, MAX_COUNT_TO_SEND)?;
        if addresses.is_empty() {
            return Err(encode::Error::ParseFailed("empty address list"));
        }
        Ok(AddrPayload { addresses })
    }
}

/// Serialize an address list the way it is embedded in disconnect data.
pub fn encode_address_list(addresses: &[NetworkAddressWithTime]) -> Vec<u8> {
    let mut buffer = Vec::new();
    // Writing into a Vec cannot fail.
    let _ = write_list(&mut buffer, addresses);
    buffer
}

/// Decode an address list embedded in disconnect data.
pub fn decode_address_list(data: &[u8]) -> Result<Vec<NetworkAddressWithTime>, encode::Error> {
    let mut reader = data;
    let addresses = read_list(&mut reader, MAX_COUNT_TO_SEND)?;
    if !reader.is_empty() {
        return Err(encode::Error::ParseFailed("trailing bytes after address list"));
    }
    Ok(addresses)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_ipv4_is_mapped_on_the_wire() {
        let record = NetworkAddressWithTime::new(
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            5,
            vec![NodeCapability::TcpServer(20333)],
        );
        let bytes = encode::serialize(&record);
        assert_eq!(&bytes[4..20], &Ipv4Addr::new(10, 0, 0, 1).to_ipv6_mapped().octets());

        let decoded: NetworkAddressWithTime = encode::deserialize(&bytes).unwrap();
        assert_eq!(decoded.address, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)));
        assert_eq!(decoded.endpoint(), "10.0.0.1:20333".parse().unwrap());
    }

    #[test]
    fn test_endpoint_without_tcp_server() {
        let record = NetworkAddressWithTime::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0, vec![]);
        assert_eq!(record.endpoint().port(), 0);
    }

    #[test]
    fn test_empty_addr_payload_rejected() {
        let result: Result<AddrPayload, _> = encode::deserialize(&[0x00]);
        assert!(result.is_err());
    }

    #[test]
    fn test_address_list_in_disconnect_data() {
        let addresses = vec![
            NetworkAddressWithTime::new(
                IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4)),
                1,
                vec![NodeCapability::TcpServer(1)],
            ),
            NetworkAddressWithTime::new(
                IpAddr::V4(Ipv4Addr::new(5, 6, 7, 8)),
                2,
                vec![NodeCapability::TcpServer(2)],
            ),
        ];
        let data = encode_address_list(&addresses);
        assert_eq!(decode_address_list(&data).unwrap(), addresses);
        assert!(decode_address_list(&data[..data.len() - 1]).is_err());
        assert!(decode_address_list(&[0x00]).unwrap().is_empty());
    }
}
