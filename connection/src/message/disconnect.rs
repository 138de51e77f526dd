//! Disconnect notification sent before a node closes a connection.

use crate::codec::{read_var_bytes, read_var_string, write_var_bytes, write_var_string};
use bitcoin::consensus::encode::{self, Decodable, Encodable};
use bitcoin::io::{self, Read, Write};
use std::fmt;

/// Maximum size of the data attached to a disconnect.
pub const MAX_DATA_SIZE: usize = 1024;
/// Maximum byte length of the human readable message.
pub const MAX_MESSAGE_SIZE: usize = 255;

/// Why a node is closing the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisconnectReason {
    /// The node has no free connection slots.
    MaxConnectionReached,
    /// The node already holds the maximum connections from this address.
    MaxConnectionPerAddressReached,
    /// The remote is the local node itself or already connected.
    DuplicateConnection,
    /// The remote sent a message not allowed in the current state.
    ProtocolViolation,
    /// The remote belongs to another network.
    MagicNumberIncompatible,
    /// The handshake did not complete in time.
    ConnectionTimeout,
    /// The node is shutting down.
    Shutdown,
}

impl DisconnectReason {
    pub fn to_u8(self) -> u8 {
        match self {
            DisconnectReason::MaxConnectionReached => 0x01,
            DisconnectReason::MaxConnectionPerAddressReached => 0x02,
            DisconnectReason::DuplicateConnection => 0x03,
            DisconnectReason::ProtocolViolation => 0x04,
            DisconnectReason::MagicNumberIncompatible => 0x05,
            DisconnectReason::ConnectionTimeout => 0x06,
            DisconnectReason::Shutdown => 0x07,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(DisconnectReason::MaxConnectionReached),
            0x02 => Some(DisconnectReason::MaxConnectionPerAddressReached),
            0x03 => Some(DisconnectReason::DuplicateConnection),
            0x04 => Some(DisconnectReason::ProtocolViolation),
            0x05 => Some(DisconnectReason::MagicNumberIncompatible),
            0x06 => Some(DisconnectReason::ConnectionTimeout),
            0x07 => Some(DisconnectReason::Shutdown),
            _ => None,
        }
    }

    /// Whether the data of a disconnect with this reason carries peer suggestions.
    pub fn carries_addresses(self) -> bool {
        matches!(
            self,
            DisconnectReason::MaxConnectionReached
                | DisconnectReason::MaxConnectionPerAddressReached
        )
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::MaxConnectionReached => write!(f, "max connections reached"),
            DisconnectReason::MaxConnectionPerAddressReached => {
                write!(f, "max connections per address reached")
            }
            DisconnectReason::DuplicateConnection => write!(f, "duplicate connection"),
            DisconnectReason::ProtocolViolation => write!(f, "protocol violation"),
            DisconnectReason::MagicNumberIncompatible => write!(f, "magic number incompatible"),
            DisconnectReason::ConnectionTimeout => write!(f, "connection timeout"),
            DisconnectReason::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// Errors constructing a payload that would not be accepted on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadError {
    /// Attached data is larger than allowed.
    DataTooLarge { size: usize, max: usize },
    /// Message text is longer than allowed.
    MessageTooLong { size: usize, max: usize },
}

impl fmt::Display for PayloadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayloadError::DataTooLarge { size, max } => {
                write!(f, "Payload data of {size} bytes exceeds maximum of {max}")
            }
            PayloadError::MessageTooLong { size, max } => {
                write!(f, "Payload message of {size} bytes exceeds maximum of {max}")
            }
        }
    }
}

impl std::error::Error for PayloadError {}

/// Payload of the Disconnect command.
///
/// Fields are only reachable through accessors so the size limits checked
/// by [`DisconnectPayload::new`] always hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectPayload {
    reason: DisconnectReason,
    message: String,
    data: Vec<u8>,
}

impl DisconnectPayload {
    /// Create a disconnect payload.
    ///
    /// # Errors
    ///
    /// * [`PayloadError::DataTooLarge`] - `data` exceeds [`MAX_DATA_SIZE`].
    /// * [`PayloadError::MessageTooLong`] - `message` exceeds [`MAX_MESSAGE_SIZE`].
    pub fn new(
        reason: DisconnectReason,
        message: impl Into<String>,
        data: Vec<u8>,
    ) -> Result<Self, PayloadError> {
        let message = message.into();
        if data.len() > MAX_DATA_SIZE {
            return Err(PayloadError::DataTooLarge {
                size: data.len(),
                max: MAX_DATA_SIZE,
            });
        }
        if message.len() > MAX_MESSAGE_SIZE {
            return Err(PayloadError::MessageTooLong {
                size: message.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }
        Ok(Self {
            reason,
            message,
            data,
        })
    }

    pub fn reason(&self) -> DisconnectReason {
        self.reason
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

impl Encodable for DisconnectPayload {
    fn consensus_encode<W: Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        let mut len = self.reason.to_u8().consensus_encode(writer)?;
        len += write_var_string(writer, &self.message)?;
        len += write_var_bytes(writer, &self.data)?;
        Ok(len)
    }
}

impl Decodable for DisconnectPayload {
    fn consensus_decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self, encode::Error> {
        let reason = DisconnectReason::from_u8(u8::consensus_decode(reader)?)
            .ok_or(encode::Error::ParseFailed("unknown disconnect reason"))?;
        Ok(DisconnectPayload {
            reason,
            message: read_var_string(reader, MAX_MESSAGE_SIZE)?,
            data: read_var_bytes(reader, MAX_DATA_SIZE)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_encoding() {
        let payload =
            DisconnectPayload::new(DisconnectReason::DuplicateConnection, "test message", vec![1, 2])
                .unwrap();
        let bytes = encode::serialize(&payload);
        assert_eq!(bytes.len(), 17);
        assert_eq!(
            bytes,
            vec![
                0x03, 0x0c, 0x74, 0x65, 0x73, 0x74, 0x20, 0x6d, 0x65, 0x73, 0x73, 0x61, 0x67,
                0x65, 0x02, 0x01, 0x02
            ]
        );

        let decoded: DisconnectPayload = encode::deserialize(&bytes).unwrap();
        assert_eq!(decoded.reason(), DisconnectReason::DuplicateConnection);
        assert_eq!(decoded.message(), "test message");
        assert_eq!(decoded.data(), &[1, 2]);
    }

    #[test]
    fn test_roundtrip_at_max_data_size() {
        let data: Vec<u8> = (0..MAX_DATA_SIZE).map(|i| i as u8).collect();
        let payload =
            DisconnectPayload::new(DisconnectReason::MaxConnectionReached, "full", data.clone())
                .unwrap();
        let decoded: DisconnectPayload = encode::deserialize(&encode::serialize(&payload)).unwrap();
        assert_eq!(decoded, payload);
        assert_eq!(decoded.data(), data.as_slice());
    }

    #[test]
    fn test_oversized_data_rejected_at_construction() {
        let result = DisconnectPayload::new(
            DisconnectReason::MaxConnectionReached,
            "",
            vec![0u8; MAX_DATA_SIZE + 1],
        );
        assert_eq!(
            result,
            Err(PayloadError::DataTooLarge {
                size: MAX_DATA_SIZE + 1,
                max: MAX_DATA_SIZE
            })
        );
    }

    #[test]
    fn test_oversized_data_rejected_on_decode() {
        let mut bytes = vec![0x01, 0x00];
        bytes.extend_from_slice(&[0xfd, 0x01, 0x04]);
        bytes.extend_from_slice(&vec![0u8; MAX_DATA_SIZE + 1]);
        let result: Result<DisconnectPayload, _> = encode::deserialize(&bytes);
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_reason_rejected() {
        let result: Result<DisconnectPayload, _> = encode::deserialize(&[0xee, 0x00, 0x00]);
        assert!(result.is_err());
    }

    #[test]
    fn test_reason_codes() {
        for code in 0x01..=0x07u8 {
            let reason = DisconnectReason::from_u8(code).unwrap();
            assert_eq!(reason.to_u8(), code);
        }
        assert!(DisconnectReason::MaxConnectionReached.carries_addresses());
        assert!(DisconnectReason::MaxConnectionPerAddressReached.carries_addresses());
        assert!(!DisconnectReason::DuplicateConnection.carries_addresses());
    }
}
