//! Neo protocol transport.
//!
//! The [`AsyncTransport`] reads and writes framed [`Message`]s over any
//! `AsyncRead`/`AsyncWrite` pair. It can be split into a reader and a writer
//! half so a connection can receive in one task while replies are written
//! from another.
//!
//! [`Message`]: crate::message::Message

mod framed;

pub use framed::{AsyncTransport, AsyncTransportReader, AsyncTransportWriter};

use bitcoin::consensus::encode;
use std::fmt;
use std::io;

/// Error types specific to the transport layer.
#[derive(Debug)]
pub enum TransportError {
    /// IO error during read/write operations.
    Io(io::Error),
    /// Failed to deserialize a message.
    Deserialize(encode::Error),
    /// Frame announced a payload larger than allowed.
    OversizedPayload(u64),
    /// Frame carries a compressed payload, which is not supported.
    Compressed,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Io(e) => write!(f, "IO error: {e}"),
            TransportError::Deserialize(e) => write!(f, "Message deserialization error: {e}"),
            TransportError::OversizedPayload(len) => {
                write!(f, "Message payload of {len} bytes exceeds maximum")
            }
            TransportError::Compressed => write!(f, "Compressed messages are not supported"),
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TransportError::Io(e) => Some(e),
            TransportError::Deserialize(e) => Some(e),
            TransportError::OversizedPayload(_) => None,
            TransportError::Compressed => None,
        }
    }
}

impl From<io::Error> for TransportError {
    fn from(e: io::Error) -> Self {
        TransportError::Io(e)
    }
}

impl From<encode::Error> for TransportError {
    fn from(e: encode::Error) -> Self {
        TransportError::Deserialize(e)
    }
}
