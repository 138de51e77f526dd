use crate::handshake::HandshakeState;
use neo_peers_connection::message::MessageCommand;
use neo_peers_connection::{ConnectionError, TransportError};
use std::error::Error;
use std::fmt;
use std::io;

/// A peer sent a command its connection state does not allow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolViolation {
    pub state: HandshakeState,
    pub command: MessageCommand,
}

impl fmt::Display for ProtocolViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} not allowed while {}", self.command, self.state)
    }
}

impl Error for ProtocolViolation {}

/// Errors surfaced by the node API.
#[derive(Debug)]
pub enum NodeError {
    Io(io::Error),
    Connection(ConnectionError),
    Transport(TransportError),
    /// The connection manager has shut down.
    Stopped,
}

impl fmt::Display for NodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeError::Io(e) => write!(f, "IO error: {}", e),
            NodeError::Connection(e) => write!(f, "connection error: {}", e),
            NodeError::Transport(e) => write!(f, "transport error: {}", e),
            NodeError::Stopped => write!(f, "node stopped"),
        }
    }
}

impl Error for NodeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            NodeError::Io(e) => Some(e),
            NodeError::Connection(e) => Some(e),
            NodeError::Transport(e) => Some(e),
            NodeError::Stopped => None,
        }
    }
}

impl From<io::Error> for NodeError {
    fn from(err: io::Error) -> Self {
        NodeError::Io(err)
    }
}

impl From<ConnectionError> for NodeError {
    fn from(err: ConnectionError) -> Self {
        NodeError::Connection(err)
    }
}

impl From<TransportError> for NodeError {
    fn from(err: TransportError) -> Self {
        NodeError::Transport(err)
    }
}
