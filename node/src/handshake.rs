//! Version handshake state and the message gate it implies.

use neo_peers_connection::message::{MessageCommand, NodeCapability, VersionPayload};
use std::fmt;

/// Lifecycle of a connection's protocol handler, strictly forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HandshakeState {
    AwaitingVersion,
    AwaitingVerack,
    Ready,
    Stopped,
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakeState::AwaitingVersion => write!(f, "awaiting version"),
            HandshakeState::AwaitingVerack => write!(f, "awaiting verack"),
            HandshakeState::Ready => write!(f, "ready"),
            HandshakeState::Stopped => write!(f, "stopped"),
        }
    }
}

/// What the handler must do with an inbound command in a given state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Accept the remote version.
    AcceptVersion,
    /// Accept the verack completing the handshake.
    AcceptVerack,
    /// Dispatch to the command handlers.
    Dispatch,
    /// Handle a disconnect notification, legal in every live state.
    Disconnect,
    /// The handler already stopped, drop the command.
    Ignore,
    /// Command not allowed in this state, tear the connection down.
    Violation,
}

/// Decide how `command` is handled in `state`.
pub fn gate(state: HandshakeState, command: MessageCommand) -> GateDecision {
    match (state, command) {
        (HandshakeState::Stopped, _) => GateDecision::Ignore,
        (_, MessageCommand::Disconnect) => GateDecision::Disconnect,
        (HandshakeState::AwaitingVersion, MessageCommand::Version) => GateDecision::AcceptVersion,
        (HandshakeState::AwaitingVerack, MessageCommand::Verack) => GateDecision::AcceptVerack,
        (HandshakeState::Ready, MessageCommand::Version | MessageCommand::Verack) => {
            GateDecision::Violation
        }
        (HandshakeState::Ready, _) => GateDecision::Dispatch,
        _ => GateDecision::Violation,
    }
}

/// Identity a remote peer announced in its version payload.
///
/// Captured once when the version arrives and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionInfo {
    pub magic: u32,
    pub version: u32,
    pub timestamp: u32,
    pub nonce: u32,
    pub user_agent: String,
    pub capabilities: Vec<NodeCapability>,
}

impl VersionInfo {
    /// Port the peer accepts TCP connections on, if any.
    pub fn listener_port(&self) -> Option<u16> {
        self.capabilities.iter().find_map(|capability| match capability {
            NodeCapability::TcpServer(port) if *port > 0 => Some(*port),
            _ => None,
        })
    }

    /// Chain height the peer announced.
    pub fn start_height(&self) -> u32 {
        self.capabilities
            .iter()
            .find_map(|capability| match capability {
                NodeCapability::FullNode(height) => Some(*height),
                _ => None,
            })
            .unwrap_or(0)
    }

    /// Whether the peer stores the full chain and takes inventory announcements.
    pub fn is_full_node(&self) -> bool {
        self.capabilities
            .iter()
            .any(|capability| matches!(capability, NodeCapability::FullNode(_)))
    }
}

impl From<VersionPayload> for VersionInfo {
    fn from(payload: VersionPayload) -> Self {
        Self {
            magic: payload.magic,
            version: payload.version,
            timestamp: payload.timestamp,
            nonce: payload.nonce,
            user_agent: payload.user_agent,
            capabilities: payload.capabilities,
        }
    }
}
