//! Connection configuration types and constants.

use crate::message::{unix_timestamp, NodeCapability, VersionPayload};
use crate::user_agent::UserAgent;
use std::time::Duration;

/// Network magic of neo N3 mainnet.
pub const MAINNET_MAGIC: u32 = 0x334F_454E;

/// Protocol version advertised in version payloads.
pub const DEFAULT_PROTOCOL_VERSION: u32 = 0;

/// Default timeout for connection establishment.
pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Default user agent for neo-peers connections.
///
/// Format follows the `/$NAME:$VERSION/` convention.
pub fn default_user_agent() -> UserAgent {
    UserAgent::new_unchecked(format!("/neo-peers:{}/", env!("CARGO_PKG_VERSION")))
}

/// Local identity announced on every connection.
#[derive(Debug, Clone)]
pub struct ConnectionConfiguration {
    /// Network magic, peers announcing another magic are refused.
    pub magic: u32,
    pub protocol_version: u32,
    pub user_agent: UserAgent,
    /// Port the local node accepts connections on, `None` when not listening.
    pub listener_port: Option<u16>,
    /// Random per-process nonce used to detect connections to self.
    pub nonce: u32,
    /// Timeout for outbound connection establishment.
    pub connection_timeout: Duration,
}

impl ConnectionConfiguration {
    /// Creates a configuration for a non-listening node on the given network.
    ///
    /// The nonce is drawn at random.
    pub fn new(magic: u32) -> Self {
        Self {
            magic,
            protocol_version: DEFAULT_PROTOCOL_VERSION,
            user_agent: default_user_agent(),
            listener_port: None,
            nonce: rand::random(),
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
        }
    }

    pub fn with_user_agent(mut self, user_agent: UserAgent) -> Self {
        self.user_agent = user_agent;
        self
    }

    /// Announce a TCP server on `port`.
    pub fn with_listener_port(mut self, port: u16) -> Self {
        self.listener_port = Some(port);
        self
    }

    pub fn with_nonce(mut self, nonce: u32) -> Self {
        self.nonce = nonce;
        self
    }

    /// Set the timeout for connection establishment.
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Capabilities announced by the local node.
    pub fn capabilities(&self, start_height: u32) -> Vec<NodeCapability> {
        let mut capabilities = Vec::with_capacity(2);
        if let Some(port) = self.listener_port {
            capabilities.push(NodeCapability::TcpServer(port));
        }
        capabilities.push(NodeCapability::FullNode(start_height));
        capabilities
    }

    /// Build the version payload opening every connection.
    pub fn version_payload(&self, start_height: u32) -> VersionPayload {
        VersionPayload {
            magic: self.magic,
            version: self.protocol_version,
            timestamp: unix_timestamp(),
            nonce: self.nonce,
            user_agent: self.user_agent.as_str().to_string(),
            capabilities: self.capabilities(start_height),
        }
    }
}
