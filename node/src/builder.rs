//! Builder pattern for configuring and starting a local node.

use crate::configuration::NodeConfiguration;
use crate::ledger::{Ledger, TaskCoordinator};
use crate::local_node::LocalNode;
use neo_peers_connection::{ConnectionConfiguration, UserAgent, UserAgentError};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// Errors that can occur during node configuration.
#[derive(Debug, Clone)]
pub enum LocalNodeBuilderError {
    /// User agent doesn't follow the required format.
    InvalidUserAgent(UserAgentError),
    /// A connection limit was set to zero.
    ZeroLimit(&'static str),
    /// A timer period or timeout was set to zero.
    ZeroDuration(&'static str),
}

impl fmt::Display for LocalNodeBuilderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocalNodeBuilderError::InvalidUserAgent(err) => {
                write!(f, "Invalid user agent: {err}")
            }
            LocalNodeBuilderError::ZeroLimit(name) => write!(f, "{name} must be at least one"),
            LocalNodeBuilderError::ZeroDuration(name) => write!(f, "{name} must not be zero"),
        }
    }
}

impl std::error::Error for LocalNodeBuilderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LocalNodeBuilderError::InvalidUserAgent(err) => Some(err),
            _ => None,
        }
    }
}

/// Builder for creating a customized [`LocalNode`].
///
/// # Example
///
/// ```no_run
/// # use std::sync::Arc;
/// # use neo_peers_node::{Ledger, TaskCoordinator};
/// # async fn example(
/// #     ledger: Arc<dyn Ledger>,
/// #     tasks: Arc<dyn TaskCoordinator>,
/// # ) -> Result<(), Box<dyn std::error::Error>> {
/// use neo_peers_connection::MAINNET_MAGIC;
/// use neo_peers_node::LocalNodeBuilder;
///
/// let node = LocalNodeBuilder::new(MAINNET_MAGIC, ledger, tasks)
///     .with_user_agent("/my-node:1.0/")?
///     .with_listener_port(10333)
///     .with_max_connections(20)
///     .build()?;
/// node.listen("0.0.0.0:10333".parse()?).await?;
/// # Ok(())
/// # }
/// ```
pub struct LocalNodeBuilder {
    configuration: NodeConfiguration,
    ledger: Arc<dyn Ledger>,
    tasks: Arc<dyn TaskCoordinator>,
}

impl LocalNodeBuilder {
    /// Create a new builder for the network identified by `magic`.
    ///
    /// # Arguments
    ///
    /// * `magic` - Network magic, peers announcing another one are refused.
    /// * `ledger` - Read access to the local chain.
    /// * `tasks` - Receives announcements and arrivals of inventory.
    pub fn new(magic: u32, ledger: Arc<dyn Ledger>, tasks: Arc<dyn TaskCoordinator>) -> Self {
        LocalNodeBuilder {
            configuration: NodeConfiguration::new(ConnectionConfiguration::new(magic)),
            ledger,
            tasks,
        }
    }

    /// Set a custom user agent string, format "/Name:Version/".
    ///
    /// # Returns
    ///
    /// * `Ok(Self)` - The builder for method chaining if validation succeeds.
    /// * `Err(LocalNodeBuilderError)` - If the user agent format is invalid.
    pub fn with_user_agent<S: Into<String>>(
        mut self,
        user_agent: S,
    ) -> Result<Self, LocalNodeBuilderError> {
        let user_agent =
            UserAgent::new(user_agent.into()).map_err(LocalNodeBuilderError::InvalidUserAgent)?;
        self.configuration.connection = self.configuration.connection.with_user_agent(user_agent);
        Ok(self)
    }

    /// Announce a TCP server on `port` to peers.
    pub fn with_listener_port(mut self, port: u16) -> Self {
        self.configuration.connection = self.configuration.connection.with_listener_port(port);
        self
    }

    /// Override the random nonce used to detect connections to self.
    pub fn with_nonce(mut self, nonce: u32) -> Self {
        self.configuration.connection = self.configuration.connection.with_nonce(nonce);
        self
    }

    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.configuration.connection =
            self.configuration.connection.with_connection_timeout(timeout);
        self
    }

    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.configuration.max_connections = max;
        self
    }

    pub fn with_max_connections_per_address(mut self, max: usize) -> Self {
        self.configuration.max_connections_per_address = max;
        self
    }

    /// Below this many connections the node dials known addresses.
    ///
    /// Zero disables outbound discovery.
    pub fn with_min_desired_connections(mut self, min: usize) -> Self {
        self.configuration.min_desired_connections = min;
        self
    }

    pub fn with_max_concurrent_dials(mut self, max: usize) -> Self {
        self.configuration.max_concurrent_dials = max;
        self
    }

    pub fn with_max_address_book_size(mut self, max: usize) -> Self {
        self.configuration.max_address_book_size = max;
        self
    }

    pub fn with_max_pending_rejections(mut self, max: usize) -> Self {
        self.configuration.max_pending_rejections = max;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.configuration.handshake_timeout = timeout;
        self
    }

    pub fn with_pending_timeout(mut self, timeout: Duration) -> Self {
        self.configuration.pending_timeout = timeout;
        self
    }

    pub fn with_timer_interval(mut self, interval: Duration) -> Self {
        self.configuration.timer_interval = interval;
        self
    }

    pub fn with_peer_timer_interval(mut self, interval: Duration) -> Self {
        self.configuration.peer_timer_interval = interval;
        self
    }

    pub fn with_mailbox_capacity(mut self, capacity: usize) -> Self {
        self.configuration.mailbox_capacity = capacity;
        self
    }

    /// Endpoints dialed when the node knows no other address.
    pub fn with_seeds(mut self, seeds: Vec<SocketAddr>) -> Self {
        self.configuration.seeds = seeds;
        self
    }

    /// The configuration as assembled so far.
    pub fn configuration(&self) -> &NodeConfiguration {
        &self.configuration
    }

    /// Validate the configuration and start the connection manager.
    ///
    /// Must be called within a Tokio runtime.
    pub fn build(self) -> Result<LocalNode, LocalNodeBuilderError> {
        validate(&self.configuration)?;
        Ok(LocalNode::start(self.configuration, self.ledger, self.tasks))
    }
}

fn validate(configuration: &NodeConfiguration) -> Result<(), LocalNodeBuilderError> {
    let limits = [
        ("max connections", configuration.max_connections),
        (
            "max connections per address",
            configuration.max_connections_per_address,
        ),
        ("mailbox capacity", configuration.mailbox_capacity),
    ];
    if let Some(&(name, _)) = limits.iter().find(|(_, value)| *value == 0) {
        return Err(LocalNodeBuilderError::ZeroLimit(name));
    }

    let durations = [
        ("handshake timeout", configuration.handshake_timeout),
        ("timer interval", configuration.timer_interval),
        ("peer timer interval", configuration.peer_timer_interval),
        (
            "connection timeout",
            configuration.connection.connection_timeout,
        ),
    ];
    if let Some(&(name, _)) = durations.iter().find(|(_, value)| value.is_zero()) {
        return Err(LocalNodeBuilderError::ZeroDuration(name));
    }
    Ok(())
}
