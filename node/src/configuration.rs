use neo_peers_connection::ConnectionConfiguration;
use std::net::SocketAddr;
use std::time::Duration;

pub const DEFAULT_MAX_CONNECTIONS: usize = 40;
pub const DEFAULT_MAX_CONNECTIONS_PER_ADDRESS: usize = 3;
pub const DEFAULT_MIN_DESIRED_CONNECTIONS: usize = 10;
pub const DEFAULT_MAX_CONCURRENT_DIALS: usize = 4;
pub const DEFAULT_MAX_ADDRESS_BOOK_SIZE: usize = 1000;
pub const DEFAULT_MAX_PENDING_REJECTIONS: usize = 16;
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_PENDING_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_TIMER_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_PEER_TIMER_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_MAILBOX_CAPACITY: usize = 1024;

/// Tunables of a local node, assembled by [`crate::LocalNodeBuilder`].
#[derive(Debug, Clone)]
pub struct NodeConfiguration {
    /// Identity announced on every connection.
    pub connection: ConnectionConfiguration,
    /// Cap on live connections, any state.
    pub max_connections: usize,
    /// Cap on live connections from one normalized IP address.
    pub max_connections_per_address: usize,
    /// Below this many connections the node dials known addresses.
    pub min_desired_connections: usize,
    /// Outbound dials in flight at once.
    pub max_concurrent_dials: usize,
    /// New addresses are ignored once the book holds this many.
    pub max_address_book_size: usize,
    /// Rejection notices being written at once, further rejections close silently.
    pub max_pending_rejections: usize,
    /// Time a connection gets to complete the version handshake.
    pub handshake_timeout: Duration,
    /// Age after which an announced but undelivered hash is forgotten.
    pub pending_timeout: Duration,
    /// Period of the per-connection pending hash sweep.
    pub timer_interval: Duration,
    /// Period of the outbound discovery pass.
    pub peer_timer_interval: Duration,
    /// Messages each mailbox lane buffers before reading stalls.
    pub mailbox_capacity: usize,
    /// Dialed when the node knows no other address.
    pub seeds: Vec<SocketAddr>,
}

impl NodeConfiguration {
    pub fn new(connection: ConnectionConfiguration) -> Self {
        Self {
            connection,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            max_connections_per_address: DEFAULT_MAX_CONNECTIONS_PER_ADDRESS,
            min_desired_connections: DEFAULT_MIN_DESIRED_CONNECTIONS,
            max_concurrent_dials: DEFAULT_MAX_CONCURRENT_DIALS,
            max_address_book_size: DEFAULT_MAX_ADDRESS_BOOK_SIZE,
            max_pending_rejections: DEFAULT_MAX_PENDING_REJECTIONS,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            pending_timeout: DEFAULT_PENDING_TIMEOUT,
            timer_interval: DEFAULT_TIMER_INTERVAL,
            peer_timer_interval: DEFAULT_PEER_TIMER_INTERVAL,
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
            seeds: Vec::new(),
        }
    }
}
