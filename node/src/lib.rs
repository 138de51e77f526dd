//! Neo peer-to-peer local node.
//!
//! The node admits inbound and outbound connections under global and
//! per-address caps, runs the version handshake on each of them and relays
//! inventory between peers while remembering, per connection, what each
//! peer already has.
//!
//! Chain access and download scheduling are supplied by the embedding
//! application through the [`Ledger`] and [`TaskCoordinator`] traits.

mod address_book;
mod bloom;
mod builder;
mod configuration;
mod error;
mod handshake;
mod known_hashes;
mod ledger;
mod local_node;
mod mailbox;
mod peer;
mod protocol_handler;
mod registry;
mod session;

pub use bloom::BloomFilter;
pub use builder::{LocalNodeBuilder, LocalNodeBuilderError};
pub use configuration::{
    NodeConfiguration, DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_MAX_CONNECTIONS,
    DEFAULT_MAX_CONNECTIONS_PER_ADDRESS, DEFAULT_MIN_DESIRED_CONNECTIONS, DEFAULT_PENDING_TIMEOUT,
    DEFAULT_TIMER_INTERVAL,
};
pub use error::{NodeError, ProtocolViolation};
pub use handshake::{gate, GateDecision, HandshakeState, VersionInfo};
pub use known_hashes::{FifoSet, PendingKnownHashes};
pub use ledger::{Ledger, TaskCoordinator};
pub use local_node::LocalNode;
pub use mailbox::{mailbox, shall_drop, MailboxClosed, MailboxItem, MailboxReceiver, MailboxSender};
pub use peer::{Direction, PeerId, PeerInfo};
pub use protocol_handler::{HandlerEvent, ProtocolHandler};

// Re-exports.
pub use neo_peers_connection::{
    message, ConnectionConfiguration, Hash160, Hash256, UserAgent, UserAgentError, MAINNET_MAGIC,
};
