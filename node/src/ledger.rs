//! Collaborators the node consults but does not implement.
//!
//! The chain store and the task coordinator live outside this crate. The node
//! only reads chain state through [`Ledger`] and reports announcements and
//! arrivals to a [`TaskCoordinator`].

use crate::handshake::VersionInfo;
use crate::peer::PeerId;
use neo_peers_connection::message::{
    Block, ConsensusPayload, Header, InvPayload, Inventory, Transaction,
};
use neo_peers_connection::Hash256;

/// Read access to the local chain and memory pool.
pub trait Ledger: Send + Sync + 'static {
    /// Index of the current tip.
    fn height(&self) -> u32;

    /// Hash of the block at `index`, `None` past the tip.
    fn block_hash(&self, index: u32) -> Option<Hash256>;

    /// Index of the block with `hash`, `None` when unknown.
    fn block_index(&self, hash: &Hash256) -> Option<u32>;

    fn contains_block(&self, hash: &Hash256) -> bool;

    /// Whether the transaction is in the memory pool or on chain.
    fn contains_transaction(&self, hash: &Hash256) -> bool;

    fn block(&self, hash: &Hash256) -> Option<Block>;

    fn block_by_index(&self, index: u32) -> Option<Block> {
        self.block(&self.block_hash(index)?)
    }

    fn header(&self, hash: &Hash256) -> Option<Header> {
        self.block(hash).map(|block| block.header)
    }

    /// A transaction from the memory pool or the chain.
    fn transaction(&self, hash: &Hash256) -> Option<Transaction>;

    /// A consensus message still cached by the consensus service.
    fn consensus_payload(&self, hash: &Hash256) -> Option<ConsensusPayload>;

    /// Hashes of the verified memory pool transactions.
    fn verified_transaction_hashes(&self) -> Vec<Hash256>;

    /// Maximum number of transactions in the memory pool.
    fn mempool_capacity(&self) -> usize;
}

/// Tracks which peer is asked for which inventory.
///
/// Calls are made from connection tasks and the connection manager, so
/// implementations must be cheap and never block.
pub trait TaskCoordinator: Send + Sync + 'static {
    /// A connection completed its handshake.
    fn peer_ready(&self, peer: PeerId, version: &VersionInfo);

    /// A connection that was ready went away.
    fn peer_disconnected(&self, peer: PeerId);

    /// A peer announced inventory the node does not have yet.
    fn new_tasks(&self, peer: PeerId, payload: InvPayload);

    /// A peer delivered the inventory with `hash`.
    fn task_completed(&self, peer: PeerId, hash: Hash256);

    /// A peer answered a header request.
    fn headers_received(&self, peer: PeerId, headers: Vec<Header>);

    /// A peer delivered an inventory object, before it is relayed further.
    fn inventory_received(&self, _peer: PeerId, _inventory: &Inventory) {}

    /// A peer's announced height changed.
    fn height_updated(&self, _peer: PeerId, _height: u32) {}
}
