//! Example of running a relay-only Neo node.
//!
//! The node keeps no chain. It accepts connections, answers address requests
//! and relays transactions between its peers.

use clap::Parser;
use log::LevelFilter;
use neo_peers_node::message::{Block, ConsensusPayload, Header, InvPayload, Inventory, Transaction};
use neo_peers_node::{
    Hash256, Ledger, LocalNodeBuilder, PeerId, TaskCoordinator, VersionInfo, MAINNET_MAGIC,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to accept connections on.
    #[arg(short, long, default_value = "0.0.0.0:10333")]
    listen: SocketAddr,

    /// Seed endpoints dialed while no other address is known.
    #[arg(short, long)]
    seed: Vec<SocketAddr>,

    /// Custom user agent (optional).
    #[arg(short, long)]
    user_agent: Option<String>,

    /// Network magic.
    #[arg(short, long, default_value_t = MAINNET_MAGIC)]
    magic: u32,

    /// Maximum number of connections.
    #[arg(long, default_value = "40")]
    max_connections: usize,

    /// Log level.
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Memory pool only, holds every transaction relayed through the node.
#[derive(Default)]
struct MempoolLedger {
    transactions: Mutex<HashMap<Hash256, Transaction>>,
}

impl Ledger for MempoolLedger {
    fn height(&self) -> u32 {
        0
    }

    fn block_hash(&self, _index: u32) -> Option<Hash256> {
        None
    }

    fn block_index(&self, _hash: &Hash256) -> Option<u32> {
        None
    }

    fn contains_block(&self, _hash: &Hash256) -> bool {
        false
    }

    fn contains_transaction(&self, hash: &Hash256) -> bool {
        self.transactions
            .lock()
            .map(|transactions| transactions.contains_key(hash))
            .unwrap_or(false)
    }

    fn block(&self, _hash: &Hash256) -> Option<Block> {
        None
    }

    fn transaction(&self, hash: &Hash256) -> Option<Transaction> {
        self.transactions.lock().ok()?.get(hash).cloned()
    }

    fn consensus_payload(&self, _hash: &Hash256) -> Option<ConsensusPayload> {
        None
    }

    fn verified_transaction_hashes(&self) -> Vec<Hash256> {
        self.transactions
            .lock()
            .map(|transactions| transactions.keys().copied().collect())
            .unwrap_or_default()
    }

    fn mempool_capacity(&self) -> usize {
        50_000
    }
}

/// Logs peer activity and feeds received transactions into the mempool.
struct RelayTasks {
    ledger: Arc<MempoolLedger>,
}

impl TaskCoordinator for RelayTasks {
    fn peer_ready(&self, peer: PeerId, version: &VersionInfo) {
        log::info!(
            "{} ready: {} at height {}",
            peer,
            version.user_agent,
            version.start_height()
        );
    }

    fn peer_disconnected(&self, peer: PeerId) {
        log::info!("{peer} gone");
    }

    fn new_tasks(&self, peer: PeerId, payload: InvPayload) {
        log::debug!(
            "{} announced {} {:?} hashes",
            peer,
            payload.hashes.len(),
            payload.inventory_type
        );
    }

    fn task_completed(&self, _peer: PeerId, _hash: Hash256) {}

    fn headers_received(&self, peer: PeerId, headers: Vec<Header>) {
        log::debug!("{} sent {} headers", peer, headers.len());
    }

    fn inventory_received(&self, peer: PeerId, inventory: &Inventory) {
        if let Inventory::Transaction(transaction) = inventory {
            log::info!("{} relayed transaction {}", peer, transaction.hash());
            if let Ok(mut transactions) = self.ledger.transactions.lock() {
                transactions.insert(transaction.hash(), transaction.clone());
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let log_level = match args.log_level.to_lowercase().as_str() {
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "info" => LevelFilter::Info,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    };

    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}] {} - {}",
                record.level(),
                record.target(),
                message
            ))
        })
        .level(log_level)
        .chain(std::io::stderr())
        .apply()?;

    let ledger = Arc::new(MempoolLedger::default());
    let tasks = Arc::new(RelayTasks {
        ledger: ledger.clone(),
    });

    let mut builder = LocalNodeBuilder::new(args.magic, ledger, tasks)
        .with_listener_port(args.listen.port())
        .with_max_connections(args.max_connections)
        .with_seeds(args.seed);
    if let Some(user_agent) = args.user_agent {
        log::debug!("Using custom user agent: {user_agent}");
        builder = builder.with_user_agent(user_agent)?;
    }

    let node = builder.build()?;
    let local = node.listen(args.listen).await?;
    log::info!("Relay node up on {local}, press ctrl-c to stop");

    tokio::signal::ctrl_c().await?;
    node.shutdown().await?;
    Ok(())
}
