//! Per-connection protocol state machine.
//!
//! The handler is synchronous and owns no I/O. Each mailbox item is turned
//! into a list of [`HandlerEvent`]s which the connection task executes,
//! either writing to the peer or forwarding to the connection manager.

use crate::bloom::BloomFilter;
use crate::error::ProtocolViolation;
use crate::handshake::{gate, GateDecision, HandshakeState, VersionInfo};
use crate::known_hashes::{FifoSet, PendingKnownHashes};
use crate::ledger::{Ledger, TaskCoordinator};
use crate::mailbox::MailboxItem;
use crate::peer::PeerId;
use log::{debug, trace};
use neo_peers_connection::message::{
    decode_address_list, Block, DisconnectPayload, FilterAddPayload,
    FilterLoadPayload, GetBlockDataPayload, GetBlocksPayload, HeadersPayload, InvPayload,
    Inventory, InventoryType, Message, MerkleBlockPayload, NetworkAddressWithTime, PingPayload,
    MAX_HASHES_COUNT, MAX_HEADERS_COUNT, MAX_TRANSACTION_SIZE,
};
use neo_peers_connection::Hash256;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Blocks served for one GetBlockData request.
const MAX_BLOCK_DATA_COUNT: usize = 500;

/// Work the connection task performs on behalf of the handler.
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerEvent {
    /// Write a message to the peer.
    Send(Message),
    /// The peer announced itself, the manager decides whether it may stay.
    VersionReceived(VersionInfo),
    /// Handshake complete.
    Ready(VersionInfo),
    /// The peer's bloom filter was loaded, extended or cleared.
    FilterChanged(Option<BloomFilter>),
    /// The peer asked for addresses of other nodes.
    AddressRequest,
    /// Reachable nodes the peer suggested, with their declared capabilities.
    Peers(Vec<NetworkAddressWithTime>),
    /// The peer delivered inventory for further broadcast.
    Relay(Inventory),
    /// The peer reported its chain height.
    RemoteHeight(u32),
    /// The peer said goodbye.
    Stop,
}

pub struct ProtocolHandler {
    peer: PeerId,
    state: HandshakeState,
    version: Option<VersionInfo>,
    bloom_filter: Option<BloomFilter>,
    /// Hashes this peer already has, received from it or announced to it.
    known_hashes: FifoSet<Hash256>,
    /// Hashes pushed to this peer in response to GetData.
    sent_hashes: FifoSet<Hash256>,
    /// Hashes this peer announced that were handed out as tasks.
    pending_known_hashes: PendingKnownHashes<Hash256>,
    pending_timeout: Duration,
    ledger: Arc<dyn Ledger>,
    tasks: Arc<dyn TaskCoordinator>,
}

impl ProtocolHandler {
    pub fn new(
        peer: PeerId,
        ledger: Arc<dyn Ledger>,
        tasks: Arc<dyn TaskCoordinator>,
        pending_timeout: Duration,
    ) -> Self {
        let capacity = ledger.mempool_capacity().saturating_mul(2);
        Self {
            peer,
            state: HandshakeState::AwaitingVersion,
            version: None,
            bloom_filter: None,
            known_hashes: FifoSet::new(capacity),
            sent_hashes: FifoSet::new(capacity),
            pending_known_hashes: PendingKnownHashes::new(),
            pending_timeout,
            ledger,
            tasks,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn version(&self) -> Option<&VersionInfo> {
        self.version.as_ref()
    }

    /// Stop processing, every later item is ignored.
    pub fn stop(&mut self) {
        self.state = HandshakeState::Stopped;
    }

    /// Process one mailbox item.
    ///
    /// A violation stops the handler, the caller must close the connection
    /// without replying.
    pub fn handle(
        &mut self,
        item: MailboxItem,
        now: Instant,
    ) -> Result<Vec<HandlerEvent>, ProtocolViolation> {
        let message = match item {
            MailboxItem::Timer => {
                self.on_timer(now);
                return Ok(Vec::new());
            }
            MailboxItem::Message(message) => message,
        };

        let mut events = Vec::new();
        match (gate(self.state, message.command()), message) {
            (GateDecision::Ignore, _) => {}
            (GateDecision::Disconnect, Message::Disconnect(payload)) => {
                self.on_disconnect(payload, &mut events)
            }
            (GateDecision::AcceptVersion, Message::Version(payload)) => {
                let version = VersionInfo::from(payload);
                self.version = Some(version.clone());
                self.state = HandshakeState::AwaitingVerack;
                events.push(HandlerEvent::VersionReceived(version));
            }
            (GateDecision::AcceptVerack, Message::Verack) => {
                self.state = HandshakeState::Ready;
                if let Some(version) = &self.version {
                    events.push(HandlerEvent::Ready(version.clone()));
                }
            }
            (GateDecision::Dispatch, message) => self.dispatch(message, now, &mut events),
            (_, message) => {
                let violation = ProtocolViolation {
                    state: self.state,
                    command: message.command(),
                };
                self.state = HandshakeState::Stopped;
                return Err(violation);
            }
        }
        Ok(events)
    }

    /// Announcement of relayed inventory, `None` if the peer already has it.
    pub fn relay(&mut self, inventory_type: InventoryType, hash: Hash256) -> Option<Message> {
        if self.state != HandshakeState::Ready {
            return None;
        }
        if !self.version.as_ref().map_or(false, VersionInfo::is_full_node) {
            return None;
        }
        if self.sent_hashes.contains(&hash) || !self.known_hashes.add(hash) {
            return None;
        }
        Some(Message::Inv(InvPayload::new(inventory_type, vec![hash])))
    }

    fn dispatch(&mut self, message: Message, now: Instant, events: &mut Vec<HandlerEvent>) {
        match message {
            Message::Addr(payload) => suggest_peers(payload.addresses, events),
            Message::GetAddr => events.push(HandlerEvent::AddressRequest),
            Message::Ping(payload) => {
                events.push(HandlerEvent::RemoteHeight(payload.last_block_index));
                events.push(HandlerEvent::Send(Message::Pong(PingPayload::new(
                    self.ledger.height(),
                    payload.nonce,
                ))));
            }
            Message::Pong(payload) => {
                events.push(HandlerEvent::RemoteHeight(payload.last_block_index))
            }
            Message::GetBlocks(payload) => self.on_get_blocks(payload, events),
            Message::GetHeaders(payload) => self.on_get_headers(payload, events),
            Message::GetBlockData(payload) => self.on_get_block_data(payload, events),
            Message::GetData(payload) => self.on_get_data(payload, events),
            Message::Mempool => {
                let hashes = self.ledger.verified_transaction_hashes();
                for payload in InvPayload::create_group(InventoryType::Transaction, &hashes) {
                    events.push(HandlerEvent::Send(Message::Inv(payload)));
                }
            }
            Message::Inv(payload) => self.on_inv(payload, now),
            Message::Headers(payload) => {
                if !payload.headers.is_empty() {
                    self.tasks.headers_received(self.peer, payload.headers);
                }
            }
            Message::Transaction(tx) => {
                if tx.size() > MAX_TRANSACTION_SIZE {
                    debug!("{} sent oversized transaction {}", self.peer, tx.hash());
                } else {
                    self.on_inventory(Inventory::Transaction(tx), events);
                }
            }
            Message::Block(block) => self.on_inventory(Inventory::Block(block), events),
            Message::Consensus(payload) => {
                self.on_inventory(Inventory::Consensus(payload), events)
            }
            Message::FilterLoad(payload) => self.on_filter_load(payload, events),
            Message::FilterAdd(payload) => self.on_filter_add(payload, events),
            Message::FilterClear => {
                self.bloom_filter = None;
                events.push(HandlerEvent::FilterChanged(None));
            }
            other => trace!("{} ignoring {}", self.peer, other.command()),
        }
    }

    fn on_disconnect(&mut self, payload: DisconnectPayload, events: &mut Vec<HandlerEvent>) {
        debug!(
            "{} disconnected: {} {}",
            self.peer,
            payload.reason(),
            payload.message()
        );
        self.state = HandshakeState::Stopped;
        if payload.reason().carries_addresses() {
            match decode_address_list(payload.data()) {
                Ok(addresses) => suggest_peers(addresses, events),
                Err(e) => debug!("{} sent undecodable peer list: {}", self.peer, e),
            }
        }
        events.push(HandlerEvent::Stop);
    }


    fn on_get_blocks(&mut self, payload: GetBlocksPayload, events: &mut Vec<HandlerEvent>) {
        let count = clamp_count(payload.count, MAX_HASHES_COUNT);
        let start = match self.ledger.block_index(&payload.hash_start) {
            Some(index) => index,
            None => return,
        };
        let height = self.ledger.height();
        let mut hashes = Vec::with_capacity(count);
        for offset in 1..=count as u32 {
            let index = match start.checked_add(offset) {
                Some(index) if index <= height => index,
                _ => break,
            };
            match self.ledger.block_hash(index) {
                Some(hash) => hashes.push(hash),
                None => break,
            }
        }
        if hashes.is_empty() {
            return;
        }
        events.push(HandlerEvent::Send(Message::Inv(InvPayload::new(
            InventoryType::Block,
            hashes,
        ))));
    }

    fn on_get_headers(&mut self, payload: GetBlocksPayload, events: &mut Vec<HandlerEvent>) {
        let count = clamp_count(payload.count, MAX_HEADERS_COUNT);
        let start = match self.ledger.block_index(&payload.hash_start) {
            Some(index) => index,
            None => return,
        };
        let mut headers = Vec::with_capacity(count);
        for offset in 1..=count as u32 {
            let header = start
                .checked_add(offset)
                .and_then(|index| self.ledger.block_hash(index))
                .and_then(|hash| self.ledger.header(&hash));
            match header {
                Some(header) => headers.push(header),
                None => break,
            }
        }
        if headers.is_empty() {
            return;
        }
        events.push(HandlerEvent::Send(Message::Headers(HeadersPayload {
            headers,
        })));
    }

    fn on_get_block_data(&mut self, payload: GetBlockDataPayload, events: &mut Vec<HandlerEvent>) {
        let count = (payload.count as usize).min(MAX_BLOCK_DATA_COUNT) as u32;
        for offset in 0..count {
            let block = match payload
                .index_start
                .checked_add(offset)
                .and_then(|index| self.ledger.block_by_index(index))
            {
                Some(block) => block,
                None => break,
            };
            let message = match &self.bloom_filter {
                None => Message::Block(block),
                Some(filter) => Message::MerkleBlock(merkle_block(&block, filter)),
            };
            events.push(HandlerEvent::Send(message));
        }
    }

    fn on_get_data(&mut self, payload: InvPayload, events: &mut Vec<HandlerEvent>) {
        for hash in payload.hashes {
            if !self.sent_hashes.add(hash) {
                continue;
            }
            let message = match payload.inventory_type {
                InventoryType::Transaction => self.ledger.transaction(&hash).map(Message::Transaction),
                InventoryType::Block => self.ledger.block(&hash).map(|block| {
                    match &self.bloom_filter {
                        None => Message::Block(block),
                        Some(filter) => Message::MerkleBlock(merkle_block(&block, filter)),
                    }
                }),
                InventoryType::Consensus => {
                    self.ledger.consensus_payload(&hash).map(Message::Consensus)
                }
            };
            match message {
                Some(message) => events.push(HandlerEvent::Send(message)),
                None => trace!("{} requested unknown {} {}", self.peer, payload.inventory_type, hash),
            }
        }
    }

    fn on_inv(&mut self, payload: InvPayload, now: Instant) {
        let inventory_type = payload.inventory_type;
        let mut hashes: Vec<Hash256> = payload
            .hashes
            .into_iter()
            .filter(|hash| {
                !self.pending_known_hashes.contains(hash)
                    && !self.known_hashes.contains(hash)
                    && !self.sent_hashes.contains(hash)
            })
            .collect();
        match inventory_type {
            InventoryType::Block => hashes.retain(|hash| !self.ledger.contains_block(hash)),
            InventoryType::Transaction => {
                hashes.retain(|hash| !self.ledger.contains_transaction(hash))
            }
            InventoryType::Consensus => {}
        }
        // Adding also drops duplicates within the announcement.
        hashes.retain(|hash| self.pending_known_hashes.add(*hash, now));
        if hashes.is_empty() {
            return;
        }
        self.tasks
            .new_tasks(self.peer, InvPayload::new(inventory_type, hashes));
    }

    fn on_inventory(&mut self, inventory: Inventory, events: &mut Vec<HandlerEvent>) {
        let hash = inventory.hash();
        self.tasks.task_completed(self.peer, hash);
        self.pending_known_hashes.remove(&hash);
        self.known_hashes.add(hash);
        events.push(HandlerEvent::Relay(inventory));
    }

    fn on_filter_load(&mut self, payload: FilterLoadPayload, events: &mut Vec<HandlerEvent>) {
        let filter = BloomFilter::from_payload(&payload);
        self.bloom_filter = Some(filter.clone());
        events.push(HandlerEvent::FilterChanged(Some(filter)));
    }

    fn on_filter_add(&mut self, payload: FilterAddPayload, events: &mut Vec<HandlerEvent>) {
        if let Some(filter) = &mut self.bloom_filter {
            filter.add(&payload.data);
            events.push(HandlerEvent::FilterChanged(Some(filter.clone())));
        }
    }

    fn on_timer(&mut self, now: Instant) {
        let expired = self
            .pending_known_hashes
            .sweep(now, self.pending_timeout);
        if expired > 0 {
            trace!("{} expired {} pending hashes", self.peer, expired);
        }
    }
}

/// Forward the addresses that announce a TCP server.
fn suggest_peers(addresses: Vec<NetworkAddressWithTime>, events: &mut Vec<HandlerEvent>) {
    let reachable: Vec<NetworkAddressWithTime> = addresses
        .into_iter()
        .filter(|address| address.endpoint().port() > 0)
        .collect();
    if !reachable.is_empty() {
        events.push(HandlerEvent::Peers(reachable));
    }
}

/// Requested item count, negative or oversized counts fall back to `max`.
fn clamp_count(count: i16, max: usize) -> usize {
    if count < 0 || count as usize > max {
        max
    } else {
        count as usize
    }
}

fn merkle_block(block: &Block, filter: &BloomFilter) -> MerkleBlockPayload {
    let matches: Vec<bool> = block
        .transactions
        .iter()
        .map(|tx| filter.test_transaction(tx))
        .collect();
    MerkleBlockPayload::create(block, &matches)
}
