//! The connection manager.
//!
//! A single actor task owns the registry of live connections and the address
//! book. Sessions and the public [`LocalNode`] handle talk to it over an
//! unbounded channel, and it never awaits a session, so requests from
//! sessions cannot deadlock against it.

use crate::address_book::AddressBook;
use crate::bloom::BloomFilter;
use crate::configuration::NodeConfiguration;
use crate::error::NodeError;
use crate::handshake::VersionInfo;
use crate::ledger::{Ledger, TaskCoordinator};
use crate::peer::{Direction, PeerId, PeerInfo};
use crate::registry::Registry;
use crate::session::{run_session, SessionCommand, SessionContext};
use log::{debug, info, trace, warn};
use neo_peers_connection::message::{
    encode_address_list, normalize_ip, unix_timestamp, DisconnectPayload, DisconnectReason,
    Inventory, Message, NetworkAddressWithTime, NodeCapability, MAX_COUNT_TO_SEND, MAX_DATA_SIZE,
};
use neo_peers_connection::{configure_stream, establish_tcp_connection, AsyncTransportWriter};
use rand::seq::IteratorRandom;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

pub(crate) type BoxedReader = Box<dyn AsyncRead + Unpin + Send>;
pub(crate) type BoxedWriter = Box<dyn AsyncWrite + Unpin + Send>;

/// Time a rejected peer gets to take its disconnect notice.
const REJECTION_TIMEOUT: Duration = Duration::from_secs(5);

pub(crate) enum LocalNodeCommand {
    /// A new stream, inbound or outbound, asking for admission.
    Connect {
        reader: BoxedReader,
        writer: BoxedWriter,
        remote: SocketAddr,
        direction: Direction,
        reply: oneshot::Sender<Option<PeerId>>,
    },
    /// A session received the peer's version.
    Allow {
        peer: PeerId,
        version: VersionInfo,
        reply: oneshot::Sender<Result<(), DisconnectReason>>,
    },
    Ready {
        peer: PeerId,
    },
    FilterChanged {
        peer: PeerId,
        filter: Option<BloomFilter>,
    },
    RemoteHeight {
        peer: PeerId,
        height: u32,
    },
    Disconnected {
        peer: PeerId,
    },
    AddPeers(Vec<NetworkAddressWithTime>),
    KnownAddresses {
        reply: oneshot::Sender<Vec<NetworkAddressWithTime>>,
    },
    RandomConnectedPeers {
        count: usize,
        reply: oneshot::Sender<Vec<NetworkAddressWithTime>>,
    },
    UnconnectedPeers {
        reply: oneshot::Sender<Vec<SocketAddr>>,
    },
    Relay {
        inventory: Inventory,
        source: Option<PeerId>,
    },
    Broadcast(Message),
    Peers {
        reply: oneshot::Sender<Vec<PeerInfo>>,
    },
    Listener(JoinHandle<()>),
    DialFinished {
        endpoint: SocketAddr,
    },
    RejectionFinished,
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to a running node.
///
/// Cheap to clone, every clone talks to the same connection manager. The
/// manager keeps running until [`LocalNode::shutdown`] is called.
#[derive(Debug, Clone)]
pub struct LocalNode {
    commands: mpsc::UnboundedSender<LocalNodeCommand>,
    configuration: Arc<NodeConfiguration>,
}

impl LocalNode {
    /// Spawn the connection manager, must be called within a Tokio runtime.
    pub(crate) fn start(
        configuration: NodeConfiguration,
        ledger: Arc<dyn Ledger>,
        tasks: Arc<dyn TaskCoordinator>,
    ) -> Self {
        let configuration = Arc::new(configuration);
        let (commands, receiver) = mpsc::unbounded_channel();
        let node = LocalNode {
            commands,
            configuration: configuration.clone(),
        };
        let actor = LocalNodeActor {
            address_book: AddressBook::new(configuration.max_address_book_size),
            configuration,
            ledger,
            tasks,
            registry: Registry::new(),
            dialing: HashSet::new(),
            pending_rejections: 0,
            listeners: Vec::new(),
            shutdown: None,
            node: node.clone(),
        };
        tokio::spawn(actor.run(receiver));
        node
    }

    pub fn configuration(&self) -> &NodeConfiguration {
        &self.configuration
    }

    /// Accept inbound TCP connections on `addr`.
    ///
    /// Returns the bound address, useful when binding port zero.
    pub async fn listen(&self, addr: SocketAddr) -> Result<SocketAddr, NodeError> {
        let listener = TcpListener::bind(addr).await?;
        let local = listener.local_addr()?;
        info!("Listening on {local}");

        let node = self.clone();
        let accept = tokio::spawn(async move {
            loop {
                let (stream, remote) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!("Failed to accept connection: {e}");
                        continue;
                    }
                };
                if let Err(e) = configure_stream(&stream) {
                    debug!("Failed to configure stream from {remote}: {e}");
                }
                match node.add_connection(stream, remote, Direction::Inbound).await {
                    Ok(_) => {}
                    Err(NodeError::Stopped) => break,
                    Err(e) => debug!("Failed to submit connection from {remote}: {e}"),
                }
            }
        });
        self.command(LocalNodeCommand::Listener(accept))?;
        Ok(local)
    }

    /// Dial `addr` and submit the connection for admission.
    pub async fn connect(&self, addr: SocketAddr) -> Result<Option<PeerId>, NodeError> {
        let stream =
            establish_tcp_connection(addr, self.configuration.connection.connection_timeout)
                .await?;
        self.add_connection(stream, addr, Direction::Outbound).await
    }

    /// Submit an established stream for admission.
    ///
    /// Returns the peer's id when admitted, `None` when the connection was
    /// rejected. A rejected peer is sent a disconnect notice carrying
    /// addresses of other nodes before the stream closes.
    pub async fn add_connection<S>(
        &self,
        stream: S,
        remote: SocketAddr,
        direction: Direction,
    ) -> Result<Option<PeerId>, NodeError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let (reply, admitted) = oneshot::channel();
        self.command(LocalNodeCommand::Connect {
            reader: Box::new(reader),
            writer: Box::new(writer),
            remote,
            direction,
            reply,
        })?;
        admitted.await.map_err(|_| NodeError::Stopped)
    }

    /// Remember endpoints for outbound discovery.
    ///
    /// Each endpoint is recorded as a TCP server seen now.
    pub fn add_peers(&self, endpoints: Vec<SocketAddr>) -> Result<(), NodeError> {
        let now = unix_timestamp();
        let addresses = endpoints
            .into_iter()
            .map(|endpoint| {
                NetworkAddressWithTime::new(
                    endpoint.ip(),
                    now,
                    vec![NodeCapability::TcpServer(endpoint.port())],
                )
            })
            .collect();
        self.command(LocalNodeCommand::AddPeers(addresses))
    }

    /// Address book records with their declared capabilities, most recently seen first.
    pub async fn known_addresses(&self) -> Result<Vec<NetworkAddressWithTime>, NodeError> {
        let (reply, addresses) = oneshot::channel();
        self.command(LocalNodeCommand::KnownAddresses { reply })?;
        addresses.await.map_err(|_| NodeError::Stopped)
    }

    /// Up to `count` ready peers accepting connections, one per address.
    pub async fn random_connected_peers(
        &self,
        count: usize,
    ) -> Result<Vec<NetworkAddressWithTime>, NodeError> {
        let (reply, peers) = oneshot::channel();
        self.command(LocalNodeCommand::RandomConnectedPeers { count, reply })?;
        peers.await.map_err(|_| NodeError::Stopped)
    }

    /// Known endpoints without a live connection.
    pub async fn unconnected_peers(&self) -> Result<Vec<SocketAddr>, NodeError> {
        let (reply, peers) = oneshot::channel();
        self.command(LocalNodeCommand::UnconnectedPeers { reply })?;
        peers.await.map_err(|_| NodeError::Stopped)
    }

    /// Announce inventory to every ready peer that does not have it yet.
    pub fn relay(&self, inventory: Inventory) -> Result<(), NodeError> {
        self.command(LocalNodeCommand::Relay {
            inventory,
            source: None,
        })
    }

    /// Send a message to every ready peer.
    pub fn broadcast(&self, message: Message) -> Result<(), NodeError> {
        self.command(LocalNodeCommand::Broadcast(message))
    }

    /// Snapshot of every live connection.
    pub async fn peers(&self) -> Result<Vec<PeerInfo>, NodeError> {
        let (reply, peers) = oneshot::channel();
        self.command(LocalNodeCommand::Peers { reply })?;
        peers.await.map_err(|_| NodeError::Stopped)
    }

    /// Disconnect every peer and stop the manager.
    ///
    /// Resolves once all sessions have closed.
    pub async fn shutdown(&self) -> Result<(), NodeError> {
        let (reply, done) = oneshot::channel();
        self.command(LocalNodeCommand::Shutdown { reply })?;
        done.await.map_err(|_| NodeError::Stopped)
    }

    fn command(&self, command: LocalNodeCommand) -> Result<(), NodeError> {
        self.commands.send(command).map_err(|_| NodeError::Stopped)
    }
}

struct LocalNodeActor {
    configuration: Arc<NodeConfiguration>,
    ledger: Arc<dyn Ledger>,
    tasks: Arc<dyn TaskCoordinator>,
    registry: Registry,
    address_book: AddressBook,
    /// Outbound dials in flight.
    dialing: HashSet<SocketAddr>,
    /// Rejection notices still being written.
    pending_rejections: usize,
    listeners: Vec<JoinHandle<()>>,
    /// Callers waiting for the shutdown to complete, `Some` once requested.
    shutdown: Option<Vec<oneshot::Sender<()>>>,
    node: LocalNode,
}

impl LocalNodeActor {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<LocalNodeCommand>) {
        let mut peer_timer = tokio::time::interval(self.configuration.peer_timer_interval);
        peer_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
                _ = peer_timer.tick(), if self.shutdown.is_none() => self.discover(),
            }
            if self.shutdown.is_some() && self.registry.is_empty() {
                break;
            }
        }

        for listener in self.listeners.drain(..) {
            listener.abort();
        }
        if let Some(waiters) = self.shutdown.take() {
            for waiter in waiters {
                let _ = waiter.send(());
            }
        }
        info!("Connection manager stopped");
    }

    fn handle(&mut self, command: LocalNodeCommand) {
        match command {
            LocalNodeCommand::Connect {
                reader,
                writer,
                remote,
                direction,
                reply,
            } => {
                let peer = self.on_connect(reader, writer, remote, direction);
                let _ = reply.send(peer);
            }
            LocalNodeCommand::Allow {
                peer,
                version,
                reply,
            } => {
                let _ = reply.send(self.allow(peer, version));
            }
            LocalNodeCommand::Ready { peer } => {
                if let Some(entry) = self.registry.get_mut(peer) {
                    entry.ready = true;
                    if let Some(version) = &entry.version {
                        entry.last_block_index = version.start_height();
                    }
                }
            }
            LocalNodeCommand::FilterChanged { peer, filter } => {
                if let Some(entry) = self.registry.get_mut(peer) {
                    entry.filter = filter;
                }
            }
            LocalNodeCommand::RemoteHeight { peer, height } => {
                if let Some(entry) = self.registry.get_mut(peer) {
                    if height > entry.last_block_index {
                        entry.last_block_index = height;
                        self.tasks.height_updated(peer, height);
                    }
                }
            }
            LocalNodeCommand::Disconnected { peer } => {
                if let Some(entry) = self.registry.remove(peer) {
                    info!("{} disconnected from {}", peer, entry.remote);
                }
            }
            LocalNodeCommand::AddPeers(addresses) => self.add_peers(addresses),
            LocalNodeCommand::KnownAddresses { reply } => {
                let _ = reply.send(self.address_book.addresses());
            }
            LocalNodeCommand::RandomConnectedPeers { count, reply } => {
                let _ = reply.send(self.random_connected_peers(count));
            }
            LocalNodeCommand::UnconnectedPeers { reply } => {
                let _ = reply.send(self.unconnected_peers());
            }
            LocalNodeCommand::Relay { inventory, source } => self.relay(inventory, source),
            LocalNodeCommand::Broadcast(message) => {
                for (_, entry) in self.registry.ready() {
                    let _ = entry.commands.send(SessionCommand::Send(message.clone()));
                }
            }
            LocalNodeCommand::Peers { reply } => {
                let _ = reply.send(self.registry.snapshot());
            }
            LocalNodeCommand::Listener(listener) => {
                if self.shutdown.is_some() {
                    listener.abort();
                } else {
                    self.listeners.push(listener);
                }
            }
            LocalNodeCommand::DialFinished { endpoint } => {
                self.dialing.remove(&endpoint);
            }
            LocalNodeCommand::RejectionFinished => {
                self.pending_rejections = self.pending_rejections.saturating_sub(1);
            }
            LocalNodeCommand::Shutdown { reply } => self.begin_shutdown(reply),
        }
    }

    fn on_connect(
        &mut self,
        reader: BoxedReader,
        writer: BoxedWriter,
        remote: SocketAddr,
        direction: Direction,
    ) -> Option<PeerId> {
        if self.shutdown.is_some() {
            return None;
        }
        let (commands, receiver) = mpsc::unbounded_channel();
        let admitted = self.registry.admit(
            remote,
            direction,
            commands,
            self.configuration.max_connections,
            self.configuration.max_connections_per_address,
        );
        match admitted {
            Ok(peer) => {
                info!("{} {} connection with {}", peer, direction, remote);
                let context = SessionContext {
                    peer,
                    remote,
                    configuration: self.configuration.clone(),
                    ledger: self.ledger.clone(),
                    tasks: self.tasks.clone(),
                    manager: self.node.commands.clone(),
                    commands: receiver,
                };
                tokio::spawn(run_session(reader, writer, context));
                Some(peer)
            }
            Err(reason) => {
                debug!("Rejecting {} connection with {}: {}", direction, remote, reason);
                drop(reader);
                self.reject(writer, reason);
                None
            }
        }
    }

    /// Send a rejected peer addresses to try instead, then close.
    fn reject(&mut self, writer: BoxedWriter, reason: DisconnectReason) {
        if self.pending_rejections >= self.configuration.max_pending_rejections {
            trace!("Too many pending rejections, closing silently");
            return;
        }
        let payload = match rejection_payload(reason, self.random_connected_peers(MAX_COUNT_TO_SEND))
        {
            Some(payload) => payload,
            None => return,
        };

        self.pending_rejections += 1;
        let manager = self.node.commands.clone();
        tokio::spawn(async move {
            let mut writer = AsyncTransportWriter::new(writer);
            let notice = async {
                writer.write(&Message::Disconnect(payload)).await?;
                writer.shutdown().await
            };
            match tokio::time::timeout(REJECTION_TIMEOUT, notice).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!("Failed to send rejection notice: {e}"),
                Err(_) => debug!("Rejection notice timed out"),
            }
            let _ = manager.send(LocalNodeCommand::RejectionFinished);
        });
    }

    /// Checks made once the peer's identity is known.
    fn allow(&mut self, peer: PeerId, version: VersionInfo) -> Result<(), DisconnectReason> {
        if version.magic != self.configuration.connection.magic {
            return Err(DisconnectReason::MagicNumberIncompatible);
        }
        if version.nonce == self.configuration.connection.nonce {
            return Err(DisconnectReason::DuplicateConnection);
        }
        let remote = match self.registry.get(peer) {
            Some(entry) => entry.remote,
            None => return Err(DisconnectReason::DuplicateConnection),
        };
        if self.registry.is_duplicate(peer, remote.ip(), version.nonce) {
            return Err(DisconnectReason::DuplicateConnection);
        }

        if version.listener_port().is_some() {
            self.address_book.add(
                NetworkAddressWithTime::new(
                    remote.ip(),
                    version.timestamp,
                    version.capabilities.clone(),
                ),
                Instant::now(),
            );
        }
        if let Some(entry) = self.registry.get_mut(peer) {
            entry.version = Some(version);
        }
        Ok(())
    }

    fn add_peers(&mut self, addresses: Vec<NetworkAddressWithTime>) {
        let now = Instant::now();
        let mut added = 0;
        for address in addresses {
            if self.address_book.add(address, now) {
                added += 1;
            }
        }
        if added > 0 {
            debug!(
                "Learned {} new addresses, {} known",
                added,
                self.address_book.len()
            );
        }
    }

    fn random_connected_peers(&self, count: usize) -> Vec<NetworkAddressWithTime> {
        let mut seen = HashSet::new();
        self.registry
            .ready()
            .filter_map(|(_, entry)| {
                let version = entry.version.as_ref()?;
                version.listener_port()?;
                let ip = normalize_ip(entry.remote.ip());
                if !seen.insert(ip) {
                    return None;
                }
                Some(NetworkAddressWithTime::new(
                    ip,
                    version.timestamp,
                    version.capabilities.clone(),
                ))
            })
            .choose_multiple(&mut rand::thread_rng(), count)
    }

    fn unconnected_peers(&self) -> Vec<SocketAddr> {
        self.address_book
            .endpoints()
            .filter(|endpoint| !self.registry.is_connected_to(*endpoint))
            .collect()
    }

    fn relay(&mut self, inventory: Inventory, source: Option<PeerId>) {
        if let Some(source) = source {
            self.tasks.inventory_received(source, &inventory);
        }
        let inventory_type = inventory.inventory_type();
        let hash = inventory.hash();
        for (peer, entry) in self.registry.ready() {
            if Some(peer) == source {
                continue;
            }
            if let (Inventory::Transaction(tx), Some(filter)) = (&inventory, &entry.filter) {
                if !filter.test_transaction(tx) {
                    continue;
                }
            }
            let _ = entry.commands.send(SessionCommand::Relay {
                inventory_type,
                hash,
            });
        }
    }

    /// Dial known addresses while below the desired connection count.
    fn discover(&mut self) {
        let live = self.registry.len() + self.dialing.len();
        let wanted = self.configuration.min_desired_connections.saturating_sub(live);
        if wanted == 0 {
            return;
        }

        let mut candidates: Vec<SocketAddr> = self
            .unconnected_peers()
            .into_iter()
            .filter(|endpoint| !self.dialing.contains(endpoint))
            .collect();
        if candidates.is_empty() {
            if self.registry.ready().next().is_some() {
                trace!("Address book exhausted, asking peers for more");
                for (_, entry) in self.registry.ready() {
                    let _ = entry.commands.send(SessionCommand::Send(Message::GetAddr));
                }
                return;
            }
            candidates = self
                .configuration
                .seeds
                .iter()
                .copied()
                .filter(|seed| !self.dialing.contains(seed) && !self.registry.is_connected_to(*seed))
                .collect();
        }

        let slots = wanted.min(
            self.configuration
                .max_concurrent_dials
                .saturating_sub(self.dialing.len()),
        );
        for endpoint in candidates
            .into_iter()
            .choose_multiple(&mut rand::thread_rng(), slots)
        {
            self.dial(endpoint);
        }
    }

    fn dial(&mut self, endpoint: SocketAddr) {
        trace!("Dialing {endpoint}");
        self.dialing.insert(endpoint);
        let node = self.node.clone();
        tokio::spawn(async move {
            if let Err(e) = node.connect(endpoint).await {
                debug!("Failed to connect to {endpoint}: {e}");
            }
            let _ = node.command(LocalNodeCommand::DialFinished { endpoint });
        });
    }

    fn begin_shutdown(&mut self, reply: oneshot::Sender<()>) {
        match &mut self.shutdown {
            Some(waiters) => waiters.push(reply),
            None => {
                info!("Shutting down, disconnecting {} peers", self.registry.len());
                self.shutdown = Some(vec![reply]);
                for listener in self.listeners.drain(..) {
                    listener.abort();
                }
                for (_, entry) in self.registry.iter() {
                    let _ = entry
                        .commands
                        .send(SessionCommand::Disconnect(DisconnectReason::Shutdown));
                }
            }
        }
    }
}

/// Disconnect notice for a rejected peer, trimming the address list until it fits.
fn rejection_payload(
    reason: DisconnectReason,
    mut addresses: Vec<NetworkAddressWithTime>,
) -> Option<DisconnectPayload> {
    loop {
        let data = encode_address_list(&addresses);
        if data.len() <= MAX_DATA_SIZE {
            return DisconnectPayload::new(reason, reason.to_string(), data).ok();
        }
        addresses.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use neo_peers_connection::message::{decode_address_list, NodeCapability};
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn test_rejection_payload_fits() {
        let addresses: Vec<NetworkAddressWithTime> = (0..MAX_COUNT_TO_SEND as u32)
            .map(|i| {
                NetworkAddressWithTime::new(
                    IpAddr::V4(Ipv4Addr::from(0x0a00_0000 + i)),
                    i,
                    vec![NodeCapability::TcpServer(20333), NodeCapability::FullNode(i)],
                )
            })
            .collect();
        assert!(encode_address_list(&addresses).len() > MAX_DATA_SIZE);

        let payload =
            rejection_payload(DisconnectReason::MaxConnectionReached, addresses.clone()).unwrap();
        assert!(payload.data().len() <= MAX_DATA_SIZE);
        assert_eq!(payload.reason(), DisconnectReason::MaxConnectionReached);

        let decoded = decode_address_list(payload.data()).unwrap();
        assert!(!decoded.is_empty());
        assert_eq!(decoded[..], addresses[..decoded.len()]);
    }

    #[test]
    fn test_rejection_payload_without_peers() {
        let payload =
            rejection_payload(DisconnectReason::MaxConnectionPerAddressReached, vec![]).unwrap();
        assert!(decode_address_list(payload.data()).unwrap().is_empty());
    }
}
