//! Integration tests for the connection manager.
//!
//! Remote peers are simulated over in-memory duplex pipes, each speaking the
//! wire protocol through the connection crate's transport.

use bitcoin::hashes::Hash;
use neo_peers_connection::message::{
    decode_address_list, encode_address_list, DisconnectPayload, DisconnectReason,
    FilterLoadPayload, InvPayload, Inventory, InventoryType, Message, NetworkAddressWithTime,
    NodeCapability, PingPayload, Transaction, VersionPayload, MAX_HASHES_COUNT,
};
use neo_peers_connection::{AsyncTransport, TransportError};
use neo_peers_node::{
    BloomFilter, Direction, Hash256, Ledger, LocalNode, LocalNodeBuilder, NodeError, PeerId,
    PeerInfo, TaskCoordinator, VersionInfo, MAINNET_MAGIC,
};
use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{DuplexStream, ReadHalf, WriteHalf};
use tokio::time::timeout;

const NODE_NONCE: u32 = 1000;
const READ_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Default)]
struct MockLedger {
    transactions: HashMap<Hash256, Transaction>,
}

impl MockLedger {
    fn with_transactions(transactions: impl IntoIterator<Item = Transaction>) -> Self {
        MockLedger {
            transactions: transactions
                .into_iter()
                .map(|tx| (tx.hash(), tx))
                .collect(),
        }
    }
}

impl Ledger for MockLedger {
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
        self.transactions.contains_key(hash)
    }

    fn block(&self, _hash: &Hash256) -> Option<neo_peers_connection::message::Block> {
        None
    }

    fn transaction(&self, hash: &Hash256) -> Option<Transaction> {
        self.transactions.get(hash).cloned()
    }

    fn consensus_payload(
        &self,
        _hash: &Hash256,
    ) -> Option<neo_peers_connection::message::ConsensusPayload> {
        None
    }

    fn verified_transaction_hashes(&self) -> Vec<Hash256> {
        Vec::new()
    }

    fn mempool_capacity(&self) -> usize {
        100
    }
}

#[derive(Default)]
struct MockTasks {
    ready: Mutex<Vec<PeerId>>,
    disconnected: Mutex<Vec<PeerId>>,
    new_tasks: Mutex<Vec<InvPayload>>,
    completed: Mutex<Vec<Hash256>>,
}

impl TaskCoordinator for MockTasks {
    fn peer_ready(&self, peer: PeerId, _version: &VersionInfo) {
        self.ready.lock().unwrap().push(peer);
    }

    fn peer_disconnected(&self, peer: PeerId) {
        self.disconnected.lock().unwrap().push(peer);
    }

    fn new_tasks(&self, _peer: PeerId, payload: InvPayload) {
        self.new_tasks.lock().unwrap().push(payload);
    }

    fn task_completed(&self, _peer: PeerId, hash: Hash256) {
        self.completed.lock().unwrap().push(hash);
    }

    fn headers_received(&self, _peer: PeerId, _headers: Vec<neo_peers_connection::message::Header>) {}
}

type RemoteTransport = AsyncTransport<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>;

/// The far end of a connection, driven by the test.
struct RemotePeer {
    transport: RemoteTransport,
    id: Option<PeerId>,
}

impl RemotePeer {
    async fn connect(node: &LocalNode, remote: &str) -> RemotePeer {
        let (local, far) = tokio::io::duplex(256 * 1024);
        let id = node
            .add_connection(local, remote.parse().unwrap(), Direction::Inbound)
            .await
            .unwrap();
        let (reader, writer) = tokio::io::split(far);
        RemotePeer {
            transport: AsyncTransport::new(reader, writer),
            id,
        }
    }

    async fn send(&mut self, message: Message) {
        self.transport.write(&message).await.unwrap();
    }

    async fn read(&mut self) -> Result<Message, TransportError> {
        timeout(READ_TIMEOUT, self.transport.read())
            .await
            .expect("timed out waiting for a message")
    }

    async fn recv(&mut self) -> Message {
        self.read().await.unwrap()
    }

    /// Complete the version handshake announcing `capabilities`.
    async fn handshake(&mut self, node: &LocalNode, nonce: u32, capabilities: Vec<NodeCapability>) {
        match self.recv().await {
            Message::Version(version) => assert_eq!(version.nonce, NODE_NONCE),
            other => panic!("expected version, got {:?}", other),
        }
        self.send(Message::Version(version(MAINNET_MAGIC, nonce, capabilities)))
            .await;
        assert_eq!(self.recv().await, Message::Verack);
        self.send(Message::Verack).await;

        let id = self.id.expect("connection was not admitted");
        wait_for_peers(node, |peers| {
            peers.iter().any(|peer| peer.id == id && peer.ready)
        })
        .await;
    }

    /// Round trip a ping, everything sent before it has been processed after.
    async fn barrier(&mut self) {
        self.send(Message::Ping(PingPayload::new(0, 77))).await;
        loop {
            if let Message::Pong(pong) = self.recv().await {
                assert_eq!(pong.nonce, 77);
                return;
            }
        }
    }
}

fn version(magic: u32, nonce: u32, capabilities: Vec<NodeCapability>) -> VersionPayload {
    VersionPayload {
        magic,
        version: 0,
        timestamp: 1_600_000_000,
        nonce,
        user_agent: "/remote:1.0/".to_string(),
        capabilities,
    }
}

fn full_node(port: u16) -> Vec<NodeCapability> {
    vec![NodeCapability::TcpServer(port), NodeCapability::FullNode(0)]
}

fn builder(ledger: MockLedger, tasks: Arc<MockTasks>) -> LocalNodeBuilder {
    LocalNodeBuilder::new(MAINNET_MAGIC, Arc::new(ledger), tasks)
        .with_nonce(NODE_NONCE)
        .with_min_desired_connections(0)
}

/// Poll the node's peer snapshot until `condition` holds.
async fn wait_for_peers<F>(node: &LocalNode, condition: F)
where
    F: Fn(&[PeerInfo]) -> bool,
{
    for _ in 0..500 {
        if condition(&node.peers().await.unwrap()) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("peer condition not reached");
}

fn expect_disconnect(message: Message) -> DisconnectPayload {
    match message {
        Message::Disconnect(payload) => payload,
        other => panic!("expected disconnect, got {:?}", other),
    }
}

#[tokio::test]
async fn test_handshake_registers_peer() {
    let tasks = Arc::new(MockTasks::default());
    let node = builder(MockLedger::default(), tasks.clone()).build().unwrap();

    let mut remote = RemotePeer::connect(&node, "10.0.0.1:40000").await;
    remote.handshake(&node, 1, full_node(20333)).await;

    let peers = node.peers().await.unwrap();
    assert_eq!(peers.len(), 1);
    assert_eq!(
        peers[0].listener(),
        Some("10.0.0.1:20333".parse().unwrap())
    );
    assert_eq!(*tasks.ready.lock().unwrap(), vec![remote.id.unwrap()]);
}

#[tokio::test]
async fn test_per_address_limit() {
    let tasks = Arc::new(MockTasks::default());
    let node = builder(MockLedger::default(), tasks)
        .with_max_connections_per_address(3)
        .build()
        .unwrap();

    let mut admitted = Vec::new();
    for port in 1..=3 {
        let mut remote = RemotePeer::connect(&node, &format!("10.0.0.1:{port}")).await;
        assert!(remote.id.is_some());
        match remote.recv().await {
            Message::Version(version) => assert_eq!(version.nonce, NODE_NONCE),
            other => panic!("expected version, got {:?}", other),
        }
        admitted.push(remote);
    }

    let mut rejected = RemotePeer::connect(&node, "10.0.0.1:4").await;
    assert!(rejected.id.is_none());
    let payload = expect_disconnect(rejected.recv().await);
    assert_eq!(payload.reason(), DisconnectReason::MaxConnectionPerAddressReached);
    assert!(decode_address_list(payload.data()).unwrap().is_empty());
    assert!(rejected.read().await.is_err());

    // Another address is still welcome.
    let other = RemotePeer::connect(&node, "10.0.0.2:1").await;
    assert!(other.id.is_some());
    assert_eq!(node.peers().await.unwrap().len(), 4);
}

#[tokio::test]
async fn test_global_limit_suggests_peers() {
    let tasks = Arc::new(MockTasks::default());
    let node = builder(MockLedger::default(), tasks)
        .with_max_connections(2)
        .build()
        .unwrap();

    let mut first = RemotePeer::connect(&node, "10.0.0.1:40000").await;
    first.handshake(&node, 1, full_node(20333)).await;
    let mut second = RemotePeer::connect(&node, "10.0.0.2:40000").await;
    second.handshake(&node, 2, full_node(20334)).await;

    let mut rejected = RemotePeer::connect(&node, "10.0.0.3:40000").await;
    assert!(rejected.id.is_none());
    let payload = expect_disconnect(rejected.recv().await);
    assert_eq!(payload.reason(), DisconnectReason::MaxConnectionReached);

    let suggested: HashSet<SocketAddr> = decode_address_list(payload.data())
        .unwrap()
        .iter()
        .map(NetworkAddressWithTime::endpoint)
        .collect();
    let expected: HashSet<SocketAddr> = ["10.0.0.1:20333", "10.0.0.2:20334"]
        .iter()
        .map(|endpoint| endpoint.parse().unwrap())
        .collect();
    assert_eq!(suggested, expected);
}

#[tokio::test]
async fn test_rejection_notice_adds_unconnected_peers() {
    let tasks = Arc::new(MockTasks::default());
    let node = builder(MockLedger::default(), tasks.clone()).build().unwrap();

    let mut remote = RemotePeer::connect(&node, "10.0.0.1:40000").await;
    remote.handshake(&node, 1, full_node(20333)).await;

    let suggestions = vec![
        NetworkAddressWithTime::new(
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 9)),
            0,
            vec![NodeCapability::TcpServer(20333)],
        ),
        NetworkAddressWithTime::new(
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 10)),
            0,
            vec![NodeCapability::TcpServer(20333)],
        ),
    ];
    let payload = DisconnectPayload::new(
        DisconnectReason::MaxConnectionReached,
        "full",
        encode_address_list(&suggestions),
    )
    .unwrap();
    remote.send(Message::Disconnect(payload)).await;

    wait_for_peers(&node, |peers| peers.is_empty()).await;
    let unconnected: HashSet<SocketAddr> =
        node.unconnected_peers().await.unwrap().into_iter().collect();
    assert!(unconnected.contains(&"10.0.0.9:20333".parse().unwrap()));
    assert!(unconnected.contains(&"10.0.0.10:20333".parse().unwrap()));
    // The departed peer's own listener is known but no longer connected.
    assert!(unconnected.contains(&"10.0.0.1:20333".parse().unwrap()));
    assert_eq!(*tasks.disconnected.lock().unwrap(), vec![remote.id.unwrap()]);

    // Declared capabilities are kept with each record.
    let known = node.known_addresses().await.unwrap();
    for suggestion in &suggestions {
        assert!(known.contains(suggestion));
    }
    let departed = known
        .iter()
        .find(|address| address.endpoint() == "10.0.0.1:20333".parse().unwrap())
        .unwrap();
    assert_eq!(departed.capabilities, full_node(20333));
}

#[tokio::test]
async fn test_message_before_version_closes_silently() {
    let tasks = Arc::new(MockTasks::default());
    let node = builder(MockLedger::default(), tasks).build().unwrap();

    let mut remote = RemotePeer::connect(&node, "10.0.0.1:40000").await;
    assert!(matches!(remote.recv().await, Message::Version(_)));
    remote.send(Message::GetAddr).await;

    assert!(remote.read().await.is_err());
    wait_for_peers(&node, |peers| peers.is_empty()).await;
}

#[tokio::test]
async fn test_magic_mismatch_refused() {
    let tasks = Arc::new(MockTasks::default());
    let node = builder(MockLedger::default(), tasks).build().unwrap();

    let mut remote = RemotePeer::connect(&node, "10.0.0.1:40000").await;
    assert!(matches!(remote.recv().await, Message::Version(_)));
    remote
        .send(Message::Version(version(MAINNET_MAGIC ^ 1, 1, full_node(20333))))
        .await;

    let payload = expect_disconnect(remote.recv().await);
    assert_eq!(payload.reason(), DisconnectReason::MagicNumberIncompatible);
    assert!(remote.read().await.is_err());
}

#[tokio::test]
async fn test_connection_to_self_refused() {
    let tasks = Arc::new(MockTasks::default());
    let node = builder(MockLedger::default(), tasks).build().unwrap();

    let mut remote = RemotePeer::connect(&node, "127.0.0.1:40000").await;
    assert!(matches!(remote.recv().await, Message::Version(_)));
    remote
        .send(Message::Version(version(MAINNET_MAGIC, NODE_NONCE, full_node(20333))))
        .await;

    let payload = expect_disconnect(remote.recv().await);
    assert_eq!(payload.reason(), DisconnectReason::DuplicateConnection);
}

#[tokio::test(start_paused = true)]
async fn test_handshake_timeout() {
    let tasks = Arc::new(MockTasks::default());
    let node = builder(MockLedger::default(), tasks)
        .with_handshake_timeout(Duration::from_secs(5))
        .build()
        .unwrap();

    let mut remote = RemotePeer::connect(&node, "10.0.0.1:40000").await;
    assert!(matches!(remote.recv().await, Message::Version(_)));

    let payload = expect_disconnect(remote.recv().await);
    assert_eq!(payload.reason(), DisconnectReason::ConnectionTimeout);
}

#[tokio::test]
async fn test_get_addr_without_listeners_is_silent() {
    let tasks = Arc::new(MockTasks::default());
    let node = builder(MockLedger::default(), tasks).build().unwrap();

    let mut remote = RemotePeer::connect(&node, "10.0.0.1:40000").await;
    remote
        .handshake(&node, 1, vec![NodeCapability::FullNode(0)])
        .await;

    remote.send(Message::GetAddr).await;
    remote.send(Message::Ping(PingPayload::new(0, 9))).await;
    match remote.recv().await {
        Message::Pong(pong) => assert_eq!(pong.nonce, 9),
        other => panic!("expected pong first, got {:?}", other),
    }
}

#[tokio::test]
async fn test_get_addr_lists_ready_listeners() {
    let tasks = Arc::new(MockTasks::default());
    let node = builder(MockLedger::default(), tasks).build().unwrap();

    let mut listener = RemotePeer::connect(&node, "10.0.0.1:40000").await;
    listener.handshake(&node, 1, full_node(20333)).await;
    let mut asking = RemotePeer::connect(&node, "10.0.0.2:40000").await;
    asking
        .handshake(&node, 2, vec![NodeCapability::FullNode(0)])
        .await;

    asking.send(Message::GetAddr).await;
    match asking.recv().await {
        Message::Addr(payload) => {
            let endpoints: Vec<SocketAddr> =
                payload.addresses.iter().map(|address| address.endpoint()).collect();
            assert_eq!(endpoints, vec!["10.0.0.1:20333".parse().unwrap()]);
        }
        other => panic!("expected addr, got {:?}", other),
    }
}

#[tokio::test]
async fn test_inv_deduplicated() {
    let persisted = Transaction::new(vec![1]);
    let fresh = Transaction::new(vec![2]).hash();
    let ledger = MockLedger::with_transactions([persisted.clone()]);
    let persisted = persisted.hash();
    let tasks = Arc::new(MockTasks::default());
    let node = builder(ledger, tasks.clone()).build().unwrap();

    let mut remote = RemotePeer::connect(&node, "10.0.0.1:40000").await;
    remote.handshake(&node, 1, full_node(20333)).await;

    let inv = InvPayload::new(InventoryType::Transaction, vec![persisted, fresh]);
    remote.send(Message::Inv(inv.clone())).await;
    remote.send(Message::Inv(inv)).await;
    remote.barrier().await;

    let new_tasks = tasks.new_tasks.lock().unwrap();
    assert_eq!(new_tasks.len(), 1);
    assert_eq!(new_tasks[0].hashes, vec![fresh]);
}

#[tokio::test]
async fn test_oversized_get_data_served_up_to_cap() {
    let transactions: Vec<Transaction> = (0..=MAX_HASHES_COUNT as u32)
        .map(|i| Transaction::new(i.to_le_bytes().to_vec()))
        .collect();
    let tasks = Arc::new(MockTasks::default());
    let node = builder(MockLedger::with_transactions(transactions.clone()), tasks)
        .build()
        .unwrap();

    let mut remote = RemotePeer::connect(&node, "10.0.0.1:40000").await;
    remote.handshake(&node, 1, full_node(20333)).await;

    let hashes: Vec<Hash256> = transactions.iter().map(Transaction::hash).collect();
    remote
        .send(Message::GetData(InvPayload::new(InventoryType::Transaction, hashes)))
        .await;
    for expected in &transactions[..MAX_HASHES_COUNT] {
        assert_eq!(remote.recv().await, Message::Transaction(expected.clone()));
    }

    // Nothing beyond the cap is served and the connection stays up.
    remote.send(Message::Ping(PingPayload::new(0, 11))).await;
    match remote.recv().await {
        Message::Pong(pong) => assert_eq!(pong.nonce, 11),
        other => panic!("expected pong, got {:?}", other),
    }
    assert_eq!(node.peers().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_received_transaction_relayed_to_others() {
    let tasks = Arc::new(MockTasks::default());
    let node = builder(MockLedger::default(), tasks.clone()).build().unwrap();

    let mut sender = RemotePeer::connect(&node, "10.0.0.1:40000").await;
    sender.handshake(&node, 1, full_node(20333)).await;
    let mut receiver = RemotePeer::connect(&node, "10.0.0.2:40000").await;
    receiver.handshake(&node, 2, full_node(20334)).await;

    let tx = Transaction::new(vec![0xab; 32]);
    sender.send(Message::Transaction(tx.clone())).await;

    assert_eq!(
        receiver.recv().await,
        Message::Inv(InvPayload::new(InventoryType::Transaction, vec![tx.hash()]))
    );
    sender.barrier().await;
    assert_eq!(*tasks.completed.lock().unwrap(), vec![tx.hash()]);

    // Relaying again announces nothing new to either side.
    node.relay(Inventory::Transaction(tx.clone())).unwrap();
    let marker = Transaction::new(vec![0xcd]);
    node.relay(Inventory::Transaction(marker.clone())).unwrap();
    assert_eq!(
        receiver.recv().await,
        Message::Inv(InvPayload::new(InventoryType::Transaction, vec![marker.hash()]))
    );
}

#[tokio::test]
async fn test_relay_respects_bloom_filter() {
    let tasks = Arc::new(MockTasks::default());
    let node = builder(MockLedger::default(), tasks).build().unwrap();

    let mut light = RemotePeer::connect(&node, "10.0.0.1:40000").await;
    light.handshake(&node, 1, full_node(20333)).await;

    let watched = Transaction::new(vec![1, 1, 1]);
    let ignored = Transaction::new(vec![2, 2, 2]);
    let mut filter = BloomFilter::new(1024, 5, 0);
    filter.add(watched.hash().as_byte_array());
    light
        .send(Message::FilterLoad(FilterLoadPayload {
            filter: filter.bits().to_vec(),
            k: filter.k(),
            tweak: filter.tweak(),
        }))
        .await;
    light.barrier().await;
    wait_for_peers(&node, |peers| peers[0].filtered).await;

    assert!(!filter.test_transaction(&ignored));
    node.relay(Inventory::Transaction(ignored)).unwrap();
    node.relay(Inventory::Transaction(watched.clone())).unwrap();
    assert_eq!(
        light.recv().await,
        Message::Inv(InvPayload::new(InventoryType::Transaction, vec![watched.hash()]))
    );
}

#[tokio::test]
async fn test_broadcast_reaches_ready_peers() {
    let tasks = Arc::new(MockTasks::default());
    let node = builder(MockLedger::default(), tasks).build().unwrap();

    let mut remote = RemotePeer::connect(&node, "10.0.0.1:40000").await;
    remote.handshake(&node, 1, full_node(20333)).await;

    node.broadcast(Message::Ping(PingPayload::new(3, 5))).unwrap();
    match remote.recv().await {
        Message::Ping(ping) => assert_eq!(ping.nonce, 5),
        other => panic!("expected ping, got {:?}", other),
    }
}

#[tokio::test]
async fn test_shutdown_disconnects_peers() {
    let tasks = Arc::new(MockTasks::default());
    let node = builder(MockLedger::default(), tasks).build().unwrap();

    let mut remote = RemotePeer::connect(&node, "10.0.0.1:40000").await;
    remote.handshake(&node, 1, full_node(20333)).await;

    let shutdown = {
        let node = node.clone();
        tokio::spawn(async move { node.shutdown().await })
    };
    let payload = expect_disconnect(remote.recv().await);
    assert_eq!(payload.reason(), DisconnectReason::Shutdown);

    shutdown.await.unwrap().unwrap();
    assert!(matches!(node.peers().await, Err(NodeError::Stopped)));
}
