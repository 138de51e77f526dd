//! A single peer connection.
//!
//! Each admitted connection runs three tasks:
//!
//! * **Reader** - decodes frames and pushes them into the priority mailbox.
//! * **Timer** - periodically queues the pending hash sweep.
//! * **Session** - drains the mailbox through the [`ProtocolHandler`],
//!   executes its events and takes commands from the connection manager.
//!
//! The reader and timer are aborted when the session ends.

use crate::configuration::NodeConfiguration;
use crate::handshake::HandshakeState;
use crate::ledger::{Ledger, TaskCoordinator};
use crate::local_node::{BoxedReader, BoxedWriter, LocalNodeCommand};
use crate::mailbox::{mailbox, MailboxItem, MailboxReceiver, MailboxSender};
use crate::peer::PeerId;
use crate::protocol_handler::{HandlerEvent, ProtocolHandler};
use log::{debug, trace};
use neo_peers_connection::message::{
    AddrPayload, DisconnectPayload, DisconnectReason, InventoryType, Message, MAX_COUNT_TO_SEND,
};
use neo_peers_connection::{AsyncTransportReader, AsyncTransportWriter, Hash256, TransportError};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Upper bound on a single write before the peer is considered stuck.
const WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// Instructions from the connection manager to a session.
#[derive(Debug, Clone)]
pub(crate) enum SessionCommand {
    /// Write a message once the handshake is complete.
    Send(Message),
    /// Announce inventory unless the peer already has it.
    Relay {
        inventory_type: InventoryType,
        hash: Hash256,
    },
    /// Say goodbye and close.
    Disconnect(DisconnectReason),
}

pub(crate) struct SessionContext {
    pub peer: PeerId,
    pub remote: SocketAddr,
    pub configuration: Arc<NodeConfiguration>,
    pub ledger: Arc<dyn Ledger>,
    pub tasks: Arc<dyn TaskCoordinator>,
    pub manager: mpsc::UnboundedSender<LocalNodeCommand>,
    pub commands: mpsc::UnboundedReceiver<SessionCommand>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

struct Session {
    peer: PeerId,
    writer: AsyncTransportWriter<BoxedWriter>,
    handler: ProtocolHandler,
    tasks: Arc<dyn TaskCoordinator>,
    manager: mpsc::UnboundedSender<LocalNodeCommand>,
    /// The task coordinator was told about this peer.
    announced: bool,
}

/// Drive a connection from the local version until it closes.
pub(crate) async fn run_session(reader: BoxedReader, writer: BoxedWriter, context: SessionContext) {
    let SessionContext {
        peer,
        remote,
        configuration,
        ledger,
        tasks,
        manager,
        mut commands,
    } = context;
    debug!("{} session started with {}", peer, remote);

    let (sender, mut inbox) = mailbox(configuration.mailbox_capacity);
    let mut reader_task = tokio::spawn(read_loop(
        AsyncTransportReader::new(reader),
        sender.clone(),
    ));
    let timer_task = tokio::spawn(timer_loop(sender, configuration.timer_interval));

    let mut session = Session {
        peer,
        writer: AsyncTransportWriter::new(writer),
        handler: ProtocolHandler::new(
            peer,
            ledger.clone(),
            tasks.clone(),
            configuration.pending_timeout,
        ),
        tasks,
        manager,
        announced: false,
    };

    let version = Message::Version(configuration.connection.version_payload(ledger.height()));
    if session.send(&version).await == Flow::Continue {
        session
            .run(
                &mut inbox,
                &mut commands,
                &mut reader_task,
                configuration.handshake_timeout,
            )
            .await;
    }

    timer_task.abort();
    reader_task.abort();
    session.close().await;
}

impl Session {
    async fn run(
        &mut self,
        inbox: &mut MailboxReceiver,
        commands: &mut mpsc::UnboundedReceiver<SessionCommand>,
        reader_task: &mut JoinHandle<Result<(), TransportError>>,
        handshake_timeout: Duration,
    ) {
        let handshake_deadline = tokio::time::sleep(handshake_timeout);
        tokio::pin!(handshake_deadline);

        loop {
            let ready = self.handler.state() == HandshakeState::Ready;
            let flow = tokio::select! {
                biased;
                command = commands.recv() => match command {
                    Some(command) => self.on_command(command).await,
                    None => Flow::Stop,
                },
                item = inbox.recv() => self.on_item(item).await,
                () = &mut handshake_deadline, if !ready => {
                    debug!("{} handshake timed out", self.peer);
                    self.send_disconnect(DisconnectReason::ConnectionTimeout).await;
                    Flow::Stop
                }
                result = &mut *reader_task => {
                    match result {
                        Ok(Ok(())) => trace!("{} reader finished", self.peer),
                        Ok(Err(e)) => debug!("{} connection closed: {}", self.peer, e),
                        Err(e) => debug!("{} reader task failed: {}", self.peer, e),
                    }
                    Flow::Stop
                }
            };
            if flow == Flow::Stop {
                break;
            }
        }
    }

    async fn on_item(&mut self, item: MailboxItem) -> Flow {
        let now = tokio::time::Instant::now().into_std();
        let events = match self.handler.handle(item, now) {
            Ok(events) => events,
            Err(violation) => {
                debug!("{} protocol violation: {}", self.peer, violation);
                return Flow::Stop;
            }
        };
        for event in events {
            if self.execute(event).await == Flow::Stop {
                self.handler.stop();
                return Flow::Stop;
            }
        }
        Flow::Continue
    }

    async fn execute(&mut self, event: HandlerEvent) -> Flow {
        match event {
            HandlerEvent::Send(message) => self.send(&message).await,
            HandlerEvent::VersionReceived(version) => {
                let (reply, admission) = oneshot::channel();
                self.notify(LocalNodeCommand::Allow {
                    peer: self.peer,
                    version,
                    reply,
                });
                match admission.await {
                    Ok(Ok(())) => self.send(&Message::Verack).await,
                    Ok(Err(reason)) => {
                        debug!("{} refused after version: {}", self.peer, reason);
                        self.send_disconnect(reason).await;
                        Flow::Stop
                    }
                    Err(_) => Flow::Stop,
                }
            }
            HandlerEvent::Ready(version) => {
                debug!("{} ready, user agent {}", self.peer, version.user_agent);
                self.tasks.peer_ready(self.peer, &version);
                self.announced = true;
                self.notify(LocalNodeCommand::Ready { peer: self.peer });
                Flow::Continue
            }
            HandlerEvent::FilterChanged(filter) => {
                self.notify(LocalNodeCommand::FilterChanged {
                    peer: self.peer,
                    filter,
                });
                Flow::Continue
            }
            HandlerEvent::AddressRequest => {
                let (reply, addresses) = oneshot::channel();
                self.notify(LocalNodeCommand::RandomConnectedPeers {
                    count: MAX_COUNT_TO_SEND,
                    reply,
                });
                match addresses.await {
                    // Nothing to share, stay silent.
                    Ok(addresses) if addresses.is_empty() => Flow::Continue,
                    Ok(addresses) => self.send(&Message::Addr(AddrPayload { addresses })).await,
                    Err(_) => Flow::Stop,
                }
            }
            HandlerEvent::Peers(addresses) => {
                self.notify(LocalNodeCommand::AddPeers(addresses));
                Flow::Continue
            }
            HandlerEvent::Relay(inventory) => {
                self.notify(LocalNodeCommand::Relay {
                    inventory,
                    source: Some(self.peer),
                });
                Flow::Continue
            }
            HandlerEvent::RemoteHeight(height) => {
                self.notify(LocalNodeCommand::RemoteHeight {
                    peer: self.peer,
                    height,
                });
                Flow::Continue
            }
            HandlerEvent::Stop => Flow::Stop,
        }
    }

    async fn on_command(&mut self, command: SessionCommand) -> Flow {
        match command {
            SessionCommand::Send(message) => {
                if self.handler.state() != HandshakeState::Ready {
                    return Flow::Continue;
                }
                self.send(&message).await
            }
            SessionCommand::Relay {
                inventory_type,
                hash,
            } => match self.handler.relay(inventory_type, hash) {
                Some(message) => self.send(&message).await,
                None => Flow::Continue,
            },
            SessionCommand::Disconnect(reason) => {
                self.send_disconnect(reason).await;
                Flow::Stop
            }
        }
    }

    async fn send(&mut self, message: &Message) -> Flow {
        trace!("{} sending {}", self.peer, message.command());
        match tokio::time::timeout(WRITE_TIMEOUT, self.writer.write(message)).await {
            Ok(Ok(())) => Flow::Continue,
            Ok(Err(e)) => {
                debug!("{} write failed: {}", self.peer, e);
                Flow::Stop
            }
            Err(_) => {
                debug!("{} write timed out", self.peer);
                Flow::Stop
            }
        }
    }

    async fn send_disconnect(&mut self, reason: DisconnectReason) {
        self.handler.stop();
        match DisconnectPayload::new(reason, reason.to_string(), Vec::new()) {
            Ok(payload) => {
                self.send(&Message::Disconnect(payload)).await;
            }
            Err(e) => debug!("{} cannot build disconnect: {}", self.peer, e),
        }
    }

    fn notify(&self, command: LocalNodeCommand) {
        // The manager outlives its sessions unless the node is being torn down.
        let _ = self.manager.send(command);
    }

    async fn close(mut self) {
        let _ = tokio::time::timeout(WRITE_TIMEOUT, self.writer.shutdown()).await;
        if self.announced {
            self.tasks.peer_disconnected(self.peer);
        }
        self.notify(LocalNodeCommand::Disconnected { peer: self.peer });
        debug!("{} session closed", self.peer);
    }
}

async fn read_loop(
    mut reader: AsyncTransportReader<BoxedReader>,
    mailbox: MailboxSender,
) -> Result<(), TransportError> {
    loop {
        let message = reader.read().await?;
        if mailbox.push(MailboxItem::Message(message)).await.is_err() {
            return Ok(());
        }
    }
}

async fn timer_loop(mailbox: MailboxSender, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    interval.tick().await;
    loop {
        interval.tick().await;
        if mailbox.push(MailboxItem::Timer).await.is_err() {
            break;
        }
    }
}
