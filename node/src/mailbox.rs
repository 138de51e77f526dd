//! Priority mailbox feeding a connection's protocol handler.
//!
//! Control traffic (handshake, filter changes, consensus) jumps ahead of bulk
//! traffic, and a request already waiting in the queue makes an identical
//! later request redundant. The sweep timer is never dropped.
//!
//! Both priority lanes are bounded: once a lane is full, pushing to it waits
//! until the handler catches up, which in turn stops the connection's reader
//! and lets TCP flow control push back on the peer. A full bulk lane does not
//! hold back control traffic, and the reverse.

use neo_peers_connection::message::{Message, MessageCommand};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;

/// Commands delivered ahead of everything else.
const HIGH_PRIORITY_COMMANDS: &[MessageCommand] = &[
    MessageCommand::Consensus,
    MessageCommand::FilterAdd,
    MessageCommand::FilterClear,
    MessageCommand::FilterLoad,
    MessageCommand::Verack,
    MessageCommand::Version,
    MessageCommand::Alert,
];

/// Commands dropped when the same command is already queued.
const DEDUPLICATED_COMMANDS: &[MessageCommand] = &[
    MessageCommand::GetAddr,
    MessageCommand::GetBlocks,
    MessageCommand::GetHeaders,
    MessageCommand::Mempool,
];

/// An item processed by a protocol handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MailboxItem {
    Message(Message),
    /// Periodic pending hash sweep.
    Timer,
}

impl MailboxItem {
    fn command(&self) -> Option<MessageCommand> {
        match self {
            MailboxItem::Message(message) => Some(message.command()),
            MailboxItem::Timer => None,
        }
    }
}

pub fn is_high_priority(item: &MailboxItem) -> bool {
    item.command()
        .map_or(false, |command| HIGH_PRIORITY_COMMANDS.contains(&command))
}

/// Whether `item` is redundant given the items already queued.
pub fn shall_drop<'a>(
    item: &MailboxItem,
    mut queued: impl Iterator<Item = &'a MailboxItem>,
) -> bool {
    let command = match item.command() {
        Some(command) => command,
        None => return false,
    };
    DEDUPLICATED_COMMANDS.contains(&command)
        && queued.any(|other| other.command() == Some(command))
}

/// Returned when the receiving side of a mailbox is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MailboxClosed;

#[derive(Debug, Default)]
struct Queues {
    high: VecDeque<MailboxItem>,
    low: VecDeque<MailboxItem>,
}

#[derive(Debug)]
struct Shared {
    queues: Mutex<Queues>,
    /// Wakes the receiver when an item arrives.
    item_ready: Notify,
    /// Wakes blocked senders when a lane frees up.
    space_ready: Notify,
    /// Items each lane holds, the timer is not counted.
    lane_capacity: usize,
    closed: AtomicBool,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Queues> {
        // Critical sections never panic, a poisoned lock still holds consistent queues.
        self.queues.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Create a mailbox whose priority lanes each hold at most `lane_capacity` messages.
pub fn mailbox(lane_capacity: usize) -> (MailboxSender, MailboxReceiver) {
    let shared = Arc::new(Shared {
        queues: Mutex::new(Queues::default()),
        item_ready: Notify::new(),
        space_ready: Notify::new(),
        lane_capacity: lane_capacity.max(1),
        closed: AtomicBool::new(false),
    });
    (
        MailboxSender {
            shared: shared.clone(),
        },
        MailboxReceiver { shared },
    )
}

#[derive(Debug, Clone)]
pub struct MailboxSender {
    shared: Arc<Shared>,
}

impl MailboxSender {
    /// Queue an item, waiting for room while its lane is full.
    ///
    /// Returns `Ok(false)` when the item was dropped as redundant.
    pub async fn push(&self, item: MailboxItem) -> Result<bool, MailboxClosed> {
        let high = is_high_priority(&item);
        loop {
            if self.shared.closed.load(Ordering::Acquire) {
                return Err(MailboxClosed);
            }
            // Register interest before checking capacity so a release in between is not lost.
            let space = self.shared.space_ready.notified();
            {
                let mut queues = self.shared.lock();
                if shall_drop(&item, queues.high.iter().chain(queues.low.iter())) {
                    return Ok(false);
                }
                let lane = if high {
                    &mut queues.high
                } else {
                    &mut queues.low
                };
                if item == MailboxItem::Timer || lane.len() < self.shared.lane_capacity {
                    lane.push_back(item);
                    drop(queues);
                    self.shared.item_ready.notify_one();
                    return Ok(true);
                }
            }
            space.await;
        }
    }
}

#[derive(Debug)]
pub struct MailboxReceiver {
    shared: Arc<Shared>,
}

impl MailboxReceiver {
    /// Next item, high priority first, arrival order within a priority.
    ///
    /// Cancellation safe: an item is only removed when it is returned.
    pub async fn recv(&mut self) -> MailboxItem {
        loop {
            let item = {
                let mut queues = self.shared.lock();
                match queues.high.pop_front() {
                    Some(item) => Some(item),
                    None => queues.low.pop_front(),
                }
            };
            if let Some(item) = item {
                self.shared.space_ready.notify_waiters();
                return item;
            }
            self.shared.item_ready.notified().await;
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        let queues = self.shared.lock();
        queues.high.len() + queues.low.len()
    }
}

impl Drop for MailboxReceiver {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.space_ready.notify_waiters();
    }
}
