//! Per-channel broadcast groups.
//!
//! A [`BroadcastGroup`] is a single-owner actor: one spawned loop owns the
//! membership map for one channel and consumes a merged stream of
//! register/unregister/broadcast events, strictly one at a time in arrival
//! order. Because only the loop touches the map, membership needs no lock,
//! and delivery order per group is FIFO.

use crate::message::Message;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

/// Capacity of each member's private outbound queue.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// Identifies one live connection within a group.
pub type ConnectionId = u64;

static CONNECTION_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Allocate a process-unique connection id.
#[must_use]
pub fn next_connection_id() -> ConnectionId {
    CONNECTION_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Receiving half of a member's outbound queue, drained by that
/// connection's writer and nobody else.
pub type Outbound = mpsc::Receiver<Arc<Message>>;

/// A connection's membership handle: its id plus the producing half of its
/// outbound queue. Produced-to and closed only by the owning group's loop.
#[derive(Debug)]
pub struct Member {
    id: ConnectionId,
    queue: mpsc::Sender<Arc<Message>>,
}

impl Member {
    /// Create a member with the default queue capacity.
    #[must_use]
    pub fn new(id: ConnectionId) -> (Self, Outbound) {
        Self::with_capacity(id, OUTBOUND_QUEUE_CAPACITY)
    }

    /// Create a member with a specific queue capacity.
    #[must_use]
    pub fn with_capacity(id: ConnectionId, capacity: usize) -> (Self, Outbound) {
        let (queue, outbound) = mpsc::channel(capacity);
        (Self { id, queue }, outbound)
    }

    /// The member's connection id.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

/// Events consumed by a group's loop, processed in arrival order.
enum GroupEvent {
    Register(Member),
    Unregister(ConnectionId),
    Broadcast(Arc<Message>),
    MemberCount(oneshot::Sender<usize>),
}

/// Handle to one channel's broadcast group.
///
/// Cloning the handle is cheap; all clones feed the same event stream. The
/// loop itself runs until every handle is dropped, which for
/// registry-created groups is the process lifetime.
#[derive(Debug, Clone)]
pub struct BroadcastGroup {
    channel_id: i64,
    events: mpsc::UnboundedSender<GroupEvent>,
}

impl BroadcastGroup {
    /// Create a group for `channel_id` and start its event loop.
    #[must_use]
    pub fn spawn(channel_id: i64) -> Self {
        let (events, inbox) = mpsc::unbounded_channel();
        tokio::spawn(run(channel_id, inbox));
        Self {
            channel_id,
            events,
        }
    }

    /// The channel this group fans out for.
    #[must_use]
    pub fn channel_id(&self) -> i64 {
        self.channel_id
    }

    /// Add a member. Each connection registers exactly once; a second
    /// register for the same id replaces the previous entry.
    pub fn register(&self, member: Member) {
        let _ = self.events.send(GroupEvent::Register(member));
    }

    /// Remove a member if present and close its outbound queue, signaling
    /// its writer to flush and terminate. Idempotent: unknown or
    /// already-removed ids are a no-op.
    pub fn unregister(&self, id: ConnectionId) {
        let _ = self.events.send(GroupEvent::Unregister(id));
    }

    /// Fan `msg` out to every current member's outbound queue without ever
    /// blocking. A member whose queue is full is evicted instead.
    pub fn broadcast(&self, msg: Message) {
        let _ = self.events.send(GroupEvent::Broadcast(Arc::new(msg)));
    }

    /// Number of current members, answered by the loop after all
    /// previously sent events have been processed.
    pub async fn member_count(&self) -> usize {
        let (reply, answer) = oneshot::channel();
        if self.events.send(GroupEvent::MemberCount(reply)).is_err() {
            return 0;
        }
        answer.await.unwrap_or(0)
    }

    /// Whether `other` is a handle to this same group instance.
    #[must_use]
    pub fn same_group(&self, other: &BroadcastGroup) -> bool {
        self.events.same_channel(&other.events)
    }
}

/// The group's event loop: sole owner and mutator of the membership map.
async fn run(channel_id: i64, mut inbox: mpsc::UnboundedReceiver<GroupEvent>) {
    let mut members: HashMap<ConnectionId, mpsc::Sender<Arc<Message>>> = HashMap::new();

    while let Some(event) = inbox.recv().await {
        match event {
            GroupEvent::Register(member) => {
                debug!(channel = channel_id, connection = member.id, "member registered");
                members.insert(member.id, member.queue);
            }
            GroupEvent::Unregister(id) => {
                // Dropping the sender closes the queue; the member's writer
                // drains what is buffered and exits.
                if members.remove(&id).is_some() {
                    debug!(channel = channel_id, connection = id, "member unregistered");
                }
            }
            GroupEvent::Broadcast(msg) => {
                trace!(channel = channel_id, recipients = members.len(), "broadcast");
                members.retain(|id, queue| match queue.try_send(msg.clone()) {
                    Ok(()) => true,
                    Err(TrySendError::Full(_)) => {
                        // Backpressure contract: never block on a slow
                        // consumer. The recipient is dropped, not the send.
                        warn!(channel = channel_id, connection = id, "outbound queue full, evicting");
                        false
                    }
                    Err(TrySendError::Closed(_)) => false,
                });
            }
            GroupEvent::MemberCount(reply) => {
                let _ = reply.send(members.len());
            }
        }
    }

    debug!(channel = channel_id, "group loop ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    async fn recv(outbound: &mut Outbound) -> Option<Arc<Message>> {
        timeout(Duration::from_secs(1), outbound.recv())
            .await
            .expect("timed out waiting for delivery")
    }

    #[tokio::test]
    async fn test_broadcast_reaches_all_members() {
        let group = BroadcastGroup::spawn(7);

        let (a, mut a_out) = Member::new(next_connection_id());
        let (b, mut b_out) = Member::new(next_connection_id());
        group.register(a);
        group.register(b);

        group.broadcast(Message::new("A", "hello"));

        let got_a = recv(&mut a_out).await.unwrap();
        let got_b = recv(&mut b_out).await.unwrap();
        assert_eq!(got_a.content, "hello");
        assert_eq!(got_b.sender, "A");
        // One shared message instance per broadcast.
        assert!(Arc::ptr_eq(&got_a, &got_b));
    }

    #[tokio::test]
    async fn test_delivery_order_is_fifo_per_group() {
        let group = BroadcastGroup::spawn(1);
        let (m, mut out) = Member::new(next_connection_id());
        group.register(m);

        for i in 0..10 {
            group.broadcast(Message::new("A", format!("msg-{i}")));
        }
        for i in 0..10 {
            assert_eq!(recv(&mut out).await.unwrap().content, format!("msg-{i}"));
        }
    }

    #[tokio::test]
    async fn test_slow_member_evicted_on_full_queue() {
        let group = BroadcastGroup::spawn(2);

        let slow_id = next_connection_id();
        let (slow, mut slow_out) = Member::with_capacity(slow_id, 1);
        let (fast, mut fast_out) = Member::new(next_connection_id());
        group.register(slow);
        group.register(fast);

        // First fills the slow queue, second overflows it.
        group.broadcast(Message::new("A", "first"));
        group.broadcast(Message::new("A", "second"));
        assert_eq!(group.member_count().await, 1);

        // The fast member sees both; the slow one gets the buffered message
        // and then a closed queue, never the overflowing one.
        assert_eq!(recv(&mut fast_out).await.unwrap().content, "first");
        assert_eq!(recv(&mut fast_out).await.unwrap().content, "second");
        assert_eq!(recv(&mut slow_out).await.unwrap().content, "first");
        assert!(recv(&mut slow_out).await.is_none());

        // Evicted members receive no further broadcasts.
        group.broadcast(Message::new("A", "third"));
        assert_eq!(recv(&mut fast_out).await.unwrap().content, "third");
        assert_eq!(group.member_count().await, 1);
    }

    #[tokio::test]
    async fn test_unregister_closes_queue_after_flush() {
        let group = BroadcastGroup::spawn(3);
        let id = next_connection_id();
        let (m, mut out) = Member::new(id);
        group.register(m);

        group.broadcast(Message::new("A", "buffered"));
        group.unregister(id);

        // Buffered messages drain before the close signal.
        assert_eq!(recv(&mut out).await.unwrap().content, "buffered");
        assert!(recv(&mut out).await.is_none());
    }

    #[tokio::test]
    async fn test_unregister_is_idempotent() {
        let group = BroadcastGroup::spawn(4);

        let id = next_connection_id();
        let (m, _out) = Member::new(id);
        let (other, mut other_out) = Member::new(next_connection_id());
        group.register(m);
        group.register(other);

        group.unregister(id);
        group.unregister(id); // second removal is a no-op
        group.unregister(9_999_999); // never registered
        assert_eq!(group.member_count().await, 1);

        // The remaining member is unaffected.
        group.broadcast(Message::new("A", "still here"));
        assert_eq!(recv(&mut other_out).await.unwrap().content, "still here");
    }
}
