//! Per-peer outbound queue and delivery loop.
//!
//! Each [`MessagingPeer`] owns a FIFO of messages the remote member has not yet
//! received. A delivery attempt opens one connection to the peer's conversation
//! port and pushes the whole queue in a single batch; the batch is removed only
//! if the push completed. At most one attempt per peer is in flight at a time.

use crate::crypto::RemoteIdentity;
use crate::room::{Message, Room};
use crate::transport::{connect, Dialer};
use crate::utils::{Result, RoomError, TransportError};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// How a room reaches its peers
#[derive(Clone)]
pub struct DeliveryLink {
    /// Outbound connections through the onion network
    pub dialer: Arc<dyn Dialer>,
    /// Remote port accepting message pushes
    pub conversation_port: u16,
    /// Bound on dialing and on one push
    pub io_timeout: Duration,
    /// Time between background delivery passes
    pub retry_interval: Duration,
}

/// Local proxy for one remote room member
pub struct MessagingPeer {
    remote: RemoteIdentity,
    room: Weak<Room>,
    link: DeliveryLink,
    queue: Mutex<VecDeque<Message>>,
    in_flight: tokio::sync::Mutex<()>,
    wake: Notify,
}

impl MessagingPeer {
    /// Create a peer bound to `room` through a non-owning handle
    pub fn new(remote: RemoteIdentity, room: Weak<Room>, link: DeliveryLink) -> Self {
        Self {
            remote,
            room,
            link,
            queue: Mutex::new(VecDeque::new()),
            in_flight: tokio::sync::Mutex::new(()),
            wake: Notify::new(),
        }
    }

    /// Remote member's room-scoped identity
    pub fn remote(&self) -> &RemoteIdentity {
        &self.remote
    }

    /// Remote member's room-scoped fingerprint
    pub fn fingerprint(&self) -> String {
        self.remote.fingerprint()
    }

    /// Number of messages waiting for delivery
    pub fn queue_len(&self) -> usize {
        self.lock_queue().len()
    }

    /// Copy of the messages waiting for delivery, oldest first
    pub fn pending(&self) -> Vec<Message> {
        self.lock_queue().iter().cloned().collect()
    }

    /// Append messages without an inline attempt and wake the delivery worker
    pub fn requeue(&self, messages: impl IntoIterator<Item = Message>) {
        self.lock_queue().extend(messages);
        self.wake.notify_one();
    }

    /// Queue a message and make one immediate delivery attempt.
    ///
    /// Never fails: a failed attempt leaves the message queued for the
    /// next delivery pass.
    pub async fn enqueue(&self, message: Message) {
        self.lock_queue().push_back(message);

        let Some(scope) = self.room.upgrade().map(|room| room.scope().clone()) else {
            log::warn!("Queued message for {} but its room is gone", self.remote.address());
            return;
        };
        if scope.is_cancelled() {
            return;
        }

        match self.deliver_once(&scope).await {
            Ok(sent) => log::debug!("Delivered {} message(s) to {}", sent, self.remote.address()),
            Err(e) => log::debug!(
                "Fast-path delivery to {} failed, {} queued: {}",
                self.remote.address(),
                self.queue_len(),
                e
            ),
        }
    }

    /// Push every queued message to the peer in one connection.
    ///
    /// Returns how many messages were delivered. On error nothing is removed
    /// from the queue.
    ///
    /// # Errors
    ///
    /// `RoomError::NoRoom` if the owning room is gone, `TransportError::Cancelled`
    /// if `ctx` fires first, any transport or encoding error of the push
    pub async fn deliver_once(&self, ctx: &CancellationToken) -> Result<usize> {
        let room_id = self.room.upgrade().ok_or(RoomError::NoRoom)?.id();

        let _attempt = self.in_flight.lock().await;
        let batch = self.pending();
        if batch.is_empty() {
            return Ok(0);
        }

        tokio::select! {
            biased;
            _ = ctx.cancelled() => return Err(TransportError::Cancelled.into()),
            pushed = self.push(room_id, &batch) => pushed?,
        }

        let mut queue = self.lock_queue();
        let delivered = batch.len().min(queue.len());
        queue.drain(..delivered);
        Ok(delivered)
    }

    /// One pass of the delivery loop: attempt delivery unless cancelled or idle.
    ///
    /// Errors are logged and left for the next pass.
    pub async fn run_delivery_loop(&self, ctx: &CancellationToken) {
        if ctx.is_cancelled() || self.queue_len() == 0 {
            return;
        }

        match self.deliver_once(ctx).await {
            Ok(sent) => log::debug!("Delivered {} message(s) to {}", sent, self.remote.address()),
            Err(e) => log::warn!(
                "Delivery to {} failed, retrying later: {}",
                self.remote.address(),
                e
            ),
        }
    }

    /// Run a delivery pass on every tick and every wake-up until `scope` is cancelled
    pub fn spawn_worker(self: &Arc<Self>, scope: CancellationToken) -> JoinHandle<()> {
        let peer = Arc::clone(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(peer.link.retry_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = scope.cancelled() => break,
                    _ = ticker.tick() => peer.run_delivery_loop(&scope).await,
                    () = peer.wake.notified() => peer.run_delivery_loop(&scope).await,
                }
            }

            log::debug!(
                "Delivery worker for {} stopped with {} queued",
                peer.remote.address(),
                peer.queue_len()
            );
        })
    }

    async fn push(&self, room_id: Uuid, batch: &[Message]) -> Result<()> {
        let attempt = async {
            let mut conn = connect(
                self.link.dialer.as_ref(),
                self.remote.address(),
                self.link.conversation_port,
                self.link.io_timeout,
            )
            .await?;

            conn.write_bytes(room_id.as_bytes())?;
            conn.write_int(batch.len() as u64)?;
            for message in batch {
                conn.write_struct(message)?;
            }
            conn.flush().await?;
            conn.close().await
        };

        match tokio::time::timeout(self.link.io_timeout, attempt).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Io {
                reason: format!("push to {} timed out", self.remote.address()),
            }
            .into()),
        }
    }

    fn lock_queue(&self) -> MutexGuard<'_, VecDeque<Message>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
