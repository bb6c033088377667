//! Rooms: a room-scoped identity, the member peers and the message log.

use crate::crypto::{Identity, RemoteIdentity};
use crate::room::{Command, ContentInfo, ContentType, DeliveryLink, Message, MessagingPeer};
use crate::utils::{Result, RoomError};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// A group conversation as seen by one member
pub struct Room {
    id: Uuid,
    identity: Identity,
    name: Mutex<Option<String>>,
    peers: RwLock<Vec<Arc<MessagingPeer>>>,
    messages: Mutex<Vec<Message>>,
    scope: CancellationToken,
    delivering: AtomicBool,
    link: DeliveryLink,
    this: Weak<Room>,
}

/// Outcome of accepting an inbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Received {
    /// Appended to the log
    Appended,
    /// Already in the log, ignored
    Duplicate,
}

/// Summary of a room for operators
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomInfo {
    /// Room id
    pub id: Uuid,
    /// Display name, if one was set
    pub name: Option<String>,
    /// Our room-scoped fingerprint
    pub fingerprint: String,
    /// Members other than us
    pub peers: Vec<PeerInfo>,
    /// Messages in the log
    pub message_count: usize,
    /// Whether the room has been shut down
    pub closed: bool,
}

/// Delivery state of one member
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerInfo {
    /// Member's room-scoped fingerprint
    pub fingerprint: String,
    /// Messages not yet delivered to the member
    pub queued: usize,
}

/// Persisted form of a room
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomRecord {
    /// Room id
    pub id: Uuid,
    /// Display name
    pub name: Option<String>,
    /// Room-scoped identity with its private key
    pub identity: Identity,
    /// Members and what they still have to receive
    pub peers: Vec<PeerRecord>,
    /// Message log
    pub messages: Vec<Message>,
}

/// Persisted form of a member
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerRecord {
    /// Member identity
    pub remote: RemoteIdentity,
    /// Positions in the message log still queued for this member
    pub pending: Vec<usize>,
}

impl Room {
    /// Create a room with the given members
    pub fn new(
        identity: Identity,
        id: Uuid,
        members: Vec<RemoteIdentity>,
        link: DeliveryLink,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| {
            let peers = members
                .into_iter()
                .map(|remote| Arc::new(MessagingPeer::new(remote, this.clone(), link.clone())))
                .collect();

            Self {
                id,
                identity,
                name: Mutex::new(None),
                peers: RwLock::new(peers),
                messages: Mutex::new(Vec::new()),
                scope: CancellationToken::new(),
                delivering: AtomicBool::new(false),
                link,
                this: this.clone(),
            }
        })
    }

    /// Rebuild a room from its persisted form, with queues refilled
    pub fn restore(record: RoomRecord, link: DeliveryLink) -> Arc<Self> {
        let members = record.peers.iter().map(|p| p.remote.clone()).collect();
        let room = Self::new(record.identity, record.id, members, link);
        *room.lock_name() = record.name;

        for (peer, saved) in room.peers().iter().zip(&record.peers) {
            peer.requeue(
                saved
                    .pending
                    .iter()
                    .filter_map(|&position| record.messages.get(position).cloned()),
            );
        }
        *room.lock_messages() = record.messages;
        room
    }

    /// Persisted form of this room
    pub fn record(&self) -> RoomRecord {
        let messages = self.lock_messages().clone();
        let peers = self
            .peers()
            .iter()
            .map(|peer| PeerRecord {
                remote: peer.remote().clone(),
                pending: peer
                    .pending()
                    .iter()
                    .filter_map(|queued| {
                        messages
                            .iter()
                            .position(|m| m.signature == queued.signature)
                    })
                    .collect(),
            })
            .collect();

        RoomRecord {
            id: self.id,
            name: self.name(),
            identity: self.identity.clone(),
            peers,
            messages,
        }
    }

    /// Room id
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Our room-scoped identity
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Our room-scoped fingerprint
    pub fn fingerprint(&self) -> String {
        self.identity.fingerprint()
    }

    /// Display name, if one was set
    pub fn name(&self) -> Option<String> {
        self.lock_name().clone()
    }

    /// Cancellation scope bounding all work done on behalf of this room
    pub fn scope(&self) -> &CancellationToken {
        &self.scope
    }

    /// Snapshot of the member list
    pub fn peers(&self) -> Vec<Arc<MessagingPeer>> {
        self.peers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Member with the given room-scoped fingerprint
    pub fn peer_by_fingerprint(&self, fingerprint: &str) -> Option<Arc<MessagingPeer>> {
        self.peers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|peer| peer.fingerprint() == fingerprint)
            .cloned()
    }

    /// Add a member; returns `None` if it is us or already a member
    pub fn add_peer(&self, remote: RemoteIdentity) -> Option<Arc<MessagingPeer>> {
        let fingerprint = remote.fingerprint();
        if fingerprint == self.fingerprint() {
            return None;
        }

        let peer = {
            let mut peers = self.peers.write().unwrap_or_else(PoisonError::into_inner);
            if peers.iter().any(|p| p.fingerprint() == fingerprint) {
                return None;
            }
            let peer = Arc::new(MessagingPeer::new(remote, self.this.clone(), self.link.clone()));
            peers.push(Arc::clone(&peer));
            peer
        };

        if self.delivering.load(Ordering::SeqCst) && !self.scope.is_cancelled() {
            peer.spawn_worker(self.scope.clone());
        }
        log::info!("Room {}: added member {}", self.id, fingerprint);
        Some(peer)
    }

    /// Start a background delivery worker for every member
    pub fn start_delivery(&self) {
        if self.delivering.swap(true, Ordering::SeqCst) {
            return;
        }
        for peer in self.peers() {
            peer.spawn_worker(self.scope.clone());
        }
    }

    /// Sign a message, append it to the log and queue it for every member
    pub async fn send(
        &self,
        content_type: ContentType,
        content_info: ContentInfo,
        content: Vec<u8>,
    ) -> Result<Message> {
        let message = Message::new_signed(&self.identity, content_type, content_info, content)?;
        self.publish(message.clone()).await;
        Ok(message)
    }

    /// Announce a file held by the attachment store under `blob_id`
    pub async fn send_file(
        &self,
        name: &str,
        mime: Option<String>,
        size: u64,
        blob_id: Uuid,
    ) -> Result<Message> {
        let info = ContentInfo {
            mime,
            size,
            blob_id: Some(blob_id),
        };
        self.send(ContentType::File, info, name.as_bytes().to_vec()).await
    }

    /// Send a text message
    pub async fn send_text(&self, text: &str) -> Result<Message> {
        let message = Message::text(&self.identity, text)?;
        self.publish(message.clone()).await;
        Ok(message)
    }

    /// Send a command message, applying it locally first
    pub async fn send_command(&self, command: &Command) -> Result<Message> {
        if let Command::Name(name) = command {
            *self.lock_name() = Some(name.clone());
        }
        let message = Message::command(&self.identity, command)?;
        self.publish(message.clone()).await;
        Ok(message)
    }

    /// Accept a message pushed by a member.
    ///
    /// # Errors
    ///
    /// `RoomError::UnknownSender` if the sender is not a member,
    /// `RoomError::InvalidSignature` if the signature does not verify
    pub fn receive(&self, message: Message) -> Result<Received> {
        let sender = self
            .peer_by_fingerprint(&message.meta.sender)
            .ok_or_else(|| RoomError::UnknownSender {
                sender: message.meta.sender.clone(),
            })?;

        if !message.verify(sender.remote()) {
            return Err(RoomError::InvalidSignature {
                sender: message.meta.sender.clone(),
            }
            .into());
        }

        let command = message.as_command();
        {
            let mut log = self.lock_messages();
            if log.iter().any(|m| m.signature == message.signature) {
                return Ok(Received::Duplicate);
            }
            log.push(message);
        }

        if let Some(command) = command {
            self.apply(command);
        }
        Ok(Received::Appended)
    }

    /// The last `count` messages in log order, or all of them for `0`
    pub fn messages(&self, count: usize) -> Vec<Message> {
        let log = self.lock_messages();
        let start = match count {
            0 => 0,
            n => log.len().saturating_sub(n),
        };
        log[start..].to_vec()
    }

    /// Number of messages in the log
    pub fn message_count(&self) -> usize {
        self.lock_messages().len()
    }

    /// Operator summary
    pub fn info(&self) -> RoomInfo {
        RoomInfo {
            id: self.id,
            name: self.name(),
            fingerprint: self.fingerprint(),
            peers: self
                .peers()
                .iter()
                .map(|peer| PeerInfo {
                    fingerprint: peer.fingerprint(),
                    queued: peer.queue_len(),
                })
                .collect(),
            message_count: self.message_count(),
            closed: self.is_closed(),
        }
    }

    /// Cancel all delivery work for this room
    pub fn close(&self) {
        self.scope.cancel();
    }

    /// Whether [`Room::close`] has been called
    pub fn is_closed(&self) -> bool {
        self.scope.is_cancelled()
    }

    async fn publish(&self, message: Message) {
        self.lock_messages().push(message.clone());

        let peers = self.peers();
        futures::future::join_all(peers.iter().map(|peer| peer.enqueue(message.clone()))).await;
    }

    fn apply(&self, command: Command) {
        match command {
            Command::Join(fingerprint) => match RemoteIdentity::parse(&fingerprint) {
                Ok(remote) => {
                    self.add_peer(remote);
                }
                Err(e) => log::warn!("Room {}: ignoring join: {}", self.id, e),
            },
            Command::Name(name) => {
                log::info!("Room {} renamed to '{}'", self.id, name);
                *self.lock_name() = Some(name);
            }
            Command::Unknown(text) => log::debug!("Room {}: unknown command '{}'", self.id, text),
        }
    }

    fn lock_messages(&self) -> MutexGuard<'_, Vec<Message>> {
        self.messages.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_name(&self) -> MutexGuard<'_, Option<String>> {
        self.name.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Room {
    fn drop(&mut self) {
        self.scope.cancel();
    }
}
