//! Daemon lifecycle and the operator-facing operations.
//!
//! A [`Daemon`] owns the [`Store`], forms rooms through the contact handshake,
//! serves the contact and conversation listeners and persists its state.

use crate::crypto::{Identity, RemoteIdentity};
use crate::protocol::{self, PushSummary};
use crate::room::{Command, DeliveryLink, Message, Room, RoomInfo};
use crate::store::{Snapshot, Store};
use crate::transport::{Acceptor, DataConn, Dialer, Provisioner};
use crate::utils::{DaemonConfig, FormationPolicy, MessengerError, Result, TransportError};
use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Pause after a failed accept before trying again
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// One running room daemon
#[derive(Clone)]
pub struct Daemon {
    config: Arc<DaemonConfig>,
    store: Arc<Store>,
    provisioner: Arc<dyn Provisioner>,
    link: DeliveryLink,
    shutdown: CancellationToken,
}

impl Daemon {
    /// Create a daemon with an empty store
    pub fn new(
        config: DaemonConfig,
        provisioner: Arc<dyn Provisioner>,
        dialer: Arc<dyn Dialer>,
    ) -> Self {
        let link = DeliveryLink {
            dialer,
            conversation_port: config.network.conversation_port,
            io_timeout: config.network.connect_timeout(),
            retry_interval: config.delivery.retry_interval(),
        };

        Self {
            config: Arc::new(config),
            store: Arc::new(Store::new()),
            provisioner,
            link,
            shutdown: CancellationToken::new(),
        }
    }

    /// Create a daemon from a snapshot and start delivery for every room
    pub fn restore(
        config: DaemonConfig,
        provisioner: Arc<dyn Provisioner>,
        dialer: Arc<dyn Dialer>,
        snapshot: Snapshot,
    ) -> Self {
        let mut daemon = Self::new(config, provisioner, dialer);
        daemon.store = Arc::new(Store::restore(snapshot, &daemon.link));

        for room in daemon.store.rooms() {
            room.start_delivery();
        }
        log::info!(
            "Restored {} contact(s) and {} room(s)",
            daemon.store.contact_fingerprints().len(),
            daemon.store.rooms().len()
        );
        daemon
    }

    /// Active configuration
    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    /// Contact identities and rooms
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Persistable copy of the current state
    pub fn snapshot(&self) -> Snapshot {
        self.store.snapshot()
    }

    /// Write the snapshot to the configured state file
    pub fn save_state(&self) -> Result<()> {
        self.config.ensure_directories()?;
        self.snapshot().save(&self.config.storage.state_file)
    }

    /// Create a contact identity and return its fingerprint
    ///
    /// # Errors
    ///
    /// Returns `IdentityError::Provisioning` if no address can be obtained
    pub async fn create_contact(&self) -> Result<String> {
        let identity = Identity::generate(self.provisioner.as_ref()).await?;
        let fingerprint = identity.fingerprint();
        self.store.add_contact(identity);

        log::info!("Created contact identity {}", fingerprint);
        Ok(fingerprint)
    }

    /// Fingerprints of all contact identities
    pub fn contacts(&self) -> Vec<String> {
        self.store.contact_fingerprints()
    }

    /// Forget a contact identity; returns whether it existed
    pub fn delete_contact(&self, fingerprint: &str) -> bool {
        let removed = self.store.remove_contact(fingerprint).is_some();
        if removed {
            log::info!("Deleted contact identity {}", fingerprint);
        }
        removed
    }

    /// Form a room with the given contact fingerprints and return its id.
    ///
    /// Handshakes run concurrently. Under the atomic policy any failure
    /// aborts the room; under best-effort the room keeps whoever answered.
    ///
    /// # Errors
    ///
    /// Malformed fingerprints, provisioning failures, and handshake failures
    /// as the formation policy dictates
    pub async fn create_room(&self, contacts: &[String]) -> Result<Uuid> {
        let contacts = contacts
            .iter()
            .map(|fp| RemoteIdentity::parse(fp))
            .collect::<Result<Vec<_>>>()?;

        let identity = Identity::generate(self.provisioner.as_ref()).await?;
        let room_id = Uuid::new_v4();

        let results = join_all(
            contacts
                .iter()
                .map(|contact| self.handshake(contact, &identity, room_id)),
        )
        .await;

        let mut members = Vec::with_capacity(results.len());
        let mut first_error: Option<MessengerError> = None;
        for (contact, result) in contacts.iter().zip(results) {
            match result {
                Ok(remote) => members.push(remote),
                Err(e) => {
                    log::warn!("Contact {} did not join room {}: {}", contact.address(), room_id, e);
                    first_error.get_or_insert(e);
                }
            }
        }

        if let Some(e) = first_error {
            if self.config.rooms.formation == FormationPolicy::Atomic || members.is_empty() {
                return Err(e);
            }
        }

        let room = Room::new(identity, room_id, members, self.link.clone());
        self.store.register_room(Arc::clone(&room))?;
        room.start_delivery();
        log::info!("Created room {} with {} peer(s)", room_id, room.peers().len());

        if self.config.rooms.announce_members {
            for peer in room.peers() {
                room.send_command(&Command::Join(peer.fingerprint())).await?;
            }
        }
        Ok(room_id)
    }

    /// Invite one more contact into an existing room and return the new
    /// member's room-scoped fingerprint.
    ///
    /// Everyone learns about everyone through `join` commands.
    pub async fn add_peer_to_room(&self, room_id: &Uuid, contact: &str) -> Result<String> {
        let room = self.store.require_room(room_id)?;
        let contact = RemoteIdentity::parse(contact)?;

        let remote = self.handshake(&contact, room.identity(), room.id()).await?;
        let fingerprint = remote.fingerprint();
        let existing = room.peers();
        room.add_peer(remote);

        room.send_command(&Command::Join(fingerprint.clone())).await?;
        for peer in existing {
            room.send_command(&Command::Join(peer.fingerprint())).await?;
        }
        Ok(fingerprint)
    }

    /// Unregister a room and stop its delivery work
    pub fn delete_room(&self, room_id: &Uuid) -> Result<()> {
        self.store.require_room(room_id)?;
        self.store.remove_room(room_id);
        log::info!("Deleted room {}", room_id);
        Ok(())
    }

    /// Send a text message to a room
    pub async fn send_message(&self, room_id: &Uuid, text: &str) -> Result<Message> {
        self.store.require_room(room_id)?.send_text(text).await
    }

    /// Announce a file to a room; the data itself stays in the attachment store
    pub async fn send_file(
        &self,
        room_id: &Uuid,
        name: &str,
        mime: Option<String>,
        size: u64,
        blob_id: Uuid,
    ) -> Result<Message> {
        self.store
            .require_room(room_id)?
            .send_file(name, mime, size, blob_id)
            .await
    }

    /// Rename a room for every member
    pub async fn rename_room(&self, room_id: &Uuid, name: &str) -> Result<()> {
        let room = self.store.require_room(room_id)?;
        room.send_command(&Command::Name(name.to_string())).await?;
        Ok(())
    }

    /// The last `count` messages of a room, all of them for `0`
    pub fn list_messages(&self, room_id: &Uuid, count: usize) -> Result<Vec<Message>> {
        Ok(self.store.require_room(room_id)?.messages(count))
    }

    /// Summary of one room
    pub fn room_info(&self, room_id: &Uuid) -> Result<RoomInfo> {
        Ok(self.store.require_room(room_id)?.info())
    }

    /// Summaries of all rooms
    pub fn rooms(&self) -> Vec<RoomInfo> {
        let mut rooms: Vec<RoomInfo> = self.store.rooms().iter().map(|room| room.info()).collect();
        rooms.sort_by_key(|info| info.id);
        rooms
    }

    /// Serve contact handshakes until [`Daemon::shutdown`]
    pub async fn serve_contacts<A: Acceptor>(&self, mut acceptor: A) {
        log::info!("Contact listener started");
        while let Some(stream) = self.next_connection(&mut acceptor).await {
            let daemon = self.clone();
            tokio::spawn(async move {
                let mut conn = DataConn::new(stream);
                let handshake = protocol::respond(
                    &mut conn,
                    &daemon.store,
                    daemon.provisioner.as_ref(),
                    &daemon.link,
                );
                let limit = daemon.config.delivery.handshake_timeout();
                if let Err(e) = daemon.bounded(limit, handshake).await {
                    log::warn!("Contact handshake failed: {}", e);
                }
            });
        }
        log::info!("Contact listener stopped");
    }

    /// Serve message pushes until [`Daemon::shutdown`]
    pub async fn serve_conversations<A: Acceptor>(&self, mut acceptor: A) {
        log::info!("Conversation listener started");
        while let Some(stream) = self.next_connection(&mut acceptor).await {
            let daemon = self.clone();
            tokio::spawn(async move {
                let mut conn = DataConn::new(stream);
                let push = protocol::receive_push(&mut conn, &daemon.store);
                match daemon.bounded(daemon.link.io_timeout, push).await {
                    Ok(PushSummary { accepted: 0, .. }) => {}
                    Ok(summary) => log::info!(
                        "Room {}: {} new message(s)",
                        summary.room_id,
                        summary.accepted
                    ),
                    Err(e) => log::warn!("Inbound push failed: {}", e),
                }
            });
        }
        log::info!("Conversation listener stopped");
    }

    /// Stop the listeners and every room's delivery work
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        for room in self.store.rooms() {
            room.close();
        }
    }

    /// Run one inbound exchange, giving up after `limit` or on shutdown
    async fn bounded<T, F>(&self, limit: Duration, exchange: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            _ = self.shutdown.cancelled() => Err(TransportError::Cancelled.into()),
            finished = tokio::time::timeout(limit, exchange) => finished.unwrap_or_else(|_| {
                Err(TransportError::Timeout {
                    seconds: limit.as_secs(),
                }
                .into())
            }),
        }
    }

    async fn next_connection<A: Acceptor>(
        &self,
        acceptor: &mut A,
    ) -> Option<crate::transport::BoxedStream> {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return None,
                accepted = acceptor.accept() => match accepted {
                    Ok(stream) => return Some(stream),
                    Err(e) if e.is_retryable() => {
                        log::warn!("Accept failed: {}", e);
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                    Err(e) => {
                        log::error!("Listener closed: {}", e);
                        return None;
                    }
                },
            }
        }
    }

    async fn handshake(
        &self,
        contact: &RemoteIdentity,
        own: &Identity,
        room_id: Uuid,
    ) -> Result<RemoteIdentity> {
        protocol::initiate(
            self.link.dialer.as_ref(),
            contact,
            own,
            room_id,
            self.config.network.contact_port,
            self.config.delivery.handshake_timeout(),
        )
        .await
    }
}
