//! Contact-exchange handshake.
//!
//! The initiator dials the invitee's contact identity and sends, as three
//! records, the invitee's contact fingerprint, its own room-scoped fingerprint
//! and the 16-byte room id. The responder answers with a fresh room-scoped
//! fingerprint and a signature by the contact key over that fingerprint
//! followed by the room id. Only the responder proves key possession.

use crate::crypto::{Identity, RemoteIdentity};
use crate::room::{DeliveryLink, Room};
use crate::store::Store;
use crate::transport::{connect, DataConn, Dialer, Provisioner};
use crate::utils::{HandshakeError, MessengerError, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use uuid::Uuid;

/// What the initiator sends
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactRequest {
    /// Contact fingerprint of the invitee
    pub invitee: String,
    /// Room-scoped fingerprint of the initiator
    pub initiator: String,
    /// Room being formed
    pub room_id: Uuid,
}

/// What the responder answers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactResponse {
    /// Room-scoped fingerprint of the responder
    pub responder: String,
    /// Contact-key signature over [`signed_bytes`]
    pub signature: Vec<u8>,
}

/// Bytes the responder signs: its room fingerprint, then the raw room id
pub fn signed_bytes(responder: &str, room_id: &Uuid) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(responder.len() + 16);
    bytes.extend_from_slice(responder.as_bytes());
    bytes.extend_from_slice(room_id.as_bytes());
    bytes
}

impl ContactRequest {
    /// Buffer the request records
    pub fn write_to<S>(&self, conn: &mut DataConn<S>) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        conn.write_string(&self.invitee)?;
        conn.write_string(&self.initiator)?;
        conn.write_bytes(self.room_id.as_bytes())
    }

    /// Read the request records
    pub async fn read_from<S>(conn: &mut DataConn<S>) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let invitee = conn.read_string().await?;
        let initiator = conn.read_string().await?;
        let room_id = read_room_id(conn).await?;

        Ok(Self {
            invitee,
            initiator,
            room_id,
        })
    }
}

impl ContactResponse {
    /// Buffer the response records
    pub fn write_to<S>(&self, conn: &mut DataConn<S>) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        conn.write_string(&self.responder)?;
        conn.write_bytes(&self.signature)
    }

    /// Read the response records
    pub async fn read_from<S>(conn: &mut DataConn<S>) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        Ok(Self {
            responder: conn.read_string().await?,
            signature: conn.read_bytes().await?,
        })
    }
}

/// Read a 16-byte room id record
pub(crate) async fn read_room_id<S>(conn: &mut DataConn<S>) -> Result<Uuid>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let bytes = conn.read_bytes().await?;
    Uuid::from_slice(&bytes)
        .map_err(|_| MessengerError::decode(format!("room id of {} bytes", bytes.len())))
}

/// Run the initiator side against `contact` and return the responder's
/// room-scoped identity.
///
/// # Errors
///
/// `HandshakeError::Authentication` if the signature does not verify under
/// the contact key, `HandshakeError::Timeout` if the exchange takes longer
/// than `timeout`, transport errors otherwise
pub async fn initiate(
    dialer: &dyn Dialer,
    contact: &RemoteIdentity,
    own: &Identity,
    room_id: Uuid,
    port: u16,
    timeout: Duration,
) -> Result<RemoteIdentity> {
    let exchange = async {
        let mut conn = connect(dialer, contact.address(), port, timeout).await?;

        ContactRequest {
            invitee: contact.fingerprint(),
            initiator: own.fingerprint(),
            room_id,
        }
        .write_to(&mut conn)?;
        conn.flush().await?;

        let response = ContactResponse::read_from(&mut conn).await?;
        conn.close().await.ok();
        Ok::<_, MessengerError>(response)
    };

    let response = tokio::time::timeout(timeout, exchange)
        .await
        .map_err(|_| HandshakeError::Timeout {
            contact: contact.fingerprint(),
        })??;

    if !contact.verify(&signed_bytes(&response.responder, &room_id), &response.signature) {
        log::warn!("Contact {} failed to prove its key", contact.address());
        return Err(HandshakeError::Authentication {
            contact: contact.fingerprint(),
        }
        .into());
    }

    let remote = RemoteIdentity::parse(&response.responder)?;
    log::info!("Validated {} for room {}", contact.address(), room_id);
    Ok(remote)
}

/// Serve one inbound handshake and return the room it created.
///
/// The room is registered before the response is sent so that messages
/// pushed right after the handshake find it.
///
/// # Errors
///
/// `HandshakeError::UnknownContact` if the requested contact identity is not
/// ours, `RoomError::AlreadyExists` if we are already in this room, identity
/// and transport errors otherwise; the connection is closed without a response
pub async fn respond<S>(
    conn: &mut DataConn<S>,
    store: &Store,
    provisioner: &dyn Provisioner,
    link: &DeliveryLink,
) -> Result<Arc<Room>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = ContactRequest::read_from(conn).await?;

    let contact = store
        .contact(&request.invitee)
        .ok_or_else(|| HandshakeError::UnknownContact {
            fingerprint: request.invitee.clone(),
        })?;
    let initiator = RemoteIdentity::parse(&request.initiator)?;
    let identity = Identity::generate(provisioner).await?;

    let response = ContactResponse {
        signature: contact
            .sign(&signed_bytes(&identity.fingerprint(), &request.room_id))
            .to_vec(),
        responder: identity.fingerprint(),
    };

    let room = Room::new(identity, request.room_id, vec![initiator], link.clone());
    store.register_room(Arc::clone(&room))?;

    let sent = async {
        response.write_to(conn)?;
        conn.flush().await
    };
    if let Err(e) = sent.await {
        store.remove_room(&room.id());
        return Err(e);
    }

    room.start_delivery();
    log::info!(
        "Joined room {} through contact {}",
        room.id(),
        contact.address()
    );
    Ok(room)
}
