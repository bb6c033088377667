//! Inbound side of message delivery.
//!
//! A push is the room id, the message count and that many bincode-encoded
//! messages. Each message is checked on its own; a bad one is dropped
//! without affecting the rest of the batch.

use crate::protocol::contact::read_room_id;
use crate::room::{Message, Received};
use crate::store::Store;
use crate::transport::DataConn;
use crate::utils::Result;
use tokio::io::{AsyncRead, AsyncWrite};
use uuid::Uuid;

/// What happened to one inbound push
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushSummary {
    /// Target room
    pub room_id: Uuid,
    /// Messages appended to the log
    pub accepted: usize,
    /// Messages already in the log
    pub duplicates: usize,
    /// Messages dropped for an unknown sender or a bad signature
    pub rejected: usize,
}

/// Read one push and hand its messages to the target room
///
/// # Errors
///
/// `RoomError::NotFound` for an unknown room id, transport errors if the
/// push is truncated or malformed; messages read before the error are kept
pub async fn receive_push<S>(conn: &mut DataConn<S>, store: &Store) -> Result<PushSummary>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let room_id = read_room_id(conn).await?;
    let room = store.require_room(&room_id)?;
    let count = conn.read_int().await?;

    let mut summary = PushSummary {
        room_id,
        ..PushSummary::default()
    };

    for _ in 0..count {
        let message: Message = conn.read_struct().await?;
        match room.receive(message) {
            Ok(Received::Appended) => summary.accepted += 1,
            Ok(Received::Duplicate) => summary.duplicates += 1,
            Err(e) => {
                log::warn!("Room {}: dropped inbound message: {}", room_id, e);
                summary.rejected += 1;
            }
        }
    }

    log::debug!(
        "Room {}: {} accepted, {} duplicate, {} rejected",
        room_id,
        summary.accepted,
        summary.duplicates,
        summary.rejected
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Identity;
    use crate::room::{DeliveryLink, Room};
    use crate::transport::MemoryNetwork;
    use crate::utils::{MessengerError, RoomError};
    use std::sync::Arc;
    use std::time::Duration;

    fn link() -> DeliveryLink {
        DeliveryLink {
            dialer: Arc::new(MemoryNetwork::new()),
            conversation_port: 10051,
            io_timeout: Duration::from_secs(1),
            retry_interval: Duration::from_secs(3600),
        }
    }

    async fn push(room_id: Uuid, messages: &[Message]) -> DataConn<tokio::io::DuplexStream> {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let mut client = DataConn::new(client);
        client.write_bytes(room_id.as_bytes()).unwrap();
        client.write_int(messages.len() as u64).unwrap();
        for message in messages {
            client.write_struct(message).unwrap();
        }
        client.flush().await.unwrap();
        client.close().await.unwrap();
        DataConn::new(server)
    }

    #[tokio::test]
    async fn test_mixed_batch() {
        let bob = Identity::with_address("bob.memory").unwrap();
        let mallory = Identity::with_address("mallory.memory").unwrap();
        let room = Room::new(
            Identity::with_address("alice.memory").unwrap(),
            Uuid::new_v4(),
            vec![bob.remote()],
            link(),
        );
        let store = Store::new();
        store.register_room(Arc::clone(&room)).unwrap();

        let first = Message::text(&bob, "one").unwrap();
        let mut tampered = Message::text(&bob, "two").unwrap();
        tampered.content = b"evil".to_vec();
        let stranger = Message::text(&mallory, "three").unwrap();
        let last = Message::text(&bob, "four").unwrap();

        let mut conn = push(
            room.id(),
            &[first.clone(), tampered, stranger, first.clone(), last.clone()],
        )
        .await;
        let summary = receive_push(&mut conn, &store).await.unwrap();

        assert_eq!(summary.accepted, 2);
        assert_eq!(summary.duplicates, 1);
        assert_eq!(summary.rejected, 2);
        assert_eq!(room.messages(0), vec![first, last]);
    }

    #[tokio::test]
    async fn test_unknown_room() {
        let store = Store::new();
        let mut conn = push(Uuid::new_v4(), &[]).await;

        let err = receive_push(&mut conn, &store).await.unwrap_err();
        assert!(matches!(err, MessengerError::Room(RoomError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_truncated_push_keeps_earlier_messages() {
        let bob = Identity::with_address("bob.memory").unwrap();
        let room = Room::new(
            Identity::with_address("alice.memory").unwrap(),
            Uuid::new_v4(),
            vec![bob.remote()],
            link(),
        );
        let store = Store::new();
        store.register_room(Arc::clone(&room)).unwrap();

        let (client, server) = tokio::io::duplex(64 * 1024);
        let mut client = DataConn::new(client);
        client.write_bytes(room.id().as_bytes()).unwrap();
        client.write_int(3).unwrap();
        client.write_struct(&Message::text(&bob, "only one").unwrap()).unwrap();
        client.flush().await.unwrap();
        client.close().await.unwrap();

        let mut conn = DataConn::new(server);
        let err = receive_push(&mut conn, &store).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(room.message_count(), 1);
    }
}
