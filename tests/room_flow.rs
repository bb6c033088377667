//! End-to-end room flows between daemons on an in-process onion network.

use onionroom::room::{Command, ContentType, Message};
use onionroom::transport::{DataConn, Dialer, MemoryNetwork, MemoryNode};
use onionroom::utils::FormationPolicy;
use onionroom::{Daemon, DaemonConfig, Identity, MessengerError};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

struct Peer {
    daemon: Daemon,
    node: Arc<MemoryNode>,
}

fn config(formation: FormationPolicy) -> DaemonConfig {
    let mut config = DaemonConfig::default();
    config.delivery.retry_interval = 1;
    config.delivery.handshake_timeout = 5;
    config.network.connect_timeout = 5;
    config.rooms.formation = formation;
    config
}

fn start(daemon: Daemon, node: Arc<MemoryNode>) -> Peer {
    let config = daemon.config().clone();

    let contacts = node.listen(config.network.contact_port);
    let serving = daemon.clone();
    tokio::spawn(async move { serving.serve_contacts(contacts).await });

    let conversations = node.listen(config.network.conversation_port);
    let serving = daemon.clone();
    tokio::spawn(async move { serving.serve_conversations(conversations).await });

    Peer { daemon, node }
}

fn spawn_peer(network: &MemoryNetwork, formation: FormationPolicy) -> Peer {
    let node = Arc::new(network.node());
    let daemon = Daemon::new(config(formation), node.clone(), Arc::new(network.clone()));
    start(daemon, node)
}

async fn eventually<F: Fn() -> bool>(what: &str, check: F) {
    for _ in 0..100 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("timed out waiting for {what}");
}

fn texts(peer: &Peer, room: &Uuid) -> Vec<String> {
    peer.daemon
        .list_messages(room, 0)
        .unwrap()
        .iter()
        .filter(|m| m.as_command().is_none())
        .map(|m| m.content_text())
        .collect()
}

#[tokio::test]
async fn test_two_party_room() {
    let network = MemoryNetwork::new();
    let alice = spawn_peer(&network, FormationPolicy::Atomic);
    let bob = spawn_peer(&network, FormationPolicy::Atomic);

    let contact = bob.daemon.create_contact().await.unwrap();
    let room = alice.daemon.create_room(&[contact]).await.unwrap();

    let bob_info = bob.daemon.room_info(&room).unwrap();
    let alice_info = alice.daemon.room_info(&room).unwrap();
    assert_eq!(bob_info.peers[0].fingerprint, alice_info.fingerprint);
    assert_eq!(alice_info.peers[0].fingerprint, bob_info.fingerprint);

    alice.daemon.send_message(&room, "hello bob").await.unwrap();
    eventually("bob to receive", || texts(&bob, &room) == ["hello bob"]).await;

    bob.daemon.send_message(&room, "hello alice").await.unwrap();
    eventually("alice to receive", || {
        texts(&alice, &room) == ["hello bob", "hello alice"]
    })
    .await;

    assert!(alice.daemon.room_info(&room).unwrap().peers[0].queued == 0);
}

#[tokio::test]
async fn test_three_party_mesh() {
    let network = MemoryNetwork::new();
    let alice = spawn_peer(&network, FormationPolicy::Atomic);
    let bob = spawn_peer(&network, FormationPolicy::Atomic);
    let carol = spawn_peer(&network, FormationPolicy::Atomic);

    let contacts = vec![
        bob.daemon.create_contact().await.unwrap(),
        carol.daemon.create_contact().await.unwrap(),
    ];
    let room = alice.daemon.create_room(&contacts).await.unwrap();

    for peer in [&bob, &carol] {
        eventually("join announcements", || {
            peer.daemon.room_info(&room).unwrap().peers.len() == 2
        })
        .await;
    }

    bob.daemon.send_message(&room, "from bob").await.unwrap();
    eventually("carol to hear bob", || texts(&carol, &room) == ["from bob"]).await;
    eventually("alice to hear bob", || texts(&alice, &room) == ["from bob"]).await;
}

#[tokio::test]
async fn test_add_peer_to_existing_room() {
    let network = MemoryNetwork::new();
    let alice = spawn_peer(&network, FormationPolicy::Atomic);
    let bob = spawn_peer(&network, FormationPolicy::Atomic);
    let carol = spawn_peer(&network, FormationPolicy::Atomic);

    let bob_contact = bob.daemon.create_contact().await.unwrap();
    let room = alice.daemon.create_room(&[bob_contact]).await.unwrap();

    let carol_contact = carol.daemon.create_contact().await.unwrap();
    let carol_fp = alice.daemon.add_peer_to_room(&room, &carol_contact).await.unwrap();
    assert_eq!(carol_fp, carol.daemon.room_info(&room).unwrap().fingerprint);

    for peer in [&bob, &carol] {
        eventually("mesh after add", || {
            peer.daemon.room_info(&room).unwrap().peers.len() == 2
        })
        .await;
    }

    carol.daemon.send_message(&room, "hi all").await.unwrap();
    eventually("bob to hear carol", || texts(&bob, &room) == ["hi all"]).await;
}

#[tokio::test]
async fn test_offline_peer_gets_queued_messages() {
    let network = MemoryNetwork::new();
    let alice = spawn_peer(&network, FormationPolicy::Atomic);
    let bob = spawn_peer(&network, FormationPolicy::Atomic);

    let contact = bob.daemon.create_contact().await.unwrap();
    let room = alice.daemon.create_room(&[contact]).await.unwrap();
    bob.node.set_offline(true);

    alice.daemon.send_message(&room, "one").await.unwrap();
    alice.daemon.send_message(&room, "two").await.unwrap();
    assert!(alice.daemon.room_info(&room).unwrap().peers[0].queued >= 2);

    bob.node.set_offline(false);
    eventually("queue to drain", || {
        alice.daemon.room_info(&room).unwrap().peers[0].queued == 0
    })
    .await;
    eventually("bob to catch up", || texts(&bob, &room) == ["one", "two"]).await;
}

#[tokio::test]
async fn test_unknown_contact_fails_atomic_room() {
    let network = MemoryNetwork::new();
    let alice = spawn_peer(&network, FormationPolicy::Atomic);
    let bob = spawn_peer(&network, FormationPolicy::Atomic);

    let known = bob.daemon.create_contact().await.unwrap();
    let unknown = Identity::generate(bob.node.as_ref()).await.unwrap().fingerprint();

    let err = alice.daemon.create_room(&[known, unknown]).await.unwrap_err();
    assert!(err.is_retryable());
    assert!(alice.daemon.rooms().is_empty());
}

#[tokio::test]
async fn test_best_effort_keeps_reachable_members() {
    let network = MemoryNetwork::new();
    let alice = spawn_peer(&network, FormationPolicy::BestEffort);
    let bob = spawn_peer(&network, FormationPolicy::Atomic);
    let carol = spawn_peer(&network, FormationPolicy::Atomic);

    let contacts = vec![
        bob.daemon.create_contact().await.unwrap(),
        carol.daemon.create_contact().await.unwrap(),
    ];
    carol.node.set_offline(true);

    let room = alice.daemon.create_room(&contacts).await.unwrap();
    let info = alice.daemon.room_info(&room).unwrap();
    assert_eq!(info.peers.len(), 1);
    assert_eq!(info.peers[0].fingerprint, bob.daemon.room_info(&room).unwrap().fingerprint);
    assert!(carol.daemon.rooms().is_empty());
}

#[tokio::test]
async fn test_malformed_fingerprint_rejected_before_dialing() {
    let network = MemoryNetwork::new();
    let alice = spawn_peer(&network, FormationPolicy::Atomic);

    let err = alice
        .daemon
        .create_room(&["not a fingerprint".to_string()])
        .await
        .unwrap_err();
    assert!(matches!(err, MessengerError::Identity(_)));
    assert_eq!(network.dial_attempts(), 0);
}

#[tokio::test]
async fn test_file_announcement_reaches_members() {
    let network = MemoryNetwork::new();
    let alice = spawn_peer(&network, FormationPolicy::Atomic);
    let bob = spawn_peer(&network, FormationPolicy::Atomic);

    let contact = bob.daemon.create_contact().await.unwrap();
    let room = alice.daemon.create_room(&[contact]).await.unwrap();
    let blob_id = Uuid::new_v4();
    alice
        .daemon
        .send_file(&room, "minutes.txt", Some("text/plain".to_string()), 512, blob_id)
        .await
        .unwrap();

    let is_file = |m: &Message| m.meta.content_type == ContentType::File;
    eventually("file message to arrive", || {
        bob.daemon.list_messages(&room, 0).unwrap().iter().any(is_file)
    })
    .await;

    let received = bob.daemon.list_messages(&room, 0).unwrap();
    let file = received.iter().find(|m| is_file(*m)).unwrap();
    assert_eq!(file.content_text(), "minutes.txt");
    assert_eq!(file.meta.content_info.blob_id, Some(blob_id));
    assert_eq!(file.meta.content_info.size, 512);

    let alice_room = alice.daemon.store().require_room(&room).unwrap();
    assert!(file.verify(&alice_room.identity().remote()));
}

#[tokio::test]
async fn test_rename_reaches_members() {
    let network = MemoryNetwork::new();
    let alice = spawn_peer(&network, FormationPolicy::Atomic);
    let bob = spawn_peer(&network, FormationPolicy::Atomic);

    let contact = bob.daemon.create_contact().await.unwrap();
    let room = alice.daemon.create_room(&[contact]).await.unwrap();
    alice.daemon.rename_room(&room, "Book club").await.unwrap();

    assert_eq!(alice.daemon.room_info(&room).unwrap().name.as_deref(), Some("Book club"));
    eventually("rename to arrive", || {
        bob.daemon.room_info(&room).unwrap().name.as_deref() == Some("Book club")
    })
    .await;

    let last = bob.daemon.list_messages(&room, 1).unwrap();
    assert_eq!(last[0].as_command(), Some(Command::Name("Book club".to_string())));
}

#[tokio::test]
async fn test_deleted_room_stops_retrying() {
    let network = MemoryNetwork::new();
    let alice = spawn_peer(&network, FormationPolicy::Atomic);
    let bob = spawn_peer(&network, FormationPolicy::Atomic);

    let contact = bob.daemon.create_contact().await.unwrap();
    let room = alice.daemon.create_room(&[contact]).await.unwrap();
    bob.node.set_offline(true);
    alice.daemon.send_message(&room, "never delivered").await.unwrap();

    alice.daemon.delete_room(&room).unwrap();
    assert!(alice.daemon.room_info(&room).is_err());

    let attempts = network.dial_attempts();
    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert_eq!(network.dial_attempts(), attempts);
}

#[tokio::test]
async fn test_restart_resumes_delivery() {
    let network = MemoryNetwork::new();
    let alice = spawn_peer(&network, FormationPolicy::Atomic);
    let bob = spawn_peer(&network, FormationPolicy::Atomic);

    let contact = bob.daemon.create_contact().await.unwrap();
    let room = alice.daemon.create_room(&[contact]).await.unwrap();
    bob.node.set_offline(true);
    alice.daemon.send_message(&room, "survives restart").await.unwrap();

    let snapshot = alice.daemon.snapshot();
    let node = Arc::clone(&alice.node);
    alice.daemon.shutdown();
    drop(alice);

    let restored = Daemon::restore(
        config(FormationPolicy::Atomic),
        node.clone(),
        Arc::new(network.clone()),
        snapshot,
    );
    let alice = start(restored, node);
    assert!(alice.daemon.room_info(&room).unwrap().peers[0].queued >= 1);

    bob.node.set_offline(false);
    eventually("restored queue to drain", || {
        texts(&bob, &room) == ["survives restart"]
    })
    .await;

    bob.daemon.send_message(&room, "welcome back").await.unwrap();
    eventually("restored alice to receive", || {
        texts(&alice, &room) == ["survives restart", "welcome back"]
    })
    .await;
}

#[tokio::test]
async fn test_tampered_push_rejected_per_message() {
    let network = MemoryNetwork::new();
    let alice = spawn_peer(&network, FormationPolicy::Atomic);
    let bob = spawn_peer(&network, FormationPolicy::Atomic);

    let contact = bob.daemon.create_contact().await.unwrap();
    let room = alice.daemon.create_room(&[contact]).await.unwrap();
    let alice_room = alice.daemon.store().require_room(&room).unwrap();
    let bob_address = alice_room.peers()[0].remote().address().to_string();

    let genuine = Message::text(alice_room.identity(), "genuine").unwrap();
    let mut tampered = Message::text(alice_room.identity(), "honest").unwrap();
    tampered.content = b"altered".to_vec();

    let port = alice.daemon.config().network.conversation_port;
    let mut conn = DataConn::new(network.dial(&bob_address, port).await.unwrap());
    conn.write_bytes(room.as_bytes()).unwrap();
    conn.write_int(2).unwrap();
    conn.write_struct(&tampered).unwrap();
    conn.write_struct(&genuine).unwrap();
    conn.flush().await.unwrap();
    conn.close().await.unwrap();

    eventually("genuine message to land", || texts(&bob, &room) == ["genuine"]).await;
}
