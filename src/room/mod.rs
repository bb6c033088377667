//! Rooms, their signed messages and per-member delivery queues.

pub mod message;
pub mod model;
pub mod peer;

pub use message::{Command, ContentInfo, ContentType, Message, MessageMeta};
pub use model::{PeerInfo, PeerRecord, Received, Room, RoomInfo, RoomRecord};
pub use peer::{DeliveryLink, MessagingPeer};
