//! # Onion Room
//!
//! Serverless multi-party rooms between daemons reachable only through onion
//! rendezvous addresses.
//!
//! ## Features
//!
//! - **Self-certifying identities**: an Ed25519 key bound to a rendezvous address,
//!   written as `base64url(public_key)@address`
//! - **Contact exchange**: a signed handshake that mints a fresh identity per room
//! - **Signed messages**: every message is verified against its author's room key
//! - **Store and forward**: per-peer queues delivered in batches, retried until
//!   the peer is reachable
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use onionroom::{Daemon, DaemonConfig};
//! use onionroom::transport::{SocksDialer, StaticProvisioner};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = DaemonConfig::default();
//!     let daemon = Daemon::new(
//!         config.clone(),
//!         Arc::new(StaticProvisioner::new("example.onion")),
//!         Arc::new(SocksDialer::new(config.network.socks_proxy)),
//!     );
//!     let contact = daemon.create_contact().await?;
//!     println!("Share this fingerprint: {contact}");
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`crypto`]: identities, fingerprints and signatures
//! - [`transport`]: record framing and the onion network seams
//! - [`room`]: messages, rooms and per-peer delivery queues
//! - [`protocol`]: the contact handshake and inbound message pushes
//! - [`store`]: the registry of contacts and rooms, and its snapshot
//! - [`daemon`]: the operator-facing operations and listeners
//! - [`utils`]: configuration and error handling

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::cargo)]
#![allow(clippy::module_name_repetitions)]

pub mod crypto;
pub mod daemon;
pub mod protocol;
pub mod room;
pub mod store;
pub mod transport;
pub mod utils;

// Re-export commonly used types for convenience
pub use crypto::{Identity, RemoteIdentity};
pub use daemon::Daemon;
pub use room::{Message, Room, RoomInfo};
pub use store::{Snapshot, Store};
pub use utils::{DaemonConfig, MessengerError, Result};

/// Default configuration values
pub mod defaults {
    /// Default SOCKS5 port of the local onion router
    pub const DEFAULT_SOCKS_PORT: u16 = 9050;

    /// Default port for contact handshakes
    pub const DEFAULT_CONTACT_PORT: u16 = 10050;

    /// Default port for message pushes
    pub const DEFAULT_CONVERSATION_PORT: u16 = 10051;

    /// Default seconds between delivery passes
    pub const DEFAULT_RETRY_INTERVAL: u64 = 30;

    /// Default handshake timeout in seconds
    pub const DEFAULT_HANDSHAKE_TIMEOUT: u64 = 60;
}
