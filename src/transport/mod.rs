//! Transport layer for room traffic.
//!
//! Record framing shared by the handshake and delivery protocols, the
//! collaborator traits for the onion network, and two implementations of
//! them: an in-process network and a SOCKS5-backed one.

pub mod framing;
pub mod memory;
pub mod network;
pub mod socks;

pub use framing::{DataConn, MAX_RECORD_SIZE};
pub use memory::{MemoryListener, MemoryNetwork, MemoryNode};
pub use network::*;
pub use socks::{SocksDialer, StaticProvisioner};
