//! Self-certifying identities.
//!
//! Contact identities and room-scoped identities share one type; what differs
//! is only who owns them and how long they live.

pub mod identity;

pub use identity::*;
