//! Wire protocols spoken between daemons: the contact-exchange handshake on
//! the contact port and message pushes on the conversation port.

pub mod contact;
pub mod conversation;

pub use contact::{initiate, respond, signed_bytes, ContactRequest, ContactResponse};
pub use conversation::{receive_push, PushSummary};
