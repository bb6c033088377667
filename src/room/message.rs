//! Signed room messages.
//!
//! A message is signed once, by its author's room-scoped key, over the
//! bincode encoding of its metadata followed by the raw content. It is never
//! modified afterwards; receivers verify it against the sender's fingerprint.

use crate::crypto::{Identity, RemoteIdentity};
use crate::utils::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Kind of payload a message carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContentType {
    /// UTF-8 chat text
    Text,
    /// Room control command, see [`Command`]
    Command,
    /// Reference to a file held by the attachment store
    File,
}

/// Hints describing the content
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentInfo {
    /// MIME type, if known
    pub mime: Option<String>,
    /// Size of the referenced data in bytes
    pub size: u64,
    /// Attachment id for `File` messages
    pub blob_id: Option<Uuid>,
}

/// Signed part of a message besides the content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMeta {
    /// Room-scoped fingerprint of the author
    pub sender: String,
    /// Creation time as claimed by the author
    pub time: DateTime<Utc>,
    /// Payload kind
    pub content_type: ContentType,
    /// Payload hints
    pub content_info: ContentInfo,
}

/// A signed, immutable room message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Signed metadata
    pub meta: MessageMeta,
    /// Opaque content bytes
    pub content: Vec<u8>,
    /// Ed25519 signature over the canonical bytes
    pub signature: Vec<u8>,
}

/// Commands carried by `Command` messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// A member with this room-scoped fingerprint is part of the room
    Join(String),
    /// The room's display name changed
    Name(String),
    /// Anything else, kept verbatim
    Unknown(String),
}

impl Message {
    /// Create and sign a message
    pub fn new_signed(
        author: &Identity,
        content_type: ContentType,
        content_info: ContentInfo,
        content: Vec<u8>,
    ) -> Result<Self> {
        let mut message = Self {
            meta: MessageMeta {
                sender: author.fingerprint(),
                time: Utc::now(),
                content_type,
                content_info,
            },
            content,
            signature: Vec::new(),
        };

        let bytes = message.signing_bytes()?;
        message.signature = author.sign(&bytes).to_vec();
        Ok(message)
    }

    /// Create a signed text message
    pub fn text(author: &Identity, text: &str) -> Result<Self> {
        let info = ContentInfo {
            mime: Some("text/plain".to_string()),
            size: text.len() as u64,
            blob_id: None,
        };
        Self::new_signed(author, ContentType::Text, info, text.as_bytes().to_vec())
    }

    /// Create a signed command message
    pub fn command(author: &Identity, command: &Command) -> Result<Self> {
        let text = command.to_string();
        let info = ContentInfo {
            mime: None,
            size: text.len() as u64,
            blob_id: None,
        };
        Self::new_signed(author, ContentType::Command, info, text.into_bytes())
    }

    /// Canonical bytes covered by the signature
    pub fn signing_bytes(&self) -> Result<Vec<u8>> {
        let mut bytes = bincode::serialize(&self.meta)?;
        bytes.extend_from_slice(&self.content);
        Ok(bytes)
    }

    /// Check the signature against the claimed sender's key
    pub fn verify(&self, sender: &RemoteIdentity) -> bool {
        if sender.fingerprint() != self.meta.sender {
            return false;
        }
        match self.signing_bytes() {
            Ok(bytes) => sender.verify(&bytes, &self.signature),
            Err(_) => false,
        }
    }

    /// Parse the content as a command, for `Command` messages
    pub fn as_command(&self) -> Option<Command> {
        if self.meta.content_type != ContentType::Command {
            return None;
        }
        std::str::from_utf8(&self.content).ok().map(Command::parse)
    }

    /// Content as text, lossily
    pub fn content_text(&self) -> String {
        String::from_utf8_lossy(&self.content).into_owned()
    }
}

impl Command {
    /// Parse command text of the form `<verb> <argument>`
    pub fn parse(text: &str) -> Self {
        match text.trim().split_once(' ') {
            Some(("join", fingerprint)) => Self::Join(fingerprint.trim().to_string()),
            Some(("name", name)) => Self::Name(name.trim().to_string()),
            _ => Self::Unknown(text.to_string()),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Join(fingerprint) => write!(f, "join {fingerprint}"),
            Self::Name(name) => write!(f, "name {name}"),
            Self::Unknown(text) => f.write_str(text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn author() -> Identity {
        Identity::with_address("author.onion").unwrap()
    }

    #[test]
    fn test_signed_message_verifies() {
        let author = author();
        let message = Message::text(&author, "hello room").unwrap();

        assert_eq!(message.meta.sender, author.fingerprint());
        assert_eq!(message.meta.content_info.size, 10);
        assert!(message.verify(&author.remote()));
    }

    #[test]
    fn test_tampering_breaks_signature() {
        let author = author();
        let message = Message::text(&author, "hello room").unwrap();

        let mut changed_content = message.clone();
        changed_content.content = b"hello moon".to_vec();
        assert!(!changed_content.verify(&author.remote()));

        let mut changed_time = message.clone();
        changed_time.meta.time = changed_time.meta.time + chrono::Duration::seconds(1);
        assert!(!changed_time.verify(&author.remote()));
    }

    #[test]
    fn test_wrong_sender_rejected() {
        let author = author();
        let other = Identity::with_address("other.onion").unwrap();
        let message = Message::text(&author, "hi").unwrap();

        assert!(!message.verify(&other.remote()));
    }

    #[test]
    fn test_commands() {
        let author = author();
        let join = Command::Join("key@peer.onion".to_string());
        let message = Message::command(&author, &join).unwrap();

        assert_eq!(message.meta.content_type, ContentType::Command);
        assert_eq!(message.as_command(), Some(join));
        assert_eq!(Command::parse("name  Book club "), Command::Name("Book club".to_string()));
        assert_eq!(Command::parse("dance"), Command::Unknown("dance".to_string()));
        assert_eq!(Message::text(&author, "join x").unwrap().as_command(), None);
    }

    #[test]
    fn test_wire_encoding_preserves_signature() {
        let author = author();
        let message = Message::text(&author, "over the wire").unwrap();

        let decoded: Message = bincode::deserialize(&bincode::serialize(&message).unwrap()).unwrap();
        assert_eq!(decoded, message);
        assert!(decoded.verify(&author.remote()));
    }
}
