//! Error types and handling for the room daemon.
//!
//! Errors are grouped by the layer that raises them. The delivery engine only
//! ever logs errors; handshake and identity errors travel back to whoever asked
//! for the operation.

use thiserror::Error;

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, MessengerError>;

/// Top-level error for all daemon operations
#[derive(Error, Debug, Clone)]
pub enum MessengerError {
    /// Identity creation and fingerprint errors
    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    /// Contact-exchange handshake errors
    #[error("Handshake error: {0}")]
    Handshake(#[from] HandshakeError),

    /// Framing and connection errors
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Room and delivery precondition errors
    #[error("Room error: {0}")]
    Room(#[from] RoomError),

    /// Configuration and I/O errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Snapshot serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// State file read and write failures
    #[error("Storage error: {path}: {reason}")]
    Storage { path: String, reason: String },
}

/// Identity provisioning and parsing errors
#[derive(Error, Debug, Clone)]
pub enum IdentityError {
    /// No rendezvous address could be obtained from the onion network
    #[error("Rendezvous provisioning failed: {reason}")]
    Provisioning { reason: String },

    /// Fingerprint does not decode into a public key and an address
    #[error("Malformed fingerprint '{fingerprint}': {reason}")]
    MalformedFingerprint { fingerprint: String, reason: String },

    /// Invalid key material
    #[error("Invalid key: {reason}")]
    InvalidKey { reason: String },
}

/// Contact-exchange errors
#[derive(Error, Debug, Clone)]
pub enum HandshakeError {
    /// The responder's signature did not verify under the contact key
    #[error("Signature from contact {contact} failed verification")]
    Authentication { contact: String },

    /// No local contact identity matches the requested fingerprint
    #[error("Unknown contact identity: {fingerprint}")]
    UnknownContact { fingerprint: String },

    /// The handshake did not finish in time
    #[error("Handshake with {contact} timed out")]
    Timeout { contact: String },
}

/// Framing and connection errors
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    /// Underlying stream failure
    #[error("I/O failure: {reason}")]
    Io { reason: String },

    /// Could not open a connection to a rendezvous address
    #[error("Dial to {address}:{port} failed: {reason}")]
    Dial {
        address: String,
        port: u16,
        reason: String,
    },

    /// Malformed or undersized record
    #[error("Decode failure: {reason}")]
    Decode { reason: String },

    /// Record length prefix above the accepted maximum
    #[error("Record too large: {size} bytes (max: {max})")]
    RecordTooLarge { size: usize, max: usize },

    /// An inbound connection did not finish within its time limit
    #[error("Inbound connection timed out after {seconds}s")]
    Timeout { seconds: u64 },

    /// The enclosing room scope was cancelled mid-operation
    #[error("Operation cancelled")]
    Cancelled,
}

/// Room-level errors
#[derive(Error, Debug, Clone)]
pub enum RoomError {
    /// A peer without an owning room was asked to deliver
    #[error("Peer has no owning room")]
    NoRoom,

    /// No registered room has this id
    #[error("Room not found: {room_id}")]
    NotFound { room_id: String },

    /// A room with this id is already registered
    #[error("Room already exists: {room_id}")]
    AlreadyExists { room_id: String },

    /// Message sender is not a member of the room
    #[error("Unknown sender: {sender}")]
    UnknownSender { sender: String },

    /// Message signature did not verify under the sender's room key
    #[error("Invalid signature from {sender}")]
    InvalidSignature { sender: String },
}

/// Configuration and setup errors
#[derive(Error, Debug, Clone)]
pub enum ConfigError {
    /// Missing required configuration
    #[error("Missing configuration: {field}")]
    MissingField { field: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for {field}: {value}")]
    InvalidValue { field: String, value: String },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    /// Configuration parsing error
    #[error("Configuration parse error: {reason}")]
    ParseError { reason: String },

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Directory creation failure
    #[error("Failed to create directory: {path}")]
    DirectoryCreation { path: String },
}

impl MessengerError {
    /// Returns true if a later delivery pass should simply try again.
    ///
    /// Decode failures count as transport failures here.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport(
                TransportError::Io { .. }
                    | TransportError::Dial { .. }
                    | TransportError::Decode { .. }
                    | TransportError::RecordTooLarge { .. }
                    | TransportError::Timeout { .. }
            ) | Self::Handshake(HandshakeError::Timeout { .. })
        )
    }

    /// Returns true if this error indicates forged or tampered data
    pub fn is_security_violation(&self) -> bool {
        matches!(
            self,
            Self::Handshake(HandshakeError::Authentication { .. })
                | Self::Room(RoomError::InvalidSignature { .. })
        )
    }

    pub(crate) fn decode<S: Into<String>>(reason: S) -> Self {
        TransportError::Decode {
            reason: reason.into(),
        }
        .into()
    }
}

impl From<std::io::Error> for MessengerError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof => Self::decode(format!("truncated record: {err}")),
            _ => Self::Transport(TransportError::Io {
                reason: err.to_string(),
            }),
        }
    }
}

impl From<serde_json::Error> for MessengerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<bincode::Error> for MessengerError {
    fn from(err: bincode::Error) -> Self {
        Self::decode(err.to_string())
    }
}
