//! Self-certifying identities and Ed25519 signatures.
//!
//! An [`Identity`] is a signing key bound to a rendezvous address on the onion
//! network. Its fingerprint, `base64url(public_key) + "@" + address`, is the
//! only thing a counterpart needs to dial it and to check its signatures.

use crate::transport::Provisioner;
use crate::utils::{IdentityError, MessengerError, Result};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use ed25519_dalek::{
    Signature, Signer, SigningKey, Verifier, VerifyingKey, PUBLIC_KEY_LENGTH, SECRET_KEY_LENGTH,
    SIGNATURE_LENGTH,
};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Separator between the encoded key and the address in a fingerprint
pub const FINGERPRINT_SEPARATOR: char = '@';

/// A local identity holding private key material
#[derive(Clone, Serialize, Deserialize)]
#[serde(try_from = "IdentityRecord", into = "IdentityRecord")]
pub struct Identity {
    signing_key: SigningKey,
    address: String,
}

/// Public half of an identity, as known by a counterpart
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RemoteIdentity {
    verifying_key: VerifyingKey,
    address: String,
}

/// Stored form of an [`Identity`]
#[derive(Serialize, Deserialize)]
struct IdentityRecord {
    key: String,
    address: String,
}

impl Identity {
    /// Generate a fresh keypair and acquire a rendezvous address for it
    ///
    /// # Errors
    ///
    /// Returns `IdentityError::Provisioning` if no address can be obtained
    pub async fn generate(provisioner: &dyn Provisioner) -> Result<Self> {
        let address = provisioner.acquire_address().await.map_err(|e| match e {
            MessengerError::Identity(IdentityError::Provisioning { .. }) => e,
            other => IdentityError::Provisioning {
                reason: other.to_string(),
            }
            .into(),
        })?;

        Self::with_address(address)
    }

    /// Generate a fresh keypair bound to an already known address
    pub fn with_address(address: impl Into<String>) -> Result<Self> {
        let address = address.into();
        validate_address(&address).map_err(|reason| IdentityError::Provisioning { reason })?;

        Ok(Self {
            signing_key: SigningKey::generate(&mut OsRng),
            address,
        })
    }

    /// Rebuild an identity from stored secret key bytes
    ///
    /// # Errors
    ///
    /// Returns `IdentityError::InvalidKey` if the secret key has the wrong length
    pub fn from_secret_bytes(secret_bytes: &[u8], address: impl Into<String>) -> Result<Self> {
        let bytes: [u8; SECRET_KEY_LENGTH] =
            secret_bytes.try_into().map_err(|_| IdentityError::InvalidKey {
                reason: format!(
                    "Invalid secret key length: expected {}, got {}",
                    SECRET_KEY_LENGTH,
                    secret_bytes.len()
                ),
            })?;

        let address = address.into();
        validate_address(&address).map_err(|reason| IdentityError::InvalidKey { reason })?;

        Ok(Self {
            signing_key: SigningKey::from_bytes(&bytes),
            address,
        })
    }

    /// Canonical external representation of this identity
    pub fn fingerprint(&self) -> String {
        format_fingerprint(&self.signing_key.verifying_key(), &self.address)
    }

    /// Rendezvous address this identity is reachable at
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Public key bytes
    pub fn public_key_bytes(&self) -> [u8; PUBLIC_KEY_LENGTH] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// The public half of this identity
    pub fn remote(&self) -> RemoteIdentity {
        RemoteIdentity {
            verifying_key: self.signing_key.verifying_key(),
            address: self.address.clone(),
        }
    }

    /// Sign arbitrary bytes
    pub fn sign(&self, data: &[u8]) -> [u8; SIGNATURE_LENGTH] {
        self.signing_key.sign(data).to_bytes()
    }
}

impl RemoteIdentity {
    /// Parse a fingerprint into a verifiable remote identity
    ///
    /// # Errors
    ///
    /// Returns `IdentityError::MalformedFingerprint` if the key or the address
    /// part does not decode
    pub fn parse(fingerprint: &str) -> Result<Self> {
        let malformed = |reason: &str| -> MessengerError {
            IdentityError::MalformedFingerprint {
                fingerprint: fingerprint.to_string(),
                reason: reason.to_string(),
            }
            .into()
        };

        let (encoded_key, address) = fingerprint
            .split_once(FINGERPRINT_SEPARATOR)
            .ok_or_else(|| malformed("missing '@' separator"))?;

        validate_address(address).map_err(|reason| malformed(&reason))?;

        let key_bytes = URL_SAFE_NO_PAD
            .decode(encoded_key)
            .map_err(|_| malformed("public key is not base64url"))?;
        let key_bytes: [u8; PUBLIC_KEY_LENGTH] = key_bytes
            .as_slice()
            .try_into()
            .map_err(|_| malformed("public key has the wrong length"))?;
        let verifying_key = VerifyingKey::from_bytes(&key_bytes)
            .map_err(|_| malformed("public key is not a valid Ed25519 point"))?;

        Ok(Self {
            verifying_key,
            address: address.to_string(),
        })
    }

    /// Canonical external representation of this identity
    pub fn fingerprint(&self) -> String {
        format_fingerprint(&self.verifying_key, &self.address)
    }

    /// Rendezvous address to dial
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Check a signature over `data`; never fails, only answers
    pub fn verify(&self, data: &[u8], signature: &[u8]) -> bool {
        let Ok(bytes) = <[u8; SIGNATURE_LENGTH]>::try_from(signature) else {
            return false;
        };
        self.verifying_key
            .verify(data, &Signature::from_bytes(&bytes))
            .is_ok()
    }
}

fn format_fingerprint(key: &VerifyingKey, address: &str) -> String {
    format!(
        "{}{}{}",
        URL_SAFE_NO_PAD.encode(key.as_bytes()),
        FINGERPRINT_SEPARATOR,
        address
    )
}

fn validate_address(address: &str) -> std::result::Result<(), String> {
    if address.is_empty() {
        return Err("empty rendezvous address".to_string());
    }
    if address
        .chars()
        .any(|c| c.is_whitespace() || c == FINGERPRINT_SEPARATOR)
    {
        return Err(format!("invalid rendezvous address '{address}'"));
    }
    Ok(())
}

impl FromStr for RemoteIdentity {
    type Err = MessengerError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for RemoteIdentity {
    type Error = MessengerError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<RemoteIdentity> for String {
    fn from(remote: RemoteIdentity) -> Self {
        remote.fingerprint()
    }
}

impl TryFrom<IdentityRecord> for Identity {
    type Error = MessengerError;

    fn try_from(record: IdentityRecord) -> Result<Self> {
        let secret = URL_SAFE_NO_PAD
            .decode(&record.key)
            .map_err(|e| IdentityError::InvalidKey {
                reason: e.to_string(),
            })?;
        Self::from_secret_bytes(&secret, record.address)
    }
}

impl From<Identity> for IdentityRecord {
    fn from(identity: Identity) -> Self {
        Self {
            key: URL_SAFE_NO_PAD.encode(identity.signing_key.to_bytes()),
            address: identity.address,
        }
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("fingerprint", &self.fingerprint())
            .field("signing_key", &"[REDACTED]")
            .finish()
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.fingerprint())
    }
}

impl fmt::Debug for RemoteIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RemoteIdentity")
            .field(&self.fingerprint())
            .finish()
    }
}

impl fmt::Display for RemoteIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.fingerprint())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MemoryNetwork, StaticProvisioner};

    fn identity(address: &str) -> Identity {
        Identity::with_address(address).unwrap()
    }

    #[test]
    fn test_sign_and_verify() {
        let alice = identity("alice.onion");
        let message = b"Hello, room!";

        let signature = alice.sign(message);
        assert!(alice.remote().verify(message, &signature));
        assert!(!alice.remote().verify(b"Hello, world!", &signature));
    }

    #[test]
    fn test_signatures_do_not_cross_identities() {
        let alice = identity("alice.onion");
        let bob = identity("bob.onion");

        let signature = alice.sign(b"payload");
        assert!(!bob.remote().verify(b"payload", &signature));
    }

    #[test]
    fn test_verify_rejects_short_signature() {
        let alice = identity("alice.onion");
        assert!(!alice.remote().verify(b"payload", &[0u8; 12]));
    }

    #[test]
    fn test_fingerprint_round_trip() {
        let alice = identity("alice.onion");
        let fingerprint = alice.fingerprint();

        let parsed = RemoteIdentity::parse(&fingerprint).unwrap();
        assert_eq!(parsed.fingerprint(), fingerprint);
        assert_eq!(parsed.address(), "alice.onion");
        assert_eq!(parsed, alice.remote());
    }

    #[test]
    fn test_fingerprint_layout() {
        let alice = identity("alice.onion");
        let fingerprint = alice.fingerprint();
        let (key, address) = fingerprint.split_once('@').unwrap();

        assert_eq!(address, "alice.onion");
        assert_eq!(URL_SAFE_NO_PAD.decode(key).unwrap(), alice.public_key_bytes());
    }

    #[test]
    fn test_malformed_fingerprints() {
        let valid_key = URL_SAFE_NO_PAD.encode(identity("x.onion").public_key_bytes());

        for input in [
            "no-separator".to_string(),
            format!("{valid_key}@"),
            "!!!@host.onion".to_string(),
            format!("{}@host.onion", URL_SAFE_NO_PAD.encode([7u8; 16])),
            format!("{valid_key}@bad host"),
        ] {
            let err = RemoteIdentity::parse(&input).unwrap_err();
            assert!(
                matches!(err, MessengerError::Identity(IdentityError::MalformedFingerprint { .. })),
                "{input} gave {err:?}"
            );
        }
    }

    #[test]
    fn test_identity_serialization_keeps_key() {
        let alice = identity("alice.onion");
        let json = serde_json::to_string(&alice).unwrap();
        let restored: Identity = serde_json::from_str(&json).unwrap();

        assert_eq!(restored.fingerprint(), alice.fingerprint());
        let signature = restored.sign(b"after restore");
        assert!(alice.remote().verify(b"after restore", &signature));
    }

    #[test]
    fn test_remote_serializes_as_fingerprint() {
        let remote = identity("alice.onion").remote();
        let json = serde_json::to_string(&remote).unwrap();
        assert_eq!(json, format!("\"{}\"", remote.fingerprint()));
    }

    #[test]
    fn test_debug_redacts_key() {
        let alice = identity("alice.onion");
        let debug = format!("{alice:?}");
        assert!(debug.contains("REDACTED"));
        assert!(!debug.contains(&URL_SAFE_NO_PAD.encode(alice.signing_key.to_bytes())));
    }

    #[tokio::test]
    async fn test_generate_uses_provisioner() {
        let provisioner = StaticProvisioner::new("static.onion");
        let identity = Identity::generate(&provisioner).await.unwrap();
        assert_eq!(identity.address(), "static.onion");

        let network = MemoryNetwork::new();
        let node = network.node();
        let a = Identity::generate(&node).await.unwrap();
        let b = Identity::generate(&node).await.unwrap();
        assert_ne!(a.address(), b.address());
    }

    #[tokio::test]
    async fn test_generate_provisioning_failure() {
        let network = MemoryNetwork::new();
        let node = network.node();
        node.fail_provisioning(true);

        let err = Identity::generate(&node).await.unwrap_err();
        assert!(matches!(err, MessengerError::Identity(IdentityError::Provisioning { .. })));
    }
}
