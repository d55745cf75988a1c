//! Wire messages exchanged between the host and dialog contexts.
//!
//! Before a session exists the two sides trade three plaintext-tagged
//! handshake payloads. Afterwards every message is an [`Envelope`]: the
//! lifecycle message is only ever present inside `data`.
//!
//! ```text
//! dialog                                   host
//!   │ KeyAnnouncement { publicKey }          │
//!   │───────────────────────────────────────>│
//!   │      KeyReply { publicKey, passphrase }│
//!   │<───────────────────────────────────────│
//!   │ SealedRequest { lifecycle }            │
//!   │───────────────────────────────────────>│
//!   │          Envelope { data, token } ...  │
//!   │<══════════════════════════════════════>│
//! ```
//!
//! # Encoding
//!
//! Wire messages are CBOR maps with camelCase keys and no variant tag. The
//! variant is recovered from the set of keys present, which keeps the shapes
//! identical to what the peer sees on the channel.
//!
//! # Security
//!
//! - **Bounded Deserialization**: [`WireMessage::decode`] checks the size
//!   limit before CBOR parsing begins.
//! - **Debug Redaction**: wrapped keys, sealed tokens and ciphertext are
//!   printed as lengths only.

use bytes::{BufMut, Bytes};
use serde::{Deserialize, Serialize};

use crate::{
    MAX_PAYLOAD_SIZE,
    errors::{ProtocolError, Result},
};

/// Size of a public key on the wire
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Size of a payload IV
pub const IV_SIZE: usize = 12;

/// Dialog's opening move: its freshly generated public key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyAnnouncement {
    /// Dialog public key
    pub public_key: [u8; PUBLIC_KEY_SIZE],
}

/// Host's answer to a [`KeyAnnouncement`].
///
/// `passphrase` is the session key wrapped under the dialog's public key.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyReply {
    /// Host public key
    pub public_key: [u8; PUBLIC_KEY_SIZE],
    /// Wrapped session key
    pub passphrase: Vec<u8>,
}

impl std::fmt::Debug for KeyReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyReply")
            .field("public_key", &self.public_key)
            .field("passphrase", &format!("<redacted {} bytes>", self.passphrase.len()))
            .finish()
    }
}

/// Dialog's confirmation: the configuration request sealed to the host key.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SealedRequest {
    /// Sealed request token
    pub lifecycle: Vec<u8>,
}

impl std::fmt::Debug for SealedRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SealedRequest")
            .field("lifecycle", &format!("<redacted {} bytes>", self.lifecycle.len()))
            .finish()
    }
}

/// Post-handshake message.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Ciphertext of the JSON lifecycle message
    pub data: Vec<u8>,
    /// IV sealed to the receiver's public key
    pub token: Vec<u8>,
}

impl std::fmt::Debug for Envelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Envelope")
            .field("data", &format!("<{} bytes>", self.data.len()))
            .field("token", &format!("<redacted {} bytes>", self.token.len()))
            .finish()
    }
}

/// Everything that can travel over the channel.
///
/// # Invariants
///
/// - **Shape Discrimination**: variants are tried in declaration order, most
///   specific key set first, so a `KeyReply` is never mistaken for a
///   `KeyAnnouncement`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireMessage {
    /// Host → dialog handshake reply
    KeyReply(KeyReply),
    /// Dialog → host handshake opener
    KeyAnnouncement(KeyAnnouncement),
    /// Dialog → host handshake confirmation
    SealedRequest(SealedRequest),
    /// Encrypted lifecycle traffic
    Envelope(Envelope),
}

impl WireMessage {
    /// Short name for logging
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::KeyReply(_) => "KeyReply",
            Self::KeyAnnouncement(_) => "KeyAnnouncement",
            Self::SealedRequest(_) => "SealedRequest",
            Self::Envelope(_) => "Envelope",
        }
    }

    /// Encode to buffer
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::CborEncode`] if serialization fails.
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        let mut writer = dst.writer();
        ciborium::ser::into_writer(self, &mut writer)
            .map_err(|e| ProtocolError::CborEncode(e.to_string()))
    }

    /// Encode into a freshly allocated buffer
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::CborEncode`] if serialization fails, or
    /// [`ProtocolError::PayloadTooLarge`] if the result would be rejected by
    /// the receiver anyway.
    pub fn to_bytes(&self) -> Result<Bytes> {
        let mut buf = Vec::new();
        self.encode(&mut buf)?;
        if buf.len() > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge { size: buf.len(), max: MAX_PAYLOAD_SIZE });
        }
        Ok(Bytes::from(buf))
    }

    /// Decode from bytes
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - `bytes.len() > MAX_PAYLOAD_SIZE`
    /// - the bytes are not CBOR, or match none of the known shapes
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge { size: bytes.len(), max: MAX_PAYLOAD_SIZE });
        }

        ciborium::de::from_reader(bytes).map_err(|e| ProtocolError::CborDecode(e.to_string()))
    }
}

impl From<KeyAnnouncement> for WireMessage {
    fn from(value: KeyAnnouncement) -> Self {
        Self::KeyAnnouncement(value)
    }
}

impl From<KeyReply> for WireMessage {
    fn from(value: KeyReply) -> Self {
        Self::KeyReply(value)
    }
}

impl From<SealedRequest> for WireMessage {
    fn from(value: SealedRequest) -> Self {
        Self::SealedRequest(value)
    }
}

impl From<Envelope> for WireMessage {
    fn from(value: Envelope) -> Self {
        Self::Envelope(value)
    }
}
