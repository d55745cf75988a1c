//! An established, authenticated session between one host and one dialog.
//!
//! A [`Session`] is produced by a successful handshake and owned by the
//! endpoint that ran it. It holds everything needed to exchange envelopes
//! with exactly one peer:
//!
//! - the local key pair (opens IV tokens addressed to us)
//! - the peer public key (seals IV tokens addressed to the peer)
//! - the session cipher (bulk payloads)
//! - the peer's context handle and origin (inbound filter, outbound target)
//!
//! # Envelope pipeline
//!
//! ```text
//! seal:  Lifecycle ─json─> bytes ─AES-GCM(key, iv)─> data
//!                                      iv ─seal(peer)─> token
//! open:  check source/origin ─> decode Envelope ─> open(token) ─> iv
//!        ─> decrypt(data) ─> UTF-8 ─> JSON ─> Lifecycle
//! ```
//!
//! Failures while opening affect only that message ([`MalformedMessage`]).
//! Failures while sealing are reported as [`SessionError::Crypto`] and the
//! owning endpoint closes the session.

use confdialog_proto::{Envelope, Lifecycle, WireMessage};

use crate::{
    crypto::{self, KeyPair, PublicKeyBytes, SessionCipher, SessionKey},
    env::Environment,
    error::{CryptoError, MalformedMessage, SessionError},
    transport::{ContextId, Delivery, Origin, Outbound},
};

/// Where the paired peer lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerAddress {
    /// Peer context
    pub context: ContextId,
    /// Peer origin
    pub origin: Origin,
}

impl PeerAddress {
    /// Reject deliveries that did not come from this peer
    ///
    /// # Errors
    ///
    /// Returns [`MalformedMessage::WrongOrigin`] or
    /// [`MalformedMessage::WrongSource`].
    pub fn check(&self, delivery: &Delivery) -> Result<(), MalformedMessage> {
        if delivery.origin != self.origin {
            return Err(MalformedMessage::WrongOrigin(delivery.origin.to_string()));
        }
        if delivery.source != self.context {
            return Err(MalformedMessage::WrongSource(delivery.source.to_string()));
        }
        Ok(())
    }
}

/// Established session state
pub struct Session {
    local: KeyPair,
    peer_public: PublicKeyBytes,
    cipher: SessionCipher,
    peer: PeerAddress,
}

impl Session {
    pub(crate) fn new(
        local: KeyPair,
        peer_public: PublicKeyBytes,
        key: SessionKey,
        peer: PeerAddress,
    ) -> Result<Self, CryptoError> {
        Ok(Self { local, peer_public, cipher: SessionCipher::new(key)?, peer })
    }

    /// The paired peer
    #[must_use]
    pub fn peer(&self) -> &PeerAddress {
        &self.peer
    }

    /// Fingerprint of the session key
    #[must_use]
    pub fn key_fingerprint(&self) -> [u8; 32] {
        self.cipher.key().fingerprint()
    }

    /// Our public key
    #[must_use]
    pub fn local_public(&self) -> PublicKeyBytes {
        self.local.public_bytes()
    }

    /// The peer's public key
    #[must_use]
    pub fn peer_public(&self) -> &PublicKeyBytes {
        &self.peer_public
    }

    /// Encrypt a lifecycle message for the peer
    ///
    /// # Errors
    ///
    /// - [`SessionError::Protocol`] if the message cannot be encoded
    /// - [`SessionError::Crypto`] if encryption fails; the session must not be
    ///   used afterwards
    pub fn seal(
        &mut self,
        message: &Lifecycle,
        env: &impl Environment,
    ) -> Result<Outbound, SessionError> {
        let plaintext = message.to_json_bytes()?;
        let (data, iv) = self.cipher.encrypt(&plaintext, env)?;
        let token = crypto::seal_iv(&iv, &self.peer_public, env)?;
        let payload = WireMessage::from(Envelope { data, token }).to_bytes()?;

        Ok(Outbound {
            target: self.peer.context.clone(),
            target_origin: self.peer.origin.clone(),
            payload,
        })
    }

    /// Decrypt a delivery from the peer
    ///
    /// # Errors
    ///
    /// Returns the reason the message must be dropped. The session remains
    /// usable.
    pub fn open(&mut self, delivery: &Delivery) -> Result<Lifecycle, MalformedMessage> {
        self.peer.check(delivery)?;

        let envelope = match WireMessage::decode(&delivery.payload)? {
            WireMessage::Envelope(envelope) => envelope,
            other => return Err(MalformedMessage::Unexpected { kind: other.kind().to_string() }),
        };

        let iv = crypto::open_iv(&envelope.token, &self.local)?;
        let plaintext = self.cipher.decrypt(&iv, &envelope.data)?;
        Ok(Lifecycle::from_json_bytes(&plaintext)?)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("peer", &self.peer)
            .field("local", &self.local)
            .field("peer_public", &hex::encode(self.peer_public))
            .field("cipher", &self.cipher)
            .finish()
    }
}
