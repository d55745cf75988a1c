//! Error types for the confdialog protocol core.
//!
//! Errors are split by how far they are allowed to travel:
//!
//! - [`CryptoError`]: a cryptographic primitive failed. Fatal to the session
//!   when it happens on our own outbound path.
//! - [`MalformedMessage`]: an inbound message was not deliverable. Dropped
//!   and logged by the endpoint; never returned to the caller.
//! - [`SessionError`]: what endpoint operations return. Carries the fatal
//!   cases above plus misuse (wrong state, overlapping requests).
//!
//! Validation failures are not errors at all: they travel back to the
//! dialog as a [`MessageTree`](confdialog_proto::MessageTree) inside
//! `SaveFailure`.

use std::{fmt, time::Duration};

use confdialog_proto::{LifecycleKind, ProtocolError};
use thiserror::Error;

use crate::{handshake::HandshakeState, storage::StorageError, validation::WalkError};

/// Failures of the cryptographic channel.
///
/// None of these are transient: retrying with the same inputs fails the
/// same way.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Key agreement produced an all-zero secret (low-order peer key)
    #[error("peer public key is not contributory")]
    WeakPeerKey,

    /// HKDF refused the requested output length
    #[error("key derivation failed")]
    KeyDerivation,

    /// AEAD encryption failed
    #[error("encryption failed")]
    Encrypt,

    /// AEAD decryption failed (wrong key, wrong IV, or tampered data)
    #[error("decryption failed")]
    Decrypt,

    /// Token or ciphertext has the wrong size
    #[error("malformed {what}: expected {expected} bytes, got {actual}")]
    Malformed {
        /// What was being parsed
        what: &'static str,
        /// Expected size (minimum for variable-length input)
        expected: usize,
        /// Actual size
        actual: usize,
    },

    /// Plaintext too large for a sealed token
    #[error("sealed plaintext too large: {size} bytes exceeds maximum {max}")]
    PlaintextTooLarge {
        /// Actual size
        size: usize,
        /// Maximum size
        max: usize,
    },

    /// The environment produced an IV already used under this key
    #[error("IV reuse detected under the current session key")]
    IvReuse,

    /// The session issued or accepted its full budget of IVs
    #[error("session exhausted after {limit} IVs")]
    SessionExhausted {
        /// IV budget of the session
        limit: usize,
    },
}

/// Why an inbound message was dropped.
///
/// Dropping is silent towards the peer; the reason is only logged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MalformedMessage {
    /// Sender context is not the paired peer
    #[error("message from unpaired source {0}")]
    WrongSource(String),

    /// Sender origin is not the paired origin
    #[error("message from unexpected origin {0}")]
    WrongOrigin(String),

    /// Wire or lifecycle decoding failed
    #[error("undecodable message: {0}")]
    Undecodable(#[from] ProtocolError),

    /// Opening the IV or decrypting the body failed
    #[error("unreadable message: {0}")]
    Unreadable(#[from] CryptoError),

    /// Well-formed message that makes no sense in the current state
    #[error("unexpected {kind} message")]
    Unexpected {
        /// Name of the message
        kind: String,
    },
}

/// Errors returned by handshake and lifecycle endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Operation not allowed in the current state
    InvalidState {
        /// State when the operation was attempted
        state: HandshakeState,
        /// Operation that was attempted
        operation: String,
    },

    /// Handshake did not complete within the configured timeout
    HandshakeTimeout {
        /// How long we waited
        elapsed: Duration,
    },

    /// A request of this kind is already waiting for its response
    RequestInFlight(LifecycleKind),

    /// The current host is not allowed to open the dialog
    ProhibitedHost(String),

    /// A display path names something that is not in the schema
    InvalidDisplayPath(String),

    /// Cryptographic failure on our side; the session is gone
    Crypto(CryptoError),

    /// Encoding failure on our side
    Protocol(String),

    /// Property values do not fit the schema or rules
    SchemaMismatch(String),

    /// Value store failure
    Storage(String),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidState { state, operation } => {
                write!(f, "invalid state transition: cannot {} from {:?}", operation, state)
            },
            Self::HandshakeTimeout { elapsed } => write!(f, "handshake timeout after {:?}", elapsed),
            Self::RequestInFlight(kind) => write!(f, "{} request already in flight", kind),
            Self::ProhibitedHost(host) => write!(f, "dialog may not be opened on {}", host),
            Self::InvalidDisplayPath(path) => write!(f, "invalid display path: {}", path),
            Self::Crypto(err) => write!(f, "crypto failure: {}", err),
            Self::Protocol(msg) => write!(f, "protocol error: {}", msg),
            Self::SchemaMismatch(msg) => write!(f, "schema mismatch: {}", msg),
            Self::Storage(msg) => write!(f, "storage error: {}", msg),
        }
    }
}

impl std::error::Error for SessionError {}

impl SessionError {
    /// Returns true if the session was torn down by this error.
    ///
    /// A new dialog session (fresh handshake, fresh keys) is the only way
    /// forward after one of these.
    pub fn tears_down_session(&self) -> bool {
        matches!(self, SessionError::Crypto(_) | SessionError::HandshakeTimeout { .. })
    }
}

impl From<CryptoError> for SessionError {
    fn from(err: CryptoError) -> Self {
        SessionError::Crypto(err)
    }
}

/// Convert confdialog-proto errors to SessionError
impl From<ProtocolError> for SessionError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::InvalidSchema { .. } => SessionError::SchemaMismatch(err.to_string()),
            other => SessionError::Protocol(other.to_string()),
        }
    }
}

impl From<StorageError> for SessionError {
    fn from(err: StorageError) -> Self {
        SessionError::Storage(err.to_string())
    }
}

impl From<WalkError> for SessionError {
    fn from(err: WalkError) -> Self {
        SessionError::SchemaMismatch(err.to_string())
    }
}
