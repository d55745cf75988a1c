//! confdialog wire protocol
//!
//! Data shapes shared by the host and dialog sides:
//!
//! - [`envelope`]: handshake payloads and the encrypted [`Envelope`] (CBOR)
//! - [`lifecycle`]: application messages carried inside envelopes (JSON)
//! - [`schema`]: the property schema sent with `Configure`
//! - [`message_tree`]: per-node validity and messages returned by `Save`
//!
//! This crate performs no I/O and no cryptography.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod envelope;
pub mod errors;
pub mod lifecycle;
pub mod message_tree;
pub mod schema;

pub use envelope::{
    Envelope, IV_SIZE, KeyAnnouncement, KeyReply, PUBLIC_KEY_SIZE, SealedRequest, WireMessage,
};
pub use errors::{ProtocolError, Result};
pub use lifecycle::{ConfigurePayload, GET_CONFIGURATION, Lifecycle, LifecycleKind, Outcome};
pub use message_tree::MessageTree;
pub use schema::{Property, PropertyType, Schema, SelectOption, validate_schema};

/// Largest encoded wire message or lifecycle plaintext accepted (1 MiB)
pub const MAX_PAYLOAD_SIZE: usize = 1024 * 1024;
