//! confdialog protocol core logic
//!
//! This crate contains the pure state machine logic of a host/dialog
//! configuration session: an encrypted two-party handshake over an
//! origin-scoped message channel, the lifecycle exchanged over the
//! resulting session, and the schema-driven validation of submitted values.
//! It performs no I/O.
//!
//! # Architecture: "The Hollow Shell"
//!
//! ```text
//!      ┌──────────────────────────────┐
//!      │ confdialog-core              │
//!      │ - Handshake state machines   │
//!      │ - Lifecycle endpoints        │
//!      │ - Validation walker          │
//!      └──────────────────────────────┘
//!         ↓                        ↓
//! ┌────────────────────┐  ┌──────────────────────┐
//! │ confdialog-harness │  │ embedder             │
//! │ (Turmoil)          │  │ (real frames, store, │
//! │ - Virtual time     │  │  system clock)       │
//! │ - Seeded RNG       │  │                      │
//! │ - Forged messages  │  │                      │
//! └────────────────────┘  └──────────────────────┘
//! ```
//!
//! # Key Principles
//!
//! - No I/O in Core: endpoints return actions (`Post`, `Render`,
//!   `Teardown`, ...) for the driver to execute
//! - Environment Trait: all entropy goes through [`env::Environment`];
//!   time is passed in as `now`
//! - Untrusted channel: anything that does not come from the paired context
//!   and origin, or does not decrypt, is dropped without changing state
//!
//! # Modules
//!
//! - [`handshake`]: key exchange state machines (dialog and host)
//! - [`session`]: established session, envelope sealing and opening
//! - [`lifecycle`]: host and dialog endpoints
//! - [`validation`]: rules, the validation walker and message routing
//! - [`registry`]: host-side property values backed by a [`storage::ValueStore`]
//! - [`crypto`]: key agreement, key wrapping and the session cipher
//! - [`transport`]: message channel abstraction
//! - [`config`], [`env`], [`error`], [`storage`]

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod config;
pub mod crypto;
pub mod env;
pub mod error;
pub mod handshake;
pub mod lifecycle;
pub mod registry;
pub mod session;
pub mod storage;
pub mod transport;
pub mod validation;

pub use config::HostConfig;
pub use env::Environment;
pub use error::{CryptoError, MalformedMessage, SessionError};
pub use handshake::{HandshakeConfig, HandshakeState};
pub use lifecycle::{DialogAction, DialogEndpoint, DialogPhase, HostAction, HostEndpoint, HostPhase};
pub use registry::{PropertyRegistry, SaveReport};
pub use storage::{MemoryStore, StorageError, ValueStore};
pub use transport::{ContextId, Delivery, MessagePort, Origin, Outbound};
