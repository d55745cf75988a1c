//! Lifecycle endpoints.
//!
//! Each side wraps its handshake state machine and, once the handshake has
//! produced a [`Session`](crate::session::Session), exchanges encrypted
//! [`Lifecycle`](confdialog_proto::Lifecycle) messages over it.
//!
//! ```text
//!   dialog                                  host
//!     │ ── handshake (2 exchanges) ──────────> │
//!     │ <──────────────────────── Configure ── │
//!     │ ── ConfigureSuccess / Failure ───────> │  Reveal / Teardown
//!     │ <──── UpdateValues / UpdateValue ───── │
//!     │ ── Save ─────────────────────────────> │  walk, persist on success
//!     │ <─────────────── SaveSuccess/Failure ─ │
//!     │ ── Close ────────────────────────────> │  Teardown
//! ```
//!
//! Requests and responses are correlated by name only (`Save` is answered
//! by `SaveSuccess` or `SaveFailure`), so at most one request of a kind is
//! outstanding at a time.
//!
//! Endpoints are sans-IO: they return actions for the driver. Inbound
//! messages that cannot be opened are dropped and counted; they never
//! change endpoint state. Failing to seal an outbound message is fatal to
//! the session.

mod dialog;
mod host;

pub use dialog::{DialogAction, DialogEndpoint, DialogPhase};
pub use host::{HostAction, HostEndpoint, HostPhase};
