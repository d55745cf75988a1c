//! Message-passing abstraction between execution contexts.
//!
//! The host and the dialog live in separate contexts that can only post
//! messages to each other. Each delivery carries the payload, the sender's
//! origin, and a handle identifying the sending context. The core needs
//! exactly two capabilities:
//!
//! - post a payload to a specific context, restricted to a target origin
//! - receive payloads along with their origin and source
//!
//! State machines never touch a port themselves. They consume [`Delivery`]
//! values and return [`Outbound`] values inside their actions; driver code
//! moves them across a [`MessagePort`].
//!
//! # Implementations
//!
//! - **`SimBus` / `SimPort`** (confdialog-harness): in-memory delivery with
//!   origin filtering and fault injection

use std::{fmt, io};

use async_trait::async_trait;
use bytes::Bytes;

/// Opaque handle naming an execution context
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(String);

impl ContextId {
    /// Create a handle
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Handle as text
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Scheme + host + port of a context, or `*` as a post target
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Origin(String);

impl Origin {
    const ANY: &'static str = "*";

    /// Create an origin
    pub fn new(origin: impl Into<String>) -> Self {
        Self(origin.into())
    }

    /// Wildcard target: deliver regardless of the receiver's origin.
    ///
    /// Only used for the dialog's first announcement, before it knows who
    /// opened it.
    #[must_use]
    pub fn any() -> Self {
        Self(Self::ANY.to_string())
    }

    /// Whether this is the wildcard
    #[must_use]
    pub fn is_any(&self) -> bool {
        self.0 == Self::ANY
    }

    /// Whether a receiver at `actual` accepts a post targeted at `self`
    #[must_use]
    pub fn admits(&self, actual: &Origin) -> bool {
        self.is_any() || self == actual
    }

    /// Origin as text
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An inbound message as the receiving context sees it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Encoded wire message
    pub payload: Bytes,
    /// Origin of the sender
    pub origin: Origin,
    /// Sending context
    pub source: ContextId,
}

/// An outbound message produced by a state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    /// Receiving context
    pub target: ContextId,
    /// Origin the receiver must have, or `*`
    pub target_origin: Origin,
    /// Encoded wire message
    pub payload: Bytes,
}

/// Port for one context.
///
/// # Behavior
///
/// - `post` never blocks on the receiver; a post to a context whose origin
///   does not match `target_origin` is discarded by the channel, not
///   reported as an error (this is how cross-origin posting behaves)
/// - `recv` returns deliveries in the order they were posted
#[async_trait]
pub trait MessagePort: Send + Sync + 'static {
    /// Post a message.
    ///
    /// # Errors
    ///
    /// Returns `std::io::Error` if the port is closed.
    async fn post(&self, message: Outbound) -> io::Result<()>;

    /// Wait for the next delivery.
    ///
    /// # Errors
    ///
    /// Returns `Ok(None)` once the channel is closed, `std::io::Error` on
    /// channel failure.
    async fn recv(&self) -> io::Result<Option<Delivery>>;
}
