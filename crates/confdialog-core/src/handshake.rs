//! Key-exchange handshake between dialog and host.
//!
//! # Architecture: Action-Based State Machine
//!
//! Both roles follow the action pattern:
//! - Methods accept time as parameter (no stored Environment)
//! - Methods return `Result<Vec<HandshakeAction>, SessionError>`
//! - Driver code executes actions (post messages, adopt the session)
//!
//! # State Machine
//!
//! ```text
//! ┌──────┐ start/listen ┌───────────────────────┐
//! │ Idle │─────────────>│ AwaitingPeerPublicKey │
//! └──────┘              └───────────────────────┘
//!                         │ host: announcement    │ dialog: key reply
//!                         ↓                       │
//!        ┌────────────────────────────────┐       │
//!        │ AwaitingSessionKeyConfirmation │       │
//!        └────────────────────────────────┘       │
//!                         │ host: sealed request  │
//!                         ↓                       ↓
//!                      ┌──────────────────────────────┐
//!                      │ Established (Session handed  │
//!                      │ to the lifecycle endpoint)   │
//!                      └──────────────────────────────┘
//!
//!   any waiting state ── timeout / close / crypto failure ──> Closed
//! ```
//!
//! # Roles
//!
//! - **Dialog** initiates: it generates a key pair and announces its public
//!   key to the opener. The first well-formed reply wins; the dialog unwraps
//!   the session key, pins the replying context and origin as its peer, and
//!   confirms with a `GetConfiguration` request sealed to the host's key.
//! - **Host** answers the first announcement from the configured dialog
//!   origin with its own public key and a freshly generated session key
//!   wrapped to the dialog. Later announcements are ignored. The sealed
//!   confirmation from the same context completes the handshake.
//!
//! Anything unexpected while waiting is ignored and logged at debug level,
//! never an error: the channel is shared with untrusted contexts.
//!
//! # Timeouts
//!
//! - **Handshake timeout**: 30 seconds by default, measured from `start` /
//!   `listen`. `None` waits forever.

use std::time::{Duration, Instant};

use confdialog_proto::{
    GET_CONFIGURATION, KeyAnnouncement, KeyReply, SealedRequest, WireMessage,
};
use tracing::{debug, error, info, warn};

use crate::{
    crypto::{self, KeyPair, PublicKeyBytes, SessionKey},
    env::Environment,
    error::{CryptoError, SessionError},
    session::{PeerAddress, Session},
    transport::{ContextId, Delivery, Origin, Outbound},
};

/// Actions returned by the handshake state machines.
#[derive(Debug)]
pub enum HandshakeAction {
    /// Post this message
    Post(Outbound),

    /// Handshake complete; the caller now owns the session
    Established(Box<Session>),

    /// Handshake abandoned
    Close {
        /// Reason for closing
        reason: String,
    },
}

/// Handshake state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Nothing sent or expected yet
    Idle,
    /// Dialog: announced, waiting for the host's reply.
    /// Host: listening for the dialog's announcement.
    AwaitingPeerPublicKey,
    /// Host: replied, waiting for the sealed confirmation
    AwaitingSessionKeyConfirmation,
    /// Session handed over
    Established,
    /// Terminated (explicit close, timeout or crypto failure)
    Closed,
}

impl HandshakeState {
    /// Whether the machine is waiting on the peer
    #[must_use]
    pub const fn is_waiting(self) -> bool {
        matches!(self, Self::AwaitingPeerPublicKey | Self::AwaitingSessionKeyConfirmation)
    }
}

/// Handshake configuration
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    /// Time allowed from start to `Established`; `None` waits forever
    pub handshake_timeout: Option<Duration>,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self { handshake_timeout: Some(Duration::from_secs(30)) }
    }
}

/// Shared timer bookkeeping
#[derive(Debug, Clone)]
struct Timer {
    config: HandshakeConfig,
    started_at: Option<Instant>,
}

impl Timer {
    fn expired(&self, state: HandshakeState, now: Instant) -> Option<Duration> {
        if !state.is_waiting() {
            return None;
        }
        let timeout = self.config.handshake_timeout?;
        let elapsed = now.duration_since(self.started_at?);

        if elapsed > timeout { Some(elapsed) } else { None }
    }
}

/// Dialog side of the handshake
#[derive(Debug)]
pub struct DialogHandshake {
    state: HandshakeState,
    timer: Timer,
    key_pair: Option<KeyPair>,
}

impl DialogHandshake {
    /// Create a handshake in [`HandshakeState::Idle`]
    pub fn new(config: HandshakeConfig) -> Self {
        Self { state: HandshakeState::Idle, timer: Timer { config, started_at: None }, key_pair: None }
    }

    /// Get current state
    #[must_use]
    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Generate our key pair and announce it to the opener.
    ///
    /// The announcement targets any origin: the dialog does not yet know who
    /// opened it.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if not in Idle state
    pub fn start(
        &mut self,
        opener: &ContextId,
        now: Instant,
        env: &impl Environment,
    ) -> Result<Vec<HandshakeAction>, SessionError> {
        if self.state != HandshakeState::Idle {
            return Err(SessionError::InvalidState {
                state: self.state,
                operation: "start handshake".to_string(),
            });
        }

        let key_pair = crypto::generate_key_pair(env);
        let payload =
            WireMessage::from(KeyAnnouncement { public_key: key_pair.public_bytes() }).to_bytes()?;

        self.key_pair = Some(key_pair);
        self.state = HandshakeState::AwaitingPeerPublicKey;
        self.timer.started_at = Some(now);

        debug!(opener = %opener, "dialog announced public key");
        Ok(vec![HandshakeAction::Post(Outbound {
            target: opener.clone(),
            target_origin: Origin::any(),
            payload,
        })])
    }

    /// Process a delivery while waiting for the host's reply.
    ///
    /// # Errors
    ///
    /// - `InvalidState` once established or closed
    /// - `Crypto` if sealing the confirmation fails; the handshake is closed
    pub fn handle_delivery(
        &mut self,
        delivery: &Delivery,
        env: &impl Environment,
    ) -> Result<Vec<HandshakeAction>, SessionError> {
        match self.state {
            HandshakeState::AwaitingPeerPublicKey => {},
            HandshakeState::Idle | HandshakeState::AwaitingSessionKeyConfirmation => {
                debug!(source = %delivery.source, state = ?self.state, "ignoring early message");
                return Ok(vec![]);
            },
            state => {
                return Err(SessionError::InvalidState {
                    state,
                    operation: "handle handshake message".to_string(),
                });
            },
        }

        let reply = match WireMessage::decode(&delivery.payload) {
            Ok(WireMessage::KeyReply(reply)) => reply,
            Ok(other) => {
                debug!(source = %delivery.source, kind = other.kind(), "ignoring non-reply");
                return Ok(vec![]);
            },
            Err(err) => {
                debug!(source = %delivery.source, reason = %err, "ignoring undecodable message");
                return Ok(vec![]);
            },
        };

        let Some(local) = self.key_pair.as_ref() else {
            return Err(self.fail(CryptoError::KeyDerivation));
        };

        let key = match crypto::unwrap_session_key(&reply.passphrase, local) {
            Ok(key) => key,
            Err(err) => {
                warn!(source = %delivery.source, reason = %err, "ignoring key reply that does not unwrap");
                return Ok(vec![]);
            },
        };

        let request = match crypto::seal_request(GET_CONFIGURATION, &reply.public_key, env) {
            Ok(request) => request,
            Err(CryptoError::WeakPeerKey) => {
                warn!(source = %delivery.source, "ignoring key reply with weak public key");
                return Ok(vec![]);
            },
            Err(err) => return Err(self.fail(err)),
        };
        let payload = WireMessage::from(SealedRequest { lifecycle: request }).to_bytes()?;

        let peer = PeerAddress { context: delivery.source.clone(), origin: delivery.origin.clone() };
        let Some(local) = self.key_pair.take() else {
            return Err(self.fail(CryptoError::KeyDerivation));
        };
        let session = match Session::new(local, reply.public_key, key, peer.clone()) {
            Ok(session) => session,
            Err(err) => return Err(self.fail(err)),
        };

        self.state = HandshakeState::Established;
        info!(peer = %peer.context, origin = %peer.origin, "dialog session established");

        Ok(vec![
            HandshakeAction::Established(Box::new(session)),
            HandshakeAction::Post(Outbound {
                target: peer.context,
                target_origin: peer.origin,
                payload,
            }),
        ])
    }

    /// Check if the handshake has timed out
    ///
    /// Returns `Some(elapsed)` if timed out, `None` otherwise
    #[must_use]
    pub fn check_timeout(&self, now: Instant) -> Option<Duration> {
        self.timer.expired(self.state, now)
    }

    /// Close on timeout
    pub fn tick(&mut self, now: Instant) -> Vec<HandshakeAction> {
        match self.check_timeout(now) {
            Some(elapsed) => {
                warn!(?elapsed, "dialog handshake timed out");
                self.close();
                vec![HandshakeAction::Close { reason: format!("handshake timeout after {:?}", elapsed) }]
            },
            None => vec![],
        }
    }

    /// Transition to Closed state and forget the key pair
    pub fn close(&mut self) {
        self.state = HandshakeState::Closed;
        self.key_pair = None;
    }

    fn fail(&mut self, err: CryptoError) -> SessionError {
        error!(reason = %err, "dialog handshake failed");
        self.close();
        SessionError::Crypto(err)
    }
}

/// Host-side state between reply and confirmation
#[derive(Debug)]
struct PendingSession {
    local: KeyPair,
    key: SessionKey,
    peer_public: PublicKeyBytes,
    peer: PeerAddress,
}

/// Host side of the handshake
#[derive(Debug)]
pub struct HostHandshake {
    state: HandshakeState,
    timer: Timer,
    dialog_origin: Origin,
    pending: Option<PendingSession>,
}

impl HostHandshake {
    /// Create a handshake that only answers `dialog_origin`
    pub fn new(dialog_origin: Origin, config: HandshakeConfig) -> Self {
        Self {
            state: HandshakeState::Idle,
            timer: Timer { config, started_at: None },
            dialog_origin,
            pending: None,
        }
    }

    /// Get current state
    #[must_use]
    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Peer that answered first, once one has
    #[must_use]
    pub fn pending_peer(&self) -> Option<&PeerAddress> {
        self.pending.as_ref().map(|pending| &pending.peer)
    }

    /// Start accepting announcements
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if not in Idle state
    pub fn listen(&mut self, now: Instant) -> Result<(), SessionError> {
        if self.state != HandshakeState::Idle {
            return Err(SessionError::InvalidState {
                state: self.state,
                operation: "listen".to_string(),
            });
        }

        self.state = HandshakeState::AwaitingPeerPublicKey;
        self.timer.started_at = Some(now);
        Ok(())
    }

    /// Process a delivery during the handshake.
    ///
    /// # Errors
    ///
    /// - `InvalidState` once established or closed
    /// - `Crypto` if key wrapping fails for a reason other than a weak key;
    ///   the handshake is closed
    pub fn handle_delivery(
        &mut self,
        delivery: &Delivery,
        env: &impl Environment,
    ) -> Result<Vec<HandshakeAction>, SessionError> {
        match self.state {
            state if state.is_waiting() => {},
            HandshakeState::Idle => {
                debug!(source = %delivery.source, "not listening yet; ignoring message");
                return Ok(vec![]);
            },
            state => {
                return Err(SessionError::InvalidState {
                    state,
                    operation: "handle handshake message".to_string(),
                });
            },
        }

        if delivery.origin != self.dialog_origin {
            debug!(origin = %delivery.origin, "ignoring handshake message from foreign origin");
            return Ok(vec![]);
        }

        let message = match WireMessage::decode(&delivery.payload) {
            Ok(message) => message,
            Err(err) => {
                debug!(source = %delivery.source, reason = %err, "ignoring undecodable message");
                return Ok(vec![]);
            },
        };

        match (self.state, message) {
            (HandshakeState::AwaitingPeerPublicKey, WireMessage::KeyAnnouncement(announcement)) => {
                self.answer(&announcement, delivery, env)
            },
            (HandshakeState::AwaitingSessionKeyConfirmation, WireMessage::KeyAnnouncement(_)) => {
                debug!(source = %delivery.source, "ignoring repeated key announcement");
                Ok(vec![])
            },
            (HandshakeState::AwaitingSessionKeyConfirmation, WireMessage::SealedRequest(request)) => {
                self.confirm(&request, delivery)
            },
            (state, other) => {
                debug!(source = %delivery.source, ?state, kind = other.kind(), "ignoring message");
                Ok(vec![])
            },
        }
    }

    fn answer(
        &mut self,
        announcement: &KeyAnnouncement,
        delivery: &Delivery,
        env: &impl Environment,
    ) -> Result<Vec<HandshakeAction>, SessionError> {
        let local = crypto::generate_key_pair(env);
        let key = crypto::generate_session_key(env);

        let passphrase = match crypto::wrap_session_key(&key, &announcement.public_key, env) {
            Ok(passphrase) => passphrase,
            Err(CryptoError::WeakPeerKey) => {
                warn!(source = %delivery.source, "ignoring announcement with weak public key");
                return Ok(vec![]);
            },
            Err(err) => return Err(self.fail(err)),
        };
        let payload =
            WireMessage::from(KeyReply { public_key: local.public_bytes(), passphrase }).to_bytes()?;

        let peer = PeerAddress { context: delivery.source.clone(), origin: delivery.origin.clone() };
        debug!(peer = %peer.context, "host answered key announcement");

        self.pending =
            Some(PendingSession { local, key, peer_public: announcement.public_key, peer });
        self.state = HandshakeState::AwaitingSessionKeyConfirmation;

        Ok(vec![HandshakeAction::Post(Outbound {
            target: delivery.source.clone(),
            target_origin: delivery.origin.clone(),
            payload,
        })])
    }

    fn confirm(
        &mut self,
        request: &SealedRequest,
        delivery: &Delivery,
    ) -> Result<Vec<HandshakeAction>, SessionError> {
        let Some(pending) = &self.pending else {
            return Ok(vec![]);
        };

        if let Err(reason) = pending.peer.check(delivery) {
            debug!(%reason, "ignoring confirmation from unpaired context");
            return Ok(vec![]);
        }

        match crypto::open_request(&request.lifecycle, &pending.local) {
            Ok(text) if text == GET_CONFIGURATION.as_bytes() => {},
            Ok(_) => {
                debug!("ignoring unknown sealed request");
                return Ok(vec![]);
            },
            Err(err) => {
                debug!(reason = %err, "ignoring sealed request that does not open");
                return Ok(vec![]);
            },
        }

        let Some(pending) = self.pending.take() else {
            return Ok(vec![]);
        };
        let peer = pending.peer.clone();
        let session = match Session::new(pending.local, pending.peer_public, pending.key, pending.peer)
        {
            Ok(session) => session,
            Err(err) => return Err(self.fail(err)),
        };

        self.state = HandshakeState::Established;
        info!(peer = %peer.context, origin = %peer.origin, "host session established");

        Ok(vec![HandshakeAction::Established(Box::new(session))])
    }

    /// Check if the handshake has timed out
    #[must_use]
    pub fn check_timeout(&self, now: Instant) -> Option<Duration> {
        self.timer.expired(self.state, now)
    }

    /// Close on timeout
    pub fn tick(&mut self, now: Instant) -> Vec<HandshakeAction> {
        match self.check_timeout(now) {
            Some(elapsed) => {
                warn!(?elapsed, "host handshake timed out");
                self.close();
                vec![HandshakeAction::Close { reason: format!("handshake timeout after {:?}", elapsed) }]
            },
            None => vec![],
        }
    }

    /// Transition to Closed state and clear the paired peer
    pub fn close(&mut self) {
        self.state = HandshakeState::Closed;
        self.pending = None;
    }

    fn fail(&mut self, err: CryptoError) -> SessionError {
        error!(reason = %err, "host handshake failed");
        self.close();
        SessionError::Crypto(err)
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::env::testing::TestEnv;

    const HOST: &str = "https://host.example";
    const DIALOG: &str = "https://dialog.example";

    fn deliver(action: &HandshakeAction, origin: &str, source: &str) -> Delivery {
        let HandshakeAction::Post(outbound) = action else {
            panic!("expected Post, got {action:?}");
        };
        Delivery {
            payload: outbound.payload.clone(),
            origin: Origin::new(origin),
            source: ContextId::new(source),
        }
    }

    fn established(actions: Vec<HandshakeAction>) -> Session {
        actions
            .into_iter()
            .find_map(|action| match action {
                HandshakeAction::Established(session) => Some(*session),
                _ => None,
            })
            .expect("no Established action")
    }

    #[test]
    fn full_handshake_agrees_on_key() {
        let env = TestEnv::new(21);
        let now = Instant::now();
        let mut dialog = DialogHandshake::new(HandshakeConfig::default());
        let mut host = HostHandshake::new(Origin::new(DIALOG), HandshakeConfig::default());
        host.listen(now).unwrap();

        let announce = dialog.start(&ContextId::new("host"), now, &env).unwrap();
        assert_eq!(dialog.state(), HandshakeState::AwaitingPeerPublicKey);

        let reply = host.handle_delivery(&deliver(&announce[0], DIALOG, "dialog"), &env).unwrap();
        assert_eq!(host.state(), HandshakeState::AwaitingSessionKeyConfirmation);

        let mut actions = dialog.handle_delivery(&deliver(&reply[0], HOST, "host"), &env).unwrap();
        assert_eq!(dialog.state(), HandshakeState::Established);
        let confirm = actions.pop().unwrap();
        let dialog_session = established(actions);

        let actions = host.handle_delivery(&deliver(&confirm, DIALOG, "dialog"), &env).unwrap();
        assert_eq!(host.state(), HandshakeState::Established);
        let host_session = established(actions);

        assert_eq!(host_session.key_fingerprint(), dialog_session.key_fingerprint());
        assert_eq!(host_session.peer_public(), &dialog_session.local_public());
        assert_eq!(dialog_session.peer().origin, Origin::new(HOST));
        assert_eq!(host_session.peer().context, ContextId::new("dialog"));
    }

    #[test]
    fn dialog_accepts_only_first_reply() {
        let env = TestEnv::new(22);
        let now = Instant::now();
        let mut dialog = DialogHandshake::new(HandshakeConfig::default());
        let announce = dialog.start(&ContextId::new("host"), now, &env).unwrap();

        let mut first = HostHandshake::new(Origin::new(DIALOG), HandshakeConfig::default());
        let mut second = HostHandshake::new(Origin::new(DIALOG), HandshakeConfig::default());
        first.listen(now).unwrap();
        second.listen(now).unwrap();
        let reply_a = first.handle_delivery(&deliver(&announce[0], DIALOG, "dialog"), &env).unwrap();
        let reply_b = second.handle_delivery(&deliver(&announce[0], DIALOG, "dialog"), &env).unwrap();

        let actions = dialog.handle_delivery(&deliver(&reply_a[0], HOST, "host"), &env).unwrap();
        let session = established(actions);

        let result = dialog.handle_delivery(&deliver(&reply_b[0], "https://other.example", "intruder"), &env);
        assert!(matches!(result, Err(SessionError::InvalidState { .. })));
        assert_eq!(session.peer().context, ContextId::new("host"));
        assert_eq!(session.peer().origin, Origin::new(HOST));
    }

    #[test]
    fn host_ignores_second_announcement() {
        let env = TestEnv::new(23);
        let now = Instant::now();
        let mut host = HostHandshake::new(Origin::new(DIALOG), HandshakeConfig::default());
        host.listen(now).unwrap();

        let mut first = DialogHandshake::new(HandshakeConfig::default());
        let mut second = DialogHandshake::new(HandshakeConfig::default());
        let a = first.start(&ContextId::new("host"), now, &env).unwrap();
        let b = second.start(&ContextId::new("host"), now, &env).unwrap();

        assert_eq!(host.handle_delivery(&deliver(&a[0], DIALOG, "dialog"), &env).unwrap().len(), 1);
        assert!(host.handle_delivery(&deliver(&b[0], DIALOG, "racer"), &env).unwrap().is_empty());
        assert_eq!(host.pending_peer().unwrap().context, ContextId::new("dialog"));
    }

    #[test]
    fn host_ignores_foreign_origin() {
        let env = TestEnv::new(24);
        let now = Instant::now();
        let mut host = HostHandshake::new(Origin::new(DIALOG), HandshakeConfig::default());
        host.listen(now).unwrap();
        let mut dialog = DialogHandshake::new(HandshakeConfig::default());
        let announce = dialog.start(&ContextId::new("host"), now, &env).unwrap();

        let actions =
            host.handle_delivery(&deliver(&announce[0], "https://evil.example", "dialog"), &env).unwrap();
        assert!(actions.is_empty());
        assert_eq!(host.state(), HandshakeState::AwaitingPeerPublicKey);
    }

    #[test]
    fn host_ignores_confirmation_from_other_context() {
        let env = TestEnv::new(25);
        let now = Instant::now();
        let mut host = HostHandshake::new(Origin::new(DIALOG), HandshakeConfig::default());
        host.listen(now).unwrap();
        let mut dialog = DialogHandshake::new(HandshakeConfig::default());

        let announce = dialog.start(&ContextId::new("host"), now, &env).unwrap();
        let reply = host.handle_delivery(&deliver(&announce[0], DIALOG, "dialog"), &env).unwrap();
        let mut actions = dialog.handle_delivery(&deliver(&reply[0], HOST, "host"), &env).unwrap();
        let confirm = actions.pop().unwrap();

        assert!(host.handle_delivery(&deliver(&confirm, DIALOG, "sibling"), &env).unwrap().is_empty());
        assert_eq!(host.state(), HandshakeState::AwaitingSessionKeyConfirmation);
    }

    #[test]
    fn dialog_ignores_garbage_while_waiting() {
        let env = TestEnv::new(26);
        let now = Instant::now();
        let mut dialog = DialogHandshake::new(HandshakeConfig::default());
        dialog.start(&ContextId::new("host"), now, &env).unwrap();

        let garbage = Delivery {
            payload: Bytes::from_static(b"\xff\x00not cbor"),
            origin: Origin::new(HOST),
            source: ContextId::new("host"),
        };
        assert!(dialog.handle_delivery(&garbage, &env).unwrap().is_empty());

        let forged = Delivery {
            payload: WireMessage::from(KeyReply { public_key: [3; 32], passphrase: vec![0; 80] })
                .to_bytes()
                .unwrap(),
            origin: Origin::new(HOST),
            source: ContextId::new("host"),
        };
        assert!(dialog.handle_delivery(&forged, &env).unwrap().is_empty());
        assert_eq!(dialog.state(), HandshakeState::AwaitingPeerPublicKey);
    }

    #[test]
    fn start_twice_is_invalid() {
        let env = TestEnv::new(27);
        let now = Instant::now();
        let mut dialog = DialogHandshake::new(HandshakeConfig::default());
        dialog.start(&ContextId::new("host"), now, &env).unwrap();

        let result = dialog.start(&ContextId::new("host"), now, &env);
        assert!(matches!(result, Err(SessionError::InvalidState { .. })));
    }

    #[test]
    fn handshake_times_out() {
        let env = TestEnv::new(28);
        let t0 = Instant::now();
        let mut dialog = DialogHandshake::new(HandshakeConfig::default());
        dialog.start(&ContextId::new("host"), t0, &env).unwrap();

        assert!(dialog.tick(t0 + Duration::from_secs(30)).is_empty());

        let actions = dialog.tick(t0 + Duration::from_secs(31));
        assert!(matches!(actions[0], HandshakeAction::Close { .. }));
        assert_eq!(dialog.state(), HandshakeState::Closed);
    }

    #[test]
    fn no_timeout_when_disabled() {
        let t0 = Instant::now();
        let mut host =
            HostHandshake::new(Origin::new(DIALOG), HandshakeConfig { handshake_timeout: None });
        host.listen(t0).unwrap();

        assert!(host.tick(t0 + Duration::from_secs(3600)).is_empty());
        assert_eq!(host.state(), HandshakeState::AwaitingPeerPublicKey);
    }
}
