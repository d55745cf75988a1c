//! Dialog side of the lifecycle.

use std::time::{Duration, Instant};

use confdialog_proto::{
    ConfigurePayload, Lifecycle, LifecycleKind, MessageTree, Outcome, Schema,
};
use serde_json::{Map, Value};
use tracing::{debug, error, info};

use crate::{
    env::Environment,
    error::SessionError,
    handshake::{DialogHandshake, HandshakeAction, HandshakeConfig, HandshakeState},
    session::Session,
    transport::{ContextId, Delivery, Outbound},
    validation::{DisplayPath, RoutedMessages, route_messages},
};

/// Actions returned by [`DialogEndpoint`]
#[derive(Debug, Clone, PartialEq)]
pub enum DialogAction {
    /// Post this message
    Post(Outbound),

    /// Render the configuration, then call
    /// [`DialogEndpoint::confirm_configured`]
    Render(ConfigurePayload),

    /// Replace these top-level values in the rendered form
    PatchValues(Map<String, Value>),

    /// The host answered a `Save`
    SaveCompleted {
        /// Whether the values were stored
        outcome: Outcome,
        /// Message tree as received
        validations: Option<MessageTree>,
        /// Messages split by display location
        routed: RoutedMessages,
        /// Whether the dialog is being dismissed (success without any
        /// message to show)
        dismiss: bool,
    },

    /// The dialog is finished
    Close {
        /// Reason for closing
        reason: String,
    },
}

/// Coarse dialog state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogPhase {
    /// Handshake in progress (or not started)
    Handshake,
    /// Session established
    Established,
    /// Finished; a new endpoint is needed
    Closed,
}

/// What the dialog is currently showing
#[derive(Debug, Clone)]
struct DisplayState {
    schema: Schema,
    values: Value,
    path: DisplayPath,
}

/// Dialog endpoint: handshake initiator and lifecycle client
#[derive(Debug)]
pub struct DialogEndpoint {
    handshake: DialogHandshake,
    session: Option<Session>,
    phase: DialogPhase,
    display: Option<DisplayState>,
    save_in_flight: bool,
    dropped: u64,
}

impl DialogEndpoint {
    /// Create an endpoint; nothing is sent until [`DialogEndpoint::open`]
    pub fn new(config: HandshakeConfig) -> Self {
        Self {
            handshake: DialogHandshake::new(config),
            session: None,
            phase: DialogPhase::Handshake,
            display: None,
            save_in_flight: false,
            dropped: 0,
        }
    }

    /// Current phase
    pub fn phase(&self) -> DialogPhase {
        self.phase
    }

    /// Handshake state
    pub fn handshake_state(&self) -> HandshakeState {
        self.handshake.state()
    }

    /// Session, once established
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Inbound messages dropped since creation
    pub fn dropped_messages(&self) -> u64 {
        self.dropped
    }

    /// Whether a `Save` is waiting for its response
    pub fn save_in_flight(&self) -> bool {
        self.save_in_flight
    }

    /// Node currently displayed, once configured
    pub fn displayed(&self) -> Option<&DisplayPath> {
        self.display.as_ref().map(|display| &display.path)
    }

    /// Values as last rendered, patched or submitted
    pub fn values(&self) -> Option<&Value> {
        self.display.as_ref().map(|display| &display.values)
    }

    /// Announce our key to the context that opened us.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if already opened.
    pub fn open(
        &mut self,
        opener: &ContextId,
        now: Instant,
        env: &impl Environment,
    ) -> Result<Vec<DialogAction>, SessionError> {
        let actions = self.handshake.start(opener, now, env)?;
        Ok(self.adopt(actions))
    }

    /// Process a delivery from the channel.
    ///
    /// # Errors
    ///
    /// - `Crypto` if the handshake or an outbound seal fails; the endpoint
    ///   is closed
    pub fn handle_delivery(
        &mut self,
        delivery: &Delivery,
        env: &impl Environment,
    ) -> Result<Vec<DialogAction>, SessionError> {
        match self.phase {
            DialogPhase::Handshake => {
                match self.handshake.handle_delivery(delivery, env) {
                    Ok(actions) => Ok(self.adopt(actions)),
                    Err(err) => {
                        if err.tears_down_session() {
                            self.phase = DialogPhase::Closed;
                        }
                        Err(err)
                    },
                }
            },
            DialogPhase::Established => {
                let Some(session) = self.session.as_mut() else {
                    return Ok(vec![]);
                };
                match session.open(delivery) {
                    Ok(message) => self.dispatch(message, env),
                    Err(reason) => {
                        self.dropped += 1;
                        debug!(source = %delivery.source, %reason, "dropping message");
                        Ok(vec![])
                    },
                }
            },
            DialogPhase::Closed => {
                debug!(source = %delivery.source, "dialog closed; ignoring message");
                Ok(vec![])
            },
        }
    }

    /// Report whether the last `Configure` rendered.
    ///
    /// A failed render closes the dialog.
    ///
    /// # Errors
    ///
    /// - `InvalidState` before the first `Configure`
    /// - `Crypto` if sealing fails; the endpoint is closed
    pub fn confirm_configured(
        &mut self,
        ok: bool,
        env: &impl Environment,
    ) -> Result<Vec<DialogAction>, SessionError> {
        if self.display.is_none() {
            return Err(SessionError::InvalidState {
                state: self.handshake.state(),
                operation: "confirm configuration before one arrived".to_string(),
            });
        }
        let outcome = if ok { Outcome::Success } else { Outcome::Failure };
        let Some(reply) = Lifecycle::response(LifecycleKind::Configure, outcome, None) else {
            return Ok(vec![]);
        };

        let mut actions = vec![self.send(&reply, env)?];
        if !ok {
            actions.push(self.close("configuration could not be rendered"));
        }
        Ok(actions)
    }

    /// Submit edited values.
    ///
    /// # Errors
    ///
    /// - `RequestInFlight` while a previous `Save` is unanswered
    /// - `InvalidState` without an established session
    /// - `Crypto` if sealing fails; the endpoint is closed
    pub fn save(
        &mut self,
        values: Value,
        env: &impl Environment,
    ) -> Result<Vec<DialogAction>, SessionError> {
        if self.save_in_flight {
            return Err(SessionError::RequestInFlight(LifecycleKind::Save));
        }

        let post = self.send(&Lifecycle::Save { values: values.clone() }, env)?;
        self.save_in_flight = true;
        if let Some(display) = self.display.as_mut() {
            display.values = values;
        }
        Ok(vec![post])
    }

    /// Close the dialog, telling the host if a session exists.
    ///
    /// # Errors
    ///
    /// Returns `Crypto` if sealing `Close` fails; the endpoint is closed
    /// either way.
    pub fn request_close(
        &mut self,
        env: &impl Environment,
    ) -> Result<Vec<DialogAction>, SessionError> {
        let mut actions = Vec::new();
        if self.phase == DialogPhase::Established {
            actions.push(self.send(&Lifecycle::Close, env)?);
        }
        if self.phase != DialogPhase::Closed {
            actions.push(self.close("closed by user"));
        }
        Ok(actions)
    }

    /// Show another container node; routing of later save results follows.
    ///
    /// # Errors
    ///
    /// - `InvalidState` before the first `Configure`
    /// - `InvalidDisplayPath` if the path does not name a container
    pub fn navigate(&mut self, path: DisplayPath) -> Result<(), SessionError> {
        let Some(display) = self.display.as_mut() else {
            return Err(SessionError::InvalidState {
                state: self.handshake.state(),
                operation: "navigate before configuration".to_string(),
            });
        };
        path.check(&display.schema).map_err(SessionError::InvalidDisplayPath)?;
        display.path = path;
        Ok(())
    }

    /// Elapsed handshake time once the handshake has timed out, `None` before
    /// that or when no handshake is waiting
    pub fn check_timeout(&self, now: Instant) -> Option<Duration> {
        self.handshake.check_timeout(now)
    }

    /// Close the dialog if the handshake timed out
    pub fn tick(&mut self, now: Instant) -> Vec<DialogAction> {
        if self.phase != DialogPhase::Handshake {
            return vec![];
        }
        let actions = self.handshake.tick(now);
        self.adopt(actions)
    }

    fn adopt(&mut self, actions: Vec<HandshakeAction>) -> Vec<DialogAction> {
        let mut adopted = Vec::with_capacity(actions.len());
        for action in actions {
            match action {
                HandshakeAction::Post(outbound) => adopted.push(DialogAction::Post(outbound)),
                HandshakeAction::Established(session) => {
                    self.session = Some(*session);
                    self.phase = DialogPhase::Established;
                },
                HandshakeAction::Close { reason } => adopted.push(self.close(reason)),
            }
        }
        adopted
    }

    fn dispatch(
        &mut self,
        message: Lifecycle,
        env: &impl Environment,
    ) -> Result<Vec<DialogAction>, SessionError> {
        match message {
            Lifecycle::Configure(payload) => {
                info!(
                    title = %payload.title,
                    properties = payload.props.len(),
                    "configuration received"
                );
                self.display = Some(DisplayState {
                    schema: payload.props.clone(),
                    values: payload.values.clone(),
                    path: DisplayPath::root(),
                });
                Ok(vec![DialogAction::Render(payload)])
            },
            Lifecycle::UpdateValues { values } => Ok(vec![self.patch(values)]),
            Lifecycle::UpdateValue { property_name, property_value } => {
                let mut values = Map::new();
                values.insert(property_name, property_value);
                Ok(vec![self.patch(values)])
            },
            Lifecycle::SaveSuccess { validations } => {
                if !self.take_save() {
                    return Ok(vec![]);
                }
                let dismiss = !validations.has_visible_messages();
                let routed = self.route(&validations);
                let mut actions = vec![DialogAction::SaveCompleted {
                    outcome: Outcome::Success,
                    validations: Some(validations),
                    routed,
                    dismiss,
                }];
                if dismiss {
                    actions.push(self.send(&Lifecycle::Close, env)?);
                    actions.push(self.close("saved"));
                }
                Ok(actions)
            },
            Lifecycle::SaveFailure { validations } => {
                if !self.take_save() {
                    return Ok(vec![]);
                }
                let routed =
                    validations.as_ref().map(|tree| self.route(tree)).unwrap_or_default();
                Ok(vec![DialogAction::SaveCompleted {
                    outcome: Outcome::Failure,
                    validations,
                    routed,
                    dismiss: false,
                }])
            },
            other => {
                self.dropped += 1;
                debug!(lifecycle = %other.name(), "dropping message not meant for the dialog");
                Ok(vec![])
            },
        }
    }

    fn patch(&mut self, values: Map<String, Value>) -> DialogAction {
        if let Some(Value::Object(current)) = self.display.as_mut().map(|display| &mut display.values)
        {
            for (name, value) in &values {
                current.insert(name.clone(), value.clone());
            }
        }
        DialogAction::PatchValues(values)
    }

    fn take_save(&mut self) -> bool {
        if !self.save_in_flight {
            self.dropped += 1;
            debug!("dropping save response without a pending save");
            return false;
        }
        self.save_in_flight = false;
        true
    }

    fn route(&self, validations: &MessageTree) -> RoutedMessages {
        match &self.display {
            Some(display) => route_messages(&display.schema, validations, &display.path),
            None => route_messages(&Schema::new(), validations, &DisplayPath::root()),
        }
    }

    fn send(
        &mut self,
        message: &Lifecycle,
        env: &impl Environment,
    ) -> Result<DialogAction, SessionError> {
        let Some(session) = self.session.as_mut() else {
            return Err(SessionError::InvalidState {
                state: self.handshake.state(),
                operation: format!("send {}", message.name()),
            });
        };
        match session.seal(message, env) {
            Ok(outbound) => Ok(DialogAction::Post(outbound)),
            Err(err) => {
                if err.tears_down_session() {
                    error!(reason = %err, "dialog session lost");
                    self.close("session failure");
                }
                Err(err)
            },
        }
    }

    fn close(&mut self, reason: impl Into<String>) -> DialogAction {
        let reason = reason.into();
        info!(%reason, "dialog closed");
        self.handshake.close();
        self.session = None;
        self.phase = DialogPhase::Closed;
        self.save_in_flight = false;
        DialogAction::Close { reason }
    }
}
