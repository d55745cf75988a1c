//! Host side of the lifecycle.

use std::time::{Duration, Instant};

use confdialog_proto::{
    ConfigurePayload, Lifecycle, LifecycleKind, Outcome, Schema, validate_schema,
};
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::{
    config::HostConfig,
    env::Environment,
    error::SessionError,
    handshake::{HandshakeAction, HandshakeState, HostHandshake},
    registry::PropertyRegistry,
    session::Session,
    storage::ValueStore,
    transport::{Delivery, Outbound},
    validation::Rules,
};

/// Actions returned by [`HostEndpoint`]
#[derive(Debug, Clone, PartialEq)]
pub enum HostAction {
    /// Post this message
    Post(Outbound),

    /// Create the (hidden) dialog surface and load the dialog into it
    LoadDialog {
        /// Dialog document to load
        url: String,
    },

    /// The dialog rendered; make it visible
    Reveal,

    /// Values were validated and persisted
    Saved(Value),

    /// Remove the dialog surface; the session is gone
    Teardown {
        /// Reason for the teardown
        reason: String,
    },
}

/// Coarse host state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostPhase {
    /// No dialog
    Inactive,
    /// Dialog loading, handshake in progress
    Handshake,
    /// Session established
    Established,
}

/// Host endpoint: owns the values and answers the dialog
#[derive(Debug)]
pub struct HostEndpoint<S> {
    config: HostConfig,
    registry: PropertyRegistry<S>,
    handshake: Option<HostHandshake>,
    session: Option<Session>,
    phase: HostPhase,
    revealed: bool,
    dropped: u64,
}

impl<S: ValueStore> HostEndpoint<S> {
    /// Check the schema and load values from `store`.
    ///
    /// # Errors
    ///
    /// - `SchemaMismatch` if the schema is inconsistent or a load-time
    ///   converter fails
    /// - `Storage` if the store cannot be read
    pub fn new(
        config: HostConfig,
        schema: Schema,
        rules: Rules,
        store: S,
    ) -> Result<Self, SessionError> {
        validate_schema(&schema)?;
        let registry = PropertyRegistry::load(schema, rules, store, config.storage_key.clone())?;

        Ok(Self {
            config,
            registry,
            handshake: None,
            session: None,
            phase: HostPhase::Inactive,
            revealed: false,
            dropped: 0,
        })
    }

    /// Current phase
    pub fn phase(&self) -> HostPhase {
        self.phase
    }

    /// Handshake state, while there is a handshake
    pub fn handshake_state(&self) -> Option<HandshakeState> {
        self.handshake.as_ref().map(HostHandshake::state)
    }

    /// Session, once established
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Whether the dialog has confirmed rendering
    pub fn is_revealed(&self) -> bool {
        self.revealed
    }

    /// Inbound messages dropped since creation
    pub fn dropped_messages(&self) -> u64 {
        self.dropped
    }

    /// Property values
    pub fn registry(&self) -> &PropertyRegistry<S> {
        &self.registry
    }

    /// Property values, mutable
    pub fn registry_mut(&mut self) -> &mut PropertyRegistry<S> {
        &mut self.registry
    }

    /// Open the dialog on `current_host`.
    ///
    /// Starts a fresh handshake when no dialog exists. With an established
    /// session the configuration is sent again and the dialog stays hidden
    /// until it renders again. While a handshake is running this does
    /// nothing.
    ///
    /// # Errors
    ///
    /// - `ProhibitedHost` if `current_host` matches a prohibited pattern
    /// - `Storage` / `Crypto` if re-sending the configuration fails
    pub fn open(
        &mut self,
        current_host: &str,
        now: Instant,
        env: &impl Environment,
    ) -> Result<Vec<HostAction>, SessionError> {
        if self.config.is_prohibited(current_host) {
            warn!(host = %current_host, "refusing to open dialog on prohibited host");
            return Err(SessionError::ProhibitedHost(current_host.to_string()));
        }

        match self.phase {
            HostPhase::Inactive => {
                let mut handshake = HostHandshake::new(
                    self.config.dialog_origin.clone(),
                    self.config.handshake.clone(),
                );
                handshake.listen(now)?;
                self.handshake = Some(handshake);
                self.phase = HostPhase::Handshake;
                self.revealed = false;

                debug!(url = %self.config.dialog_url, "loading dialog");
                Ok(vec![HostAction::LoadDialog { url: self.config.dialog_url.clone() }])
            },
            HostPhase::Handshake => {
                debug!("dialog already opening");
                Ok(vec![])
            },
            HostPhase::Established => {
                self.revealed = false;
                Ok(vec![self.send_configuration(env)?])
            },
        }
    }

    /// Process a delivery from the channel.
    ///
    /// # Errors
    ///
    /// `Crypto` if the handshake or an outbound seal fails. The endpoint is
    /// back to [`HostPhase::Inactive`] afterwards.
    pub fn handle_delivery(
        &mut self,
        delivery: &Delivery,
        env: &impl Environment,
    ) -> Result<Vec<HostAction>, SessionError> {
        match self.phase {
            HostPhase::Inactive => {
                debug!(source = %delivery.source, "no dialog; ignoring message");
                Ok(vec![])
            },
            HostPhase::Handshake => {
                let Some(handshake) = self.handshake.as_mut() else {
                    return Ok(vec![]);
                };
                match handshake.handle_delivery(delivery, env) {
                    Ok(actions) => self.adopt(actions, env),
                    Err(err) => {
                        if err.tears_down_session() {
                            self.reset();
                        }
                        Err(err)
                    },
                }
            },
            HostPhase::Established => {
                let Some(session) = self.session.as_mut() else {
                    return Ok(vec![]);
                };
                match session.open(delivery) {
                    Ok(message) => self.dispatch(message, env),
                    Err(reason) => {
                        self.dropped += 1;
                        debug!(
                            source = %delivery.source,
                            origin = %delivery.origin,
                            %reason,
                            "dropping message"
                        );
                        Ok(vec![])
                    },
                }
            },
        }
    }

    /// Cache new values and push them to the dialog.
    ///
    /// # Errors
    ///
    /// - `SchemaMismatch` for unknown properties (nothing is sent)
    /// - `InvalidState` without an established session
    /// - `Crypto` if sealing fails; the session is torn down
    pub fn update_values(
        &mut self,
        values: Map<String, Value>,
        env: &impl Environment,
    ) -> Result<Vec<HostAction>, SessionError> {
        self.require_session("update values")?;
        self.registry.set_all(&values)?;
        Ok(vec![self.send(&Lifecycle::UpdateValues { values }, env)?])
    }

    /// Cache a new value for one property and push it to the dialog.
    ///
    /// # Errors
    ///
    /// See [`HostEndpoint::update_values`].
    pub fn update_value(
        &mut self,
        name: &str,
        value: Value,
        env: &impl Environment,
    ) -> Result<Vec<HostAction>, SessionError> {
        self.require_session("update value")?;
        self.registry.set(name, value.clone())?;
        let message =
            Lifecycle::UpdateValue { property_name: name.to_string(), property_value: value };
        Ok(vec![self.send(&message, env)?])
    }

    /// Tear the dialog down from the host side
    pub fn close(&mut self) -> Vec<HostAction> {
        if self.phase == HostPhase::Inactive {
            return vec![];
        }
        vec![self.teardown("closed by host")]
    }

    /// Elapsed handshake time once the handshake has timed out, `None` before
    /// that or when no handshake is waiting
    pub fn check_timeout(&self, now: Instant) -> Option<Duration> {
        self.handshake.as_ref().and_then(|handshake| handshake.check_timeout(now))
    }

    /// Tear down if the handshake timed out
    pub fn tick(&mut self, now: Instant) -> Vec<HostAction> {
        let Some(handshake) = self.handshake.as_mut() else {
            return vec![];
        };
        let mut actions = Vec::new();
        for action in handshake.tick(now) {
            if let HandshakeAction::Close { reason } = action {
                actions.push(self.teardown(reason));
            }
        }
        actions
    }

    fn adopt(
        &mut self,
        actions: Vec<HandshakeAction>,
        env: &impl Environment,
    ) -> Result<Vec<HostAction>, SessionError> {
        let mut adopted = Vec::with_capacity(actions.len());
        for action in actions {
            match action {
                HandshakeAction::Post(outbound) => adopted.push(HostAction::Post(outbound)),
                HandshakeAction::Established(session) => {
                    self.session = Some(*session);
                    self.handshake = None;
                    self.phase = HostPhase::Established;
                    adopted.push(self.send_configuration(env)?);
                },
                HandshakeAction::Close { reason } => adopted.push(self.teardown(reason)),
            }
        }
        Ok(adopted)
    }

    fn dispatch(
        &mut self,
        message: Lifecycle,
        env: &impl Environment,
    ) -> Result<Vec<HostAction>, SessionError> {
        match message {
            Lifecycle::ConfigureSuccess => {
                self.revealed = true;
                Ok(vec![HostAction::Reveal])
            },
            Lifecycle::ConfigureFailure => {
                Ok(vec![self.teardown("dialog could not render the configuration")])
            },
            Lifecycle::Close => Ok(vec![self.teardown("dialog closed")]),
            Lifecycle::Save { values } => self.save(&values, env),
            other => {
                self.dropped += 1;
                debug!(lifecycle = %other.name(), "dropping message not meant for the host");
                Ok(vec![])
            },
        }
    }

    fn save(
        &mut self,
        values: &Value,
        env: &impl Environment,
    ) -> Result<Vec<HostAction>, SessionError> {
        let (outcome, validations, saved) = match self.registry.submit(values) {
            Ok(report) if report.valid => {
                (Outcome::Success, Some(report.validations), report.values)
            },
            Ok(report) => (Outcome::Failure, Some(report.validations), None),
            Err(err) => {
                error!(reason = %err, "save failed");
                (Outcome::Failure, None, None)
            },
        };
        info!(outcome = outcome.suffix(), "save processed");

        let mut actions = Vec::with_capacity(2);
        if let Some(values) = saved {
            actions.push(HostAction::Saved(values));
        }
        if let Some(reply) = Lifecycle::response(LifecycleKind::Save, outcome, validations) {
            actions.push(self.send(&reply, env)?);
        }
        Ok(actions)
    }

    fn send_configuration(&mut self, env: &impl Environment) -> Result<HostAction, SessionError> {
        if let Err(err) = self.registry.refresh() {
            warn!(reason = %err, "sending cached values");
        }
        let payload = ConfigurePayload {
            props: self.registry.schema().clone(),
            values: self.registry.to_value(),
            title: self.config.title.clone(),
            dlg_size: self.config.dialog_size.clone(),
        };
        self.send(&Lifecycle::Configure(payload), env)
    }

    fn send(
        &mut self,
        message: &Lifecycle,
        env: &impl Environment,
    ) -> Result<HostAction, SessionError> {
        let Some(session) = self.session.as_mut() else {
            return Err(self.not_established(&format!("send {}", message.name())));
        };
        match session.seal(message, env) {
            Ok(outbound) => Ok(HostAction::Post(outbound)),
            Err(err) => {
                if err.tears_down_session() {
                    error!(reason = %err, "host session lost");
                    self.reset();
                }
                Err(err)
            },
        }
    }

    fn require_session(&self, operation: &str) -> Result<(), SessionError> {
        if self.session.is_some() { Ok(()) } else { Err(self.not_established(operation)) }
    }

    fn not_established(&self, operation: &str) -> SessionError {
        SessionError::InvalidState {
            state: self.handshake_state().unwrap_or(HandshakeState::Idle),
            operation: operation.to_string(),
        }
    }

    fn teardown(&mut self, reason: impl Into<String>) -> HostAction {
        let reason = reason.into();
        info!(%reason, "dialog torn down");
        self.reset();
        HostAction::Teardown { reason }
    }

    fn reset(&mut self) {
        if let Some(handshake) = self.handshake.as_mut() {
            handshake.close();
        }
        self.handshake = None;
        self.session = None;
        self.phase = HostPhase::Inactive;
        self.revealed = false;
    }
}
