//! World state for scenario execution.
//!
//! The World owns one host endpoint, the dialog endpoint it loads, the bus
//! between them and a record of everything that crossed it. Oracles get a
//! shared reference once the run is over.

use std::{collections::HashSet, time::Instant};

use bytes::Bytes;
use confdialog_core::{
    DialogAction, DialogEndpoint, HostAction, HostEndpoint, MemoryStore,
    transport::{ContextId, Delivery, Origin, Outbound},
};
use confdialog_proto::WireMessage;

use crate::{SimBus, SimEnv, SimPort, scenario::builder::Plan};

/// Context id of the host
pub const HOST_CONTEXT: &str = "host";
/// Context id of the dialog
pub const DIALOG_CONTEXT: &str = "dialog";
/// Context id of the foreign context used for replay injection
pub const INTERLOPER_CONTEXT: &str = "interloper";
/// Origin the host runs on
pub const HOST_ORIGIN: &str = "https://app.example";
/// Origin the dialog is served from
pub const DIALOG_ORIGIN: &str = "https://dialog.example";
/// Origin of the interloper
pub const INTERLOPER_ORIGIN: &str = "https://interloper.example";

/// One message posted on the bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hop {
    /// Sender
    pub from: ContextId,
    /// Intended receiver
    pub to: ContextId,
    /// Wire message kind, `"Undecodable"` if it does not decode
    pub kind: &'static str,
}

/// World state for one host/dialog pair.
pub struct World {
    env: SimEnv,
    bus: SimBus,
    store: MemoryStore,
    host: HostEndpoint<MemoryStore>,
    dialog: Option<DialogEndpoint>,
    host_port: SimPort,
    dialog_port: SimPort,
    interloper: Option<SimPort>,
    replayed: HashSet<Bytes>,
    hops: Vec<Hop>,
    host_actions: Vec<HostAction>,
    dialog_actions: Vec<DialogAction>,
    deliveries: usize,
    established_after: Option<usize>,
}

impl World {
    pub(crate) fn new(
        env: SimEnv,
        store: MemoryStore,
        host: HostEndpoint<MemoryStore>,
        replays: bool,
    ) -> Self {
        let bus = SimBus::new();
        let host_port = bus.attach(ContextId::new(HOST_CONTEXT), Origin::new(HOST_ORIGIN));
        let dialog_port = bus.attach(ContextId::new(DIALOG_CONTEXT), Origin::new(DIALOG_ORIGIN));
        let interloper = replays.then(|| {
            bus.attach(ContextId::new(INTERLOPER_CONTEXT), Origin::new(INTERLOPER_ORIGIN))
        });

        Self {
            env,
            bus,
            store,
            host,
            dialog: None,
            host_port,
            dialog_port,
            interloper,
            replayed: HashSet::new(),
            hops: Vec::new(),
            host_actions: Vec::new(),
            dialog_actions: Vec::new(),
            deliveries: 0,
            established_after: None,
        }
    }

    /// The host endpoint
    pub fn host(&self) -> &HostEndpoint<MemoryStore> {
        &self.host
    }

    /// The dialog endpoint.
    ///
    /// Panics if the host never loaded a dialog.
    pub fn dialog(&self) -> &DialogEndpoint {
        self.dialog.as_ref().expect("no dialog in world")
    }

    /// Whether the host loaded a dialog
    pub fn has_dialog(&self) -> bool {
        self.dialog.is_some()
    }

    /// The host's value store
    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    /// The bus
    pub fn bus(&self) -> &SimBus {
        &self.bus
    }

    /// Every post, in order
    pub fn hops(&self) -> &[Hop] {
        &self.hops
    }

    /// Host actions other than posts, in order
    pub fn host_actions(&self) -> &[HostAction] {
        &self.host_actions
    }

    /// Dialog actions other than posts, in order
    pub fn dialog_actions(&self) -> &[DialogAction] {
        &self.dialog_actions
    }

    /// Number of deliveries processed before both sides held a session
    pub fn established_after(&self) -> Option<usize> {
        self.established_after
    }

    /// Whether both sides hold a session
    pub fn both_established(&self) -> bool {
        self.host.session().is_some()
            && self.dialog.as_ref().is_some_and(|dialog| dialog.session().is_some())
    }

    /// Whether both sides hold the same session key
    pub fn session_keys_match(&self) -> bool {
        let dialog = self.dialog.as_ref().and_then(DialogEndpoint::session);
        match (self.host.session(), dialog) {
            (Some(host), Some(dialog)) => host.key_fingerprint() == dialog.key_fingerprint(),
            _ => false,
        }
    }

    pub(crate) fn open_host(
        &mut self,
        current_host: &str,
        now: Instant,
        plan: &Plan,
    ) -> Result<(), String> {
        let actions = self
            .host
            .open(current_host, now, &self.env)
            .map_err(|e| format!("host open failed: {}", e))?;
        self.run_host_actions(actions, now, plan)
    }

    /// Deliver until both ports are drained.
    pub(crate) fn pump(&mut self, now: Instant, plan: &Plan) -> Result<(), String> {
        loop {
            let mut progressed = false;
            if let Some(delivery) = self.host_port.try_recv() {
                progressed = true;
                self.deliver_to_host(delivery, now, plan)?;
            }
            if let Some(delivery) = self.dialog_port.try_recv() {
                progressed = true;
                self.deliver_to_dialog(delivery, now, plan)?;
            }
            if let Some(interloper) = &self.interloper {
                while interloper.try_recv().is_some() {}
            }
            if !progressed {
                return Ok(());
            }
        }
    }

    pub(crate) fn update_value(
        &mut self,
        name: &str,
        value: serde_json::Value,
        now: Instant,
        plan: &Plan,
    ) -> Result<(), String> {
        let actions = self
            .host
            .update_value(name, value, &self.env)
            .map_err(|e| format!("host update_value failed: {}", e))?;
        self.run_host_actions(actions, now, plan)
    }

    pub(crate) fn save(
        &mut self,
        values: serde_json::Value,
        now: Instant,
        plan: &Plan,
    ) -> Result<(), String> {
        let Some(dialog) = self.dialog.as_mut() else {
            return Err("cannot save without a dialog".to_string());
        };
        let actions =
            dialog.save(values, &self.env).map_err(|e| format!("dialog save failed: {}", e))?;
        self.run_dialog_actions(actions, now, plan)
    }

    pub(crate) fn tick(&mut self, now: Instant, plan: &Plan) -> Result<(), String> {
        let host_actions = self.host.tick(now);
        self.run_host_actions(host_actions, now, plan)?;

        if let Some(dialog) = self.dialog.as_mut() {
            let dialog_actions = dialog.tick(now);
            self.run_dialog_actions(dialog_actions, now, plan)?;
        }
        Ok(())
    }

    fn deliver_to_host(
        &mut self,
        delivery: Delivery,
        now: Instant,
        plan: &Plan,
    ) -> Result<(), String> {
        self.replay(&delivery, HOST_CONTEXT);
        let actions = self
            .host
            .handle_delivery(&delivery, &self.env)
            .map_err(|e| format!("host handle_delivery failed: {}", e))?;
        self.delivered();
        self.run_host_actions(actions, now, plan)
    }

    fn deliver_to_dialog(
        &mut self,
        delivery: Delivery,
        now: Instant,
        plan: &Plan,
    ) -> Result<(), String> {
        self.replay(&delivery, DIALOG_CONTEXT);
        let Some(dialog) = self.dialog.as_mut() else {
            return Ok(());
        };
        let actions = dialog
            .handle_delivery(&delivery, &self.env)
            .map_err(|e| format!("dialog handle_delivery failed: {}", e))?;
        self.delivered();
        self.run_dialog_actions(actions, now, plan)
    }

    /// Queue a verbatim replay and a copy from the interloper, once per
    /// payload.
    fn replay(&mut self, delivery: &Delivery, target: &str) {
        let Some(interloper) = &self.interloper else {
            return;
        };
        if delivery.source == *interloper.id() || !self.replayed.insert(delivery.payload.clone())
        {
            return;
        }

        let target = ContextId::new(target);
        self.bus.inject(&target, delivery.clone());
        self.bus.route(
            interloper.id(),
            Outbound { target, target_origin: Origin::any(), payload: delivery.payload.clone() },
        );
    }

    fn delivered(&mut self) {
        self.deliveries += 1;
        if self.established_after.is_none() && self.both_established() {
            self.established_after = Some(self.deliveries);
        }
    }

    fn run_host_actions(
        &mut self,
        actions: Vec<HostAction>,
        now: Instant,
        plan: &Plan,
    ) -> Result<(), String> {
        for action in actions {
            match action {
                HostAction::Post(outbound) => self.post(HOST_CONTEXT, outbound),
                HostAction::LoadDialog { url } => {
                    self.host_actions.push(HostAction::LoadDialog { url });
                    if plan.load_dialog {
                        self.load_dialog(now, plan)?;
                    }
                },
                HostAction::Teardown { reason } => {
                    self.bus.detach(&ContextId::new(DIALOG_CONTEXT));
                    self.host_actions.push(HostAction::Teardown { reason });
                },
                other => self.host_actions.push(other),
            }
        }
        Ok(())
    }

    fn run_dialog_actions(
        &mut self,
        actions: Vec<DialogAction>,
        now: Instant,
        plan: &Plan,
    ) -> Result<(), String> {
        for action in actions {
            match action {
                DialogAction::Post(outbound) => self.post(DIALOG_CONTEXT, outbound),
                DialogAction::Render(payload) => {
                    self.dialog_actions.push(DialogAction::Render(payload));
                    let Some(dialog) = self.dialog.as_mut() else {
                        continue;
                    };
                    let confirm = dialog
                        .confirm_configured(plan.render_ok, &self.env)
                        .map_err(|e| format!("dialog confirm_configured failed: {}", e))?;
                    self.run_dialog_actions(confirm, now, plan)?;
                },
                other => self.dialog_actions.push(other),
            }
        }
        Ok(())
    }

    fn load_dialog(&mut self, now: Instant, plan: &Plan) -> Result<(), String> {
        // A reload replaces the previous document and its context
        self.dialog_port =
            self.bus.attach(ContextId::new(DIALOG_CONTEXT), Origin::new(DIALOG_ORIGIN));
        let mut dialog = DialogEndpoint::new(plan.dialog_handshake.clone());
        let actions = dialog
            .open(&ContextId::new(HOST_CONTEXT), now, &self.env)
            .map_err(|e| format!("dialog open failed: {}", e))?;
        self.dialog = Some(dialog);
        self.run_dialog_actions(actions, now, plan)
    }

    fn post(&mut self, from: &str, outbound: Outbound) {
        let from = ContextId::new(from);
        let kind = WireMessage::decode(&outbound.payload)
            .map(|message| message.kind())
            .unwrap_or("Undecodable");
        self.hops.push(Hop { from: from.clone(), to: outbound.target.clone(), kind });
        self.bus.route(&from, outbound);
    }
}
