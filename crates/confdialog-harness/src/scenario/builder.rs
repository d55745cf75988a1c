//! Scenario builder API.

use std::time::{Duration, Instant};

use confdialog_core::{
    HandshakeConfig, HostConfig, HostEndpoint, MemoryStore, Origin, ValueStore, validation::Rules,
};
use confdialog_proto::{Property, PropertyType, Schema};
use serde_json::Value;

use crate::{
    SimEnv,
    scenario::{
        OracleFn, World,
        world::{DIALOG_ORIGIN, HOST_ORIGIN},
    },
};

/// How the simulated dialog behaves
#[derive(Debug, Clone)]
pub(crate) struct Plan {
    /// Whether `LoadDialog` actually loads a dialog
    pub(crate) load_dialog: bool,
    /// Outcome the dialog reports after rendering
    pub(crate) render_ok: bool,
    /// Dialog handshake settings
    pub(crate) dialog_handshake: HandshakeConfig,
}

/// Scenario builder.
///
/// Runs, in order:
/// 1. host `open` and the dialog it loads, until the channel is quiet
/// 2. each host value update
/// 3. each dialog save
/// 4. an optional time advance with `tick` on both sides
///
/// then hands the [`World`] to the oracle.
pub struct Scenario {
    schema: Schema,
    rules: Rules,
    config: HostConfig,
    current_host: String,
    stored: Option<Value>,
    seed: u64,
    plan: Plan,
    replays: bool,
    updates: Vec<(String, Value)>,
    saves: Vec<Value>,
    time_advance: Option<Duration>,
}

impl Scenario {
    /// Scenario with a `name` text property, a `tags` text list and no
    /// rules
    pub fn new() -> Self {
        let schema = Schema::from([
            ("name".to_string(), Property::new(PropertyType::Text, "Name")),
            ("tags".to_string(), Property::new(PropertyType::ListText, "Tags")),
        ]);
        let host = HOST_ORIGIN.trim_start_matches("https://").to_string();

        Self {
            schema,
            rules: Rules::new(),
            config: HostConfig::new(
                Origin::new(DIALOG_ORIGIN),
                format!("{}/dialog.html", DIALOG_ORIGIN),
            ),
            current_host: host,
            stored: None,
            seed: 0,
            plan: Plan {
                load_dialog: true,
                render_ok: true,
                dialog_handshake: HandshakeConfig::default(),
            },
            replays: false,
            updates: Vec::new(),
            saves: Vec::new(),
            time_advance: None,
        }
    }

    /// Replace the schema
    pub fn with_schema(mut self, schema: Schema) -> Self {
        self.schema = schema;
        self
    }

    /// Replace the validation rules
    pub fn with_rules(mut self, rules: Rules) -> Self {
        self.rules = rules;
        self
    }

    /// Replace the host configuration
    pub fn with_host_config(mut self, config: HostConfig) -> Self {
        self.config = config;
        self
    }

    /// Host name the dialog is opened on
    pub fn with_current_host(mut self, host: impl Into<String>) -> Self {
        self.current_host = host.into();
        self
    }

    /// Values already persisted before the host starts
    pub fn with_stored(mut self, values: Value) -> Self {
        self.stored = Some(values);
        self
    }

    /// Seed for all key material
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// The host's `LoadDialog` goes nowhere
    pub fn with_unresponsive_dialog(mut self) -> Self {
        self.plan.load_dialog = false;
        self
    }

    /// The dialog reports `ConfigureFailure` after rendering
    pub fn with_render_failure(mut self) -> Self {
        self.plan.render_ok = false;
        self
    }

    /// Dialog handshake settings
    pub fn with_dialog_handshake(mut self, config: HandshakeConfig) -> Self {
        self.plan.dialog_handshake = config;
        self
    }

    /// Every delivery is replayed verbatim and copied from a foreign origin
    pub fn with_replays(mut self) -> Self {
        self.replays = true;
        self
    }

    /// Host pushes a new value once the dialog is up
    pub fn with_update(mut self, name: impl Into<String>, value: Value) -> Self {
        self.updates.push((name.into(), value));
        self
    }

    /// Dialog submits `values`; saves run in the order added
    pub fn with_save(mut self, values: Value) -> Self {
        self.saves.push(values);
        self
    }

    /// Advance virtual time after everything else and tick both sides
    pub fn with_time_advance(mut self, duration: Duration) -> Self {
        self.time_advance = Some(duration);
        self
    }

    /// Set the oracle function and return a runnable scenario.
    ///
    /// The oracle is mandatory - you cannot run a scenario without
    /// verification.
    pub fn oracle(self, oracle: OracleFn) -> RunnableScenario {
        RunnableScenario { scenario: self, oracle }
    }
}

impl Default for Scenario {
    fn default() -> Self {
        Self::new()
    }
}

/// A scenario with an oracle function that can be executed.
pub struct RunnableScenario {
    scenario: Scenario,
    oracle: OracleFn,
}

impl RunnableScenario {
    /// Execute the scenario and run the oracle.
    ///
    /// # Errors
    ///
    /// Returns the first endpoint error, or the oracle's verdict.
    pub fn run(self) -> Result<(), String> {
        let Self { scenario, oracle } = self;
        let Scenario {
            schema,
            rules,
            config,
            current_host,
            stored,
            seed,
            plan,
            replays,
            updates,
            saves,
            time_advance,
        } = scenario;

        let store = MemoryStore::new();
        if let Some(values) = stored {
            store
                .set(&config.storage_key, &values.to_string())
                .map_err(|e| format!("seeding store failed: {}", e))?;
        }
        let host = HostEndpoint::new(config, schema, rules, store.clone())
            .map_err(|e| format!("host setup failed: {}", e))?;

        let mut world = World::new(SimEnv::with_seed(seed), store, host, replays);
        let now = Instant::now();

        world.open_host(&current_host, now, &plan)?;
        world.pump(now, &plan)?;

        for (name, value) in updates {
            world.update_value(&name, value, now, &plan)?;
            world.pump(now, &plan)?;
        }

        for values in saves {
            world.save(values, now, &plan)?;
            world.pump(now, &plan)?;
        }

        if let Some(advance) = time_advance {
            let later = now + advance;
            world.tick(later, &plan)?;
            world.pump(later, &plan)?;
        }

        oracle(&world)
    }
}
