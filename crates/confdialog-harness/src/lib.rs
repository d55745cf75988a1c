//! Deterministic simulation harness for confdialog.
//!
//! - [`SimEnv`]: seeded entropy and Turmoil virtual time
//! - [`SimBus`] / [`SimPort`]: in-memory message channel between contexts,
//!   with origin filtering and replay injection
//! - [`scenario`]: declarative host/dialog runs verified by a mandatory
//!   oracle

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod scenario;
pub mod sim_bus;
pub mod sim_env;
pub mod sim_port;

pub use sim_bus::{BusStats, SimBus};
pub use sim_env::SimEnv;
pub use sim_port::SimPort;
use tracing_subscriber::EnvFilter;

/// Install a `RUST_LOG`-filtered subscriber that writes through the test
/// harness. Safe to call from every test; only the first call installs.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
