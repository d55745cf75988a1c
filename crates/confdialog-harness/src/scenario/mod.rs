//! Scenario-based testing with the Oracle Pattern.
//!
//! A scenario runs the host and the dialog it loads over a [`crate::SimBus`]
//! and hands the resulting [`World`] to an oracle. The oracle is mandatory:
//! a scenario without one cannot be run.
//!
//! ```ignore
//! Scenario::new()
//!     .with_save(json!({ "name": "a", "tags": ["x"] }))
//!     .oracle(oracle::torn_down())
//!     .run()?;
//! ```

mod builder;
pub mod oracle;
mod world;

pub use builder::{RunnableScenario, Scenario};
pub use oracle::OracleFn;
pub use world::{
    DIALOG_CONTEXT, DIALOG_ORIGIN, HOST_CONTEXT, HOST_ORIGIN, Hop, INTERLOPER_CONTEXT,
    INTERLOPER_ORIGIN, World,
};
