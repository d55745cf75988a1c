//! Oracle functions for scenario verification.
//!
//! Oracles check the global state once a scenario has run and return
//! `Err(reason)` on a violation.

use confdialog_core::{HostAction, HostPhase};

use crate::scenario::World;

/// Oracle function type
pub type OracleFn = Box<dyn FnOnce(&World) -> Result<(), String>>;

/// Both sides hold a session
pub fn both_established() -> OracleFn {
    Box::new(|world| {
        if world.both_established() {
            Ok(())
        } else {
            Err(format!(
                "expected both sides established, host {:?}, dialog {:?}",
                world.host().phase(),
                world.has_dialog().then(|| world.dialog().phase())
            ))
        }
    })
}

/// Both sides derived the same session key
pub fn session_keys_match() -> OracleFn {
    Box::new(|world| {
        if world.session_keys_match() {
            Ok(())
        } else {
            Err("session key fingerprints differ".to_string())
        }
    })
}

/// The host has torn the dialog down and is back to inactive
pub fn torn_down() -> OracleFn {
    Box::new(|world| {
        let teardown =
            world.host_actions().iter().any(|action| matches!(action, HostAction::Teardown { .. }));
        if teardown && world.host().phase() == HostPhase::Inactive {
            Ok(())
        } else {
            Err(format!("expected teardown, host is {:?}", world.host().phase()))
        }
    })
}

/// Run several oracles, stopping at the first failure
pub fn all_of(oracles: Vec<OracleFn>) -> OracleFn {
    Box::new(move |world| {
        for oracle in oracles {
            oracle(world)?;
        }
        Ok(())
    })
}
