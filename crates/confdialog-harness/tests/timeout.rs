//! Handshake timeout scenarios.

use std::time::Duration;

use confdialog_core::{
    DialogAction, DialogPhase, HandshakeConfig, HostAction, HostConfig, HostPhase, Origin,
};
use confdialog_harness::scenario::{Scenario, oracle};

#[test]
fn unresponsive_dialog_times_out() {
    let result = Scenario::new()
        .with_unresponsive_dialog()
        .with_time_advance(Duration::from_secs(31))
        .oracle(Box::new(|world| {
            assert!(!world.has_dialog());
            let Some(HostAction::Teardown { reason }) = world.host_actions().last() else {
                return Err(format!("expected teardown, got {:?}", world.host_actions()));
            };
            assert!(reason.contains("timeout"), "{reason}");
            oracle::torn_down()(world)
        }))
        .run();

    assert!(result.is_ok(), "{result:?}");
}

#[test]
fn handshake_within_timeout_keeps_waiting() {
    let result = Scenario::new()
        .with_unresponsive_dialog()
        .with_time_advance(Duration::from_secs(29))
        .oracle(Box::new(|world| {
            assert_eq!(world.host().phase(), HostPhase::Handshake);
            assert!(world.host_actions().iter().all(|a| !matches!(a, HostAction::Teardown { .. })));
            Ok(())
        }))
        .run();

    assert!(result.is_ok(), "{result:?}");
}

#[test]
fn mismatched_dialog_origin_times_out_both_sides() {
    let config = HostConfig::new(Origin::new("https://elsewhere.example"), "/dialog.html");

    let result = Scenario::new()
        .with_host_config(config)
        .with_time_advance(Duration::from_secs(31))
        .oracle(Box::new(|world| {
            assert_eq!(world.bus().stats().discarded, 0, "announcement targets any origin");
            assert_eq!(world.dialog().phase(), DialogPhase::Closed);
            assert!(matches!(
                world.dialog_actions().last(),
                Some(DialogAction::Close { reason }) if reason.contains("timeout")
            ));
            oracle::torn_down()(world)
        }))
        .run();

    assert!(result.is_ok(), "{result:?}");
}

#[test]
fn disabled_timeout_waits_forever() {
    let config = HostConfig {
        handshake: HandshakeConfig { handshake_timeout: None },
        ..HostConfig::new(Origin::new("https://elsewhere.example"), "/dialog.html")
    };

    let result = Scenario::new()
        .with_host_config(config)
        .with_dialog_handshake(HandshakeConfig { handshake_timeout: None })
        .with_time_advance(Duration::from_secs(24 * 60 * 60))
        .oracle(Box::new(|world| {
            assert_eq!(world.host().phase(), HostPhase::Handshake);
            assert_eq!(world.dialog().phase(), DialogPhase::Handshake);
            Ok(())
        }))
        .run();

    assert!(result.is_ok(), "{result:?}");
}

#[test]
fn established_session_has_no_idle_timeout() {
    let result = Scenario::new()
        .with_time_advance(Duration::from_secs(60 * 60))
        .oracle(oracle::all_of(vec![oracle::both_established(), oracle::session_keys_match()]))
        .run();

    assert!(result.is_ok(), "{result:?}");
}
