//! Replays and foreign-origin copies of every message.
//!
//! Each genuine delivery is followed by a verbatim replay and by the same
//! payload posted from a foreign origin. None of them may change session
//! state or trigger a second validation.

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use confdialog_core::{
    DialogAction, DialogPhase, HostAction, HostPhase,
    validation::{EntryRules, Rules},
};
use confdialog_harness::scenario::{Scenario, oracle};
use confdialog_proto::Outcome;
use serde_json::json;

#[test]
fn replayed_save_is_processed_once() {
    let validated = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&validated);
    let rules = Rules::new().prop(
        "tags",
        Rules::new().entries(EntryRules::new().validator(move |_, _, _| {
            counter.fetch_add(1, Ordering::Relaxed);
            Ok(true)
        })),
    );

    let result = Scenario::new()
        .with_rules(rules)
        .with_replays()
        .with_save(json!({ "name": "a", "tags": ["x", "y"] }))
        .oracle(Box::new(move |world| {
            let saved = world
                .host_actions()
                .iter()
                .filter(|action| matches!(action, HostAction::Saved(_)))
                .count();
            assert_eq!(saved, 1);
            assert_eq!(world.store().write_count(), 1);
            assert_eq!(validated.load(Ordering::Relaxed), 2, "two entries, validated once each");

            assert!(world.host().dropped_messages() > 0);
            assert!(world.bus().stats().injected > 0);
            oracle::torn_down()(world)
        }))
        .run();

    assert!(result.is_ok(), "{result:?}");
}

#[test]
fn replays_do_not_disturb_an_open_dialog() {
    let result = Scenario::new()
        .with_replays()
        .with_update("name", json!("pushed"))
        .oracle(Box::new(|world| {
            let renders = world
                .dialog_actions()
                .iter()
                .filter(|action| matches!(action, DialogAction::Render(_)))
                .count();
            let patches = world
                .dialog_actions()
                .iter()
                .filter(|action| matches!(action, DialogAction::PatchValues(_)))
                .count();
            assert_eq!(renders, 1);
            assert_eq!(patches, 1);

            assert_eq!(world.host().phase(), HostPhase::Established);
            assert_eq!(world.dialog().phase(), DialogPhase::Established);
            assert!(world.host().is_revealed());
            assert!(world.dialog().dropped_messages() > 0);
            assert!(world.host().dropped_messages() > 0);
            oracle::session_keys_match()(world)
        }))
        .run();

    assert!(result.is_ok(), "{result:?}");
}

#[test]
fn failed_save_under_replay_still_reports_once() {
    let rules = Rules::new().prop(
        "name",
        Rules::new().validator(|value, messages, _| {
            let ok = value.as_str().is_some_and(|name| name.len() > 3);
            if !ok {
                messages.push("too short".to_string());
            }
            Ok(ok)
        }),
    );

    let result = Scenario::new()
        .with_rules(rules)
        .with_replays()
        .with_save(json!({ "name": "a" }))
        .oracle(Box::new(|world| {
            let outcomes: Vec<_> = world
                .dialog_actions()
                .iter()
                .filter_map(|action| match action {
                    DialogAction::SaveCompleted { outcome, .. } => Some(*outcome),
                    _ => None,
                })
                .collect();
            assert_eq!(outcomes, vec![Outcome::Failure]);
            assert!(!world.dialog().save_in_flight());
            assert_eq!(world.store().write_count(), 0);
            Ok(())
        }))
        .run();

    assert!(result.is_ok(), "{result:?}");
}
