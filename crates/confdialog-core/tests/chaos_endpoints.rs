//! Chaos property tests for the lifecycle endpoints.
//!
//! The message channel is shared with untrusted contexts. Arbitrary bytes
//! from arbitrary origins must never panic an endpoint, never complete a
//! handshake, and never change an established session.

mod common;

use std::time::Instant;

use bytes::Bytes;
use confdialog_core::{
    ContextId, Delivery, DialogAction, DialogEndpoint, DialogPhase, HandshakeConfig,
    HandshakeState, HostAction, HostConfig, HostEndpoint, HostPhase, MemoryStore, Origin,
    validation::Rules,
};
use confdialog_proto::{KeyAnnouncement, KeyReply, Property, PropertyType, Schema, WireMessage};
use common::TestEnv;
use proptest::prelude::*;

const DIALOG: &str = "https://dialog.example";

fn host() -> HostEndpoint<MemoryStore> {
    let schema = Schema::from([("name".to_string(), Property::new(PropertyType::Text, "Name"))]);
    HostEndpoint::new(
        HostConfig::new(Origin::new(DIALOG), "https://dialog.example/dialog.html"),
        schema,
        Rules::new(),
        MemoryStore::new(),
    )
    .unwrap()
}

fn origin_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just(DIALOG.to_string()),
        Just("https://evil.example".to_string()),
        Just("null".to_string()),
        "https://[a-z]{1,8}\\.example",
    ]
}

/// Well-formed wire messages carrying garbage, plus raw bytes
fn payload_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        prop::collection::vec(any::<u8>(), 0..256),
        any::<[u8; 32]>().prop_map(|public_key| {
            WireMessage::from(KeyAnnouncement { public_key }).to_bytes().unwrap().to_vec()
        }),
        (any::<[u8; 32]>(), prop::collection::vec(any::<u8>(), 0..96)).prop_map(
            |(public_key, passphrase)| {
                WireMessage::from(KeyReply { public_key, passphrase }).to_bytes().unwrap().to_vec()
            }
        ),
    ]
}

fn delivery(payload: Vec<u8>, origin: &str, source: &str) -> Delivery {
    Delivery {
        payload: Bytes::from(payload),
        origin: Origin::new(origin),
        source: ContextId::new(source),
    }
}

#[test]
fn prop_dialog_ignores_garbage_replies() {
    proptest!(|(
        seed in any::<u64>(),
        garbage in prop::collection::vec((payload_strategy(), origin_strategy()), 1..16),
    )| {
        let env = TestEnv::new(seed);
        let mut dialog = DialogEndpoint::new(HandshakeConfig::default());
        dialog.open(&ContextId::new("host"), Instant::now(), &env).unwrap();

        for (payload, origin) in garbage {
            let inbound = delivery(payload, &origin, "intruder");
            let actions = dialog.handle_delivery(&inbound, &env).unwrap();
            prop_assert!(actions.is_empty());
        }
        prop_assert_eq!(dialog.phase(), DialogPhase::Handshake);
        prop_assert_eq!(dialog.handshake_state(), HandshakeState::AwaitingPeerPublicKey);
    });
}

#[test]
fn prop_host_handshake_never_established_by_garbage() {
    proptest!(|(
        seed in any::<u64>(),
        garbage in prop::collection::vec((payload_strategy(), origin_strategy()), 1..16),
    )| {
        let env = TestEnv::new(seed);
        let mut host = host();
        host.open("app.example", Instant::now(), &env).unwrap();

        for (payload, origin) in garbage {
            let inbound = delivery(payload, &origin, "intruder");
            let actions = host.handle_delivery(&inbound, &env).unwrap();
            // At most a key reply to an announcement from the dialog origin
            prop_assert!(actions.iter().all(|action| matches!(action, HostAction::Post(_))));
        }
        prop_assert_eq!(host.phase(), HostPhase::Handshake);
        prop_assert!(host.session().is_none());
    });
}

#[test]
fn prop_established_session_survives_garbage() {
    proptest!(|(
        seed in any::<u64>(),
        garbage in prop::collection::vec((payload_strategy(), origin_strategy()), 1..16),
    )| {
        let env = TestEnv::new(seed);
        let now = Instant::now();
        let mut host = host();
        let mut dialog = DialogEndpoint::new(HandshakeConfig::default());

        host.open("app.example", now, &env).unwrap();
        let mut to_host = dialog.open(&ContextId::new("host"), now, &env).unwrap();
        for _ in 0..2 {
            let mut to_dialog = Vec::new();
            for action in to_host.drain(..) {
                if let DialogAction::Post(outbound) = action {
                    let inbound = delivery(outbound.payload.to_vec(), DIALOG, "dialog");
                    to_dialog.extend(host.handle_delivery(&inbound, &env).unwrap());
                }
            }
            for action in to_dialog {
                if let HostAction::Post(outbound) = action {
                    let inbound =
                        delivery(outbound.payload.to_vec(), "https://host.example", "host");
                    to_host.extend(dialog.handle_delivery(&inbound, &env).unwrap());
                }
            }
        }
        prop_assert_eq!(host.phase(), HostPhase::Established);
        prop_assert_eq!(dialog.phase(), DialogPhase::Established);
        let fingerprint = host.session().map(|session| session.key_fingerprint());

        for (payload, origin) in garbage {
            let to_host = delivery(payload.clone(), &origin, "dialog");
            prop_assert!(host.handle_delivery(&to_host, &env).unwrap().is_empty());
            let to_dialog = delivery(payload, &origin, "host");
            prop_assert!(dialog.handle_delivery(&to_dialog, &env).unwrap().is_empty());
        }
        prop_assert_eq!(host.phase(), HostPhase::Established);
        prop_assert_eq!(dialog.phase(), DialogPhase::Established);
        prop_assert_eq!(host.session().map(|session| session.key_fingerprint()), fingerprint);
        prop_assert_eq!(host.registry().values().len(), 0);
    });
}
