//! Arbitrary bytes against every decoder and both endpoints.
//!
//! - `WireMessage::decode` never panics, and whatever it accepts re-encodes
//!   to something that decodes to the same message
//! - `Lifecycle::from_json_bytes` never panics, and accepted messages
//!   re-encode
//! - A listening host and an announced dialog never panic on the bytes and
//!   are never established by a single delivery

#![no_main]

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use bytes::Bytes;
use confdialog_core::{
    DialogEndpoint, DialogPhase, Environment, HandshakeConfig, HostConfig, HostEndpoint, HostPhase,
    MemoryStore,
    transport::{ContextId, Delivery, Origin},
    validation::Rules,
};
use confdialog_proto::{Lifecycle, Property, PropertyType, Schema, WireMessage};
use libfuzzer_sys::fuzz_target;

#[derive(Clone)]
struct FuzzEnv {
    counter: Arc<AtomicU64>,
}

impl Environment for FuzzEnv {
    type Instant = Instant;

    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, _duration: Duration) {}

    fn random_bytes(&self, buffer: &mut [u8]) {
        for chunk in buffer.chunks_mut(8) {
            let n = self.counter.fetch_add(1, Ordering::Relaxed);
            let mixed = n.wrapping_mul(0x9E37_79B9_7F4A_7C15).rotate_left(31) ^ n;
            chunk.copy_from_slice(&mixed.to_le_bytes()[..chunk.len()]);
        }
    }
}

const DIALOG_ORIGIN: &str = "https://dialog.example";

fuzz_target!(|data: &[u8]| {
    if let Ok(message) = WireMessage::decode(data) {
        let encoded = message.to_bytes().expect("decoded message must re-encode");
        let decoded = WireMessage::decode(&encoded).expect("re-encoded message must decode");
        assert_eq!(decoded, message);
    }

    if let Ok(message) = Lifecycle::from_json_bytes(data) {
        let encoded = message.to_json_bytes().expect("decoded lifecycle must re-encode");
        Lifecycle::from_json_bytes(&encoded).expect("re-encoded lifecycle must decode");
    }

    let env = FuzzEnv { counter: Arc::new(AtomicU64::new(1)) };
    let now = Instant::now();

    let schema = Schema::from([("name".to_string(), Property::new(PropertyType::Text, "Name"))]);
    let config = HostConfig::new(Origin::new(DIALOG_ORIGIN), "/dialog.html");
    let Ok(mut host) = HostEndpoint::new(config, schema, Rules::new(), MemoryStore::new()) else {
        return;
    };
    let mut dialog = DialogEndpoint::new(HandshakeConfig::default());
    if host.open("app.example", now, &env).is_err()
        || dialog.open(&ContextId::new("host"), now, &env).is_err()
    {
        return;
    }

    let delivery = |origin: &str, source: &str| Delivery {
        payload: Bytes::copy_from_slice(data),
        origin: Origin::new(origin),
        source: ContextId::new(source),
    };

    let _ = host.handle_delivery(&delivery(DIALOG_ORIGIN, "dialog"), &env);
    assert_ne!(host.phase(), HostPhase::Established);

    let _ = dialog.handle_delivery(&delivery("https://app.example", "host"), &env);
    // A forged KeyReply would need the dialog's private key to unwrap
    assert_ne!(dialog.phase(), DialogPhase::Established);
});
