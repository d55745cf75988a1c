//! Host and dialog as separate simulated tasks talking through
//! [`MessagePort`]s, with Turmoil driving virtual time.

use std::time::Duration;

use confdialog_core::{
    DialogAction, DialogEndpoint, Environment, HandshakeConfig, HostAction, HostConfig,
    HostEndpoint, MemoryStore, MessagePort, ValueStore,
    transport::{ContextId, Origin},
    validation::Rules,
};
use confdialog_harness::{
    SimBus, SimEnv, init_tracing,
    scenario::{DIALOG_CONTEXT, DIALOG_ORIGIN, HOST_CONTEXT, HOST_ORIGIN},
};
use confdialog_proto::{Property, PropertyType, Schema};
use serde_json::json;
use tokio::sync::oneshot;

fn host_endpoint(store: MemoryStore) -> HostEndpoint<MemoryStore> {
    let schema = Schema::from([
        ("name".to_string(), Property::new(PropertyType::Text, "Name")),
        ("tags".to_string(), Property::new(PropertyType::ListText, "Tags")),
    ]);
    let config = HostConfig::new(Origin::new(DIALOG_ORIGIN), "/dialog.html");
    HostEndpoint::new(config, schema, Rules::new(), store).unwrap()
}

#[test]
fn save_round_trip_over_ports() {
    init_tracing();

    let mut sim = turmoil::Builder::new().build();
    let bus = SimBus::new();
    let store = MemoryStore::new();
    let host_port = bus.attach(ContextId::new(HOST_CONTEXT), Origin::new(HOST_ORIGIN));
    let dialog_port = bus.attach(ContextId::new(DIALOG_CONTEXT), Origin::new(DIALOG_ORIGIN));
    let (load_tx, load_rx) = oneshot::channel::<()>();

    let host_store = store.clone();
    sim.client("host", async move {
        let env = SimEnv::with_seed(11);
        let mut host = host_endpoint(host_store);
        let mut load = Some(load_tx);

        let mut pending = host.open("app.example", env.now(), &env)?;
        loop {
            for action in pending {
                match action {
                    HostAction::Post(outbound) => host_port.post(outbound).await?,
                    HostAction::LoadDialog { .. } => {
                        if let Some(load) = load.take() {
                            let _ = load.send(());
                        }
                    },
                    HostAction::Teardown { .. } => return Ok(()),
                    _ => {},
                }
            }
            let Some(delivery) = host_port.recv().await? else {
                return Err("host port closed".into());
            };
            pending = host.handle_delivery(&delivery, &env)?;
        }
    });

    sim.client("dialog", async move {
        let env = SimEnv::with_seed(12);
        load_rx.await?;

        let mut dialog = DialogEndpoint::new(HandshakeConfig::default());
        let mut pending = dialog.open(&ContextId::new(HOST_CONTEXT), env.now(), &env)?;
        loop {
            let mut follow_up = Vec::new();
            for action in pending {
                match action {
                    DialogAction::Post(outbound) => dialog_port.post(outbound).await?,
                    DialogAction::Render(_) => {
                        follow_up.extend(dialog.confirm_configured(true, &env)?);
                        follow_up.extend(dialog.save(json!({ "name": "async", "tags": ["t"] }), &env)?);
                    },
                    DialogAction::Close { .. } => return Ok(()),
                    _ => {},
                }
            }
            if !follow_up.is_empty() {
                pending = follow_up;
                continue;
            }
            let Some(delivery) = dialog_port.recv().await? else {
                return Err("dialog port closed".into());
            };
            pending = dialog.handle_delivery(&delivery, &env)?;
        }
    });

    sim.run().expect("simulation failed");

    assert_eq!(store.write_count(), 1);
    assert_eq!(
        store.get("confdialog-values").unwrap().as_deref(),
        Some(r#"{"name":"async","tags":["t"]}"#)
    );
    assert_eq!(bus.stats().discarded, 0);
}

#[test]
fn handshake_timeout_in_virtual_time() {
    let mut sim =
        turmoil::Builder::new().simulation_duration(Duration::from_secs(120)).build();
    let bus = SimBus::new();
    let host_port = bus.attach(ContextId::new(HOST_CONTEXT), Origin::new(HOST_ORIGIN));

    sim.client("host", async move {
        let env = SimEnv::new();
        let mut host = host_endpoint(MemoryStore::new());
        let started = env.now();
        host.open("app.example", started, &env)?;

        loop {
            tokio::select! {
                delivery = host_port.recv() => {
                    if let Some(delivery) = delivery? {
                        host.handle_delivery(&delivery, &env)?;
                    }
                },
                () = env.sleep(Duration::from_secs(1)) => {
                    let actions = host.tick(env.now());
                    if actions.iter().any(|action| matches!(action, HostAction::Teardown { .. })) {
                        let waited = env.now() - started;
                        assert!(waited > Duration::from_secs(30), "{waited:?}");
                        assert!(waited <= Duration::from_secs(32), "{waited:?}");
                        return Ok(());
                    }
                },
            }
        }
    });

    sim.run().expect("simulation failed");
}
