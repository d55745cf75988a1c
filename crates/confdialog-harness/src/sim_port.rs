//! [`MessagePort`] over a [`SimBus`].

use std::io;

use async_trait::async_trait;
use confdialog_core::transport::{ContextId, Delivery, MessagePort, Origin, Outbound};
use tokio::sync::{Mutex, mpsc};

use crate::sim_bus::SimBus;

/// One context's end of the bus.
///
/// Deliveries arrive in posting order. Synchronous scenario code drains the
/// port with [`SimPort::try_recv`]; async drivers use [`MessagePort::recv`].
pub struct SimPort {
    bus: SimBus,
    id: ContextId,
    origin: Origin,
    inbox: Mutex<mpsc::UnboundedReceiver<Delivery>>,
}

impl SimPort {
    pub(crate) fn new(
        bus: SimBus,
        id: ContextId,
        origin: Origin,
        inbox: mpsc::UnboundedReceiver<Delivery>,
    ) -> Self {
        Self { bus, id, origin, inbox: Mutex::new(inbox) }
    }

    /// This context
    pub fn id(&self) -> &ContextId {
        &self.id
    }

    /// This context's origin
    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    /// Next queued delivery, without waiting
    ///
    /// Returns `None` when nothing is queued or an async `recv` holds the
    /// inbox.
    pub fn try_recv(&self) -> Option<Delivery> {
        self.inbox.try_lock().ok()?.try_recv().ok()
    }
}

#[async_trait]
impl MessagePort for SimPort {
    async fn post(&self, message: Outbound) -> io::Result<()> {
        if !self.bus.is_attached(&self.id) {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                format!("context {} is detached", self.id),
            ));
        }
        self.bus.route(&self.id, message);
        Ok(())
    }

    async fn recv(&self) -> io::Result<Option<Delivery>> {
        Ok(self.inbox.lock().await.recv().await)
    }
}

impl std::fmt::Debug for SimPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimPort").field("id", &self.id).field("origin", &self.origin).finish()
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    #[test]
    fn ports_exchange_in_order() {
        let mut sim = turmoil::Builder::new().build();

        sim.client("ports", async {
            let bus = SimBus::new();
            let host = bus.attach(ContextId::new("host"), Origin::new("https://host.example"));
            let dialog =
                bus.attach(ContextId::new("dialog"), Origin::new("https://dialog.example"));

            for payload in [&b"first"[..], &b"second"[..]] {
                dialog
                    .post(Outbound {
                        target: host.id().clone(),
                        target_origin: host.origin().clone(),
                        payload: Bytes::copy_from_slice(payload),
                    })
                    .await?;
            }

            let first = host.recv().await?.map(|delivery| delivery.payload);
            let second = host.recv().await?.map(|delivery| delivery.payload);
            assert_eq!(first, Some(Bytes::from_static(b"first")));
            assert_eq!(second, Some(Bytes::from_static(b"second")));

            Ok(())
        });

        sim.run().expect("simulation failed");
    }

    #[test]
    fn detached_port_cannot_post() {
        let mut sim = turmoil::Builder::new().build();

        sim.client("detached", async {
            let bus = SimBus::new();
            let dialog =
                bus.attach(ContextId::new("dialog"), Origin::new("https://dialog.example"));
            bus.detach(dialog.id());

            let result = dialog
                .post(Outbound {
                    target: ContextId::new("host"),
                    target_origin: Origin::any(),
                    payload: Bytes::new(),
                })
                .await;

            assert_eq!(result.unwrap_err().kind(), io::ErrorKind::NotConnected);
            assert_eq!(dialog.recv().await?, None);

            Ok(())
        });

        sim.run().expect("simulation failed");
    }
}
