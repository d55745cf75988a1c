//! In-memory message channel between execution contexts.
//!
//! Every context attaches with its origin and gets a [`SimPort`]. Posting
//! follows cross-origin messaging rules: the sender's origin is stamped on
//! the delivery by the bus (a context cannot lie about where it lives), and a
//! post whose target origin does not admit the receiver is silently
//! discarded.
//!
//! Tests that need an attacker attach one more context at a foreign origin
//! and post from it. [`SimBus::inject`] additionally redelivers a captured
//! delivery as-is, which is how replays from the genuine peer are simulated.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use confdialog_core::transport::{ContextId, Delivery, Origin, Outbound};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::sim_port::SimPort;

/// Delivery counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusStats {
    /// Posts attempted by attached contexts
    pub posted: usize,
    /// Deliveries queued, including injected ones
    pub delivered: usize,
    /// Posts dropped by origin filtering or for a missing receiver
    pub discarded: usize,
    /// Deliveries queued through [`SimBus::inject`]
    pub injected: usize,
}

/// Shared message bus; clones refer to the same bus
#[derive(Clone, Default)]
pub struct SimBus {
    inner: Arc<Mutex<BusInner>>,
}

#[derive(Default)]
struct BusInner {
    mailboxes: BTreeMap<ContextId, Mailbox>,
    stats: BusStats,
}

struct Mailbox {
    origin: Origin,
    sender: mpsc::UnboundedSender<Delivery>,
}

impl SimBus {
    /// Create an empty bus
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a context at `origin`.
    ///
    /// Attaching an existing id replaces its mailbox; the old port then
    /// sees end-of-stream.
    pub fn attach(&self, id: ContextId, origin: Origin) -> SimPort {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.lock().mailboxes.insert(id.clone(), Mailbox { origin: origin.clone(), sender });
        debug!(context = %id, %origin, "context attached");
        SimPort::new(self.clone(), id, origin, receiver)
    }

    /// Remove a context; its port sees end-of-stream once drained
    pub fn detach(&self, id: &ContextId) -> bool {
        let removed = self.lock().mailboxes.remove(id).is_some();
        if removed {
            debug!(context = %id, "context detached");
        }
        removed
    }

    /// Whether `id` is attached
    pub fn is_attached(&self, id: &ContextId) -> bool {
        self.lock().mailboxes.contains_key(id)
    }

    /// Origin of an attached context
    pub fn origin_of(&self, id: &ContextId) -> Option<Origin> {
        self.lock().mailboxes.get(id).map(|mailbox| mailbox.origin.clone())
    }

    /// Post `message` on behalf of `from`.
    ///
    /// Returns whether the message was queued. Discarded posts are counted,
    /// not reported.
    pub fn route(&self, from: &ContextId, message: Outbound) -> bool {
        let mut guard = self.lock();
        let inner = &mut *guard;
        inner.stats.posted += 1;

        let Some(origin) = inner.mailboxes.get(from).map(|mailbox| mailbox.origin.clone()) else {
            debug!(context = %from, "post from detached context discarded");
            inner.stats.discarded += 1;
            return false;
        };
        let Some(target) = inner.mailboxes.get(&message.target) else {
            debug!(target = %message.target, "post to unknown context discarded");
            inner.stats.discarded += 1;
            return false;
        };
        if !message.target_origin.admits(&target.origin) {
            debug!(
                target = %message.target,
                target_origin = %message.target_origin,
                actual = %target.origin,
                "post discarded by origin check"
            );
            inner.stats.discarded += 1;
            return false;
        }

        let delivery = Delivery { payload: message.payload, origin, source: from.clone() };
        if target.sender.send(delivery).is_err() {
            inner.stats.discarded += 1;
            return false;
        }
        trace!(from = %from, to = %message.target, "queued");
        inner.stats.delivered += 1;
        true
    }

    /// Queue `delivery` for `target` verbatim, bypassing origin stamping
    pub fn inject(&self, target: &ContextId, delivery: Delivery) -> bool {
        let mut inner = self.lock();
        let Some(mailbox) = inner.mailboxes.get(target) else {
            return false;
        };
        if mailbox.sender.send(delivery).is_err() {
            return false;
        }
        inner.stats.injected += 1;
        inner.stats.delivered += 1;
        true
    }

    /// Counters so far
    pub fn stats(&self) -> BusStats {
        self.lock().stats
    }

    fn lock(&self) -> MutexGuard<'_, BusInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for SimBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("SimBus")
            .field("contexts", &inner.mailboxes.keys().collect::<Vec<_>>())
            .field("stats", &inner.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    fn outbound(target: &str, target_origin: Origin) -> Outbound {
        Outbound {
            target: ContextId::new(target),
            target_origin,
            payload: Bytes::from_static(b"hello"),
        }
    }

    #[test]
    fn delivery_is_stamped_with_sender_origin() {
        let bus = SimBus::new();
        let _host = bus.attach(ContextId::new("host"), Origin::new("https://host.example"));
        let dialog = bus.attach(ContextId::new("dialog"), Origin::new("https://dialog.example"));

        assert!(bus.route(&ContextId::new("host"), outbound("dialog", Origin::any())));

        let delivery = dialog.try_recv().unwrap();
        assert_eq!(delivery.origin, Origin::new("https://host.example"));
        assert_eq!(delivery.source, ContextId::new("host"));
        assert_eq!(delivery.payload, Bytes::from_static(b"hello"));
    }

    #[test]
    fn origin_mismatch_is_discarded() {
        let bus = SimBus::new();
        let _host = bus.attach(ContextId::new("host"), Origin::new("https://host.example"));
        let dialog = bus.attach(ContextId::new("dialog"), Origin::new("https://evil.example"));

        let queued = bus.route(
            &ContextId::new("host"),
            outbound("dialog", Origin::new("https://dialog.example")),
        );

        assert!(!queued);
        assert!(dialog.try_recv().is_none());
        assert_eq!(bus.stats(), BusStats { posted: 1, delivered: 0, discarded: 1, injected: 0 });
    }

    #[test]
    fn detached_contexts_neither_send_nor_receive() {
        let bus = SimBus::new();
        let _host = bus.attach(ContextId::new("host"), Origin::new("https://host.example"));
        let _dialog = bus.attach(ContextId::new("dialog"), Origin::new("https://dialog.example"));

        assert!(bus.detach(&ContextId::new("dialog")));

        assert!(!bus.route(&ContextId::new("host"), outbound("dialog", Origin::any())));
        assert!(!bus.route(&ContextId::new("dialog"), outbound("host", Origin::any())));
        assert_eq!(bus.stats().discarded, 2);
    }

    #[test]
    fn inject_replays_verbatim() {
        let bus = SimBus::new();
        let host = bus.attach(ContextId::new("host"), Origin::new("https://host.example"));
        let forged = Delivery {
            payload: Bytes::from_static(b"again"),
            origin: Origin::new("https://dialog.example"),
            source: ContextId::new("dialog"),
        };

        assert!(bus.inject(&ContextId::new("host"), forged.clone()));

        assert_eq!(host.try_recv(), Some(forged));
        assert_eq!(bus.stats().injected, 1);
    }
}
